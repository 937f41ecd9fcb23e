//! Superword-level-parallelism grouping
//!
//! Optional front end for kernels whose stores were not pre-grouped by the
//! user. The graph is flattened into a post-order instruction list, then
//! maximal runs of address-adjacent loads are peeled off greedily: starting
//! from an ungrouped load, the run is extended by whichever ungrouped load
//! sits exactly one element further, until no extension exists. The longest
//! run wins each round; rounds repeat until no load is left ungrouped.
//!
//! Runs are recorded as found - a run whose length is not a multiple of the
//! pack size is kept and only warned about.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::node::{Expr, NodeKind};

/// Flatten the graph under `root` into post-order, visiting each node once.
pub fn extract_instructions(root: &Expr) -> Vec<Expr> {
    let mut visited = HashSet::new();
    let mut inst = Vec::new();
    walk(root, &mut visited, &mut inst);
    inst
}

fn walk(expr: &Expr, visited: &mut HashSet<usize>, inst: &mut Vec<Expr>) {
    if !visited.insert(expr.node_id()) {
        return;
    }
    let children = expr.borrow().ch.clone();
    for child in &children {
        walk(child, visited, inst);
    }
    inst.push(expr.clone());
}

/// Result of SLP grouping: the flattened instruction list and the discovered
/// load groups, as indices into it.
#[derive(Debug)]
pub struct SlpGroups {
    pub inst: Vec<Expr>,
    pub groups: Vec<Vec<usize>>,
}

impl SlpGroups {
    /// Indices of loads that ended up in no group.
    pub fn ungrouped_loads(&self) -> Vec<usize> {
        let grouped: HashSet<usize> = self.groups.iter().flatten().copied().collect();
        self.inst
            .iter()
            .enumerate()
            .filter(|(i, e)| e.kind() == NodeKind::Load && !grouped.contains(i))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Group address-adjacent loads under `root` into maximal runs.
pub fn group_loads(root: &Expr, group_size: usize) -> SlpGroups {
    debug_assert!(group_size > 0);
    let inst = extract_instructions(root);
    debug!(instructions = inst.len(), "extracted instruction list");

    let mut grouped = vec![false; inst.len()];
    let mut groups: Vec<Vec<usize>> = Vec::new();

    loop {
        let mut best: Option<Vec<usize>> = None;
        for i in 0..inst.len() {
            let run = continuous_loads(&inst, &grouped, i);
            if run.len() > best.as_ref().map_or(0, Vec::len) {
                best = Some(run);
            }
        }
        let Some(run) = best else { break };

        if run.len() % group_size != 0 {
            warn!(
                run = run.len(),
                group_size, "load run length is not a multiple of the pack size"
            );
        }
        for &idx in &run {
            grouped[idx] = true;
        }
        groups.push(run);
    }

    debug!(groups = groups.len(), "load grouping finished");
    SlpGroups { inst, groups }
}

/// The run of neighbouring ungrouped loads starting at `start`.
fn continuous_loads(inst: &[Expr], grouped: &[bool], start: usize) -> Vec<usize> {
    let mut run = Vec::new();
    if grouped[start] || inst[start].kind() != NodeKind::Load {
        return run;
    }
    run.push(start);
    let mut i = start;
    loop {
        let mut found = false;
        for j in 0..inst.len() {
            if grouped[j] || i == j || inst[j].kind() != NodeKind::Load {
                continue;
            }
            let addr_i = inst[i].borrow().addr;
            let addr_j = inst[j].borrow().addr;
            if addr_i.prior_to(&addr_j) {
                run.push(j);
                i = j;
                found = true;
                break;
            }
        }
        if !found {
            break;
        }
    }
    run
}
