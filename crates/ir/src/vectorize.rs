//! Vectorization pass
//!
//! Transforms a scalar expression graph rooted at a `Combine` into a
//! vectorized graph: the root's stores are chunked into packs of
//! `group_size` and each pack becomes one vectorized node whose `members`
//! are the scalar siblings it covers.
//!
//! # Algorithm
//!
//! 1. The root must be a `Combine` whose child count is a multiple of
//!    `group_size`, with every direct child a `Store`.
//! 2. Each contiguous chunk of `group_size` stores must have pairwise
//!    identical or pairwise neighbouring addresses; a mix is an error.
//! 3. Packs recurse member-wise: the i-th children of all members form the
//!    i-th synthetic child pack. Members must agree on kind and child count.
//! 4. Packs are memoized by their first member, so shared scalar subgraphs
//!    vectorize to shared vectorized nodes and the result stays a DAG.
//! 5. A pack's address is its first member's; an unspecified AOSOA layout
//!    (`coeff_aosoa_group_size == 0`) is filled in as a flat layout sized to
//!    the vectorization (`num_groups` groups, stride zero).

use indexmap::IndexMap;
use tracing::debug;

use crate::checks::{check_isomorphic, classify_pack};
use crate::error::Error;
use crate::node::{Expr, NodeKind};

/// Vectorizes one scalar `Combine` root per run.
pub struct Vectorizer {
    group_size: usize,
    num_groups: usize,
    scalar_to_vector: IndexMap<Expr, Expr>,
}

impl Vectorizer {
    pub fn new(group_size: usize, num_groups: usize) -> Self {
        Self {
            group_size,
            num_groups,
            scalar_to_vector: IndexMap::new(),
        }
    }

    /// Vectorize the graph under `root`, returning a new vectorized
    /// `Combine`. The scalar graph is left untouched.
    pub fn run(&mut self, root: &Expr) -> Result<Expr, Error> {
        self.scalar_to_vector.clear();

        if root.kind() != NodeKind::Combine {
            return Err(Error::GroupShapeMismatch(format!(
                "kernel root must be a combine, found {:?}",
                root.kind()
            )));
        }
        let stores = root.borrow().ch.clone();
        if self.group_size == 0 || stores.len() % self.group_size != 0 {
            return Err(Error::GroupShapeMismatch(format!(
                "{} stores cannot be packed into groups of {}",
                stores.len(),
                self.group_size
            )));
        }

        let combined = Expr::with_kind(NodeKind::Combine);
        combined.borrow_mut().is_vectorized = true;

        for chunk in stores.chunks(self.group_size) {
            for store in chunk {
                if store.kind() != NodeKind::Store {
                    return Err(Error::GroupShapeMismatch(format!(
                        "combine children must be stores, found {:?}",
                        store.kind()
                    )));
                }
            }
            classify_pack(chunk)?;

            let pack = Expr::with_kind(NodeKind::Store);
            pack.borrow_mut().members = chunk.to_vec();
            let pack = self.vectorize_pack(pack)?;
            combined.borrow_mut().ch.push(pack);
        }

        debug!(
            packs = combined.borrow().ch.len(),
            group_size = self.group_size,
            "vectorized kernel root"
        );
        Ok(combined)
    }

    /// Vectorize one pack whose `members` are already set, returning either
    /// the pack itself or a previously built pack for the same first member.
    fn vectorize_pack(&mut self, pack: Expr) -> Result<Expr, Error> {
        let members = pack.borrow().members.clone();
        debug_assert_eq!(members.len(), self.group_size);

        let first = members[0].clone();
        if let Some(existing) = self.scalar_to_vector.get(&first) {
            let existing_members = existing.borrow().members.clone();
            if existing_members != members {
                return Err(Error::NonIsomorphicPack(
                    "a scalar expression is shared between packs with different lane orders"
                        .into(),
                ));
            }
            return Ok(existing.clone());
        }

        let (_, arity) = check_isomorphic(&members)?;
        pack.borrow_mut().is_vectorized = true;
        self.scalar_to_vector.insert(first.clone(), pack.clone());

        for i in 0..arity {
            let lane_children: Vec<Expr> =
                members.iter().map(|m| m.borrow().ch[i].clone()).collect();
            let child = Expr::with_kind(lane_children[0].kind());
            child.borrow_mut().members = lane_children;
            let child = self.vectorize_pack(child)?;
            pack.borrow_mut().ch.push(child);
        }

        let mut node = pack.borrow_mut();
        node.addr = first.borrow().addr;
        if node.addr.coeff_aosoa_group_size == 0 {
            node.addr.coeff_aosoa_group_size = self.num_groups as i64;
            node.addr.coeff_aosoa_stride = 0;
        }
        drop(node);

        Ok(pack)
    }
}
