//! Addressable property checks
//!
//! Predicates over packs of scalar expressions, consumed by the vectorizer
//! and the code emitter: how the addresses inside a pack relate to each
//! other, and whether the pack is structurally isomorphic.

use crate::error::Error;
use crate::node::{Expr, NodeKind};

/// How the addresses of a pack relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackAdjacency {
    /// Every pair of addresses is identical (broadcast-style access).
    Identical,
    /// Each address is exactly one element past the previous (dense access).
    Neighbouring,
}

/// Classify the addresses of a pack of memory operations.
///
/// A pack is valid when its addresses are pairwise identical, or form a
/// strictly increasing run of same-type addresses stepping by one. Anything
/// else - a pair that is neither, or a mix of both relations - is a
/// [`Error::MixedAdjacency`].
///
/// Single-member packs are trivially [`PackAdjacency::Identical`].
pub fn classify_pack(members: &[Expr]) -> Result<PackAdjacency, Error> {
    let mut has_prior = false;
    let mut has_same = false;
    for pair in members.windows(2) {
        let first = pair[0].borrow().addr;
        let second = pair[1].borrow().addr;
        if first.prior_to(&second) {
            has_prior = true;
        } else if first == second {
            has_same = true;
        } else {
            return Err(Error::MixedAdjacency { first, second });
        }
        if has_prior && has_same {
            return Err(Error::MixedAdjacency { first, second });
        }
    }
    if has_prior {
        Ok(PackAdjacency::Neighbouring)
    } else {
        Ok(PackAdjacency::Identical)
    }
}

/// Check that every member of a pack has the same kind and child count,
/// returning that shared shape.
pub fn check_isomorphic(members: &[Expr]) -> Result<(NodeKind, usize), Error> {
    let first = members
        .first()
        .ok_or_else(|| Error::NonIsomorphicPack("empty pack".into()))?;
    let kind = first.kind();
    let arity = first.borrow().ch.len();
    for member in &members[1..] {
        let node = member.borrow();
        if node.kind != kind {
            return Err(Error::NonIsomorphicPack(format!(
                "expected {kind:?}, found {:?}",
                node.kind
            )));
        }
        if node.ch.len() != arity {
            return Err(Error::NonIsomorphicPack(format!(
                "expected {arity} children, found {}",
                node.ch.len()
            )));
        }
    }
    Ok((kind, arity))
}
