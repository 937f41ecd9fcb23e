//! IR errors

use thiserror::Error;
use tlang_foundation::Address;

/// Errors raised while building or vectorizing an expression graph.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("address is not bound to a stream")]
    UninitializedAddress,

    #[error("stream id {0} outside the supported range")]
    StreamOutOfRange(i64),

    #[error("group shape mismatch: {0}")]
    GroupShapeMismatch(String),

    #[error("non-isomorphic pack: {0}")]
    NonIsomorphicPack(String),

    #[error("pack addresses must be pairwise identical or neighbouring: {first:?} vs {second:?}")]
    MixedAdjacency { first: Address, second: Address },
}
