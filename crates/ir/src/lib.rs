//! tlang IR - Expression graph for stream kernels
//!
//! Users build a DAG of arithmetic and memory operations over logically
//! indexed streams; the vectorizer turns that scalar graph into a
//! lane-parallel vectorized graph ready for SIMD code emission.
//!
//! Pipeline: builder surface -> scalar IR -> vectorizer -> vectorized IR

mod builder;
mod checks;
mod error;
mod node;
mod slp;
mod vectorize;

pub use builder::{KernelBuilder, NUM_STREAMS, load};
pub use checks::{PackAdjacency, check_isomorphic, classify_pack};
pub use error::Error;
pub use node::{Expr, Node, NodeKind};
pub use slp::{SlpGroups, extract_instructions, group_loads};
pub use vectorize::Vectorizer;

pub use tlang_foundation::Address;
