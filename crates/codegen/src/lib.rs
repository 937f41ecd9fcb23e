//! tlang Codegen
//!
//! Lowers vectorized expression graphs to C++ source using SIMD intrinsics,
//! hands the source to a compile-and-load backend, and returns a callable
//! kernel.
//!
//! Pipeline: vectorized IR -> [`Emitter`] -> source text -> [`KernelBackend`]
//! -> [`Kernel`]

mod backend;
mod compiler;
mod emit;
mod error;

pub use backend::{BackendError, CompileRequest, CxxBackend, Kernel, KernelBackend, KernelFn};
pub use compiler::{Compiler, CompilerOptions, KernelId, KernelIds, Mode};
pub use emit::Emitter;
pub use error::Error;
