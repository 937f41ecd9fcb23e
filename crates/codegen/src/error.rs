//! Codegen errors

use thiserror::Error;

use crate::backend::BackendError;

/// Errors raised while emitting or compiling a kernel.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported access pattern: {0}")]
    UnsupportedAccessPattern(String),

    #[error("unsupported simd width {0}, expected 8 or 16")]
    UnsupportedSimdWidth(usize),

    #[error("scalar emission mode is not implemented")]
    UnsupportedMode,

    #[error("variable budget exhausted while emitting kernel")]
    VariableLimitExceeded,

    #[error("kernel id budget exhausted")]
    KernelIdExhausted,

    #[error(transparent)]
    Ir(#[from] tlang_ir::Error),

    #[error("external compilation failed: {0}")]
    Backend(#[from] BackendError),
}
