//! tlang Tools
//!
//! CLI tools for working with tlang kernels.

use tracing_subscriber::{EnvFilter, fmt};

/// Initialize logging with a default filter.
///
/// Use `RUST_LOG` environment variable to override the default filter.
/// Default is `info` for tlang crates and `warn` for others.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("warn,tlang_codegen=info,tlang_ir=info,tlang_tools=info")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
