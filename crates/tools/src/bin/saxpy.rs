//! Compile and run a saxpy kernel: `stream2[i] = scale * stream0[i] + stream1[i]`.
//!
//! Usage: `saxpy [--n N] [--scale S] [--cache-dir DIR]`
//!
//! Needs a host C++ compiler with AVX support.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

use tlang_codegen::{Compiler, CompilerOptions};
use tlang_foundation::{Address, AlignedBuffer};
use tlang_ir::{Expr, KernelBuilder, load};

#[derive(Parser, Debug)]
#[command(name = "saxpy")]
#[command(about = "JIT-compile and run a saxpy kernel over three streams")]
struct Args {
    /// Number of elements, rounded up to the vector width
    #[arg(long, default_value_t = 64)]
    n: usize,

    /// Scale factor applied to stream 0
    #[arg(long, default_value_t = 2.0)]
    scale: f64,

    /// Kernel cache directory
    #[arg(long = "cache-dir", default_value = "_tlang_cache/")]
    cache_dir: PathBuf,
}

fn build_saxpy(scale: f64) -> Result<Expr, tlang_ir::Error> {
    let element = |stream| Address::stream(stream).with_coeff_i(1);
    let x = load(element(0))?;
    let y = load(element(1))?;
    let mut builder = KernelBuilder::new();
    builder.store(&(&(&x * scale) + &y), element(2))?;
    Ok(builder.finish())
}

fn main() {
    tlang_tools::init_logging();

    let args = Args::parse();
    let options = CompilerOptions {
        cache_dir: args.cache_dir.clone(),
        ..CompilerOptions::default()
    };
    let simd_width = options.simd_width;
    let n = args.n.div_ceil(simd_width) * simd_width;

    let root = match build_saxpy(args.scale) {
        Ok(root) => root,
        Err(e) => {
            error!("failed to build kernel expression: {e}");
            process::exit(1);
        }
    };

    let mut compiler = Compiler::new(options);
    let kernel = match compiler.compile(&root) {
        Ok(kernel) => kernel,
        Err(e) => {
            error!("kernel compilation failed: {e}");
            process::exit(1);
        }
    };

    let mut s0 = AlignedBuffer::zeroed(n);
    let mut s1 = AlignedBuffer::zeroed(n);
    let mut s2 = AlignedBuffer::zeroed(n);
    for i in 0..n {
        s0[i] = i as f32;
        s1[i] = (n - i) as f32;
    }

    // SAFETY: the buffers are 64-byte aligned, hold exactly n elements, and
    // the kernel addresses elements 0..n of each stream.
    unsafe { kernel.run(&mut s0, &mut s1, &mut s2, n as i32) };

    let checksum: f32 = s2.iter().sum();
    info!(n, scale = args.scale, checksum, "kernel executed");
    for i in 0..n.min(4) {
        info!("stream2[{i}] = {}", s2[i]);
    }
}
