//! Compilation pipeline
//!
//! [`Compiler`] ties the passes together: vectorize the user's expression
//! graph, emit SIMD source, and hand it to the configured backend for
//! native compilation and loading. One compilation is synchronous and
//! single-threaded; it either returns a callable kernel or the first error.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tlang_ir::{Expr, Vectorizer};

use crate::backend::{CompileRequest, CxxBackend, Kernel, KernelBackend};
use crate::emit::Emitter;
use crate::error::Error;

/// Kernel ids (and emitted variable names) are capped at this many.
const MAX_KERNELS: u32 = 10000;

/// Emission mode. Only vectorized emission is implemented; the scalar
/// reference path is rejected at compile entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Scalar,
    #[default]
    Vector,
}

/// Configuration for a [`Compiler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerOptions {
    /// Lane count of the target SIMD unit: 8 (AVX) or 16 (AVX-512).
    pub simd_width: usize,
    /// How many semantically related scalar operations pack into one vector
    /// instruction.
    pub group_size: usize,
    pub mode: Mode,
    /// Directory kernel sources and shared objects are written to.
    pub cache_dir: PathBuf,
    /// C++ compiler the default backend invokes.
    pub cxx: String,
    pub cxx_flags: Vec<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            simd_width: 8,
            group_size: 1,
            mode: Mode::Vector,
            cache_dir: PathBuf::from("_tlang_cache/"),
            cxx: "g++".to_string(),
            cxx_flags: [
                "-std=c++14",
                "-shared",
                "-fPIC",
                "-O3",
                "-march=native",
                "-D_GLIBCXX_USE_CXX11_ABI=0",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

/// Identifier of one compiled kernel, allocated by [`KernelIds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelId(u32);

impl KernelId {
    pub fn get(self) -> u32 {
        self.0
    }

    /// Exported symbol name of the kernel entry point.
    pub fn func_name(self) -> String {
        format!("func{:06}", self.0)
    }

    /// File name of the emitted source inside the cache directory.
    pub fn source_file(self) -> String {
        format!("tmp{:04}.cpp", self.0)
    }

    /// File name of the compiled shared library inside the cache directory.
    pub fn library_file(self) -> String {
        if cfg!(target_os = "macos") {
            format!("tmp{:04}.dylib", self.0)
        } else {
            format!("tmp{:04}.so", self.0)
        }
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Monotonic kernel id allocator.
///
/// Held per [`Compiler`] rather than as process-global state, so independent
/// compilers can coexist; compilers sharing one cache directory must not run
/// concurrently.
#[derive(Debug, Default)]
pub struct KernelIds {
    next: u32,
}

impl KernelIds {
    pub fn allocate(&mut self) -> Result<KernelId, Error> {
        if self.next >= MAX_KERNELS {
            return Err(Error::KernelIdExhausted);
        }
        let id = KernelId(self.next);
        self.next += 1;
        Ok(id)
    }
}

/// Compiles expression graphs into callable kernels.
pub struct Compiler {
    options: CompilerOptions,
    ids: KernelIds,
    backend: Box<dyn KernelBackend>,
}

impl Compiler {
    /// A compiler using the default C++ backend configured by `options`.
    pub fn new(options: CompilerOptions) -> Self {
        let backend = CxxBackend::new(options.cxx.clone(), options.cxx_flags.clone());
        Self::with_backend(options, Box::new(backend))
    }

    /// A compiler with a custom compile-and-load backend.
    pub fn with_backend(options: CompilerOptions, backend: Box<dyn KernelBackend>) -> Self {
        Self {
            options,
            ids: KernelIds::default(),
            backend,
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compile the kernel rooted at `root` and return its callable.
    pub fn compile(&mut self, root: &Expr) -> Result<Kernel, Error> {
        let (id, source) = self.emit_source(root)?;
        info!(kernel = %id, bytes = source.len(), "compiling kernel");
        let request = CompileRequest {
            symbol: id.func_name(),
            source,
            cache_dir: self.options.cache_dir.clone(),
            kernel_id: id,
        };
        let kernel = self.backend.compile_and_load(&request)?;
        info!(kernel = %id, "kernel loaded");
        Ok(kernel)
    }

    /// Run the pipeline up to source emission, without invoking the backend.
    /// Allocates a kernel id, since the function name embeds it.
    pub fn emit_source(&mut self, root: &Expr) -> Result<(KernelId, String), Error> {
        if self.options.mode != Mode::Vector {
            return Err(Error::UnsupportedMode);
        }
        if self.options.simd_width != 8 && self.options.simd_width != 16 {
            return Err(Error::UnsupportedSimdWidth(self.options.simd_width));
        }
        let group_size = self.options.group_size;
        if group_size == 0 || group_size > self.options.simd_width {
            return Err(Error::UnsupportedAccessPattern(format!(
                "group size {group_size} does not fit simd width {}",
                self.options.simd_width
            )));
        }
        if self.options.simd_width % group_size != 0 {
            warn!(
                simd_width = self.options.simd_width,
                group_size, "insufficient lane usage"
            );
        }
        let num_groups = self.options.simd_width / group_size;

        let id = self.ids.allocate()?;
        let vectorized = Vectorizer::new(group_size, num_groups).run(root)?;
        let source =
            Emitter::new(self.options.simd_width, group_size).emit(&vectorized, &id.func_name())?;
        Ok((id, source))
    }
}
