//! Compile-and-load backend
//!
//! The pipeline hands emitted source to a [`KernelBackend`] and gets back a
//! callable [`Kernel`]. The trait keeps the native toolchain swappable:
//! production uses [`CxxBackend`] (write source, invoke a C++ compiler, load
//! the shared object), tests substitute recording or in-memory backends.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use libloading::Library;
use thiserror::Error;
use tracing::debug;

use crate::compiler::KernelId;

/// Entry point signature of every compiled kernel: three stream pointers
/// and the element count.
pub type KernelFn = unsafe extern "C" fn(*mut f32, *mut f32, *mut f32, i32);

/// One compilation job for a backend.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Emitted C++ source text.
    pub source: String,
    /// Directory the backend may persist artifacts into.
    pub cache_dir: PathBuf,
    pub kernel_id: KernelId,
    /// Symbol to resolve from the produced library.
    pub symbol: String,
}

impl CompileRequest {
    pub fn source_path(&self) -> PathBuf {
        self.cache_dir.join(self.kernel_id.source_file())
    }

    pub fn library_path(&self) -> PathBuf {
        self.cache_dir.join(self.kernel_id.library_file())
    }
}

/// Failures of the external toolchain.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to write kernel source {path}: {source}")]
    WriteSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to invoke `{compiler}`: {source}")]
    CompilerSpawn {
        compiler: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{compiler}` failed ({status}):\n{stderr}")]
    CompileFailed {
        compiler: String,
        status: String,
        stderr: String,
    },

    #[error("failed to load kernel library {path}: {source}")]
    LoadLibrary {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol `{symbol}` missing from kernel library: {source}")]
    MissingSymbol {
        symbol: String,
        #[source]
        source: libloading::Error,
    },
}

/// Turns emitted source into a callable kernel.
pub trait KernelBackend {
    fn compile_and_load(&self, request: &CompileRequest) -> Result<Kernel, BackendError>;
}

/// Default backend: persist the source into the cache directory, compile it
/// with a host C++ compiler and load the resulting shared object.
pub struct CxxBackend {
    cxx: String,
    flags: Vec<String>,
}

impl CxxBackend {
    pub fn new(cxx: String, flags: Vec<String>) -> Self {
        Self { cxx, flags }
    }
}

impl KernelBackend for CxxBackend {
    fn compile_and_load(&self, request: &CompileRequest) -> Result<Kernel, BackendError> {
        let source_path = request.source_path();
        let library_path = request.library_path();

        fs::create_dir_all(&request.cache_dir).map_err(|e| BackendError::WriteSource {
            path: request.cache_dir.clone(),
            source: e,
        })?;
        fs::write(&source_path, &request.source).map_err(|e| BackendError::WriteSource {
            path: source_path.clone(),
            source: e,
        })?;

        debug!(source = %source_path.display(), compiler = %self.cxx, "compiling kernel source");
        let output = Command::new(&self.cxx)
            .arg(&source_path)
            .args(&self.flags)
            .arg("-o")
            .arg(&library_path)
            .output()
            .map_err(|e| BackendError::CompilerSpawn {
                compiler: self.cxx.clone(),
                source: e,
            })?;
        if !output.status.success() {
            return Err(BackendError::CompileFailed {
                compiler: self.cxx.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        // SAFETY: the library was just produced by the compiler above; it
        // only exports the kernel entry point and has no initializers.
        let library = unsafe { Library::new(&library_path) }.map_err(|e| {
            BackendError::LoadLibrary {
                path: library_path.clone(),
                source: e,
            }
        })?;
        // SAFETY: the emitted source declares `symbol` with the KernelFn ABI.
        let func = unsafe {
            library
                .get::<KernelFn>(request.symbol.as_bytes())
                .map(|sym| *sym)
                .map_err(|e| BackendError::MissingSymbol {
                    symbol: request.symbol.clone(),
                    source: e,
                })?
        };

        Ok(Kernel {
            _library: Some(library),
            func,
        })
    }
}

/// A loaded, callable kernel.
///
/// Keeps the backing library handle alive for as long as the kernel exists;
/// dropping the kernel unloads the library.
#[derive(Debug)]
pub struct Kernel {
    _library: Option<Library>,
    func: KernelFn,
}

impl Kernel {
    /// Wrap a bare function pointer, for backends that do not go through a
    /// shared library (in-memory JITs, test doubles).
    pub fn from_fn(func: KernelFn) -> Self {
        Self {
            _library: None,
            func,
        }
    }

    /// The raw entry point.
    pub fn as_fn(&self) -> KernelFn {
        self.func
    }

    /// Run the kernel over the first `n` logical elements of the three
    /// streams.
    ///
    /// # Safety
    ///
    /// The stream buffers must be aligned for the kernel's SIMD width (64
    /// bytes covers both) and large enough for every address the kernel's
    /// expression graph evaluates over `i in 0..n` - the kernel performs no
    /// bounds checks. `n` must match the iteration count the expressions
    /// were written against.
    pub unsafe fn run(&self, s0: &mut [f32], s1: &mut [f32], s2: &mut [f32], n: i32) {
        unsafe {
            (self.func)(s0.as_mut_ptr(), s1.as_mut_ptr(), s2.as_mut_ptr(), n);
        }
    }
}
