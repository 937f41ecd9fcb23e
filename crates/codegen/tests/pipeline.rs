//! End-to-end pipeline tests: builder -> vectorizer -> emitter -> backend.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tlang_codegen::{
    BackendError, CompileRequest, Compiler, CompilerOptions, Error, Kernel, KernelBackend,
};
use tlang_foundation::{Address, AlignedBuffer};
use tlang_ir::{Expr, KernelBuilder, load};

unsafe extern "C" fn noop(_: *mut f32, _: *mut f32, _: *mut f32, _: i32) {}

/// Backend double that records every request and loads nothing.
#[derive(Default)]
struct RecordingBackend {
    requests: Rc<RefCell<Vec<CompileRequest>>>,
}

impl RecordingBackend {
    fn new() -> (Self, Rc<RefCell<Vec<CompileRequest>>>) {
        let backend = Self::default();
        let requests = backend.requests.clone();
        (backend, requests)
    }
}

impl KernelBackend for RecordingBackend {
    fn compile_and_load(&self, request: &CompileRequest) -> Result<Kernel, BackendError> {
        self.requests.borrow_mut().push(request.clone());
        Ok(Kernel::from_fn(noop))
    }
}

fn compiler_with_recorder(
    simd_width: usize,
    group_size: usize,
) -> (Compiler, Rc<RefCell<Vec<CompileRequest>>>) {
    let (backend, requests) = RecordingBackend::new();
    let options = CompilerOptions {
        simd_width,
        group_size,
        ..CompilerOptions::default()
    };
    (
        Compiler::with_backend(options, Box::new(backend)),
        requests,
    )
}

fn dense(stream: i64, coeff_i: i64, offset: i64) -> Address {
    Address::stream(stream).with_coeff_i(coeff_i).with_offset(offset)
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

#[test]
fn copy_kernel_emits_one_load_and_store_pair() {
    // Eight stores of the same loaded value to the same location collapse
    // into one vector load; the stores stay distinct instructions.
    let mut builder = KernelBuilder::new();
    let value = load(dense(0, 1, 0)).unwrap();
    for _ in 0..8 {
        builder.store(&value, dense(1, 1, 0)).unwrap();
    }

    let (mut compiler, _) = compiler_with_recorder(8, 1);
    let (_, source) = compiler.emit_source(&builder.finish()).unwrap();

    assert_eq!(count_occurrences(&source, "_mm256_load_ps"), 1);
    assert_eq!(count_occurrences(&source, "_mm256_store_ps"), 8);
    assert!(source.contains("_mm256_store_ps(&stream01[0 * n + 8 * g + 0]"));
}

#[test]
fn dense_pair_needs_no_shuffle() {
    // Pairs (a[2i], a[2i+1]) <- (b[2i], b[2i+1]): lanes are already in
    // place, the load is used as-is.
    let b0 = load(dense(0, 2, 0)).unwrap();
    let b1 = load(dense(0, 2, 1)).unwrap();
    let mut builder = KernelBuilder::new();
    builder.store(&b0, dense(1, 2, 0)).unwrap();
    builder.store(&b1, dense(1, 2, 1)).unwrap();
    builder.store(&b0, dense(2, 2, 0)).unwrap();
    builder.store(&b1, dense(2, 2, 1)).unwrap();

    let (mut compiler, _) = compiler_with_recorder(8, 2);
    let (_, source) = compiler.emit_source(&builder.finish()).unwrap();

    assert_eq!(count_occurrences(&source, "_mm256_load_ps"), 1);
    assert!(!source.contains("_mm256_shuffle_ps"));
    assert!(source.contains("auto var_0000 = var_0000_immediate;"));
}

#[test]
fn broadcast_even_uses_low_lane_shuffle() {
    // Both lanes of each pair read b[2i]: broadcast the even elements.
    let even_a = load(dense(0, 2, 0)).unwrap();
    let even_b = load(dense(0, 2, 0)).unwrap();
    let mut builder = KernelBuilder::new();
    builder.store(&even_a, dense(1, 2, 0)).unwrap();
    builder.store(&even_b, dense(1, 2, 1)).unwrap();

    let (mut compiler, _) = compiler_with_recorder(8, 2);
    let (_, source) = compiler.emit_source(&builder.finish()).unwrap();

    assert!(source.contains("_mm256_shuffle_ps"));
    assert!(source.contains("0xA0"));
}

#[test]
fn broadcast_odd_aligns_down_and_shuffles() {
    // Both lanes of each pair read b[2i+1]: the base aligns down to the
    // vector boundary and the odd elements are broadcast.
    let odd_a = load(dense(0, 2, 1)).unwrap();
    let odd_b = load(dense(0, 2, 1)).unwrap();
    let mut builder = KernelBuilder::new();
    builder.store(&odd_a, dense(1, 2, 0)).unwrap();
    builder.store(&odd_b, dense(1, 2, 1)).unwrap();

    let (mut compiler, _) = compiler_with_recorder(8, 2);
    let (_, source) = compiler.emit_source(&builder.finish()).unwrap();

    assert!(source.contains("_mm256_load_ps(&stream00[0 * n + 8 * g + 0])"));
    assert!(source.contains("0xF5"));
}

#[test]
fn unsupported_load_offsets_are_rejected() {
    // A pair reading (b[2i], b[2i+2]) matches no shuffle pattern.
    let a = load(dense(0, 2, 2)).unwrap();
    let b = load(dense(0, 2, 3)).unwrap();
    let mut builder = KernelBuilder::new();
    builder.store(&a, dense(1, 2, 0)).unwrap();
    builder.store(&b, dense(1, 2, 1)).unwrap();

    let (mut compiler, _) = compiler_with_recorder(8, 2);
    let err = compiler.emit_source(&builder.finish()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedAccessPattern(_)));
}

#[test]
fn mixed_adjacency_fails_before_the_backend_runs() {
    let value = Expr::constant(1.0);
    let mut builder = KernelBuilder::new();
    builder.store(&value, dense(0, 2, 0)).unwrap();
    builder.store(&value, dense(0, 2, 2)).unwrap();

    let (mut compiler, requests) = compiler_with_recorder(8, 2);
    let err = compiler.compile(&builder.finish()).unwrap_err();
    assert!(matches!(err, Error::Ir(tlang_ir::Error::MixedAdjacency { .. })));
    assert!(requests.borrow().is_empty());
}

#[test]
fn emitted_variable_names_are_unique() {
    // A diamond-shaped graph: both stores reuse the same loads through
    // different arithmetic. Every `auto` definition must be unique.
    let a = load(dense(0, 1, 0)).unwrap();
    let b = load(dense(1, 1, 0)).unwrap();
    let sum = &a + &b;
    let scaled = &sum * 2.0;
    let mut builder = KernelBuilder::new();
    builder.store(&sum, dense(2, 1, 0)).unwrap();
    builder.store(&scaled, dense(2, 1, 0)).unwrap();

    let (mut compiler, _) = compiler_with_recorder(8, 1);
    let (_, source) = compiler.emit_source(&builder.finish()).unwrap();

    let mut seen = HashSet::new();
    for line in source.lines() {
        if let Some(rest) = line.strip_prefix("auto ") {
            let name = rest.split_whitespace().next().unwrap();
            assert!(seen.insert(name.to_string()), "duplicate definition {name}");
        }
    }
    // The shared sum is defined once and the loads are not re-emitted.
    assert_eq!(count_occurrences(&source, "var_0000 + var_0001"), 1);
    assert_eq!(count_occurrences(&source, "_mm256_load_ps"), 2);
}

#[test]
fn compiling_twice_is_idempotent() {
    let value = load(dense(0, 1, 0)).unwrap();
    let mut builder = KernelBuilder::new();
    builder.store(&value, dense(1, 1, 0)).unwrap();
    let root = builder.finish();

    let (mut compiler, requests) = compiler_with_recorder(8, 1);
    compiler.compile(&root).unwrap();
    compiler.compile(&root).unwrap();

    let requests = requests.borrow();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].kernel_id, requests[1].kernel_id);
    // Same pipeline output modulo the embedded kernel id.
    let renamed = requests[1]
        .source
        .replace(&requests[1].symbol, &requests[0].symbol);
    assert_eq!(requests[0].source, renamed);
}

#[test]
fn scalar_mode_is_rejected() {
    let options = CompilerOptions {
        mode: tlang_codegen::Mode::Scalar,
        ..CompilerOptions::default()
    };
    let (backend, _) = RecordingBackend::new();
    let mut compiler = Compiler::with_backend(options, Box::new(backend));

    let mut builder = KernelBuilder::new();
    builder
        .store(&Expr::constant(0.0), dense(0, 1, 0))
        .unwrap();
    let err = compiler.compile(&builder.finish()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedMode));
}

#[test]
#[ignore = "requires a host g++ with AVX support; run with --ignored"]
fn compiled_kernel_matches_scalar_reference() {
    let n = 32usize;

    // a2[i] = a0[i] * 2.5 + a1[i]
    let x = load(dense(0, 1, 0)).unwrap();
    let y = load(dense(1, 1, 0)).unwrap();
    let mut builder = KernelBuilder::new();
    builder.store(&(&(&x * 2.5) + &y), dense(2, 1, 0)).unwrap();

    let cache = tempfile::tempdir().unwrap();
    let options = CompilerOptions {
        cache_dir: cache.path().to_path_buf(),
        ..CompilerOptions::default()
    };
    let mut compiler = Compiler::new(options);
    let kernel = compiler.compile(&builder.finish()).unwrap();

    let mut s0 = AlignedBuffer::zeroed(n);
    let mut s1 = AlignedBuffer::zeroed(n);
    let mut s2 = AlignedBuffer::zeroed(n);
    for i in 0..n {
        s0[i] = i as f32;
        s1[i] = 0.5 * i as f32;
    }

    // SAFETY: buffers are 64-byte aligned and hold exactly n elements, the
    // kernel addresses elements 0..n.
    unsafe { kernel.run(&mut s0, &mut s1, &mut s2, n as i32) };

    for i in 0..n {
        let expected = s0[i] * 2.5 + s1[i];
        assert_eq!(s2[i], expected, "lane {i}");
    }
}
