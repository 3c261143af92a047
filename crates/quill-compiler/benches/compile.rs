//! Compilation throughput benchmarks.
//!
//! Run with `cargo bench -p quill-compiler`.
//!
//! Groups:
//! 1. parse: parse and bind only
//! 2. compile: parse, bind and emit
//! 3. lazy: the same source with nested functions deferred

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use quill_compiler::parser::parse_script;
use quill_compiler::{CompileOptions, compile_script};

/// A script of `n` small functions, each called once.
fn generate_functions(n: usize) -> String {
    let mut source = String::new();
    for i in 0..n {
        source.push_str(&format!(
            "function f{i}(a, b) {{ var t = a * {i}; for (var j = 0; j < b; j++) {{ t += j; }} return t; }}\n"
        ));
    }
    for i in 0..n {
        source.push_str(&format!("f{i}({i}, 3);\n"));
    }
    source
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    let options = CompileOptions::default();
    for size in [10, 100, 1000] {
        let source = generate_functions(size);
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, source| {
            b.iter(|| black_box(parse_script(black_box(source), &options).expect("parse failed")));
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let options = CompileOptions::default();
    for size in [10, 100, 1000] {
        let source = generate_functions(size);
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, source| {
            b.iter(|| black_box(compile_script(black_box(source), &options).expect("compile failed")));
        });
    }
    group.finish();
}

fn bench_lazy(c: &mut Criterion) {
    let mut group = c.benchmark_group("lazy");
    let options = CompileOptions::default().with_lazy_functions(true);
    for size in [100, 1000] {
        let source = generate_functions(size);
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, source| {
            b.iter(|| black_box(compile_script(black_box(source), &options).expect("compile failed")));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_compile, bench_lazy);
criterion_main!(benches);
