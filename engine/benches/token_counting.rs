//! Token counting benchmarks
//!
//! Measures the estimator against the exact tiktoken backends on generated
//! source text of increasing size.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use repodigest_engine::tokenizer::{estimate_tokens, Telemetry};
use repodigest_engine::BackendManager;

/// Generate Rust-looking source of roughly `lines` lines
fn generate_source(lines: usize) -> String {
    let mut content = String::from("//! Generated module\n\n");
    for i in 0..lines / 8 {
        content.push_str(&format!(
            r#"
/// Function {i} documentation
pub fn function_{i}(x: i32, y: i32) -> i32 {{
    let result = x + y;
    if result > 100 {{
        return result * 2;
    }}
    result
}}
"#
        ));
    }
    content
}

fn bench_counting(c: &mut Criterion) {
    let manager = BackendManager::with_default_backends().expect("tiktoken tables load");
    let mut group = c.benchmark_group("token_counting");

    for lines in [100, 1_000, 10_000] {
        let source = generate_source(lines);
        group.throughput(Throughput::Bytes(source.len() as u64));

        group.bench_with_input(BenchmarkId::new("estimate", lines), &source, |b, s| {
            b.iter(|| estimate_tokens(black_box(s)))
        });

        for model in ["gpt-4o", "gpt-4"] {
            group.bench_with_input(BenchmarkId::new(model, lines), &source, |b, s| {
                let mut telemetry = Telemetry::new();
                b.iter(|| manager.count(black_box(s), model, &mut telemetry))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_counting);
criterion_main!(benches);
