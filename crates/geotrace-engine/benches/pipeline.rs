use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geotrace_engine::{random_chain, uniform_tensor, RandomChainConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn bench_points() -> usize {
    std::env::var("GEOTRACE_BENCH_POINTS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| v >= 1_000 && v <= 5_000_000)
        .unwrap_or(100_000)
}

fn naive_vs_optimized(c: &mut Criterion) {
    let points = bench_points();
    let input = uniform_tensor(&mut StdRng::seed_from_u64(3), &[points, 2]);

    let mut group = c.benchmark_group("chain_eval");
    group.throughput(Throughput::Elements(points as u64));

    for steps in [4usize, 16, 64] {
        let config = RandomChainConfig {
            steps,
            ..RandomChainConfig::default()
        };
        let tracer = random_chain(&mut StdRng::seed_from_u64(steps as u64), &config)
            .build()
            .expect("build chain");
        // Warm the program cache so the optimized numbers exclude compilation.
        tracer.evaluate(&input).expect("compile chain");

        group.bench_with_input(BenchmarkId::new("naive", steps), &steps, |b, _| {
            b.iter(|| black_box(tracer.evaluate_naive(black_box(&input)).expect("naive")))
        });
        group.bench_with_input(BenchmarkId::new("optimized", steps), &steps, |b, _| {
            b.iter(|| black_box(tracer.evaluate(black_box(&input)).expect("optimized")))
        });
    }

    group.finish();
}

criterion_group!(benches, naive_vs_optimized);
criterion_main!(benches);
