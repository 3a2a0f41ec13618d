use std::time::Instant;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::compiler::Compiler;
use crate::options::EvalOptions;
use crate::random::{random_chain, uniform_tensor, RandomChainConfig};
use crate::tracer::CoordinateTracer;

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResult {
    pub name: String,
    pub iterations: usize,
    pub warmup: usize,
    pub unit: &'static str,
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
    pub std_dev: f64,
    pub target_ms: f64,
    pub passed: bool,
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn median(sorted: &[f64]) -> f64 {
    sorted[sorted.len() / 2]
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64], avg: f64) -> f64 {
    let variance = values
        .iter()
        .map(|x| {
            let d = x - avg;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

fn run_benchmark<F>(
    name: &str,
    iterations: usize,
    warmup: usize,
    target_ms: f64,
    mut f: F,
) -> BenchmarkResult
where
    F: FnMut(),
{
    for _ in 0..warmup {
        f();
    }

    let mut samples: Vec<f64> = Vec::with_capacity(iterations.max(1));
    for _ in 0..iterations.max(1) {
        let start = Instant::now();
        f();
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        samples.push(ms);
    }

    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let avg = mean(&samples);
    let med = median(&samples);
    let p95 = percentile(&samples, 0.95);
    let p99 = percentile(&samples, 0.99);
    let sd = std_dev(&samples, avg);

    BenchmarkResult {
        name: name.to_string(),
        iterations,
        warmup,
        unit: "ms",
        mean: avg,
        median: med,
        p95,
        p99,
        std_dev: sd,
        target_ms,
        passed: p95 <= target_ms,
    }
}

fn long_chain(steps: usize) -> CoordinateTracer {
    let config = RandomChainConfig {
        steps,
        ..RandomChainConfig::default()
    };
    let spec = random_chain(&mut StdRng::seed_from_u64(0x5eed), &config);
    // Random chains only use well-formed operands for `config.dim`.
    match spec.build() {
        Ok(tracer) => tracer,
        Err(err) => {
            log::error!("benchmark chain failed to build: {err}");
            CoordinateTracer::new()
        }
    }
}

/// Timings for compile, naive and optimized evaluation of a long random chain over a point batch.
pub fn run_benchmarks() -> Vec<BenchmarkResult> {
    let tracer = long_chain(64);
    let points: Array2<f64> = match uniform_tensor(&mut StdRng::seed_from_u64(1), &[10_000, 2])
        .into_dimensionality::<ndarray::Ix2>()
    {
        Ok(points) => points,
        Err(_) => Array2::zeros((10_000, 2)),
    };
    let options = EvalOptions::global().clone();

    let mut results = Vec::new();

    results.push(run_benchmark(
        "trace.compile_chain_64.p95",
        50,
        5,
        2.0,
        || {
            let _ = Compiler::compile(tracer.expr(), &[10_000, 2]);
        },
    ));

    results.push(run_benchmark(
        "trace.naive_eval_10k_points.p95",
        20,
        2,
        50.0,
        || {
            let _ = tracer.evaluate_naive(&points);
        },
    ));

    results.push(run_benchmark(
        "trace.optimized_eval_10k_points.p95",
        20,
        2,
        10.0,
        || {
            let _ = tracer.evaluate_with_options(&points, &options);
        },
    ));

    results
}
