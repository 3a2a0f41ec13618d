use geotrace_engine::run_benchmarks;

fn main() {
    // `cargo bench -p geotrace-engine` will execute this binary.
    //
    // CI uses `cargo run --bin perf_bench` (JSON output). This file is primarily for local
    // developer iteration with a familiar `cargo bench` entrypoint.
    for r in run_benchmarks() {
        println!(
            "{:<40} p95={:>8.3}ms  target={:>8.3}ms  {}",
            r.name,
            r.p95,
            r.target_ms,
            if r.passed { "PASS" } else { "FAIL" }
        );
    }
}
