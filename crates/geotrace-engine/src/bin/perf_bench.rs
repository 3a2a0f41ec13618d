use std::io::Write;

fn main() {
    let results = geotrace_engine::run_benchmarks();
    let failed = results.iter().filter(|r| !r.passed).count();

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    match serde_json::to_writer_pretty(&mut handle, &results) {
        Ok(()) => {
            let _ = handle.write_all(b"\n");
        }
        Err(err) => {
            eprintln!("failed to write benchmark results: {err}");
            std::process::exit(2);
        }
    }

    if failed > 0 {
        eprintln!("{failed} benchmark(s) exceeded their p95 target");
        std::process::exit(1);
    }
}
