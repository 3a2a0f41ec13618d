use std::io::{Read, Write};

use anyhow::{Context, Result};
use clap::Parser;
use geotrace_engine::{
    check_parity, random_chain, random_point, ChainSpec, ParityReport, RandomChainConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{CheckArgs, Cli, Command, OutputFormat, RandomArgs};

#[derive(Debug, Serialize)]
struct JsonTrial<'a> {
    trial: usize,
    chain: &'a ChainSpec,
    report: &'a ParityReport,
}

#[derive(Debug, Serialize)]
struct JsonRandomReport<'a> {
    seed: u64,
    trials: usize,
    failures: usize,
    results: Vec<JsonTrial<'a>>,
}

/// `RUST_LOG` directives when they parse, `warn` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

fn main() -> Result<()> {
    // Library `log` records are bridged into the subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ok = match cli.command {
        Command::Check(args) => run_check(&args)?,
        Command::Random(args) => run_random(&args)?,
    };
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn read_chain(args: &CheckArgs) -> Result<ChainSpec> {
    let text = if args.chain.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read chain from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.chain)
            .with_context(|| format!("read chain {}", args.chain.display()))?
    };
    ChainSpec::from_json(&text).with_context(|| format!("parse chain {}", args.chain.display()))
}

fn run_check(args: &CheckArgs) -> Result<bool> {
    let spec = read_chain(args)?;
    let tracer = spec.build().context("build tracer from chain")?;
    let input = cli::parse_input(&args.input)?;
    tracing::info!(expr = %tracer, steps = spec.steps.len(), "checking chain");

    let report = check_parity(&tracer, &input, args.tolerance.tolerance())
        .with_context(|| format!("evaluate {tracer}"))?;

    match args.format {
        OutputFormat::Text => {
            println!("expr:      {}", report.expr);
            println!("input:     {:?}", report.input_shape);
            println!("output:    {:?}", report.output_shape);
            println!("naive:     {:?}", report.naive);
            println!("optimized: {:?}", report.optimized);
            print_diff_line(&report);
        }
        OutputFormat::Json => write_json(&report)?,
    }
    Ok(report.agree)
}

fn run_random(args: &RandomArgs) -> Result<bool> {
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let config = RandomChainConfig {
        dim: args.dim,
        steps: args.steps,
        allow_self: args.allow_self,
        ..RandomChainConfig::default()
    };
    tracing::info!(seed, trials = args.trials, dim = args.dim, "running random trials");

    let mut trials = Vec::with_capacity(args.trials);
    for trial in 0..args.trials {
        let chain = random_chain(&mut rng, &config);
        let input = random_point(&mut rng, config.dim.max(1));
        let tracer = chain
            .build()
            .with_context(|| format!("build random chain #{trial}"))?;
        let report = check_parity(&tracer, &input, args.tolerance.tolerance())
            .with_context(|| format!("evaluate random chain #{trial}: {tracer}"))?;
        if !report.agree {
            tracing::warn!(trial, expr = %report.expr, "naive and optimized results differ");
        }
        trials.push((chain, report));
    }
    let failures = trials.iter().filter(|(_, r)| !r.agree).count();

    match args.format {
        OutputFormat::Text => {
            println!("seed: {seed}");
            for (trial, (_, report)) in trials.iter().enumerate() {
                print!("#{trial:<4} ");
                print_diff_line(report);
            }
            println!();
            println!("Summary: trials={} failures={failures}", trials.len());
        }
        OutputFormat::Json => {
            let results = trials
                .iter()
                .enumerate()
                .map(|(trial, (chain, report))| JsonTrial {
                    trial,
                    chain,
                    report,
                })
                .collect();
            write_json(&JsonRandomReport {
                seed,
                trials: trials.len(),
                failures,
                results,
            })?;
        }
    }
    Ok(failures == 0)
}

fn print_diff_line(report: &ParityReport) {
    let diff = report
        .max_abs_diff
        .map(|d| format!("{d:.3e}"))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "{}  max|diff|={diff}  rtol={} atol={}",
        if report.agree { "AGREE" } else { "DIFFER" },
        report.tolerance.rtol,
        report.tolerance.atol
    );
}

fn write_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer(&mut handle, value)?;
    handle.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn log_filter_defaults_to_warn() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(log_filter(Some("geotrace=loud")).max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn log_filter_honors_rust_log() {
        assert_eq!(log_filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(log_filter(Some("error")).max_level_hint(), Some(LevelFilter::ERROR));
    }
}
