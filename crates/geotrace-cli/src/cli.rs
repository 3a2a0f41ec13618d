use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use geotrace_engine::Tolerance;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Evaluate coordinate tracer chains naively and through the fused program, and report whether
/// the two results agree.
#[derive(Parser)]
#[command(name = "geotrace", about = "Compare naive and optimized coordinate tracer evaluation.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate a JSON chain description on one input.
    Check(CheckArgs),
    /// Generate random chains and check every one of them.
    Random(RandomArgs),
}

#[derive(Args)]
pub struct ToleranceArgs {
    /// Relative tolerance.
    #[arg(long, default_value_t = Tolerance::default().rtol)]
    pub rtol: f64,

    /// Absolute tolerance.
    #[arg(long, default_value_t = Tolerance::default().atol)]
    pub atol: f64,
}

impl ToleranceArgs {
    pub fn tolerance(&self) -> Tolerance {
        Tolerance {
            rtol: self.rtol,
            atol: self.atol,
        }
    }
}

#[derive(Args)]
pub struct CheckArgs {
    /// Chain description (`{"steps": [...]}`); `-` reads stdin.
    pub chain: PathBuf,

    /// Input coordinates, comma separated (e.g. `0.5,1.5`). Use `;` between points for a batch.
    #[arg(long, allow_hyphen_values = true)]
    pub input: String,

    #[command(flatten)]
    pub tolerance: ToleranceArgs,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args)]
pub struct RandomArgs {
    /// Number of independent trials.
    #[arg(long, default_value_t = 10)]
    pub trials: usize,

    /// Point dimension.
    #[arg(long, default_value_t = 2)]
    pub dim: usize,

    /// Steps per chain.
    #[arg(long, default_value_t = 4)]
    pub steps: usize,

    /// Also compose tracers with themselves.
    #[arg(long)]
    pub allow_self: bool,

    /// RNG seed (default: random).
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub tolerance: ToleranceArgs,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Parse `1,2` into one point or `1,2;3,4` into a batch of points.
pub fn parse_input(text: &str) -> Result<ndarray::ArrayD<f64>> {
    let rows: Vec<Vec<f64>> = text
        .split(';')
        .map(str::trim)
        .filter(|row| !row.is_empty())
        .map(|row| {
            row.split(',')
                .map(|v| {
                    let v = v.trim();
                    v.parse::<f64>()
                        .with_context(|| format!("invalid coordinate '{v}'"))
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<_>>()?;

    let Some(first) = rows.first() else {
        anyhow::bail!("--input must contain at least one coordinate");
    };
    let dim = first.len();
    if rows.iter().any(|r| r.len() != dim) {
        anyhow::bail!("every point in --input must have {dim} coordinates");
    }

    if text.contains(';') {
        let n = rows.len();
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(ndarray::Array2::from_shape_vec((n, dim), flat)?.into_dyn())
    } else {
        Ok(ndarray::Array1::from(rows.into_iter().flatten().collect::<Vec<_>>()).into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_point_and_batch() {
        assert_eq!(parse_input("0.5, -1").unwrap().shape(), &[2]);
        assert_eq!(parse_input("1,2;3,4;5,6").unwrap().shape(), &[3, 2]);
        assert_eq!(parse_input("1,2;").unwrap().shape(), &[1, 2]);
    }

    #[test]
    fn rejects_ragged_and_garbage() {
        assert!(parse_input("1,2;3").is_err());
        assert!(parse_input("1,x").is_err());
        assert!(parse_input("").is_err());
    }
}
