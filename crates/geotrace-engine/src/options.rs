use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Environment variable overriding [`EvalOptions::parallel_min_points`].
pub const PARALLEL_MIN_POINTS_ENV: &str = "GEOTRACE_PARALLEL_MIN_POINTS";

const DEFAULT_PARALLEL_MIN_POINTS: usize = 4096;

/// Runtime knobs for optimized evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalOptions {
    /// Batches with at least this many points run their perspective divide on the crate-local
    /// rayon pool (when the `parallel` feature is enabled).
    pub parallel_min_points: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            parallel_min_points: DEFAULT_PARALLEL_MIN_POINTS,
        }
    }
}

impl EvalOptions {
    /// Defaults, with `GEOTRACE_PARALLEL_MIN_POINTS` applied when set to a positive integer
    /// (underscores allowed, e.g. `10_000`).
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(PARALLEL_MIN_POINTS_ENV).ok().as_deref())
    }

    /// [`EvalOptions::from_env`] for an explicit variable value. Zero and unparsable values keep
    /// the default.
    pub fn from_env_value(value: Option<&str>) -> Self {
        let mut options = Self::default();
        match value.map(|v| v.trim().replace('_', "").parse::<usize>()) {
            Some(Ok(n)) if n > 0 => options.parallel_min_points = n,
            Some(_) => log::warn!(
                "ignoring {PARALLEL_MIN_POINTS_ENV}={:?}; expected a positive integer",
                value.unwrap_or_default()
            ),
            None => {}
        }
        options
    }

    /// Process-wide options read from the environment once.
    pub fn global() -> &'static EvalOptions {
        static GLOBAL: OnceLock<EvalOptions> = OnceLock::new();
        GLOBAL.get_or_init(EvalOptions::from_env)
    }
}
