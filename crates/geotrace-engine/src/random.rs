//! Random chains in the shape of the tracer parity tests: vector offsets plus `d x d` and
//! `(d+1) x (d+1)` products, each on a random side.

use crate::chain::{ChainOp, ChainSpec, ChainStep, Side};
use crate::expr::Tensor;
use ndarray::{Array, Array1, Array2, IxDyn};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomChainConfig {
    /// Point dimension `d`.
    pub dim: usize,
    pub steps: usize,
    /// Homogeneous matrices are `I + scale * U(-1, 1)`, which keeps `w` away from zero.
    pub homogeneous_scale: f64,
    /// Also emit `"self"` steps (tracer composed with itself).
    pub allow_self: bool,
}

impl Default for RandomChainConfig {
    fn default() -> Self {
        Self {
            dim: 2,
            steps: 4,
            homogeneous_scale: 0.3,
            allow_self: false,
        }
    }
}

pub fn uniform_tensor<R: Rng + ?Sized>(rng: &mut R, shape: &[usize]) -> Tensor {
    Array::from_shape_simple_fn(IxDyn(shape), || rng.gen_range(-1.0..1.0))
}

pub fn random_point<R: Rng + ?Sized>(rng: &mut R, dim: usize) -> Array1<f64> {
    Array1::from_shape_simple_fn(dim, || rng.gen_range(-1.0..1.0))
}

pub fn near_identity<R: Rng + ?Sized>(rng: &mut R, size: usize, scale: f64) -> Array2<f64> {
    let mut m = Array2::<f64>::eye(size);
    m.mapv_inplace(|v| v + scale * rng.gen_range(-1.0..1.0));
    m
}

fn random_side<R: Rng + ?Sized>(rng: &mut R) -> Side {
    if rng.gen_bool(0.5) {
        Side::Left
    } else {
        Side::Right
    }
}

pub fn random_chain<R: Rng + ?Sized>(rng: &mut R, config: &RandomChainConfig) -> ChainSpec {
    let d = config.dim.max(1);
    let kinds = if config.allow_self { 4 } else { 3 };
    let steps = (0..config.steps)
        .map(|_| {
            let side = random_side(rng);
            match rng.gen_range(0..kinds) {
                0 => ChainStep::with_tensor(ChainOp::Add, side, &uniform_tensor(rng, &[d])),
                1 => ChainStep::with_tensor(ChainOp::MatMul, side, &uniform_tensor(rng, &[d, d])),
                2 => ChainStep::with_tensor(
                    ChainOp::MatMul,
                    side,
                    &near_identity(rng, d + 1, config.homogeneous_scale).into_dyn(),
                ),
                _ => ChainStep::with_self(ChainOp::Add, side),
            }
        })
        .collect();
    ChainSpec { steps }
}
