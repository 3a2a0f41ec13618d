#![deny(unsafe_code)]
#![deny(unreachable_patterns)]

//! Deferred coordinate expressions with two evaluation strategies.
//!
//! A [`CoordinateTracer`] records `+` and matrix products ([`MatMul`]) applied to a placeholder
//! coordinate tensor. Binding the placeholder evaluates the recorded expression either:
//!
//! - directly, node by node ([`CoordinateTracer::evaluate_naive`]), or
//! - through a compiled [`Program`] ([`CoordinateTracer::evaluate`]) in which chains of
//!   translations, linear maps and homogeneous (projective) maps are fused into a single
//!   [`Homography`].
//!
//! Both paths agree within [`Tolerance::default`]; [`check_parity`] runs them side by side.
//!
//! ## Coordinates and matrix products
//!
//! Traced values are points of shape `(d,)` or batches of shape `(n, d)`. A constant square
//! matrix next to a traced operand is a *geometric* product:
//!
//! - `d x d` acts linearly (`M @ x` is `M p`, `x @ M` is `p M`);
//! - `(d+1) x (d+1)` acts on `[p, 1]` and is followed by the perspective divide.
//!
//! Everything else follows plain array semantics (broadcasting `+`, numpy `matmul` for ranks 1
//! and 2). Shape problems surface at evaluation time as [`TraceError`]s, identically on both
//! paths.
//!
//! Performance is tracked through [`run_benchmarks`] (see the `perf_bench` binary).

pub mod chain;
pub mod error;
pub mod expr;
pub mod shape;
pub mod tensor;

mod cache;
mod compare;
mod compiler;
mod naive;
mod options;
mod parallel;
mod perf;
mod program;
mod random;
mod tracer;
mod transform;
mod vm;

pub use cache::ProgramCache;
pub use chain::{ChainOp, ChainSpec, ChainStep, Side};
pub use compare::{allclose, check_parity, max_abs_diff, ParityReport, Tolerance};
pub use compiler::Compiler;
pub use error::{OpKind, TraceError, TraceResult};
pub use expr::{Expr, Tensor};
pub use naive::eval_naive;
pub use options::{EvalOptions, PARALLEL_MIN_POINTS_ENV};
pub use perf::{run_benchmarks, BenchmarkResult};
pub use program::{Instruction, OpCode, Program};
pub use random::{near_identity, random_chain, random_point, uniform_tensor, RandomChainConfig};
pub use tracer::{CoordinateTracer, IntoOperand, MatMul};
pub use transform::Homography;
pub use vm::Vm;
