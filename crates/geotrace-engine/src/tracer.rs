use crate::cache::ProgramCache;
use crate::error::TraceResult;
use crate::expr::{Expr, Tensor};
use crate::naive::eval_naive;
use crate::options::EvalOptions;
use crate::vm::Vm;
use ndarray::{arr0, Array1, Array2, ArrayBase, ArrayD, Data, Dimension};
use std::fmt;
use std::ops::Add;
use std::sync::Arc;

/// Deferred coordinate expression.
///
/// A tracer starts as a bare placeholder for a coordinate tensor (one point of shape `(d,)` or a
/// batch of shape `(n, d)`). Composing it with `+` or [`MatMul::matmul`] records the operation and
/// returns a new tracer; nothing is computed until [`CoordinateTracer::evaluate`] binds the
/// placeholder to a concrete input.
///
/// ```
/// use geotrace_engine::{CoordinateTracer, MatMul};
/// use ndarray::{arr1, arr2};
///
/// let coords = CoordinateTracer::new();
/// let coords = coords + arr1(&[1.0, 2.0]);
/// let coords = arr2(&[[0.0, 1.0], [1.0, 0.0]]).matmul(coords);
///
/// let out = coords.evaluate(&arr1(&[1.0, 1.0])).unwrap();
/// assert_eq!(out, arr1(&[3.0, 2.0]).into_dyn());
/// ```
#[derive(Clone)]
pub struct CoordinateTracer {
    expr: Arc<Expr>,
    programs: Arc<ProgramCache>,
}

impl Default for CoordinateTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinateTracer {
    pub fn new() -> Self {
        Self::from_expr(Arc::new(Expr::Input))
    }

    pub fn from_expr(expr: Arc<Expr>) -> Self {
        Self {
            expr,
            programs: Arc::new(ProgramCache::new()),
        }
    }

    #[inline]
    pub fn expr(&self) -> &Arc<Expr> {
        &self.expr
    }

    /// Number of programs compiled so far (one per distinct input shape).
    pub fn compiled_programs(&self) -> usize {
        self.programs.program_count()
    }

    /// Bind the placeholder to `input` and evaluate the compiled (fused) program.
    pub fn evaluate<S, D>(&self, input: &ArrayBase<S, D>) -> TraceResult<Tensor>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        self.evaluate_with_options(input, EvalOptions::global())
    }

    pub fn evaluate_with_options<S, D>(
        &self,
        input: &ArrayBase<S, D>,
        options: &EvalOptions,
    ) -> TraceResult<Tensor>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        let input = input.view().into_dyn();
        let program = self.programs.get_or_compile(&self.expr, input.shape())?;
        Vm::new(options.clone()).eval(&program, &input)
    }

    /// Bind the placeholder to `input` and interpret the recorded expression step by step.
    pub fn evaluate_naive<S, D>(&self, input: &ArrayBase<S, D>) -> TraceResult<Tensor>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        eval_naive(&self.expr, &input.view().into_dyn())
    }

    fn compose(lhs: Arc<Expr>, rhs: Arc<Expr>, matmul: bool) -> CoordinateTracer {
        let expr = if matmul {
            Expr::MatMul(lhs, rhs)
        } else {
            Expr::Add(lhs, rhs)
        };
        CoordinateTracer::from_expr(Arc::new(expr))
    }
}

impl fmt::Debug for CoordinateTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinateTracer")
            .field("expr", &format_args!("{}", self.expr))
            .field("programs", &self.programs)
            .finish()
    }
}

impl fmt::Display for CoordinateTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.expr, f)
    }
}

/// Anything that can appear next to a tracer in `+` or [`MatMul::matmul`].
pub trait IntoOperand {
    fn into_operand(self) -> Arc<Expr>;
}

impl IntoOperand for CoordinateTracer {
    fn into_operand(self) -> Arc<Expr> {
        self.expr
    }
}

impl IntoOperand for &CoordinateTracer {
    fn into_operand(self) -> Arc<Expr> {
        self.expr.clone()
    }
}

impl IntoOperand for f64 {
    fn into_operand(self) -> Arc<Expr> {
        Arc::new(Expr::constant(arr0(self).into_dyn()))
    }
}

macro_rules! tensor_operand {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoOperand for $ty {
                fn into_operand(self) -> Arc<Expr> {
                    Arc::new(Expr::constant(self.into_dyn()))
                }
            }

            impl IntoOperand for &$ty {
                fn into_operand(self) -> Arc<Expr> {
                    Arc::new(Expr::constant(self.clone().into_dyn()))
                }
            }
        )*
    };
}

tensor_operand!(ArrayD<f64>, Array1<f64>, Array2<f64>);

/// Matrix product (`@`).
pub trait MatMul<Rhs = Self> {
    type Output;

    fn matmul(self, rhs: Rhs) -> Self::Output;
}

impl<R: IntoOperand> Add<R> for CoordinateTracer {
    type Output = CoordinateTracer;

    fn add(self, rhs: R) -> CoordinateTracer {
        CoordinateTracer::compose(self.expr, rhs.into_operand(), false)
    }
}

impl<R: IntoOperand> Add<R> for &CoordinateTracer {
    type Output = CoordinateTracer;

    fn add(self, rhs: R) -> CoordinateTracer {
        CoordinateTracer::compose(self.expr.clone(), rhs.into_operand(), false)
    }
}

impl<R: IntoOperand> MatMul<R> for CoordinateTracer {
    type Output = CoordinateTracer;

    fn matmul(self, rhs: R) -> CoordinateTracer {
        CoordinateTracer::compose(self.expr, rhs.into_operand(), true)
    }
}

impl<R: IntoOperand> MatMul<R> for &CoordinateTracer {
    type Output = CoordinateTracer;

    fn matmul(self, rhs: R) -> CoordinateTracer {
        CoordinateTracer::compose(self.expr.clone(), rhs.into_operand(), true)
    }
}

// Constant on the left: `value + tracer`, `value.matmul(tracer)`.
macro_rules! constant_lhs {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Add<CoordinateTracer> for $ty {
                type Output = CoordinateTracer;

                fn add(self, rhs: CoordinateTracer) -> CoordinateTracer {
                    CoordinateTracer::compose(self.into_operand(), rhs.expr, false)
                }
            }

            impl Add<&CoordinateTracer> for $ty {
                type Output = CoordinateTracer;

                fn add(self, rhs: &CoordinateTracer) -> CoordinateTracer {
                    CoordinateTracer::compose(self.into_operand(), rhs.expr.clone(), false)
                }
            }

            impl MatMul<CoordinateTracer> for $ty {
                type Output = CoordinateTracer;

                fn matmul(self, rhs: CoordinateTracer) -> CoordinateTracer {
                    CoordinateTracer::compose(self.into_operand(), rhs.expr, true)
                }
            }

            impl MatMul<&CoordinateTracer> for $ty {
                type Output = CoordinateTracer;

                fn matmul(self, rhs: &CoordinateTracer) -> CoordinateTracer {
                    CoordinateTracer::compose(self.into_operand(), rhs.expr.clone(), true)
                }
            }
        )*
    };
}

constant_lhs!(
    f64,
    ArrayD<f64>,
    Array1<f64>,
    Array2<f64>,
    &ArrayD<f64>,
    &Array1<f64>,
    &Array2<f64>,
);
