use crate::error::{TraceError, TraceResult};
use crate::expr::{Expr, Tensor};
use crate::shape::{self, MatMulPlan};
use crate::tensor;
use ndarray::ArrayViewD;

enum Task<'e> {
    Visit(&'e Expr),
    Apply(&'e Expr),
}

fn underflow() -> TraceError {
    TraceError::InvalidTensor("naive evaluation ran out of operands".to_string())
}

/// Tree-walking reference interpreter.
///
/// Every node is evaluated directly: each geometric product is applied on its own (with its own
/// perspective divide) and shared subtrees are recomputed on every use. The optimized path in
/// [`crate::Compiler`]/[`crate::Vm`] must agree with this within tolerance.
///
/// The walk keeps its own task and value stacks, so chain depth is bounded by memory only.
pub fn eval_naive(expr: &Expr, input: &ArrayViewD<'_, f64>) -> TraceResult<Tensor> {
    let mut tasks = vec![Task::Visit(expr)];
    let mut values: Vec<Tensor> = Vec::new();

    while let Some(task) = tasks.pop() {
        match task {
            Task::Visit(node) => match node {
                Expr::Input => values.push(input.to_owned()),
                Expr::Const(t) => values.push((**t).clone()),
                Expr::Add(l, r) => {
                    tasks.push(Task::Apply(node));
                    tasks.push(Task::Visit(r.as_ref()));
                    tasks.push(Task::Visit(l.as_ref()));
                }
                Expr::MatMul(l, r) => {
                    tasks.push(Task::Apply(node));
                    match shape::matmul_plan(l, r) {
                        MatMulPlan::Geometric { points, .. } => {
                            tasks.push(Task::Visit(points.as_ref()))
                        }
                        MatMulPlan::Generic => {
                            tasks.push(Task::Visit(r.as_ref()));
                            tasks.push(Task::Visit(l.as_ref()));
                        }
                    }
                }
            },
            Task::Apply(node) => {
                let out = match node {
                    Expr::Add(..) => {
                        let b = values.pop().ok_or_else(underflow)?;
                        let a = values.pop().ok_or_else(underflow)?;
                        tensor::add(&a.view(), &b.view())?
                    }
                    Expr::MatMul(l, r) => match shape::matmul_plan(l, r) {
                        MatMulPlan::Geometric { side, matrix, .. } => {
                            let points = values.pop().ok_or_else(underflow)?;
                            let kind = shape::geometric_kind(points.shape(), matrix.shape(), side)?;
                            tensor::apply_geometric(&points.view(), matrix, side, kind)?
                        }
                        MatMulPlan::Generic => {
                            let b = values.pop().ok_or_else(underflow)?;
                            let a = values.pop().ok_or_else(underflow)?;
                            tensor::matmul(&a.view(), &b.view())?
                        }
                    },
                    Expr::Input | Expr::Const(_) => return Err(underflow()),
                };
                values.push(out);
            }
        }
    }
    values.pop().ok_or_else(underflow)
}
