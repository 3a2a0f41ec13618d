//! Shape rules shared by the naive interpreter and the compiler.
//!
//! Both evaluation paths must reject an expression for the same reason, so every operand check
//! lives here and nowhere else.

use crate::error::{OpKind, TraceError, TraceResult};
use crate::expr::{Expr, Tensor};
use std::sync::Arc;

pub type Shape = Vec<usize>;

/// Which operand of a geometric product holds the constant matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatrixSide {
    /// `M @ x`: the matrix acts on each point in column convention (`M p`).
    Left,
    /// `x @ M`: the matrix acts on each point in row convention (`p M`).
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometricKind {
    /// `d x d` matrix applied to `d`-dimensional points.
    Linear,
    /// `(d+1) x (d+1)` matrix applied to `[p, 1]`, followed by the perspective divide.
    Homogeneous,
}

/// How a `MatMul` node is interpreted.
pub enum MatMulPlan<'a> {
    Geometric {
        side: MatrixSide,
        matrix: &'a Tensor,
        points: &'a Arc<Expr>,
    },
    Generic,
}

#[inline]
fn is_square_matrix(t: &Tensor) -> bool {
    t.ndim() == 2 && t.shape()[0] == t.shape()[1]
}

/// Decide between a geometric product (constant square matrix applied to traced coordinates)
/// and a plain array product.
pub fn matmul_plan<'a>(lhs: &'a Arc<Expr>, rhs: &'a Arc<Expr>) -> MatMulPlan<'a> {
    match (lhs.as_const(), rhs.as_const()) {
        (Some(m), None) if is_square_matrix(m) => MatMulPlan::Geometric {
            side: MatrixSide::Left,
            matrix: m,
            points: rhs,
        },
        (None, Some(m)) if is_square_matrix(m) => MatMulPlan::Geometric {
            side: MatrixSide::Right,
            matrix: m,
            points: lhs,
        },
        _ => MatMulPlan::Generic,
    }
}

/// Classify a geometric product of a `k x k` matrix with coordinates of shape `points`.
///
/// The result always has the shape of `points`.
pub fn geometric_kind(
    points: &[usize],
    matrix: &[usize],
    side: MatrixSide,
) -> TraceResult<GeometricKind> {
    let rank = points.len();
    if rank == 0 || rank > 2 {
        return Err(TraceError::UnsupportedRank {
            op: OpKind::MatMul,
            rank,
        });
    }
    let d = points[rank - 1];
    let k = matrix[0];
    if k == d {
        Ok(GeometricKind::Linear)
    } else if k == d + 1 {
        Ok(GeometricKind::Homogeneous)
    } else {
        let (left, right) = match side {
            MatrixSide::Left => (matrix.to_vec(), points.to_vec()),
            MatrixSide::Right => (points.to_vec(), matrix.to_vec()),
        };
        Err(TraceError::ShapeMismatch {
            op: OpKind::MatMul,
            left,
            right,
        })
    }
}

/// Numpy-style broadcast of two shapes.
pub fn broadcast(left: &[usize], right: &[usize]) -> TraceResult<Shape> {
    let rank = left.len().max(right.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let l = dim_from_end(left, rank - 1 - i);
        let r = dim_from_end(right, rank - 1 - i);
        out[i] = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(TraceError::Broadcast {
                    left: left.to_vec(),
                    right: right.to_vec(),
                })
            }
        };
    }
    Ok(out)
}

#[inline]
fn dim_from_end(shape: &[usize], offset: usize) -> usize {
    if offset < shape.len() {
        shape[shape.len() - 1 - offset]
    } else {
        1
    }
}

/// Result shape of a plain (numpy `matmul`) product for rank-1/rank-2 operands.
pub fn generic_matmul(left: &[usize], right: &[usize]) -> TraceResult<Shape> {
    let mismatch = || TraceError::ShapeMismatch {
        op: OpKind::MatMul,
        left: left.to_vec(),
        right: right.to_vec(),
    };
    match (left.len(), right.len()) {
        (1, 1) if left[0] == right[0] => Ok(Vec::new()),
        (2, 1) if left[1] == right[0] => Ok(vec![left[0]]),
        (1, 2) if left[0] == right[0] => Ok(vec![right[1]]),
        (2, 2) if left[1] == right[0] => Ok(vec![left[0], right[1]]),
        (1..=2, 1..=2) => Err(mismatch()),
        (l, r) => Err(TraceError::UnsupportedRank {
            op: OpKind::MatMul,
            rank: if (1..=2).contains(&l) { r } else { l },
        }),
    }
}

/// Translation vector for `points + c` when `c` shifts every point by the same offset without
/// changing the result shape.
pub fn translation(points: &[usize], c: &Tensor) -> Option<Vec<f64>> {
    let rank = points.len();
    if rank == 0 || rank > 2 {
        return None;
    }
    let d = points[rank - 1];
    match c.shape() {
        [] => c.iter().next().map(|&v| vec![v; d]),
        [n] if *n == d => Some(c.iter().copied().collect()),
        [1, n] if *n == d && rank == 2 => Some(c.iter().copied().collect()),
        _ => None,
    }
}
