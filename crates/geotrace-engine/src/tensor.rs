//! Array kernels for the operations a coordinate expression can record.

use crate::error::{OpKind, TraceError, TraceResult};
use crate::expr::Tensor;
use crate::shape::{self, GeometricKind, MatrixSide};
use ndarray::{arr0, s, Array2, ArrayView2, ArrayViewD, Axis, Ix1, Ix2, IxDyn};

fn invalid(err: ndarray::ShapeError) -> TraceError {
    TraceError::InvalidTensor(err.to_string())
}

/// Broadcasting elementwise addition.
pub fn add(a: &ArrayViewD<'_, f64>, b: &ArrayViewD<'_, f64>) -> TraceResult<Tensor> {
    let out = shape::broadcast(a.shape(), b.shape())?;
    let broadcast_err = || TraceError::Broadcast {
        left: a.shape().to_vec(),
        right: b.shape().to_vec(),
    };
    let va = a.broadcast(IxDyn(&out)).ok_or_else(broadcast_err)?;
    let vb = b.broadcast(IxDyn(&out)).ok_or_else(broadcast_err)?;
    Ok(&va + &vb)
}

/// Plain array product for rank-1/rank-2 operands (numpy `matmul` rules).
pub fn matmul(a: &ArrayViewD<'_, f64>, b: &ArrayViewD<'_, f64>) -> TraceResult<Tensor> {
    shape::generic_matmul(a.shape(), b.shape())?;
    let out = match (a.ndim(), b.ndim()) {
        (1, 1) => {
            let l = a.view().into_dimensionality::<Ix1>().map_err(invalid)?;
            let r = b.view().into_dimensionality::<Ix1>().map_err(invalid)?;
            arr0(l.dot(&r)).into_dyn()
        }
        (2, 1) => {
            let l = a.view().into_dimensionality::<Ix2>().map_err(invalid)?;
            let r = b.view().into_dimensionality::<Ix1>().map_err(invalid)?;
            l.dot(&r).into_dyn()
        }
        (1, 2) => {
            let l = a.view().into_dimensionality::<Ix1>().map_err(invalid)?;
            let r = b.view().into_dimensionality::<Ix2>().map_err(invalid)?;
            l.dot(&r).into_dyn()
        }
        (2, 2) => {
            let l = a.view().into_dimensionality::<Ix2>().map_err(invalid)?;
            let r = b.view().into_dimensionality::<Ix2>().map_err(invalid)?;
            l.dot(&r).into_dyn()
        }
        (l, r) => {
            return Err(TraceError::UnsupportedRank {
                op: OpKind::MatMul,
                rank: l.max(r),
            })
        }
    };
    Ok(out)
}

/// View coordinates of shape `(d,)` or `(n, d)` as an `(n, d)` batch.
pub fn as_batch<'a>(points: &ArrayViewD<'a, f64>) -> TraceResult<ArrayView2<'a, f64>> {
    match points.ndim() {
        1 => points
            .clone()
            .insert_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(invalid),
        2 => points.clone().into_dimensionality::<Ix2>().map_err(invalid),
        rank => Err(TraceError::UnsupportedRank {
            op: OpKind::Transform,
            rank,
        }),
    }
}

/// Restore the caller's rank after a batch computation.
pub fn from_batch(batch: Array2<f64>, rank: usize) -> Tensor {
    if rank == 1 {
        batch.index_axis_move(Axis(0), 0).into_dyn()
    } else {
        batch.into_dyn()
    }
}

/// Apply one geometric product step by step: optional lift to `[p, 1]`, multiply, optional
/// perspective divide.
pub fn apply_geometric(
    points: &ArrayViewD<'_, f64>,
    matrix: &Tensor,
    side: MatrixSide,
    kind: GeometricKind,
) -> TraceResult<Tensor> {
    let m = matrix.view().into_dimensionality::<Ix2>().map_err(invalid)?;
    let batch = as_batch(points)?;
    let (n, d) = batch.dim();

    let out = match kind {
        GeometricKind::Linear => match side {
            // M p for every row p  ==  P M^T
            MatrixSide::Left => batch.dot(&m.t()),
            MatrixSide::Right => batch.dot(&m),
        },
        GeometricKind::Homogeneous => {
            let mut lifted = Array2::<f64>::ones((n, d + 1));
            lifted.slice_mut(s![.., ..d]).assign(&batch);
            let mut q = match side {
                MatrixSide::Left => lifted.dot(&m.t()),
                MatrixSide::Right => lifted.dot(&m),
            };
            for mut row in q.rows_mut() {
                let w = row[d];
                row.mapv_inplace(|v| v / w);
            }
            q.slice(s![.., ..d]).to_owned()
        }
    };
    Ok(from_batch(out, points.ndim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn add_broadcasts_vector_over_batch() {
        let a = arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn();
        let b = arr1(&[10.0, 20.0]).into_dyn();
        let out = add(&a.view(), &b.view()).unwrap();
        assert_eq!(out, arr2(&[[11.0, 22.0], [13.0, 24.0]]).into_dyn());
    }

    #[test]
    fn matmul_vector_dot_is_scalar() {
        let a = arr1(&[1.0, 2.0]).into_dyn();
        let out = matmul(&a.view(), &a.view()).unwrap();
        assert_eq!(out.ndim(), 0);
        assert_eq!(out.iter().next().copied(), Some(5.0));
    }

    #[test]
    fn linear_sides_use_column_and_row_convention() {
        let m = arr2(&[[0.0, 1.0], [2.0, 0.0]]).into_dyn();
        let p = arr1(&[3.0, 5.0]).into_dyn();
        let left = apply_geometric(&p.view(), &m, MatrixSide::Left, GeometricKind::Linear).unwrap();
        let right =
            apply_geometric(&p.view(), &m, MatrixSide::Right, GeometricKind::Linear).unwrap();
        assert_eq!(left, arr1(&[5.0, 6.0]).into_dyn());
        assert_eq!(right, arr1(&[10.0, 3.0]).into_dyn());
    }

    #[test]
    fn homogeneous_translation_and_scale() {
        // Column convention: translate by (1, 2) then divide by w = 2.
        let m = arr2(&[[1.0, 0.0, 1.0], [0.0, 1.0, 2.0], [0.0, 0.0, 2.0]]).into_dyn();
        let p = arr2(&[[1.0, 1.0], [3.0, -2.0]]).into_dyn();
        let out =
            apply_geometric(&p.view(), &m, MatrixSide::Left, GeometricKind::Homogeneous).unwrap();
        assert_eq!(out, arr2(&[[1.0, 1.5], [2.0, 0.0]]).into_dyn());
    }
}
