use crate::error::{OpKind, TraceError, TraceResult};
use crate::expr::Tensor;
use crate::options::EvalOptions;
use crate::parallel;
use crate::shape::{GeometricKind, MatrixSide};
use crate::tensor::{as_batch, from_batch};
use ndarray::{s, Array2, ArrayViewD, Ix2};

/// A projective map on `d`-dimensional points, stored as a `(d+1) x (d+1)` homogeneous matrix in
/// column convention (acts on `[p; 1]`).
///
/// Translations, linear maps and homogeneous maps are all representable, and composing them is a
/// single matrix product. Dividing once after the composed map gives the same point as dividing
/// after every step, so a whole chain can be applied in one pass.
#[derive(Clone, Debug, PartialEq)]
pub struct Homography {
    matrix: Array2<f64>,
    /// Whether some composed step can produce `w != 1`, i.e. the map needs a perspective divide.
    projective: bool,
}

impl Homography {
    pub fn identity(dim: usize) -> Self {
        Self {
            matrix: Array2::eye(dim + 1),
            projective: false,
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.matrix.nrows() - 1
    }

    #[inline]
    pub fn is_projective(&self) -> bool {
        self.projective
    }

    pub fn translation(offset: &[f64]) -> Self {
        let d = offset.len();
        let mut out = Self::identity(d);
        for (i, &v) in offset.iter().enumerate() {
            out.matrix[[i, d]] = v;
        }
        out
    }

    /// Homogeneous form of a geometric product with `matrix` (`d x d` or `(d+1) x (d+1)`).
    pub fn from_product(
        matrix: &Tensor,
        dim: usize,
        side: MatrixSide,
        kind: GeometricKind,
    ) -> TraceResult<Self> {
        let m = matrix
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|err| TraceError::InvalidTensor(err.to_string()))?;
        // Row convention `p M` is column convention `M^T p`.
        let m = match side {
            MatrixSide::Left => m,
            MatrixSide::Right => m.reversed_axes(),
        };
        match kind {
            GeometricKind::Linear => {
                let mut out = Self::identity(dim);
                out.matrix.slice_mut(s![..dim, ..dim]).assign(&m);
                Ok(out)
            }
            GeometricKind::Homogeneous => {
                let projective = m
                    .row(dim)
                    .iter()
                    .enumerate()
                    .any(|(i, &v)| v != if i == dim { 1.0 } else { 0.0 });
                Ok(Self {
                    matrix: m.to_owned(),
                    projective,
                })
            }
        }
    }

    /// `next ∘ self`: apply `self` first, then `next`.
    pub fn then(&self, next: &Homography) -> Homography {
        Homography {
            matrix: next.matrix.dot(&self.matrix),
            projective: self.projective || next.projective,
        }
    }

    /// Apply the map to coordinates of shape `(d,)` or `(n, d)`.
    pub fn apply(&self, points: &ArrayViewD<'_, f64>, options: &EvalOptions) -> TraceResult<Tensor> {
        let batch = as_batch(points)?;
        let (n, d) = batch.dim();
        if d != self.dim() {
            return Err(TraceError::ShapeMismatch {
                op: OpKind::Transform,
                left: points.shape().to_vec(),
                right: self.matrix.shape().to_vec(),
            });
        }

        let linear = self.matrix.slice(s![..d, ..d]);
        let offset = self.matrix.slice(s![..d, d]);
        if !self.projective {
            let out = batch.dot(&linear.t()) + &offset;
            return Ok(from_batch(out, points.ndim()));
        }

        let mut lifted = Array2::<f64>::ones((n, d + 1));
        lifted.slice_mut(s![.., ..d]).assign(&batch);
        let mut q = lifted.dot(&self.matrix.t());
        perspective_divide(&mut q, n >= options.parallel_min_points);
        Ok(from_batch(q.slice(s![.., ..d]).to_owned(), points.ndim()))
    }
}

fn divide_row(row: &mut [f64]) {
    if let Some((&mut w, coords)) = row.split_last_mut() {
        for v in coords {
            *v /= w;
        }
    }
}

fn perspective_divide(q: &mut Array2<f64>, parallel_hint: bool) {
    let width = q.ncols();
    if width == 0 {
        return;
    }
    match q.as_slice_mut() {
        Some(data) => {
            if parallel_hint && parallel::divide_rows_parallel(data, width, divide_row) {
                return;
            }
            data.chunks_mut(width).for_each(divide_row);
        }
        None => {
            for mut row in q.rows_mut() {
                let w = row[width - 1];
                row.slice_mut(s![..width - 1]).mapv_inplace(|v| v / w);
            }
        }
    }
}
