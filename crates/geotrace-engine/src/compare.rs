use crate::error::TraceResult;
use crate::tracer::CoordinateTracer;
use ndarray::{ArrayBase, ArrayViewD, Data, Dimension};
use serde::{Deserialize, Serialize};

/// Elementwise closeness bounds: `|a - b| <= atol + rtol * |b|`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: 1e-3,
            atol: 1e-1,
        }
    }
}

/// Numpy `allclose` semantics, except that shapes must match exactly. NaN never compares equal.
pub fn allclose(a: &ArrayViewD<'_, f64>, b: &ArrayViewD<'_, f64>, tol: Tolerance) -> bool {
    a.shape() == b.shape()
        && a.iter().zip(b.iter()).all(|(&x, &y)| {
            if x == y {
                // Covers matching infinities.
                return true;
            }
            (x - y).abs() <= tol.atol + tol.rtol * y.abs()
        })
}

/// Largest elementwise `|a - b|`, or `None` when the shapes differ.
pub fn max_abs_diff(a: &ArrayViewD<'_, f64>, b: &ArrayViewD<'_, f64>) -> Option<f64> {
    if a.shape() != b.shape() {
        return None;
    }
    Some(
        a.iter()
            .zip(b.iter())
            .map(|(&x, &y)| if x == y { 0.0 } else { (x - y).abs() })
            .fold(0.0, f64::max),
    )
}

/// Side-by-side result of both evaluation paths.
#[derive(Clone, Debug, Serialize)]
pub struct ParityReport {
    pub expr: String,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub naive: Vec<f64>,
    pub optimized: Vec<f64>,
    pub max_abs_diff: Option<f64>,
    pub tolerance: Tolerance,
    pub agree: bool,
}

/// Evaluate `tracer` both ways on `input` and compare the results.
///
/// If either path fails, the error is returned (naive first).
pub fn check_parity<S, D>(
    tracer: &CoordinateTracer,
    input: &ArrayBase<S, D>,
    tol: Tolerance,
) -> TraceResult<ParityReport>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let naive = tracer.evaluate_naive(input);
    let optimized = tracer.evaluate(input);
    let (naive, optimized) = match (naive, optimized) {
        (Ok(n), Ok(o)) => (n, o),
        (Err(n), Err(o)) => {
            if !n.same_kind(&o) {
                log::warn!("evaluation paths failed differently: naive={n}, optimized={o}");
            }
            return Err(n);
        }
        (Err(n), Ok(_)) => {
            log::warn!("naive evaluation failed but optimized succeeded: {n}");
            return Err(n);
        }
        (Ok(_), Err(o)) => {
            log::warn!("optimized evaluation failed but naive succeeded: {o}");
            return Err(o);
        }
    };

    let agree = allclose(&optimized.view(), &naive.view(), tol);
    let max_abs_diff = max_abs_diff(&optimized.view(), &naive.view());
    if !agree {
        log::debug!("parity mismatch for {tracer}: max |diff| = {max_abs_diff:?}");
    }

    Ok(ParityReport {
        expr: tracer.to_string(),
        input_shape: input.shape().to_vec(),
        output_shape: naive.shape().to_vec(),
        naive: naive.iter().copied().collect(),
        optimized: optimized.iter().copied().collect(),
        max_abs_diff,
        tolerance: tol,
        agree,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn allclose_uses_absolute_and_relative_bounds() {
        let a = arr1(&[1.0, 100.0]).into_dyn();
        let b = arr1(&[1.05, 100.15]).into_dyn();
        assert!(allclose(&a.view(), &b.view(), Tolerance::default()));

        let c = arr1(&[1.5, 100.0]).into_dyn();
        assert!(!allclose(&a.view(), &c.view(), Tolerance::default()));
    }

    #[test]
    fn allclose_rejects_nan_and_shape_mismatch() {
        let a = arr1(&[f64::NAN]).into_dyn();
        assert!(!allclose(&a.view(), &a.view(), Tolerance::default()));

        let b = arr1(&[1.0, 2.0]).into_dyn();
        let c = arr1(&[1.0]).into_dyn();
        assert!(!allclose(&b.view(), &c.view(), Tolerance::default()));
        assert_eq!(max_abs_diff(&b.view(), &c.view()), None);
    }
}
