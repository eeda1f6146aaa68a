// Numeric comparison helpers for checking compiled execution against the
// eager reference.
//
// The tolerance rule is element-wise: |a - b| <= atol + rtol * |b|, with
// the expected value on the right.

use vole_core::{Error, Result, Tensor};

/// Largest element-wise absolute difference between two same-shaped tensors.
pub fn max_abs_diff(actual: &Tensor, expected: &Tensor) -> Result<f64> {
    check_same_shape(actual, expected)?;
    let a = actual.to_f64_vec()?;
    let b = expected.to_f64_vec()?;
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max))
}

/// Whether every element satisfies |a - b| <= atol + rtol * |b|.
pub fn allclose(actual: &Tensor, expected: &Tensor, rtol: f64, atol: f64) -> Result<bool> {
    check_same_shape(actual, expected)?;
    let a = actual.to_f64_vec()?;
    let b = expected.to_f64_vec()?;
    Ok(a.iter()
        .zip(b.iter())
        .all(|(x, y)| (x - y).abs() <= atol + rtol * y.abs()))
}

/// Panic with the worst offending element if the tensors are not close.
///
/// Test-harness helper; library code should use [`allclose`] and propagate.
pub fn assert_allclose(actual: &Tensor, expected: &Tensor, rtol: f64, atol: f64) {
    if actual.shape() != expected.shape() {
        panic!(
            "shape mismatch: actual {} vs expected {}",
            actual.shape(),
            expected.shape()
        );
    }
    let a = actual.to_f64_vec().unwrap();
    let b = expected.to_f64_vec().unwrap();
    let mut worst: Option<(usize, f64)> = None;
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        if diff > atol + rtol * y.abs() {
            match worst {
                Some((_, d)) if d >= diff => {}
                _ => worst = Some((i, diff)),
            }
        }
    }
    if let Some((i, diff)) = worst {
        panic!(
            "tensors not close (rtol={rtol}, atol={atol}): element {i} differs by {diff} (actual {} vs expected {})",
            a[i], b[i]
        );
    }
}

fn check_same_shape(actual: &Tensor, expected: &Tensor) -> Result<()> {
    if actual.shape() != expected.shape() {
        return Err(Error::ShapeMismatch {
            expected: expected.shape().clone(),
            got: actual.shape().clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::DType;

    #[test]
    fn test_allclose_within_tolerance() {
        let a = Tensor::from_f64_slice(&[1.0, 2.0], 2, DType::F64).unwrap();
        let b = Tensor::from_f64_slice(&[1.0 + 5e-6, 2.0 - 1e-5], 2, DType::F64).unwrap();
        assert!(allclose(&a, &b, 1e-5, 1e-5).unwrap());
    }

    #[test]
    fn test_allclose_violation() {
        let a = Tensor::from_f64_slice(&[1.0, 2.0], 2, DType::F64).unwrap();
        let b = Tensor::from_f64_slice(&[1.0, 2.1], 2, DType::F64).unwrap();
        assert!(!allclose(&a, &b, 1e-5, 1e-5).unwrap());
        assert!((max_abs_diff(&a, &b).unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let a = Tensor::zeros(2, DType::F64).unwrap();
        let b = Tensor::zeros(3, DType::F64).unwrap();
        assert!(allclose(&a, &b, 1e-5, 1e-5).is_err());
    }

    #[test]
    #[should_panic(expected = "not close")]
    fn test_assert_allclose_panics() {
        let a = Tensor::from_f64_slice(&[1.0], 1, DType::F64).unwrap();
        let b = Tensor::from_f64_slice(&[2.0], 1, DType::F64).unwrap();
        assert_allclose(&a, &b, 1e-5, 1e-5);
    }
}
