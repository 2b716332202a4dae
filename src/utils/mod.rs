//! Scalar math used by the energy functional and the conditionals.

/// Logistic sigmoid: σ(x) = 1 / (1 + e^{-x}).
///
/// Evaluated on the side that keeps `exp` bounded, so the result stays finite
/// for any finite `x`.
#[inline]
pub fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Softplus: log(1 + e^x).
///
/// For positive `x` this is rewritten as `x + log(1 + e^{-x})`, which is the
/// same quantity without overflowing `exp`.
#[inline]
pub fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// Euclidean norm of a vector.
#[inline]
pub fn l2_norm(v: &ndarray::ArrayView1<f64>) -> f64 {
    v.dot(v).sqrt()
}
