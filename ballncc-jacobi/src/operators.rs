//! Banded operators acting on coefficient vectors of orthonormal Jacobi expansions.
//!
//! A coefficient vector `c` of length `n` represents $\sum_k c_k \hat P_k^{(a, b)}(x)$.
use crate::JacobiFamily;
use nalgebra::DMatrix;

/// The symmetric tridiagonal Jacobi matrix of the orthonormal recurrence.
///
/// Acting on coefficients, it represents multiplication by `x` (exactly, except in the last row,
/// which is affected by truncation).
pub fn jacobi_matrix(family: &JacobiFamily, n: usize) -> DMatrix<f64> {
    let mut matrix = DMatrix::zeros(n, n);
    for k in 0..n {
        matrix[(k, k)] = family.alpha(k);
        if k + 1 < n {
            let off_diag = family.beta(k + 1).sqrt();
            matrix[(k, k + 1)] = off_diag;
            matrix[(k + 1, k)] = off_diag;
        }
    }
    matrix
}

/// Conversion of coefficients from family `(a, b)` to family `(a, b + 1)`.
///
/// The matrix `R` is the upper bidiagonal Cholesky factor of `I + J`, with `J` the Jacobi matrix
/// of `(a, b)`. It satisfies
///
/// - $\hat P_n^{(a, b)} = \sum_i R_{in} \hat P_i^{(a, b + 1)}$ (conversion, exact for all `n`),
/// - $(1 + x) \hat P_n^{(a, b + 1)} = \sum_i R_{ni} \hat P_i^{(a, b)}$ (the transpose lowers `b`
///   and multiplies by `1 + x`, exact except in the last column).
///
/// Since the factor is bidiagonal, its leading block does not depend on `n`.
pub fn conversion_matrix(family: &JacobiFamily, n: usize) -> DMatrix<f64> {
    let mut r = DMatrix::zeros(n, n);
    let mut prev_off_diag = 0.0;
    for k in 0..n {
        let diag = (1.0 + family.alpha(k) - prev_off_diag * prev_off_diag).sqrt();
        r[(k, k)] = diag;
        if k + 1 < n {
            prev_off_diag = family.beta(k + 1).sqrt() / diag;
            r[(k, k + 1)] = prev_off_diag;
        }
    }
    r
}

/// Differentiation from family `(a, b)` to family `(a + 1, b + 1)`.
///
/// Uses $\frac{d}{dx} \hat P_n^{(a, b)} = \sqrt{n (n + a + b + 1)} \hat P_{n-1}^{(a + 1, b + 1)}$.
/// The returned matrix is square, with a zero last row.
pub fn differentiation_matrix(family: &JacobiFamily, n: usize) -> DMatrix<f64> {
    let ab = family.a() + family.b();
    let mut d = DMatrix::zeros(n, n);
    for k in 1..n {
        let kf = k as f64;
        d[(k - 1, k)] = (kf * (kf + ab + 1.0)).sqrt();
    }
    d
}
