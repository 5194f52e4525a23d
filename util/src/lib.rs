use nalgebra::storage::Storage;
use nalgebra::{Dim, Matrix};
use num::complex::Complex64;

/// Poor man's approx assertion for complex matrices
#[macro_export]
macro_rules! assert_approx_complex_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let max_absdiff = $crate::max_abs_diff(&$x, &$y);
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("max absdiff: {:e}", max_absdiff);
            println!("left: {}", $x);
            println!("right: {}", $y);
        }
        assert!(approx_eq);
    }};
}

/// Largest entrywise modulus of `x - y`.
///
/// Panics if the shapes differ.
pub fn max_abs_diff<R1, C1, S1, R2, C2, S2>(x: &Matrix<Complex64, R1, C1, S1>, y: &Matrix<Complex64, R2, C2, S2>) -> f64
where
    R1: Dim,
    C1: Dim,
    S1: Storage<Complex64, R1, C1>,
    R2: Dim,
    C2: Dim,
    S2: Storage<Complex64, R2, C2>,
{
    assert_eq!(x.shape(), y.shape(), "Matrices must have the same shape.");
    x.iter()
        .zip(y.iter())
        .map(|(a, b)| (a - b).norm())
        .fold(0.0, f64::max)
}

/// Largest entrywise modulus of `x`.
pub fn max_abs<R, C, S>(x: &Matrix<Complex64, R, C, S>) -> f64
where
    R: Dim,
    C: Dim,
    S: Storage<Complex64, R, C>,
{
    x.iter().map(|a| a.norm()).fold(0.0, f64::max)
}
