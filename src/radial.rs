//! Radial operator algebra.
//!
//! A regularity component of effective degree `lambda` is expanded in
//! $\hat r^\lambda \hat P_n^{(\alpha, \lambda + 1/2)}(z)$ with $z = 2 \hat r^2 - 1$. Multiplying
//! such an expansion by an NCC component of degree `lambda_ncc`,
//! $\hat r^{\lambda_{ncc}} \sum_j a_j \hat P_j^{(\alpha, \lambda_{ncc} + 1/2)}(z)$, and
//! re-expanding at degree `lambda_out` is a banded linear map on coefficients:
//!
//! 1. the polynomial part acts as the matrix function $\sum_j a_j \hat P_j(J)$ of the Jacobi
//!    matrix `J` of the input family, evaluated with Clenshaw's recurrence,
//! 2. the surplus power $\hat r^{2k} = ((1 + z) / 2)^k$ with
//!    $2k = \lambda_{in} + \lambda_{ncc} - \lambda_{out}$ is another polynomial in `J`,
//! 3. the remaining change of degree is a chain of conversions between neighbouring families.
use crate::error::NccError;
use crate::NccSettings;
use ballncc_jacobi::operators::{conversion_matrix, jacobi_matrix};
use ballncc_jacobi::JacobiFamily;
use nalgebra::DMatrix;
use num::complex::Complex64;

fn to_complex(matrix: DMatrix<f64>) -> DMatrix<Complex64> {
    matrix.map(Complex64::from)
}

/// Evaluates $\sum_j a_j \hat P_j(J)$ for the orthonormal polynomials of `family`.
pub fn clenshaw(family: &JacobiFamily, coeffs: &[Complex64], jacobi: &DMatrix<Complex64>) -> DMatrix<Complex64> {
    let n = jacobi.nrows();
    let identity = DMatrix::<Complex64>::identity(n, n);
    let s = |j: usize| family.beta(j).sqrt();

    let mut b1 = DMatrix::zeros(n, n);
    let mut b2 = DMatrix::zeros(n, n);
    for (j, a) in coeffs.iter().enumerate().rev() {
        let shifted = jacobi - &identity * Complex64::from(family.alpha(j));
        let mut b = &identity * *a + shifted * &b1 * Complex64::from(1.0 / s(j + 1));
        if j + 1 < coeffs.len() {
            b -= &b2 * Complex64::from(s(j + 1) / s(j + 2));
        }
        b2 = b1;
        b1 = b;
    }
    b1 * Complex64::from(1.0 / family.mass().sqrt())
}

/// Degrees involved in the multiplication of one regularity component by one NCC component.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RadialDegrees {
    pub lambda_in: usize,
    pub lambda_out: usize,
    pub lambda_ncc: usize,
}

/// Builds the matrix of multiplication by an NCC component, mapping the `n_in` coefficients of
/// the input component to the first `n_out` coefficients of the output component.
///
/// The degrees must satisfy `|lambda_out - lambda_in| <= lambda_ncc` and
/// `lambda_in + lambda_ncc - lambda_out` even, which holds for every coupling allowed by the
/// angular selection rules.
pub fn multiplication_operator(
    alpha: f64,
    degrees: RadialDegrees,
    ncc_coeffs: &[Complex64],
    n_in: usize,
    n_out: usize,
) -> Result<DMatrix<Complex64>, NccError> {
    let RadialDegrees {
        lambda_in,
        lambda_out,
        lambda_ncc,
    } = degrees;
    let (lin, lout, lncc) = (lambda_in as i64, lambda_out as i64, lambda_ncc as i64);
    let d = lout - lin;
    let two_k = lin + lncc - lout;
    if two_k < 0 || two_k % 2 != 0 || d.abs() > lncc {
        return Err(NccError::configuration(format!(
            "Radial multiplication from degree {lambda_in} to {lambda_out} by an NCC component of \
             degree {lambda_ncc} violates the parity selection rule"
        )));
    }
    let k = (two_k / 2) as usize;
    if ncc_coeffs.is_empty() {
        return Ok(DMatrix::zeros(n_out, n_in));
    }

    // Work on a padded size so that truncation does not pollute the retained block
    let num_terms = ncc_coeffs.len() - 1;
    let size = n_in.max(n_out) + num_terms + k + d.unsigned_abs() as usize + 2;
    let b_in = lambda_in as f64 + 0.5;
    let input_family = JacobiFamily::new(alpha, b_in)?;
    let ncc_family = JacobiFamily::new(alpha, lambda_ncc as f64 + 0.5)?;

    let jacobi = to_complex(jacobi_matrix(&input_family, size));
    let mut op = clenshaw(&ncc_family, ncc_coeffs, &jacobi);

    let half_one_plus_z =
        (DMatrix::<Complex64>::identity(size, size) + &jacobi) * Complex64::from(0.5);
    if d >= 0 {
        for _ in 0..k {
            op = &half_one_plus_z * op;
        }
        for step in 0..d as usize {
            let family = JacobiFamily::new(alpha, b_in + step as f64)?;
            op = to_complex(conversion_matrix(&family, size)) * op;
        }
    } else {
        let e = d.unsigned_abs() as usize;
        for _ in 0..k - e {
            op = &half_one_plus_z * op;
        }
        op *= Complex64::from(2f64.powi(-(e as i32)));
        for step in 0..e {
            let family = JacobiFamily::new(alpha, b_in - 1.0 - step as f64)?;
            op = to_complex(conversion_matrix(&family, size)).transpose() * op;
        }
    }

    Ok(op.view((0, 0), (n_out, n_in)).clone_owned())
}

/// Truncates the radial expansion of an NCC component.
///
/// Coefficients with magnitude below the cutoff are zeroed and trailing zeros are removed. The
/// returned series has at most `max_terms` terms.
pub fn truncate_ncc_coefficients(coeffs: &[Complex64], settings: &NccSettings) -> Vec<Complex64> {
    let mut truncated: Vec<Complex64> = coeffs
        .iter()
        .map(|c| if c.norm() < settings.cutoff { Complex64::new(0.0, 0.0) } else { *c })
        .collect();
    if let Some(max_terms) = settings.max_terms {
        truncated.truncate(max_terms);
    }
    while truncated.last().map_or(false, |c| c.norm() == 0.0) {
        truncated.pop();
    }
    truncated
}
