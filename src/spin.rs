//! Spin-weighted components and spin-weighted spherical harmonics.
//!
//! A tensor of rank `R` in the local `(phi, theta, r)` frame is stored with one row per
//! coordinate multi-index. Its spin representation has one row per *spin tuple*
//! `(s_1, ..., s_R)` with `s_i` in `{-1, 0, +1}`; a spin tuple is encoded like a coordinate
//! multi-index with digit `s_i + 1`. The two are related by the constant unitary matrix
//! `U^{(R)} = U ⊗ ... ⊗ U`.
use crate::coords::{multi_index, num_components};
use crate::error::NccError;
use ballncc_jacobi::JacobiFamily;
use nalgebra::DMatrix;
use num::complex::Complex64;
use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// The row of `U` for spin `s`, acting on `(u_phi, u_theta, u_r)`.
pub fn spin_vector(s: i32) -> [Complex64; 3] {
    let h = FRAC_1_SQRT_2;
    match s {
        1 => [Complex64::new(0.0, h), Complex64::new(h, 0.0), Complex64::new(0.0, 0.0)],
        -1 => [Complex64::new(0.0, -h), Complex64::new(h, 0.0), Complex64::new(0.0, 0.0)],
        _ => [Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)],
    }
}

/// Decodes a flat spin (or regularity) index into its tuple of values in `{-1, 0, +1}`.
pub fn decode_tuple(flat: usize, rank: usize) -> Vec<i32> {
    multi_index(flat, rank)
        .into_iter()
        .map(|digit| digit as i32 - 1)
        .collect()
}

/// Total spin weight of the spin tuple with the given flat index.
pub fn total_spin(flat: usize, rank: usize) -> i32 {
    decode_tuple(flat, rank).iter().sum()
}

/// The matrix `U^{(R)}` mapping coordinate components to spin components.
///
/// Rows are indexed by spin tuples and columns by coordinate multi-indices. The matrix is
/// unitary, so the inverse map is its adjoint.
pub fn spin_transform(rank: usize) -> DMatrix<Complex64> {
    let n = num_components(rank);
    DMatrix::from_fn(n, n, |t, c| {
        decode_tuple(t, rank)
            .into_iter()
            .zip(multi_index(c, rank))
            .map(|(s, ci)| spin_vector(s)[ci])
            .product()
    })
}

/// Sign attached to the spin-weighted harmonic of spin `s` and order `m`.
///
/// The convention makes the coefficients of the spin raising and lowering ladder positive, which
/// is what the regularity intertwiner assumes.
fn harmonic_sign(s: i32, m: i32) -> f64 {
    let raw = |k: i32| if m + k >= 0 { 1.0 } else { -1.0 };
    if s > 0 {
        (0..s).map(raw).product()
    } else {
        (s..0).map(raw).product()
    }
}

/// Tabulates the colatitude part of the spin-weighted harmonics
/// $Y^s_{\ell m}(\theta, \phi) = \Theta^s_{\ell m}(\cos\theta) e^{i m \phi}$.
///
/// Returns a matrix with one row per degree `0..=l_max` and one column per point in
/// `cos_theta`. Rows with `ell < max(|m|, |s|)` are zero.
pub fn harmonic_table(s: i32, m: i32, l_max: usize, cos_theta: &[f64]) -> Result<DMatrix<f64>, NccError> {
    let mut table = DMatrix::zeros(l_max + 1, cos_theta.len());
    let l0 = m.abs().max(s.abs()) as usize;
    if l0 > l_max {
        return Ok(table);
    }

    let a = (m + s).abs();
    let b = (m - s).abs();
    let family = JacobiFamily::new(a as f64, b as f64)?;
    let sign = harmonic_sign(s, m);
    let num_polys = l_max - l0 + 1;
    let mut values = vec![0.0; num_polys];
    for (i, &x) in cos_theta.iter().enumerate() {
        family.evaluate_into(&mut values, x);
        let envelope = (1.0 - x).powf(a as f64 / 2.0) * (1.0 + x).powf(b as f64 / 2.0) / (2.0 * PI).sqrt();
        for (n, p) in values.iter().enumerate() {
            table[(l0 + n, i)] = sign * envelope * p;
        }
    }
    Ok(table)
}
