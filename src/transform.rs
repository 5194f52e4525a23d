//! Transforms between grid values and spectral coefficients.
//!
//! Grid data holds one row per coordinate component and one column per grid point. Coefficient
//! data holds one vector per mode, laid out as described by [`BallBasis::mode_layout`]. Fields on
//! the radial domain only carry the `(0, 0)` mode.
use crate::basis::{BallBasis, Domain, ModeLayout};
use crate::coords::num_components;
use crate::error::NccError;
use crate::regularity::intertwiner;
use crate::spin::{harmonic_table, spin_transform, total_spin};
use log::warn;
use nalgebra::{DMatrix, DVector};
use num::complex::Complex64;
use num::Zero;
use rustc_hash::FxHashMap;
use std::f64::consts::PI;

pub type GridData = DMatrix<Complex64>;
pub type CoeffData = Vec<DVector<Complex64>>;

/// Relative size below which non-representable spin content of a radial field is ignored silently.
const RADIAL_SPIN_TOLERANCE: f64 = 1e-10;

/// Lazily tabulated radial functions, shared across modes of a single transform.
struct RadialTables<'a> {
    basis: &'a BallBasis,
    tables: FxHashMap<usize, DMatrix<f64>>,
}

impl<'a> RadialTables<'a> {
    fn new(basis: &'a BallBasis) -> Self {
        Self {
            basis,
            tables: FxHashMap::default(),
        }
    }

    fn get(&mut self, lambda: usize) -> Result<&DMatrix<f64>, NccError> {
        if !self.tables.contains_key(&lambda) {
            let table = self.basis.radial_table(lambda)?;
            self.tables.insert(lambda, table);
        }
        Ok(&self.tables[&lambda])
    }
}

/// Projects spin profiles (spin tuple x radial point) onto regularity components and expands
/// each in its radial functions.
fn analyze_radial(
    tables: &mut RadialTables,
    layout: &ModeLayout,
    rank: usize,
    spin_profiles: &DMatrix<Complex64>,
) -> Result<DVector<Complex64>, NccError> {
    let q = intertwiner(rank, layout.ell);
    let weights = tables.basis.radial_weights().to_vec();
    let mut coeffs = DVector::zeros(layout.size);
    for block in &layout.blocks {
        let table = tables.get(block.lambda)?;
        let scale = 2f64.powi(block.lambda as i32);
        for (k, w) in weights.iter().enumerate() {
            let reg: Complex64 = (0..spin_profiles.nrows())
                .map(|t| spin_profiles[(t, k)] * q[(t, block.component)])
                .sum();
            if reg.is_zero() {
                continue;
            }
            for n in 0..block.len {
                coeffs[block.offset + n] += reg * (scale * w * table[(n, k)]);
            }
        }
    }
    Ok(coeffs)
}

/// Inverse of [`analyze_radial`]: evaluates regularity components on the radial grid and
/// recombines them into spin profiles.
fn synthesize_radial(
    tables: &mut RadialTables,
    layout: &ModeLayout,
    rank: usize,
    coeffs: &DVector<Complex64>,
) -> Result<DMatrix<Complex64>, NccError> {
    let q = intertwiner(rank, layout.ell);
    let n_r = tables.basis.shape().2;
    let mut spin_profiles = DMatrix::zeros(num_components(rank), n_r);
    for block in &layout.blocks {
        let table = tables.get(block.lambda)?;
        for k in 0..n_r {
            let reg: Complex64 = (0..block.len)
                .map(|n| coeffs[block.offset + n] * table[(n, k)])
                .sum();
            for t in 0..spin_profiles.nrows() {
                spin_profiles[(t, k)] += reg * q[(t, block.component)];
            }
        }
    }
    Ok(spin_profiles)
}

fn check_grid_shape(basis: &BallBasis, domain: Domain, rank: usize, grid: &GridData) -> Result<(), NccError> {
    let expected = (num_components(rank), basis.num_grid_points(domain));
    if grid.shape() != expected {
        return Err(NccError::configuration(format!(
            "Grid data of shape {:?} does not match rank {rank} on {domain:?} (expected {expected:?})",
            grid.shape()
        )));
    }
    Ok(())
}

pub(crate) fn check_coeff_shape(basis: &BallBasis, domain: Domain, rank: usize, coeffs: &CoeffData) -> Result<(), NccError> {
    let expected_modes = match domain {
        Domain::Ball => basis.modes().len(),
        Domain::Radial => 1,
    };
    if coeffs.len() != expected_modes {
        return Err(NccError::configuration(format!(
            "Expected coefficients for {expected_modes} modes, got {}",
            coeffs.len()
        )));
    }
    let ells: Vec<usize> = match domain {
        Domain::Ball => basis.modes().iter().map(|mode| mode.ell).collect(),
        Domain::Radial => vec![0],
    };
    for (vector, ell) in coeffs.iter().zip(ells) {
        let size = basis.mode_layout(rank, ell).size;
        if vector.len() != size {
            return Err(NccError::ShapeMismatch {
                ell,
                expected: (size, 1),
                actual: (vector.len(), 1),
            });
        }
    }
    Ok(())
}

/// Grid to coefficient transform.
pub fn forward(basis: &BallBasis, domain: Domain, rank: usize, grid: &GridData) -> Result<CoeffData, NccError> {
    check_grid_shape(basis, domain, rank, grid)?;
    match domain {
        Domain::Ball => forward_ball(basis, rank, grid),
        Domain::Radial => forward_radial(basis, rank, grid),
    }
}

/// Coefficient to grid transform.
pub fn backward(basis: &BallBasis, domain: Domain, rank: usize, coeffs: &CoeffData) -> Result<GridData, NccError> {
    check_coeff_shape(basis, domain, rank, coeffs)?;
    match domain {
        Domain::Ball => backward_ball(basis, rank, coeffs),
        Domain::Radial => backward_radial(basis, rank, coeffs),
    }
}

fn forward_ball(basis: &BallBasis, rank: usize, grid: &GridData) -> Result<CoeffData, NccError> {
    let (n_phi, n_theta, n_r) = basis.shape();
    let l_max = basis.l_max();
    let m_max = basis.m_max();
    let num_spins = num_components(rank);
    let spin = spin_transform(rank) * grid;

    // Azimuthal DFT, one (theta x r) matrix per spin tuple and order
    let dphi = 2.0 * PI / n_phi as f64;
    let mut azimuthal: FxHashMap<(usize, i32), DMatrix<Complex64>> = FxHashMap::default();
    for t in 0..num_spins {
        for m in -m_max..=m_max {
            let twiddles: Vec<Complex64> = basis
                .grid_phi()
                .iter()
                .map(|&phi| Complex64::from_polar(dphi, -(m as f64) * phi))
                .collect();
            let f = DMatrix::from_fn(n_theta, n_r, |i, k| {
                twiddles
                    .iter()
                    .enumerate()
                    .map(|(j, tw)| spin[(t, basis.grid_index(j, i, k))] * tw)
                    .sum()
            });
            azimuthal.insert((t, m), f);
        }
    }

    let mut harmonics: FxHashMap<(i32, i32), DMatrix<f64>> = FxHashMap::default();
    let mut tables = RadialTables::new(basis);
    let mut coeffs = Vec::with_capacity(basis.modes().len());
    for mode in basis.modes() {
        let mut spin_profiles = DMatrix::zeros(num_spins, n_r);
        for t in 0..num_spins {
            let s = total_spin(t, rank);
            if s.unsigned_abs() as usize > mode.ell {
                continue;
            }
            if !harmonics.contains_key(&(s, mode.m)) {
                let table = harmonic_table(s, mode.m, l_max, basis.grid_cos_theta())?;
                harmonics.insert((s, mode.m), table);
            }
            let theta = &harmonics[&(s, mode.m)];
            let f = &azimuthal[&(t, mode.m)];
            for k in 0..n_r {
                spin_profiles[(t, k)] = (0..n_theta)
                    .map(|i| f[(i, k)] * (basis.theta_weights()[i] * theta[(mode.ell, i)]))
                    .sum();
            }
        }
        let layout = basis.mode_layout(rank, mode.ell);
        coeffs.push(analyze_radial(&mut tables, &layout, rank, &spin_profiles)?);
    }
    Ok(coeffs)
}

fn backward_ball(basis: &BallBasis, rank: usize, coeffs: &CoeffData) -> Result<GridData, NccError> {
    let (n_phi, n_theta, n_r) = basis.shape();
    let l_max = basis.l_max();
    let num_spins = num_components(rank);
    let mut spin = DMatrix::zeros(num_spins, basis.num_grid_points(Domain::Ball));

    let mut harmonics: FxHashMap<(i32, i32), DMatrix<f64>> = FxHashMap::default();
    let mut tables = RadialTables::new(basis);
    for (mode, mode_coeffs) in basis.modes().iter().zip(coeffs) {
        let layout = basis.mode_layout(rank, mode.ell);
        let spin_profiles = synthesize_radial(&mut tables, &layout, rank, mode_coeffs)?;
        let phases: Vec<Complex64> = basis
            .grid_phi()
            .iter()
            .map(|&phi| Complex64::from_polar(1.0, mode.m as f64 * phi))
            .collect();
        for t in 0..num_spins {
            let s = total_spin(t, rank);
            if s.unsigned_abs() as usize > mode.ell {
                continue;
            }
            if !harmonics.contains_key(&(s, mode.m)) {
                let table = harmonic_table(s, mode.m, l_max, basis.grid_cos_theta())?;
                harmonics.insert((s, mode.m), table);
            }
            let theta = &harmonics[&(s, mode.m)];
            for j in 0..n_phi {
                for i in 0..n_theta {
                    let angular = phases[j] * theta[(mode.ell, i)];
                    for k in 0..n_r {
                        spin[(t, basis.grid_index(j, i, k))] += spin_profiles[(t, k)] * angular;
                    }
                }
            }
        }
    }
    Ok(spin_transform(rank).adjoint() * spin)
}

fn forward_radial(basis: &BallBasis, rank: usize, grid: &GridData) -> Result<CoeffData, NccError> {
    let mut spin = spin_transform(rank) * grid;
    let scale = spin.iter().map(|v| v.norm()).fold(0.0, f64::max);
    let y00 = 1.0 / (4.0 * PI).sqrt();
    for t in 0..spin.nrows() {
        let mut row = spin.row_mut(t);
        if total_spin(t, rank) == 0 {
            row /= Complex64::from(y00);
        } else {
            let magnitude = row.iter().map(|v| v.norm()).fold(0.0, f64::max);
            if magnitude > RADIAL_SPIN_TOLERANCE * scale.max(1.0) {
                warn!(
                    "Radial field of rank {rank} has spin content {magnitude:e} in a non-zero total spin \
                     component, which is not representable at degree zero and is dropped"
                );
            }
            row.fill(Complex64::zero());
        }
    }
    let layout = basis.mode_layout(rank, 0);
    let mut tables = RadialTables::new(basis);
    Ok(vec![analyze_radial(&mut tables, &layout, rank, &spin)?])
}

fn backward_radial(basis: &BallBasis, rank: usize, coeffs: &CoeffData) -> Result<GridData, NccError> {
    let layout = basis.mode_layout(rank, 0);
    let mut tables = RadialTables::new(basis);
    let y00 = 1.0 / (4.0 * PI).sqrt();
    let spin = synthesize_radial(&mut tables, &layout, rank, &coeffs[0])? * Complex64::from(y00);
    Ok(spin_transform(rank).adjoint() * spin)
}
