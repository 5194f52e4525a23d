//! The ball basis: grids, mode layout and radial functions.
use crate::coords::SphericalCoordinates;
use crate::error::NccError;
use crate::regularity::regularity_components;
use ballncc_jacobi::{cached_gauss_jacobi, JacobiFamily};
use nalgebra::DMatrix;
use std::sync::Arc;

/// A single spherical harmonic mode `(ell, m)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mode {
    pub ell: usize,
    pub m: i32,
}

/// The spatial extent of a field: the whole ball, or the radial direction only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Domain {
    Ball,
    Radial,
}

/// Placement of one regularity component inside the coefficient vector of a mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegularityBlock {
    /// Flat index of the regularity tuple.
    pub component: usize,
    pub lambda: usize,
    pub offset: usize,
    pub len: usize,
}

/// Layout of the coefficients of a rank-`R` field at a fixed degree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeLayout {
    pub ell: usize,
    pub blocks: Vec<RegularityBlock>,
    pub size: usize,
}

impl ModeLayout {
    pub fn block(&self, component: usize) -> Option<&RegularityBlock> {
        self.blocks.iter().find(|block| block.component == component)
    }
}

/// Spectral basis for the ball of a given radius.
///
/// Angular directions use spherical harmonics up to degree `l_max = n_theta - 1` and orders
/// `|m| <= min(ell, m_max)` with `m_max = (n_phi - 1) / 2`. A regularity component of effective
/// degree `lambda` is expanded in
///
/// $$ \phi^\lambda_n(r) = \hat r^\lambda \hat P_n^{(\alpha, \lambda + 1/2)}(2 \hat r^2 - 1),
///    \qquad \hat r = r / R, \quad n < N_r - \lfloor \lambda / 2 \rfloor. $$
#[derive(Debug)]
pub struct BallBasis {
    coords: Arc<SphericalCoordinates>,
    shape: (usize, usize, usize),
    radius: f64,
    alpha: f64,
    modes: Vec<Mode>,
    phi: Vec<f64>,
    cos_theta: Vec<f64>,
    theta_weights: Vec<f64>,
    z: Vec<f64>,
    z_weights: Vec<f64>,
}

impl BallBasis {
    /// Creates a basis with shape `(n_phi, n_theta, n_r)` and `alpha = 0`.
    pub fn new(
        coords: &Arc<SphericalCoordinates>,
        shape: (usize, usize, usize),
        radius: f64,
    ) -> Result<Arc<Self>, NccError> {
        Self::with_alpha(coords, shape, radius, 0.0)
    }

    pub fn with_alpha(
        coords: &Arc<SphericalCoordinates>,
        shape: (usize, usize, usize),
        radius: f64,
        alpha: f64,
    ) -> Result<Arc<Self>, NccError> {
        let (n_phi, n_theta, n_r) = shape;
        if n_phi == 0 || n_theta == 0 || n_r == 0 {
            return Err(NccError::configuration(format!(
                "Basis shape must be positive in every direction, got {shape:?}"
            )));
        }
        if radius.is_nan() || radius <= 0.0 {
            return Err(NccError::configuration(format!("Ball radius must be positive, got {radius}")));
        }

        let angular = cached_gauss_jacobi(&JacobiFamily::legendre(), n_theta)?;
        let radial = cached_gauss_jacobi(&JacobiFamily::new(alpha, 0.5)?, n_r)?;

        let l_max = n_theta - 1;
        let m_max = ((n_phi - 1) / 2).min(l_max) as i32;
        let modes = (0..=l_max)
            .flat_map(|ell| {
                let m_bound = m_max.min(ell as i32);
                (-m_bound..=m_bound).map(move |m| Mode { ell, m })
            })
            .collect();

        Ok(Arc::new(Self {
            coords: Arc::clone(coords),
            shape,
            radius,
            alpha,
            modes,
            phi: (0..n_phi)
                .map(|j| 2.0 * std::f64::consts::PI * j as f64 / n_phi as f64)
                .collect(),
            cos_theta: angular.1.clone(),
            theta_weights: angular.0.clone(),
            z: radial.1.clone(),
            z_weights: radial.0.clone(),
        }))
    }

    pub fn coords(&self) -> &Arc<SphericalCoordinates> {
        &self.coords
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn l_max(&self) -> usize {
        self.shape.1 - 1
    }

    pub fn m_max(&self) -> i32 {
        ((self.shape.0 - 1) / 2).min(self.l_max()) as i32
    }

    /// All modes, ordered by degree and then by order.
    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn mode_index(&self, mode: Mode) -> Option<usize> {
        self.modes.binary_search(&mode).ok()
    }

    /// Number of radial coefficients of a regularity component with effective degree `lambda`.
    pub fn n_size(&self, lambda: usize) -> usize {
        self.shape.2.saturating_sub(lambda / 2)
    }

    /// The Jacobi family of regularity components with effective degree `lambda`.
    pub fn radial_family(&self, lambda: usize) -> Result<JacobiFamily, NccError> {
        Ok(JacobiFamily::new(self.alpha, lambda as f64 + 0.5)?)
    }

    pub fn mode_layout(&self, rank: usize, ell: usize) -> ModeLayout {
        let mut offset = 0;
        let blocks = regularity_components(rank, ell)
            .into_iter()
            .map(|component| {
                let len = self.n_size(component.lambda);
                let block = RegularityBlock {
                    component: component.index,
                    lambda: component.lambda,
                    offset,
                    len,
                };
                offset += len;
                block
            })
            .collect();
        ModeLayout {
            ell,
            blocks,
            size: offset,
        }
    }

    /// Azimuthal grid points.
    pub fn grid_phi(&self) -> &[f64] {
        &self.phi
    }

    /// Colatitude grid points, in the order of increasing `cos(theta)`.
    pub fn grid_theta(&self) -> Vec<f64> {
        self.cos_theta.iter().map(|x| x.acos()).collect()
    }

    pub fn grid_cos_theta(&self) -> &[f64] {
        &self.cos_theta
    }

    pub fn theta_weights(&self) -> &[f64] {
        &self.theta_weights
    }

    /// Normalized radial grid points `r / R` in `(0, 1)`.
    pub fn grid_r_normalized(&self) -> Vec<f64> {
        self.z.iter().map(|z| ((1.0 + z) / 2.0).sqrt()).collect()
    }

    /// Radial grid points.
    pub fn grid_r(&self) -> Vec<f64> {
        self.grid_r_normalized()
            .into_iter()
            .map(|r| self.radius * r)
            .collect()
    }

    pub fn radial_weights(&self) -> &[f64] {
        &self.z_weights
    }

    pub fn num_grid_points(&self, domain: Domain) -> usize {
        let (n_phi, n_theta, n_r) = self.shape;
        match domain {
            Domain::Ball => n_phi * n_theta * n_r,
            Domain::Radial => n_r,
        }
    }

    /// Flat index of the ball grid point `(phi_j, theta_i, r_k)`.
    pub fn grid_index(&self, j: usize, i: usize, k: usize) -> usize {
        let (_, n_theta, n_r) = self.shape;
        (j * n_theta + i) * n_r + k
    }

    /// Values of $\phi^\lambda_n$ on the radial grid, with one row per `n` and one column per
    /// grid point.
    pub fn radial_table(&self, lambda: usize) -> Result<DMatrix<f64>, NccError> {
        let family = self.radial_family(lambda)?;
        let n = self.n_size(lambda);
        let r = self.grid_r_normalized();
        let mut table = DMatrix::zeros(n, r.len());
        let mut values = vec![0.0; n];
        for (k, (&z, &r)) in self.z.iter().zip(&r).enumerate() {
            family.evaluate_into(&mut values, z);
            let prefactor = r.powi(lambda as i32);
            for (row, p) in values.iter().enumerate() {
                table[(row, k)] = prefactor * p;
            }
        }
        Ok(table)
    }
}
