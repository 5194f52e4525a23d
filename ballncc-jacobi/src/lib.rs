//! Jacobi polynomial families on the reference interval `[-1, 1]`.
//!
//! The polynomials handled here are the *orthonormal* Jacobi polynomials $\hat P_n^{(a, b)}$,
//! orthonormal with respect to the weight $(1 - x)^a (1 + x)^b$. Everything is expressed
//! through the three-term recurrence of the monic family, which gives
//!
//! - pointwise evaluation ([`JacobiFamily::evaluate`]),
//! - Gauss-Jacobi quadrature ([`gauss_jacobi`], [`cached_gauss_jacobi`]),
//! - banded operators acting on coefficient vectors ([`operators`]).
//!
//! The crate is used by `ballncc` for both the angular (Legendre and associated) and the
//! radial (Zernike-type) directions, but it has no dependency on it.

use std::fmt;
use std::fmt::{Display, Formatter};

mod family;
mod gauss;
pub mod operators;

pub use family::JacobiFamily;
pub use gauss::{cached_gauss_jacobi, gauss_jacobi};

/// Library-wide error type.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates that a rule satisfying the given requirements is not available.
    NoRuleAvailable,
    /// The family parameters do not define an integrable weight.
    InvalidParameters { a: f64, b: f64 },
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRuleAvailable => {
                write!(f, "There is no quadrature rule satisfying the requirements available")
            }
            Self::InvalidParameters { a, b } => {
                write!(f, "Jacobi parameters (a = {a}, b = {b}) must both be greater than -1")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A one-dimensional quadrature rule, stored as `(weights, points)`.
pub type Rule = (Vec<f64>, Vec<f64>);

/// Integrate the given function with the given rule.
pub fn integrate(rule: &Rule, f: impl Fn(f64) -> f64) -> f64 {
    let (weights, points) = rule;
    weights
        .iter()
        .zip(points)
        .map(|(w, x)| w * f(*x))
        .sum()
}
