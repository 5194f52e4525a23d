//! Error types.
use crate::field::FieldId;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// Errors raised by NCC preparation, assembly and evaluation.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum NccError {
    /// Ill-posed NCC designation, unsupported rank combination or inconsistent bases.
    Configuration(String),
    /// The unknown operand has no place in the state vector of the target subproblem.
    UnknownNotInSubproblem { unknown: FieldId, ell: usize, m: i32 },
    /// The NCC operand changed after the per-degree operators were prepared.
    StaleNcc { field: FieldId, prepared: u64, current: u64 },
    /// A radial operator does not match the coefficient count it is applied to.
    ShapeMismatch {
        ell: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

impl NccError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl Display for NccError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(message) => write!(f, "Invalid NCC configuration: {message}"),
            Self::UnknownNotInSubproblem { unknown, ell, m } => {
                write!(
                    f,
                    "Unknown field {} is not part of the state vector of subproblem (ell = {ell}, m = {m})",
                    unknown.index()
                )
            }
            Self::StaleNcc {
                field,
                prepared,
                current,
            } => {
                write!(
                    f,
                    "NCC operators were prepared for version {prepared} of field {}, \
                     but the field is now at version {current}. Call prep_nccs again.",
                    field.index()
                )
            }
            Self::ShapeMismatch {
                ell,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Operator shape mismatch at degree {ell}: expected {}x{}, got {}x{}",
                    expected.0, expected.1, actual.0, actual.1
                )
            }
        }
    }
}

impl Error for NccError {}

impl From<ballncc_jacobi::Error> for NccError {
    fn from(err: ballncc_jacobi::Error) -> Self {
        Self::Configuration(format!("Quadrature error: {err}"))
    }
}
