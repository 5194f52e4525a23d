//! Non-constant coefficient (NCC) products on the ball.
//!
//! Fields on a ball are expanded in a spin-weighted spherical harmonic and Jacobi polynomial
//! basis. A product of an unknown field with a known radial field is linear in the unknown and
//! decouples across angular modes, so it can be represented by one sparse matrix per degree.
//! See [`ncc`] for the NCC workflow.
pub mod basis;
pub mod coords;
pub mod coupling;
pub mod error;
pub mod expression;
pub mod field;
pub mod ncc;
pub mod problem;
pub mod radial;
pub mod regularity;
pub mod spin;
pub mod transform;

pub use error::NccError;
pub use ncc::{NccExpr, NccSettings, NodeId};

pub extern crate ballncc_jacobi as jacobi;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
