//! Products and contractions of tensors, and their spin-space coupling weights.
use crate::coords::num_components;
use crate::error::NccError;
use crate::regularity::intertwiner;
use crate::spin::spin_transform;
use nalgebra::DMatrix;
use num::complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Binary tensor operations that admit an NCC decomposition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Outer product. With a scalar operand this is the ordinary product.
    Product,
    /// Contraction of the last index of the left operand with the first index of the right.
    Dot,
    /// Full contraction of two rank-2 tensors, `A : B = A_ij B_ij`.
    DoubleDot,
}

/// How the component arrays of the operands are combined.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Contraction {
    Outer,
    Single,
    Double,
}

impl Contraction {
    fn contracted_indices(&self) -> usize {
        match self {
            Self::Outer => 0,
            Self::Single => 1,
            Self::Double => 2,
        }
    }
}

const COUPLING_TABLE: [((Operation, usize, usize), Contraction); 11] = [
    ((Operation::Product, 0, 0), Contraction::Outer),
    ((Operation::Product, 0, 1), Contraction::Outer),
    ((Operation::Product, 1, 0), Contraction::Outer),
    ((Operation::Product, 0, 2), Contraction::Outer),
    ((Operation::Product, 2, 0), Contraction::Outer),
    ((Operation::Product, 1, 1), Contraction::Outer),
    ((Operation::Dot, 1, 1), Contraction::Single),
    ((Operation::Dot, 1, 2), Contraction::Single),
    ((Operation::Dot, 2, 1), Contraction::Single),
    ((Operation::Dot, 2, 2), Contraction::Single),
    ((Operation::DoubleDot, 2, 2), Contraction::Double),
];

/// Pointwise kernel of a supported `(operation, left rank, right rank)` combination.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CouplingStrategy {
    pub operation: Operation,
    pub contraction: Contraction,
    pub left_rank: usize,
    pub right_rank: usize,
    pub output_rank: usize,
}

/// Looks up the coupling strategy for the given operation and operand ranks.
///
/// Combinations that are not in the support table are rejected with a configuration error.
pub fn coupling_strategy(
    operation: Operation,
    left_rank: usize,
    right_rank: usize,
) -> Result<CouplingStrategy, NccError> {
    COUPLING_TABLE
        .iter()
        .find(|(key, _)| *key == (operation, left_rank, right_rank))
        .map(|(_, contraction)| CouplingStrategy {
            operation,
            contraction: *contraction,
            left_rank,
            right_rank,
            output_rank: left_rank + right_rank - 2 * contraction.contracted_indices(),
        })
        .ok_or_else(|| {
            NccError::configuration(format!(
                "{operation:?} of a rank-{left_rank} and a rank-{right_rank} tensor is not supported"
            ))
        })
}

impl CouplingStrategy {
    /// Applies the kernel to coordinate components of the two operands.
    ///
    /// Components are stored in row-major multi-index order. The left operand is split into
    /// free and contracted indices `(I, K)` and the right operand into `(K, J)`, so that
    /// `out[I, J] = sum_K left[I, K] right[K, J]`.
    pub fn apply(&self, left: &[Complex64], right: &[Complex64], out: &mut [Complex64]) {
        let contracted = self.contraction.contracted_indices();
        let n_k = num_components(contracted);
        let n_i = num_components(self.left_rank - contracted);
        let n_j = num_components(self.right_rank - contracted);
        debug_assert_eq!(left.len(), n_i * n_k);
        debug_assert_eq!(right.len(), n_k * n_j);
        debug_assert_eq!(out.len(), n_i * n_j);

        for i in 0..n_i {
            for j in 0..n_j {
                out[i * n_j + j] = (0..n_k)
                    .map(|k| left[i * n_k + k] * right[k * n_j + j])
                    .sum();
            }
        }
    }
}

/// Which operand of a binary operation is the NCC.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NccSide {
    Left,
    Right,
}

/// Spin-space weights of an operation with one operand fixed to a spin basis tensor.
///
/// Entry `a` of the returned vector is the matrix mapping spin components of the unknown to
/// spin components of the output when the NCC is the spin basis tensor with flat spin index
/// `a`. The weights do not depend on position, since the spin frame is a constant unitary
/// change of basis of the local frame.
pub fn spin_weights(strategy: &CouplingStrategy, side: NccSide) -> Vec<DMatrix<Complex64>> {
    let (ncc_rank, unknown_rank) = match side {
        NccSide::Left => (strategy.left_rank, strategy.right_rank),
        NccSide::Right => (strategy.right_rank, strategy.left_rank),
    };
    // Coordinate components of the spin basis tensors are the columns of the adjoint
    let ncc_basis = spin_transform(ncc_rank).adjoint();
    let unknown_basis = spin_transform(unknown_rank).adjoint();
    let to_output_spin = spin_transform(strategy.output_rank);

    let n_out = num_components(strategy.output_rank);
    let n_unknown = num_components(unknown_rank);
    let mut coordinate_result = vec![Complex64::new(0.0, 0.0); n_out];

    (0..num_components(ncc_rank))
        .map(|a| {
            let ncc_tensor: Vec<Complex64> = ncc_basis.column(a).iter().copied().collect();
            let mut weights = DMatrix::zeros(n_out, n_unknown);
            for b in 0..n_unknown {
                let unknown_tensor: Vec<Complex64> = unknown_basis.column(b).iter().copied().collect();
                match side {
                    NccSide::Left => strategy.apply(&ncc_tensor, &unknown_tensor, &mut coordinate_result),
                    NccSide::Right => strategy.apply(&unknown_tensor, &ncc_tensor, &mut coordinate_result),
                }
                for sigma in 0..n_out {
                    weights[(sigma, b)] = (0..n_out)
                        .map(|c| to_output_spin[(sigma, c)] * coordinate_result[c])
                        .sum();
                }
            }
            weights
        })
        .collect()
}

/// Regularity-space coupling of one NCC regularity component.
///
/// For a fixed NCC regularity component `nu`, holds the matrix
/// `A_nu = sum_a W_a Q_ncc(0)[a, nu] / sqrt(4 pi)` in spin space. At degree `ell`, the coupling
/// between output regularity `rho` and unknown regularity `kappa` is
/// `(Q_out(ell)^T A_nu Q_unknown(ell))[rho, kappa]`.
#[derive(Debug, Clone)]
pub struct NccCoupling {
    pub ncc_component: usize,
    pub spin_matrix: DMatrix<Complex64>,
}

/// Contracts the spin weights with the degree-zero intertwiner of the NCC.
pub fn ncc_couplings(
    weights: &[DMatrix<Complex64>],
    ncc_rank: usize,
    ncc_components: impl IntoIterator<Item = usize>,
) -> Vec<NccCoupling> {
    let q0 = intertwiner(ncc_rank, 0);
    let normalization = 1.0 / (4.0 * PI).sqrt();
    ncc_components
        .into_iter()
        .filter_map(|nu| {
            let (n_out, n_unknown) = weights.first()?.shape();
            let mut spin_matrix = DMatrix::zeros(n_out, n_unknown);
            for (a, w) in weights.iter().enumerate() {
                let factor = q0[(a, nu)] * normalization;
                if factor != 0.0 {
                    spin_matrix += w * Complex64::from(factor);
                }
            }
            Some(NccCoupling {
                ncc_component: nu,
                spin_matrix,
            })
        })
        .collect()
}

impl NccCoupling {
    /// Coupling coefficients between output and unknown regularity components at degree `ell`.
    pub fn at_degree(&self, output_rank: usize, unknown_rank: usize, ell: usize) -> DMatrix<Complex64> {
        let q_out = intertwiner(output_rank, ell).map(Complex64::from);
        let q_in = intertwiner(unknown_rank, ell).map(Complex64::from);
        q_out.transpose() * &self.spin_matrix * q_in
    }
}
