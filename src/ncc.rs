//! Non-constant coefficient (NCC) nodes.
//!
//! A binary operation in which one operand is a known radial field (the NCC) and the other is an
//! unknown of the problem is linear in the unknown. Because the NCC is independent of angle, the
//! resulting operator does not couple different modes, and it only depends on the degree `ell`.
//!
//! Using an [`NccExpr`] involves three stages:
//!
//! 1. [`Expr::reinitialize`](crate::expression::Expr::reinitialize) designates the NCC operand,
//! 2. [`NccExpr::prep_nccs`] expands the NCC and builds one operator per degree,
//! 3. [`NccExpr::store_ncc_matrices`] places these operators into the subproblems.
//!
//! The stored matrices can be applied to the current value of the unknown with
//! [`NccExpr::evaluate_as_ncc`], which must agree with grid-space evaluation through
//! [`NccExpr::evaluate`] up to truncation error.
use crate::basis::{BallBasis, Domain, Mode, ModeLayout};
use crate::coords::TensorSignature;
use crate::coupling::{coupling_strategy, ncc_couplings, spin_weights, CouplingStrategy, NccCoupling, NccSide};
use crate::error::NccError;
use crate::expression::{BinaryExpr, Expr};
use crate::field::{Distributor, FieldId};
use crate::problem::{NccBlock, Subproblem};
use crate::radial::{multiplication_operator, truncate_ncc_coefficients, RadialDegrees};
use crate::transform::forward;
use itertools::iproduct;
use log::{debug, trace};
use nalgebra::DMatrix;
use nalgebra_sparse::CsrMatrix;
use num::complex::Complex64;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Regularity couplings with magnitude below this value are treated as exact zeros.
const COUPLING_TOLERANCE: f64 = 1e-12;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of an NCC node, used to key its blocks inside subproblems.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Controls how the radial expansion of an NCC is truncated.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NccSettings {
    /// Expansion coefficients with magnitude below the cutoff are dropped.
    pub cutoff: f64,
    /// Upper bound on the number of retained radial terms per regularity component.
    pub max_terms: Option<usize>,
}

impl Default for NccSettings {
    fn default() -> Self {
        Self {
            cutoff: 1e-6,
            max_terms: None,
        }
    }
}

#[derive(Debug, Clone)]
struct NccDesignation {
    side: NccSide,
    unknown: FieldId,
}

/// The NCC operator restricted to a single degree.
#[derive(Debug, Clone)]
pub struct DegreeOperator {
    pub output_layout: ModeLayout,
    pub input_layout: ModeLayout,
    pub matrix: CsrMatrix<Complex64>,
}

impl DegreeOperator {
    pub fn ell(&self) -> usize {
        self.input_layout.ell
    }
}

/// Per-degree operators of a prepared NCC node.
#[derive(Debug, Clone)]
pub struct PerDegreeOperatorSet {
    unknown: FieldId,
    ncc_versions: Vec<(FieldId, u64)>,
    num_ncc_terms: Vec<(usize, usize)>,
    degrees: Vec<DegreeOperator>,
}

impl PerDegreeOperatorSet {
    pub fn unknown(&self) -> FieldId {
        self.unknown
    }

    pub fn degree(&self, ell: usize) -> Option<&DegreeOperator> {
        self.degrees.get(ell)
    }

    pub fn degrees(&self) -> &[DegreeOperator] {
        &self.degrees
    }

    /// Number of retained radial terms for each non-zero regularity component of the NCC.
    pub fn num_ncc_terms(&self) -> &[(usize, usize)] {
        &self.num_ncc_terms
    }
}

/// A matrix stored for one mode, with the NCC versions it was built from.
#[derive(Debug, Clone)]
struct StoredMatrix {
    matrix: CsrMatrix<Complex64>,
    ncc_versions: Vec<(FieldId, u64)>,
}

/// Truncated radial expansion of one regularity component of the NCC.
#[derive(Debug, Clone)]
struct NccComponent {
    lambda: usize,
    coeffs: Vec<Complex64>,
}

/// A binary operation node that can act as a linear operator on one of its operands.
#[derive(Debug)]
pub struct NccExpr {
    id: NodeId,
    expr: BinaryExpr,
    strategy: CouplingStrategy,
    designation: Option<NccDesignation>,
    settings: NccSettings,
    operators: Option<PerDegreeOperatorSet>,
    stored: FxHashMap<Mode, StoredMatrix>,
}

impl NccExpr {
    pub(crate) fn new(
        expr: BinaryExpr,
        dist: &Distributor,
        as_ncc: bool,
        unknowns: &[FieldId],
    ) -> Result<Self, NccError> {
        let strategy = coupling_strategy(
            expr.operation,
            expr.left.tensor_rank(dist)?,
            expr.right.tensor_rank(dist)?,
        )?;
        Expr::from(expr.clone()).basis(dist)?;

        let designation = if as_ncc {
            Some(designate(&expr, dist, unknowns)?)
        } else {
            None
        };

        Ok(Self {
            id: NodeId::next(),
            expr,
            strategy,
            designation,
            settings: NccSettings::default(),
            operators: None,
            stored: FxHashMap::default(),
        })
    }

    pub fn with_settings(mut self, settings: NccSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn settings(&self) -> &NccSettings {
        &self.settings
    }

    pub fn strategy(&self) -> &CouplingStrategy {
        &self.strategy
    }

    pub fn output_rank(&self) -> usize {
        self.strategy.output_rank
    }

    /// Whether the node was reinitialized in NCC mode.
    pub fn is_ncc(&self) -> bool {
        self.designation.is_some()
    }

    pub fn ncc_side(&self) -> Option<NccSide> {
        self.designation.as_ref().map(|d| d.side)
    }

    pub fn unknown(&self) -> Option<FieldId> {
        self.designation.as_ref().map(|d| d.unknown)
    }

    /// The operand designated as NCC.
    pub fn ncc_operand(&self) -> Option<&Expr> {
        self.designation.as_ref().map(|d| match d.side {
            NccSide::Left => &self.expr.left,
            NccSide::Right => &self.expr.right,
        })
    }

    pub fn operators(&self) -> Option<&PerDegreeOperatorSet> {
        self.operators.as_ref()
    }

    /// The matrix stored for the given mode by the last call to
    /// [`store_ncc_matrices`](Self::store_ncc_matrices).
    pub fn stored_matrix(&self, mode: Mode) -> Option<&CsrMatrix<Complex64>> {
        self.stored.get(&mode).map(|stored| &stored.matrix)
    }

    /// The operation as a plain expression.
    pub fn expression(&self) -> Expr {
        Expr::from(self.expr.clone())
    }

    /// Evaluates the operation on the grid, independently of any prepared operators.
    pub fn evaluate(&self, dist: &mut Distributor) -> Result<FieldId, NccError> {
        self.expression().evaluate(dist)
    }

    fn designation(&self) -> Result<&NccDesignation, NccError> {
        self.designation
            .as_ref()
            .ok_or_else(|| NccError::configuration("Node was not reinitialized in NCC mode"))
    }

    /// Expands the NCC operand and builds the operator of the node at every degree.
    ///
    /// Preparation always recomputes from the current value of the NCC operand, replacing any
    /// previously prepared operators. The distributor is not modified.
    pub fn prep_nccs(&mut self, dist: &Distributor, unknowns: &[FieldId]) -> Result<(), NccError> {
        let designation = self.designation()?.clone();
        if !unknowns.contains(&designation.unknown) {
            return Err(NccError::configuration(format!(
                "Field '{}' is the unknown operand of the node, but is not among the given unknowns",
                dist.field(designation.unknown).name()
            )));
        }
        let ncc_operand = match designation.side {
            NccSide::Left => &self.expr.left,
            NccSide::Right => &self.expr.right,
        };
        let basis = ncc_operand.basis(dist)?;

        let ncc_grid = ncc_operand.evaluate_grid(dist)?;
        let ncc_rank = ncc_grid.rank;
        let ncc_coeffs = forward(&basis, Domain::Radial, ncc_rank, &ncc_grid.data)?;
        let layout = basis.mode_layout(ncc_rank, 0);
        let components: Vec<(usize, NccComponent)> = layout
            .blocks
            .iter()
            .filter_map(|block| {
                let coeffs = &ncc_coeffs[0].as_slice()[block.offset..block.offset + block.len];
                let coeffs = truncate_ncc_coefficients(coeffs, &self.settings);
                (!coeffs.is_empty()).then(|| {
                    (
                        block.component,
                        NccComponent {
                            lambda: block.lambda,
                            coeffs,
                        },
                    )
                })
            })
            .collect();
        let num_ncc_terms: Vec<(usize, usize)> = components
            .iter()
            .map(|(nu, component)| (*nu, component.coeffs.len()))
            .collect();
        debug!(
            "NCC of node {:?} has {} non-zero regularity components with (component, terms) {:?}",
            self.id,
            components.len(),
            num_ncc_terms
        );

        let weights = spin_weights(&self.strategy, designation.side);
        let couplings = ncc_couplings(&weights, ncc_rank, components.iter().map(|(nu, _)| *nu));
        let terms: Vec<(&NccComponent, &NccCoupling)> = components
            .iter()
            .map(|(_, component)| component)
            .zip(&couplings)
            .collect();

        let output_rank = self.strategy.output_rank;
        let unknown_rank = dist.field(designation.unknown).rank();
        let degrees = (0..=basis.l_max())
            .into_par_iter()
            .map(|ell| build_degree_operator(&basis, ell, output_rank, unknown_rank, &terms))
            .collect::<Result<Vec<_>, _>>()?;

        let ncc_versions = ncc_operand
            .fields()
            .into_iter()
            .map(|id| (id, dist.version(id)))
            .collect();
        debug!(
            "Prepared NCC operators of node {:?} for {} degrees ({} stored entries in total)",
            self.id,
            degrees.len(),
            degrees.iter().map(|d| d.matrix.nnz()).sum::<usize>()
        );
        self.operators = Some(PerDegreeOperatorSet {
            unknown: designation.unknown,
            ncc_versions,
            num_ncc_terms,
            degrees,
        });
        Ok(())
    }

    /// Writes the prepared operator of each subproblem's degree into the subproblem.
    ///
    /// The block is placed at the unknown's columns. Its rows are those of the equation
    /// registered for this node. A node that is not an equation of the problem is placed at the
    /// unknown's rows if it preserves the tensor rank of the unknown. Otherwise its matrices are
    /// only kept by the node, for [`evaluate_as_ncc`](Self::evaluate_as_ncc). Storing again
    /// overwrites the previous block. All subproblems are validated before any of them is
    /// modified.
    pub fn store_ncc_matrices(&mut self, dist: &Distributor, subproblems: &mut [Subproblem]) -> Result<(), NccError> {
        let operators = self
            .operators
            .as_ref()
            .ok_or_else(|| NccError::configuration("NCC operators must be prepared before they are stored"))?;
        check_versions(dist, &operators.ncc_versions)?;
        let unknown = operators.unknown;
        let preserves_rank = self.strategy.output_rank == dist.field(unknown).rank();

        let mut blocks = Vec::with_capacity(subproblems.len());
        for (index, subproblem) in subproblems.iter().enumerate() {
            let column = subproblem
                .column_block(unknown)
                .ok_or(NccError::UnknownNotInSubproblem {
                    unknown,
                    ell: subproblem.ell(),
                    m: subproblem.m(),
                })?;
            let degree = operators.degree(subproblem.ell()).ok_or_else(|| {
                NccError::configuration(format!("No NCC operator was prepared for degree {}", subproblem.ell()))
            })?;
            let matrix = &degree.matrix;
            let (expected_rows, row_offset) = match subproblem.equation_block(self.id) {
                Some(rows) => (rows.size, Some(rows.offset)),
                None => (matrix.nrows(), preserves_rank.then_some(column.offset)),
            };
            if (matrix.nrows(), matrix.ncols()) != (expected_rows, column.size) {
                return Err(NccError::ShapeMismatch {
                    ell: subproblem.ell(),
                    expected: (expected_rows, column.size),
                    actual: (matrix.nrows(), matrix.ncols()),
                });
            }
            blocks.push((index, row_offset, column.offset, matrix));
        }

        for (index, row_offset, col_offset, matrix) in blocks {
            let subproblem = &mut subproblems[index];
            self.stored.insert(
                subproblem.mode(),
                StoredMatrix {
                    matrix: matrix.clone(),
                    ncc_versions: operators.ncc_versions.clone(),
                },
            );
            match row_offset {
                Some(row_offset) => {
                    trace!(
                        "Storing NCC block of node {:?} in subproblem {:?} at ({}, {})",
                        self.id,
                        subproblem.mode(),
                        row_offset,
                        col_offset
                    );
                    subproblem.insert_ncc_block(
                        self.id,
                        NccBlock {
                            row_offset,
                            col_offset,
                            matrix: matrix.clone(),
                        },
                    );
                }
                None => trace!(
                    "NCC matrix of node {:?} for subproblem {:?} has no rows in the subproblem",
                    self.id,
                    subproblem.mode()
                ),
            }
        }
        Ok(())
    }

    /// Applies the stored per-mode matrices to the current value of the unknown.
    ///
    /// The result is stored in a new field in coefficient layout.
    pub fn evaluate_as_ncc(&self, dist: &mut Distributor) -> Result<FieldId, NccError> {
        let unknown = self.designation()?.unknown;
        if self.stored.is_empty() {
            return Err(NccError::configuration(
                "NCC matrices must be stored before the node can be evaluated as an NCC",
            ));
        }

        let basis = Arc::clone(dist.field(unknown).basis());
        let input = dist.coeff_snapshot(unknown)?.into_owned();
        let output = basis
            .modes()
            .iter()
            .zip(&input)
            .map(|(mode, x)| {
                let StoredMatrix { matrix, ncc_versions } = self.stored.get(mode).ok_or_else(|| {
                    NccError::configuration(format!("No NCC matrix was stored for mode {mode:?}"))
                })?;
                check_versions(dist, ncc_versions)?;
                if matrix.ncols() != x.len() {
                    return Err(NccError::ShapeMismatch {
                        ell: mode.ell,
                        expected: (matrix.nrows(), x.len()),
                        actual: (matrix.nrows(), matrix.ncols()),
                    });
                }
                Ok(matrix * x)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tensorsig = TensorSignature::uniform(dist.coords(), self.strategy.output_rank);
        Ok(dist.insert_coeff_field("ncc_product", &basis, Domain::Ball, tensorsig, output))
    }
}

fn designate(expr: &BinaryExpr, dist: &Distributor, unknowns: &[FieldId]) -> Result<NccDesignation, NccError> {
    let in_left = unknowns.iter().any(|u| expr.left.contains(*u));
    let in_right = unknowns.iter().any(|u| expr.right.contains(*u));
    let (side, unknown_operand, ncc_operand) = match (in_left, in_right) {
        (false, true) => (NccSide::Left, &expr.right, &expr.left),
        (true, false) => (NccSide::Right, &expr.left, &expr.right),
        (true, true) => {
            return Err(NccError::configuration(
                "Both operands contain unknowns, so neither can be treated as an NCC",
            ))
        }
        (false, false) => {
            return Err(NccError::configuration(
                "Neither operand contains an unknown, so the operation is not linear in the unknowns",
            ))
        }
    };

    let unknown = match unknown_operand {
        Expr::Field(id) => *id,
        Expr::Binary(_) => {
            return Err(NccError::configuration(
                "The operand holding the unknown must be the unknown field itself",
            ))
        }
    };
    if dist.field(unknown).domain() != Domain::Ball {
        return Err(NccError::configuration(format!(
            "Unknown '{}' must be defined on the full ball",
            dist.field(unknown).name()
        )));
    }
    if let Some(id) = ncc_operand
        .fields()
        .into_iter()
        .find(|id| dist.field(*id).domain() != Domain::Radial)
    {
        return Err(NccError::configuration(format!(
            "NCC operand depends on field '{}', which has angular dependence",
            dist.field(id).name()
        )));
    }
    Ok(NccDesignation { side, unknown })
}

fn check_versions(dist: &Distributor, versions: &[(FieldId, u64)]) -> Result<(), NccError> {
    for &(field, prepared) in versions {
        let current = dist.version(field);
        if current != prepared {
            return Err(NccError::StaleNcc {
                field,
                prepared,
                current,
            });
        }
    }
    Ok(())
}

fn build_degree_operator(
    basis: &BallBasis,
    ell: usize,
    output_rank: usize,
    unknown_rank: usize,
    terms: &[(&NccComponent, &NccCoupling)],
) -> Result<DegreeOperator, NccError> {
    let output_layout = basis.mode_layout(output_rank, ell);
    let input_layout = basis.mode_layout(unknown_rank, ell);
    let mut dense = DMatrix::<Complex64>::zeros(output_layout.size, input_layout.size);

    for (component, coupling) in terms {
        let coefficients = coupling.at_degree(output_rank, unknown_rank, ell);
        for (output_block, input_block) in iproduct!(&output_layout.blocks, &input_layout.blocks) {
            let c = coefficients[(output_block.component, input_block.component)];
            if c.norm() < COUPLING_TOLERANCE {
                continue;
            }
            let degrees = RadialDegrees {
                lambda_in: input_block.lambda,
                lambda_out: output_block.lambda,
                lambda_ncc: component.lambda,
            };
            let op = multiplication_operator(
                basis.alpha(),
                degrees,
                &component.coeffs,
                input_block.len,
                output_block.len,
            )?;
            let mut target = dense.view_mut(
                (output_block.offset, input_block.offset),
                (output_block.len, input_block.len),
            );
            target += op * c;
        }
    }

    Ok(DegreeOperator {
        output_layout,
        input_layout,
        matrix: CsrMatrix::from(&dense),
    })
}
