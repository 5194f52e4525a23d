//! Linear problems and their per-mode subproblems.
//!
//! A problem collects the unknown fields and a list of equation expressions. The solver splits
//! it into one subproblem per mode `(ell, m)`. Each subproblem records where every unknown sits
//! in its state vector and where every equation sits in its row space, and holds the NCC blocks
//! stored into it.
use crate::basis::{BallBasis, Domain, Mode};
use crate::error::NccError;
use crate::expression::Expr;
use crate::field::{Distributor, FieldId};
use crate::ncc::{NccExpr, NodeId};
use log::{debug, info};
use nalgebra_sparse::CsrMatrix;
use num::complex::Complex64;
use num::Zero;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An expression that can be registered as an equation of a [`Problem`].
pub trait EquationExpression {
    fn output_rank(&self, dist: &Distributor) -> Result<usize, NccError>;

    /// The NCC node the equation corresponds to, if any.
    fn node_id(&self) -> Option<NodeId> {
        None
    }
}

impl EquationExpression for Expr {
    fn output_rank(&self, dist: &Distributor) -> Result<usize, NccError> {
        self.tensor_rank(dist)
    }
}

impl EquationExpression for NccExpr {
    fn output_rank(&self, _dist: &Distributor) -> Result<usize, NccError> {
        Ok(NccExpr::output_rank(self))
    }

    fn node_id(&self) -> Option<NodeId> {
        Some(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Equation {
    node: Option<NodeId>,
    rank: usize,
}

/// A linear boundary value problem in a set of unknown fields.
#[derive(Debug, Clone)]
pub struct Problem {
    variables: Vec<FieldId>,
    equations: Vec<Equation>,
}

impl Problem {
    pub fn new(variables: impl Into<Vec<FieldId>>) -> Self {
        Self {
            variables: variables.into(),
            equations: Vec::new(),
        }
    }

    pub fn variables(&self) -> &[FieldId] {
        &self.variables
    }

    pub fn num_equations(&self) -> usize {
        self.equations.len()
    }

    /// Registers an equation. Its rows in each subproblem follow those of the equations added
    /// before it.
    pub fn add_equation(&mut self, dist: &Distributor, equation: &impl EquationExpression) -> Result<(), NccError> {
        let rank = equation.output_rank(dist)?;
        let node = equation.node_id();
        if node.is_some() && self.equations.iter().any(|eq| eq.node == node) {
            return Err(NccError::configuration(format!(
                "Node {node:?} is already registered as an equation"
            )));
        }
        self.equations.push(Equation { node, rank });
        Ok(())
    }
}

/// Position of an unknown within the state vector of a subproblem.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VariableBlock {
    pub field: FieldId,
    pub offset: usize,
    pub size: usize,
}

/// Position of an equation within the rows of a subproblem.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EquationBlock {
    pub node: Option<NodeId>,
    pub offset: usize,
    pub size: usize,
}

/// A stored NCC operator together with its placement in the subproblem matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct NccBlock {
    pub row_offset: usize,
    pub col_offset: usize,
    pub matrix: CsrMatrix<Complex64>,
}

/// The part of a problem belonging to a single mode.
#[derive(Debug, Clone)]
pub struct Subproblem {
    mode: Mode,
    columns: Vec<VariableBlock>,
    rows: Vec<EquationBlock>,
    ncc_blocks: BTreeMap<NodeId, NccBlock>,
}

impl Subproblem {
    fn new(mode: Mode, basis: &BallBasis, problem: &Problem, ranks: &[usize]) -> Self {
        let mut offset = 0;
        let columns = problem
            .variables
            .iter()
            .zip(ranks)
            .map(|(&field, &rank)| {
                let size = basis.mode_layout(rank, mode.ell).size;
                let block = VariableBlock { field, offset, size };
                offset += size;
                block
            })
            .collect();

        let mut offset = 0;
        let rows = problem
            .equations
            .iter()
            .map(|equation| {
                let size = basis.mode_layout(equation.rank, mode.ell).size;
                let block = EquationBlock {
                    node: equation.node,
                    offset,
                    size,
                };
                offset += size;
                block
            })
            .collect();

        Self {
            mode,
            columns,
            rows,
            ncc_blocks: BTreeMap::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ell(&self) -> usize {
        self.mode.ell
    }

    pub fn m(&self) -> i32 {
        self.mode.m
    }

    pub fn columns(&self) -> &[VariableBlock] {
        &self.columns
    }

    pub fn rows(&self) -> &[EquationBlock] {
        &self.rows
    }

    pub fn column_block(&self, field: FieldId) -> Option<&VariableBlock> {
        self.columns.iter().find(|block| block.field == field)
    }

    pub fn equation_block(&self, node: NodeId) -> Option<&EquationBlock> {
        self.rows.iter().find(|block| block.node == Some(node))
    }

    /// Size of the state vector.
    pub fn num_cols(&self) -> usize {
        self.columns.iter().map(|block| block.size).sum()
    }

    /// Number of equation rows.
    pub fn num_rows(&self) -> usize {
        self.rows.iter().map(|block| block.size).sum()
    }

    pub fn ncc_block(&self, node: NodeId) -> Option<&NccBlock> {
        self.ncc_blocks.get(&node)
    }

    pub fn ncc_blocks(&self) -> impl Iterator<Item = (NodeId, &NccBlock)> {
        self.ncc_blocks.iter().map(|(node, block)| (*node, block))
    }

    pub(crate) fn insert_ncc_block(&mut self, node: NodeId, block: NccBlock) {
        self.ncc_blocks.insert(node, block);
    }

    /// Sums all stored NCC blocks into a single sparse matrix.
    ///
    /// The matrix has one column per state vector entry. It has one row per equation row, or
    /// more if a block stored at the rows of its unknown extends past the last equation. Such
    /// blocks are square, so the matrix never has more rows than the state vector has entries
    /// unless the equations alone do.
    pub fn assemble_ncc_matrix(&self) -> Result<CsrMatrix<Complex64>, NccError> {
        let num_cols = self.num_cols();
        let num_rows = self
            .ncc_blocks
            .values()
            .map(|block| block.row_offset + block.matrix.nrows())
            .fold(self.num_rows(), usize::max);

        // Summing into an ordered map combines entries of overlapping blocks and yields them in
        // row-major order
        let mut entries = BTreeMap::new();
        for block in self.ncc_blocks.values() {
            for (i, j, v) in block.matrix.triplet_iter() {
                *entries
                    .entry((block.row_offset + i, block.col_offset + j))
                    .or_insert_with(Complex64::zero) += *v;
            }
        }

        let mut offsets = Vec::with_capacity(num_rows + 1);
        let mut column_indices = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        offsets.push(0);
        for ((i, j), v) in entries {
            while i + 1 > offsets.len() {
                offsets.push(column_indices.len());
            }
            column_indices.push(j);
            values.push(v);
        }
        while offsets.len() < num_rows + 1 {
            offsets.push(column_indices.len());
        }

        CsrMatrix::try_from_csr_data(num_rows, num_cols, offsets, column_indices, values)
            .map_err(|err| NccError::configuration(format!("Failed to assemble subproblem matrix: {err}")))
    }
}

/// Splits a problem into per-mode subproblems.
#[derive(Debug)]
pub struct LinearBoundaryValueSolver {
    problem: Problem,
    basis: Arc<BallBasis>,
    subproblems: Vec<Subproblem>,
}

impl LinearBoundaryValueSolver {
    pub fn new(problem: Problem, dist: &Distributor) -> Result<Self, NccError> {
        let first = problem
            .variables
            .first()
            .ok_or_else(|| NccError::configuration("Problem has no variables"))?;
        let basis = Arc::clone(dist.field(*first).basis());
        let mut ranks = Vec::with_capacity(problem.variables.len());
        for &id in &problem.variables {
            let field = dist.field(id);
            if field.domain() != Domain::Ball {
                return Err(NccError::configuration(format!(
                    "Variable '{}' must be defined on the full ball",
                    field.name()
                )));
            }
            if !Arc::ptr_eq(field.basis(), &basis) {
                return Err(NccError::configuration(format!(
                    "Variable '{}' is defined on a different basis",
                    field.name()
                )));
            }
            ranks.push(field.rank());
        }

        let subproblems: Vec<Subproblem> = basis
            .modes()
            .iter()
            .map(|&mode| Subproblem::new(mode, &basis, &problem, &ranks))
            .collect();
        info!(
            "Built {} subproblems for {} variables and {} equations",
            subproblems.len(),
            problem.variables.len(),
            problem.equations.len()
        );
        Ok(Self {
            problem,
            basis,
            subproblems,
        })
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn basis(&self) -> &Arc<BallBasis> {
        &self.basis
    }

    pub fn subproblems(&self) -> &[Subproblem] {
        &self.subproblems
    }

    pub fn subproblems_mut(&mut self) -> &mut [Subproblem] {
        &mut self.subproblems
    }

    pub fn subproblem(&self, mode: Mode) -> Option<&Subproblem> {
        self.subproblems.iter().find(|sp| sp.mode == mode)
    }

    /// Prepares the given NCC nodes and stores their operators in every subproblem.
    pub fn prepare_nccs(&mut self, dist: &Distributor, nodes: &mut [&mut NccExpr]) -> Result<(), NccError> {
        for node in nodes.iter_mut() {
            node.prep_nccs(dist, &self.problem.variables)?;
            node.store_ncc_matrices(dist, &mut self.subproblems)?;
            debug!("Stored NCC node {:?} in {} subproblems", node.id(), self.subproblems.len());
        }
        Ok(())
    }
}
