//! Symbolic expressions over fields and their grid-space evaluation.
//!
//! Expressions refer to fields by handle. Grid evaluation is the reference path: it applies the
//! pointwise kernel of each operation at every grid point, broadcasting radial fields along the
//! angular directions.
use crate::basis::{BallBasis, Domain};
use crate::coords::{num_components, TensorSignature};
use crate::coupling::{coupling_strategy, Operation};
use crate::error::NccError;
use crate::field::{Distributor, FieldId};
use crate::ncc::NccExpr;
use crate::transform::GridData;
use nalgebra::DMatrix;
use num::complex::Complex64;
use std::ops::Mul;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(FieldId),
    Binary(Box<BinaryExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub operation: Operation,
    pub left: Expr,
    pub right: Expr,
}

/// Grid values of an evaluated expression.
#[derive(Debug, Clone)]
pub struct GridValue {
    pub domain: Domain,
    pub rank: usize,
    pub data: GridData,
}

impl From<FieldId> for Expr {
    fn from(id: FieldId) -> Self {
        Expr::Field(id)
    }
}

impl From<BinaryExpr> for Expr {
    fn from(binary: BinaryExpr) -> Self {
        Expr::Binary(Box::new(binary))
    }
}

/// Shorthand for [`Expr::dot`].
pub fn dot(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
    Expr::dot(left, right)
}

/// Shorthand for [`Expr::double_dot`].
pub fn double_dot(left: impl Into<Expr>, right: impl Into<Expr>) -> Expr {
    Expr::double_dot(left, right)
}

impl Expr {
    pub fn binary(operation: Operation, left: impl Into<Expr>, right: impl Into<Expr>) -> Self {
        BinaryExpr {
            operation,
            left: left.into(),
            right: right.into(),
        }
        .into()
    }

    /// Outer product (ordinary product if either operand is a scalar).
    pub fn product(left: impl Into<Expr>, right: impl Into<Expr>) -> Self {
        Self::binary(Operation::Product, left, right)
    }

    /// Dot product, contracting the last index of `left` with the first index of `right`.
    pub fn dot(left: impl Into<Expr>, right: impl Into<Expr>) -> Self {
        Self::binary(Operation::Dot, left, right)
    }

    /// Double contraction `A : B` of two rank-2 tensors.
    pub fn double_dot(left: impl Into<Expr>, right: impl Into<Expr>) -> Self {
        Self::binary(Operation::DoubleDot, left, right)
    }

    /// All fields referenced by the expression, in order of first appearance.
    pub fn fields(&self) -> Vec<FieldId> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, fields: &mut Vec<FieldId>) {
        match self {
            Expr::Field(id) => {
                if !fields.contains(id) {
                    fields.push(*id);
                }
            }
            Expr::Binary(binary) => {
                binary.left.collect_fields(fields);
                binary.right.collect_fields(fields);
            }
        }
    }

    pub fn contains(&self, field: FieldId) -> bool {
        match self {
            Expr::Field(id) => *id == field,
            Expr::Binary(binary) => binary.left.contains(field) || binary.right.contains(field),
        }
    }

    pub fn tensor_rank(&self, dist: &Distributor) -> Result<usize, NccError> {
        match self {
            Expr::Field(id) => Ok(dist.field(*id).rank()),
            Expr::Binary(binary) => {
                let strategy = coupling_strategy(
                    binary.operation,
                    binary.left.tensor_rank(dist)?,
                    binary.right.tensor_rank(dist)?,
                )?;
                Ok(strategy.output_rank)
            }
        }
    }

    /// The radial domain if every field of the expression is radial, the ball otherwise.
    pub fn domain(&self, dist: &Distributor) -> Domain {
        let all_radial = self
            .fields()
            .iter()
            .all(|id| dist.field(*id).domain() == Domain::Radial);
        if all_radial {
            Domain::Radial
        } else {
            Domain::Ball
        }
    }

    /// The basis shared by all fields of the expression.
    pub fn basis(&self, dist: &Distributor) -> Result<Arc<BallBasis>, NccError> {
        let fields = self.fields();
        let first = dist.field(fields[0]).basis();
        for id in &fields[1..] {
            if !Arc::ptr_eq(first, dist.field(*id).basis()) {
                return Err(NccError::configuration(format!(
                    "Fields '{}' and '{}' are not defined on the same basis",
                    dist.field(fields[0]).name(),
                    dist.field(*id).name()
                )));
            }
        }
        Ok(Arc::clone(first))
    }

    /// Evaluates the expression on the grid without modifying any field.
    pub fn evaluate_grid(&self, dist: &Distributor) -> Result<GridValue, NccError> {
        match self {
            Expr::Field(id) => {
                let field = dist.field(*id);
                Ok(GridValue {
                    domain: field.domain(),
                    rank: field.rank(),
                    data: dist.grid_snapshot(*id)?.into_owned(),
                })
            }
            Expr::Binary(binary) => {
                let basis = self.basis(dist)?;
                let left = binary.left.evaluate_grid(dist)?;
                let right = binary.right.evaluate_grid(dist)?;
                let strategy = coupling_strategy(binary.operation, left.rank, right.rank)?;

                let domain = if left.domain == Domain::Radial && right.domain == Domain::Radial {
                    Domain::Radial
                } else {
                    Domain::Ball
                };
                let num_points = basis.num_grid_points(domain);
                let n_r = basis.shape().2;
                // Radial data is broadcast: ball point p lies on radial point p % n_r
                let column = |value: &GridValue, p: usize| match value.domain {
                    Domain::Radial => p % n_r,
                    Domain::Ball => p,
                };

                let mut data = DMatrix::zeros(num_components(strategy.output_rank), num_points);
                let mut lhs = vec![Complex64::new(0.0, 0.0); left.data.nrows()];
                let mut rhs = vec![Complex64::new(0.0, 0.0); right.data.nrows()];
                let mut out = vec![Complex64::new(0.0, 0.0); data.nrows()];
                for p in 0..num_points {
                    lhs.copy_from_slice(left.data.column(column(&left, p)).as_slice());
                    rhs.copy_from_slice(right.data.column(column(&right, p)).as_slice());
                    strategy.apply(&lhs, &rhs, &mut out);
                    data.column_mut(p).copy_from_slice(&out);
                }
                Ok(GridValue {
                    domain,
                    rank: strategy.output_rank,
                    data,
                })
            }
        }
    }

    /// Evaluates the expression on the grid and stores the result in a new field.
    pub fn evaluate(&self, dist: &mut Distributor) -> Result<FieldId, NccError> {
        let basis = self.basis(dist)?;
        let GridValue { domain, rank, data } = self.evaluate_grid(dist)?;
        let tensorsig = TensorSignature::uniform(dist.coords(), rank);
        Ok(dist.insert_grid_field("evaluated", &basis, domain, tensorsig, data))
    }

    /// Returns a node representing the same binary operation, with NCC mode enabled if
    /// `as_ncc` is set.
    ///
    /// In NCC mode the operand containing none of the `unknowns` becomes the NCC. It must only
    /// involve radial fields, and the other operand must be one of the unknowns.
    pub fn reinitialize(&self, dist: &Distributor, as_ncc: bool, unknowns: &[FieldId]) -> Result<NccExpr, NccError> {
        match self {
            Expr::Field(id) => Err(NccError::configuration(format!(
                "Field '{}' is not a binary operation and cannot be reinitialized as an NCC",
                dist.field(*id).name()
            ))),
            Expr::Binary(binary) => NccExpr::new((**binary).clone(), dist, as_ncc, unknowns),
        }
    }
}

impl<Rhs: Into<Expr>> Mul<Rhs> for Expr {
    type Output = Expr;

    fn mul(self, rhs: Rhs) -> Expr {
        Expr::product(self, rhs)
    }
}

impl<Rhs: Into<Expr>> Mul<Rhs> for FieldId {
    type Output = Expr;

    fn mul(self, rhs: Rhs) -> Expr {
        Expr::product(self, rhs)
    }
}
