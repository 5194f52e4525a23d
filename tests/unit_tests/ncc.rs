use crate::{
    gradient_g, gradient_radial_power, hessian_g, hessian_radial_power, radial_power, reference_setup, scalar_g,
};
use ballncc::basis::{BallBasis, Domain, Mode};
use ballncc::coords::TensorSignature;
use ballncc::coupling::{NccSide, Operation};
use ballncc::expression::{dot, Expr};
use ballncc::field::{Distributor, FieldId, Layout};
use ballncc::problem::{LinearBoundaryValueSolver, Problem, Subproblem};
use ballncc::{NccError, NccSettings};
use nalgebra::DMatrix;
use num::complex::Complex64;
use paste::paste;
use proptest::prelude::*;
use std::sync::Arc;
use util::{assert_approx_complex_eq, max_abs, max_abs_diff};

/// A known radial field multiplying an unknown, with the equation registered in the problem.
///
/// Without an explicit equation, the NCC node itself is registered.
struct Scenario {
    ncc: FieldId,
    unknown: FieldId,
    operation: Operation,
    equation: Option<Expr>,
}

type ScenarioBuilder = fn(&mut Distributor, &Arc<BallBasis>) -> eyre::Result<Scenario>;

fn scalar_prod_scalar(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    Ok(Scenario {
        ncc: radial_power(dist, basis, 4)?,
        unknown: scalar_g(dist, basis)?,
        operation: Operation::Product,
        equation: None,
    })
}

fn scalar_prod_vector(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    Ok(Scenario {
        ncc: radial_power(dist, basis, 6)?,
        unknown: gradient_g(dist, basis)?,
        operation: Operation::Product,
        equation: None,
    })
}

fn scalar_prod_tensor(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    Ok(Scenario {
        ncc: radial_power(dist, basis, 6)?,
        unknown: hessian_g(dist, basis)?,
        operation: Operation::Product,
        equation: None,
    })
}

fn vector_prod_scalar(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    let u = gradient_radial_power(dist, basis, 6)?;
    let g = scalar_g(dist, basis)?;
    Ok(Scenario {
        ncc: u,
        unknown: g,
        operation: Operation::Product,
        equation: Some(dot(u, u) * g),
    })
}

fn vector_prod_vector(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    let u = gradient_radial_power(dist, basis, 6)?;
    let v = gradient_g(dist, basis)?;
    Ok(Scenario {
        ncc: u,
        unknown: v,
        operation: Operation::Product,
        equation: Some(dot(u, u) * v),
    })
}

fn vector_dot_vector(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    let u = gradient_radial_power(dist, basis, 6)?;
    let v = gradient_g(dist, basis)?;
    Ok(Scenario {
        ncc: u,
        unknown: v,
        operation: Operation::Dot,
        equation: Some(dot(u, u) * v),
    })
}

fn vector_dot_tensor(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    let u = gradient_radial_power(dist, basis, 6)?;
    let t = hessian_g(dist, basis)?;
    Ok(Scenario {
        ncc: u,
        unknown: t,
        operation: Operation::Dot,
        equation: Some(dot(u, u) * t),
    })
}

fn tensor_prod_scalar(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    let f = radial_power(dist, basis, 6)?;
    let t = hessian_radial_power(dist, basis, 6)?;
    let g = scalar_g(dist, basis)?;
    Ok(Scenario {
        ncc: t,
        unknown: g,
        operation: Operation::Product,
        equation: Some(f * g),
    })
}

fn tensor_dot_vector(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    let f = radial_power(dist, basis, 6)?;
    let t = hessian_radial_power(dist, basis, 6)?;
    let u = gradient_g(dist, basis)?;
    Ok(Scenario {
        ncc: t,
        unknown: u,
        operation: Operation::Dot,
        equation: Some(f * u),
    })
}

fn tensor_dot_tensor(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    let f = radial_power(dist, basis, 6)?;
    let u = hessian_radial_power(dist, basis, 6)?;
    let t = hessian_g(dist, basis)?;
    Ok(Scenario {
        ncc: u,
        unknown: t,
        operation: Operation::Dot,
        equation: Some(f * t),
    })
}

fn tensor_double_dot_tensor(dist: &mut Distributor, basis: &Arc<BallBasis>) -> eyre::Result<Scenario> {
    Ok(Scenario {
        ncc: hessian_radial_power(dist, basis, 6)?,
        unknown: hessian_g(dist, basis)?,
        operation: Operation::DoubleDot,
        equation: None,
    })
}

/// Stores the NCC operators of the scenario and checks that applying them reproduces the
/// pointwise evaluation of the operation.
fn check_scenario(build: ScenarioBuilder, ncc_first: bool) -> eyre::Result<()> {
    let (mut dist, basis) = reference_setup()?;
    let Scenario {
        ncc,
        unknown,
        operation,
        equation,
    } = build(&mut dist, &basis)?;
    let (left, right) = if ncc_first { (ncc, unknown) } else { (unknown, ncc) };
    let unknowns = [unknown];

    let mut node = Expr::binary(operation, left, right).reinitialize(&dist, true, &unknowns)?;
    let expected_side = if ncc_first { NccSide::Left } else { NccSide::Right };
    assert_eq!(node.ncc_side(), Some(expected_side));

    let mut problem = Problem::new(unknowns);
    match &equation {
        Some(equation) => problem.add_equation(&dist, equation)?,
        None => problem.add_equation(&dist, &node)?,
    }
    let mut solver = LinearBoundaryValueSolver::new(problem, &dist)?;
    node.prep_nccs(&dist, &unknowns)?;
    node.store_ncc_matrices(&dist, solver.subproblems_mut())?;

    // Without rows of its own, a rank-changing node only keeps its matrices
    let has_rows = equation.is_none() || node.output_rank() == dist.field(unknown).rank();
    for subproblem in solver.subproblems() {
        let stored = node
            .stored_matrix(subproblem.mode())
            .expect("Every mode has a stored matrix");
        match subproblem.ncc_block(node.id()) {
            Some(block) => {
                assert!(has_rows);
                assert_eq!(block.col_offset, 0);
                assert_eq!(block.row_offset, 0);
                assert_eq!(&block.matrix, stored);
            }
            None => assert!(!has_rows),
        }
    }

    let w0 = node.evaluate(&mut dist)?;
    let w1 = node.evaluate_as_ncc(&mut dist)?;
    assert_eq!(dist.field(w1).rank(), node.output_rank());
    let expected = dist.grid_values(w0)?.clone();
    let actual = dist.grid_values(w1)?.clone();
    let tol = 1e-10 * max_abs(&expected).max(1.0);
    assert_approx_complex_eq!(actual, expected, abstol = tol);
    Ok(())
}

macro_rules! ncc_scenario_tests {
    ($($scenario:ident),* $(,)?) => {
        paste! {
            $(
                #[test]
                fn [<$scenario _ncc_first>]() -> eyre::Result<()> {
                    check_scenario($scenario, true)
                }

                #[test]
                fn [<$scenario _ncc_last>]() -> eyre::Result<()> {
                    check_scenario($scenario, false)
                }
            )*
        }
    };
}

ncc_scenario_tests!(
    scalar_prod_scalar,
    scalar_prod_vector,
    scalar_prod_tensor,
    vector_prod_scalar,
    vector_prod_vector,
    vector_dot_vector,
    vector_dot_tensor,
    tensor_prod_scalar,
    tensor_dot_vector,
    tensor_dot_tensor,
    tensor_double_dot_tensor,
);

/// A scalar problem in `g` with the NCC node `f * g`, `f = r^4`.
struct ScalarSetup {
    dist: Distributor,
    f: FieldId,
    g: FieldId,
    solver: LinearBoundaryValueSolver,
}

fn scalar_setup() -> eyre::Result<ScalarSetup> {
    let (mut dist, basis) = reference_setup()?;
    let f = radial_power(&mut dist, &basis, 4)?;
    let g = scalar_g(&mut dist, &basis)?;
    let solver = LinearBoundaryValueSolver::new(Problem::new([g]), &dist)?;
    Ok(ScalarSetup { dist, f, g, solver })
}

#[test]
fn designation_requires_exactly_one_unknown_operand() -> eyre::Result<()> {
    let ScalarSetup { mut dist, f, g, .. } = scalar_setup()?;
    let basis = dist.field(g).basis().clone();
    let h = scalar_g(&mut dist, &basis)?;

    let both = (g * h).reinitialize(&dist, true, &[g, h]);
    assert!(matches!(both, Err(NccError::Configuration(_))));
    let neither = (f * g).reinitialize(&dist, true, &[]);
    assert!(matches!(neither, Err(NccError::Configuration(_))));
    let angular_ncc = (h * g).reinitialize(&dist, true, &[g]);
    assert!(matches!(angular_ncc, Err(NccError::Configuration(_))));
    let composite_unknown = Expr::product(f, f * g).reinitialize(&dist, true, &[g]);
    assert!(matches!(composite_unknown, Err(NccError::Configuration(_))));
    let unsupported = Expr::dot(f, g).reinitialize(&dist, true, &[g]);
    assert!(matches!(unsupported, Err(NccError::Configuration(_))));

    let plain = (f * g).reinitialize(&dist, false, &[g])?;
    assert!(!plain.is_ncc());
    Ok(())
}

#[test]
fn nodes_not_in_ncc_mode_cannot_be_prepared() -> eyre::Result<()> {
    let ScalarSetup { dist, f, g, .. } = scalar_setup()?;
    let mut node = (f * g).reinitialize(&dist, false, &[g])?;
    assert!(matches!(node.prep_nccs(&dist, &[g]), Err(NccError::Configuration(_))));
    Ok(())
}

#[test]
fn preparation_requires_the_unknown() -> eyre::Result<()> {
    let ScalarSetup { dist, f, g, .. } = scalar_setup()?;
    let mut node = (f * g).reinitialize(&dist, true, &[g])?;
    assert!(matches!(node.prep_nccs(&dist, &[f]), Err(NccError::Configuration(_))));
    Ok(())
}

#[test]
fn storing_requires_prepared_operators() -> eyre::Result<()> {
    let ScalarSetup {
        mut dist,
        f,
        g,
        mut solver,
    } = scalar_setup()?;
    let mut node = (f * g).reinitialize(&dist, true, &[g])?;
    let result = node.store_ncc_matrices(&dist, solver.subproblems_mut());
    assert!(matches!(result, Err(NccError::Configuration(_))));
    assert!(matches!(node.evaluate_as_ncc(&mut dist), Err(NccError::Configuration(_))));
    Ok(())
}

#[test]
fn modified_ncc_makes_operators_stale() -> eyre::Result<()> {
    let ScalarSetup {
        mut dist,
        f,
        g,
        mut solver,
    } = scalar_setup()?;
    let mut node = (f * g).reinitialize(&dist, true, &[g])?;
    node.prep_nccs(&dist, &[g])?;

    // Layout changes do not modify the field
    dist.change_layout(f, Layout::Coeff)?;
    node.store_ncc_matrices(&dist, solver.subproblems_mut())?;

    dist.set_grid_from_fn(f, |p, out| out[0] = p.r.powi(2).into())?;
    let result = node.store_ncc_matrices(&dist, solver.subproblems_mut());
    assert_eq!(
        result,
        Err(NccError::StaleNcc {
            field: f,
            prepared: 1,
            current: 2
        })
    );
    assert!(matches!(node.evaluate_as_ncc(&mut dist), Err(NccError::StaleNcc { .. })));

    node.prep_nccs(&dist, &[g])?;
    node.store_ncc_matrices(&dist, solver.subproblems_mut())?;
    node.evaluate_as_ncc(&mut dist)?;
    Ok(())
}

#[test]
fn modes_not_stored_after_preparing_again_stay_stale() -> eyre::Result<()> {
    let ScalarSetup {
        mut dist,
        f,
        g,
        mut solver,
    } = scalar_setup()?;
    let mut node = (f * g).reinitialize(&dist, true, &[g])?;
    node.prep_nccs(&dist, &[g])?;
    node.store_ncc_matrices(&dist, solver.subproblems_mut())?;

    dist.set_grid_from_fn(f, |p, out| out[0] = p.r.powi(2).into())?;
    node.prep_nccs(&dist, &[g])?;
    node.store_ncc_matrices(&dist, &mut solver.subproblems_mut()[..1])?;
    assert_eq!(
        node.evaluate_as_ncc(&mut dist),
        Err(NccError::StaleNcc {
            field: f,
            prepared: 1,
            current: 2
        })
    );

    node.store_ncc_matrices(&dist, solver.subproblems_mut())?;
    let w0 = node.evaluate(&mut dist)?;
    let w1 = node.evaluate_as_ncc(&mut dist)?;
    let expected = dist.grid_values(w0)?.clone();
    let actual = dist.grid_values(w1)?.clone();
    assert_approx_complex_eq!(actual, expected, abstol = 1e-10 * max_abs(&expected).max(1.0));
    Ok(())
}

#[test]
fn unknown_must_be_in_every_subproblem() -> eyre::Result<()> {
    let ScalarSetup {
        mut dist,
        f,
        g,
        solver,
    } = scalar_setup()?;
    let basis = dist.field(g).basis().clone();
    let h = dist.new_field("h", &basis, Domain::Ball, TensorSignature::scalar())?;
    let mut other = LinearBoundaryValueSolver::new(Problem::new([h]), &dist)?;

    let mut node = (f * g).reinitialize(&dist, true, &[g])?;
    node.prep_nccs(&dist, &[g])?;
    let result = node.store_ncc_matrices(&dist, other.subproblems_mut());
    assert_eq!(
        result,
        Err(NccError::UnknownNotInSubproblem {
            unknown: g,
            ell: 0,
            m: 0
        })
    );

    // Subproblems are validated before any of them is modified
    let mut mixed: Vec<Subproblem> = solver.subproblems().to_vec();
    mixed.extend(other.subproblems().iter().cloned());
    assert!(node.store_ncc_matrices(&dist, &mut mixed).is_err());
    assert!(mixed.iter().all(|sp| sp.ncc_block(node.id()).is_none()));
    assert!(node.stored_matrix(Mode { ell: 0, m: 0 }).is_none());
    Ok(())
}

#[test]
fn storing_twice_overwrites() -> eyre::Result<()> {
    let ScalarSetup {
        dist,
        f,
        g,
        mut solver,
    } = scalar_setup()?;
    let mut node = (f * g).reinitialize(&dist, true, &[g])?;
    node.prep_nccs(&dist, &[g])?;
    node.store_ncc_matrices(&dist, solver.subproblems_mut())?;
    let first: Vec<_> = solver.subproblems().to_vec();
    node.store_ncc_matrices(&dist, solver.subproblems_mut())?;

    for (before, after) in first.iter().zip(solver.subproblems()) {
        assert_eq!(after.ncc_blocks().count(), 1);
        assert_eq!(before.ncc_block(node.id()), after.ncc_block(node.id()));
    }
    Ok(())
}

#[test]
fn operators_have_the_shape_of_the_mode_layouts() -> eyre::Result<()> {
    let (mut dist, basis) = reference_setup()?;
    let t = hessian_radial_power(&mut dist, &basis, 6)?;
    let u = gradient_g(&mut dist, &basis)?;
    let mut node = dot(t, u).reinitialize(&dist, true, &[u])?;
    node.prep_nccs(&dist, &[u])?;

    let operators = node.operators().expect("Operators were prepared");
    assert_eq!(operators.unknown(), u);
    assert_eq!(operators.degrees().len(), basis.l_max() + 1);
    for (ell, degree) in operators.degrees().iter().enumerate() {
        assert_eq!(degree.ell(), ell);
        assert_eq!(degree.matrix.nrows(), basis.mode_layout(1, ell).size);
        assert_eq!(degree.matrix.ncols(), basis.mode_layout(1, ell).size);
    }
    Ok(())
}

#[test]
fn truncation_settings_limit_the_ncc_expansion() -> eyre::Result<()> {
    let ScalarSetup { dist, f, g, .. } = scalar_setup()?;

    // r^4 is quadratic in 2 r^2 - 1
    let mut node = (f * g).reinitialize(&dist, true, &[g])?;
    node.prep_nccs(&dist, &[g])?;
    assert_eq!(node.operators().unwrap().num_ncc_terms(), &[(0, 3)]);

    let settings = NccSettings {
        max_terms: Some(1),
        ..NccSettings::default()
    };
    let mut node = (f * g).reinitialize(&dist, true, &[g])?.with_settings(settings);
    node.prep_nccs(&dist, &[g])?;
    assert_eq!(node.operators().unwrap().num_ncc_terms(), &[(0, 1)]);
    Ok(())
}

#[test]
fn zero_ncc_gives_empty_operators() -> eyre::Result<()> {
    let (mut dist, basis) = reference_setup()?;
    let zero = dist.new_field("zero", &basis, Domain::Radial, TensorSignature::scalar())?;
    let u = gradient_g(&mut dist, &basis)?;
    let mut node = (zero * u).reinitialize(&dist, true, &[u])?;
    node.prep_nccs(&dist, &[u])?;

    let operators = node.operators().unwrap();
    assert!(operators.num_ncc_terms().is_empty());
    assert!(operators.degrees().iter().all(|degree| degree.matrix.nnz() == 0));
    Ok(())
}

fn dense_operators(
    dist: &Distributor,
    expr: Expr,
    unknown: FieldId,
) -> Result<Vec<DMatrix<Complex64>>, NccError> {
    let mut node = expr.reinitialize(dist, true, &[unknown])?;
    node.prep_nccs(dist, &[unknown])?;
    Ok(node
        .operators()
        .map(|operators| {
            operators
                .degrees()
                .iter()
                .map(|degree| DMatrix::from(&degree.matrix))
                .collect()
        })
        .unwrap_or_default())
}

/// Evaluates `sum_i coeffs[i] r^(2i)`.
fn even_polynomial(coeffs: &[f64], r: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * r * r + c)
}

fn assert_same_operators(first: &[DMatrix<Complex64>], last: &[DMatrix<Complex64>]) -> Result<(), TestCaseError> {
    prop_assert_eq!(first.len(), last.len());
    for (first, last) in first.iter().zip(last) {
        prop_assert!(max_abs_diff(first, last) <= 1e-12 * max_abs(first).max(1.0));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn scalar_ncc_operators_do_not_depend_on_operand_order(
        coeffs in proptest::collection::vec(-2.0 .. 2.0f64, 1 .. 4)
    ) {
        let (mut dist, basis) = reference_setup().unwrap();
        let f = dist.new_field("f", &basis, Domain::Radial, TensorSignature::scalar()).unwrap();
        dist.set_grid_from_fn(f, |p, out| out[0] = even_polynomial(&coeffs, p.r).into()).unwrap();
        let u = gradient_g(&mut dist, &basis).unwrap();

        let ncc_first = dense_operators(&dist, f * u, u).unwrap();
        let ncc_last = dense_operators(&dist, u * f, u).unwrap();
        assert_same_operators(&ncc_first, &ncc_last)?;
    }

    #[test]
    fn vector_ncc_products_do_not_depend_on_operand_order(
        coeffs in proptest::collection::vec(-2.0 .. 2.0f64, 1 .. 4)
    ) {
        let (mut dist, basis) = reference_setup().unwrap();
        let vector = TensorSignature::uniform(dist.coords(), 1);
        let v = dist.new_field("v", &basis, Domain::Radial, vector).unwrap();
        dist.set_grid_from_fn(v, |p, out| out[2] = (p.r * even_polynomial(&coeffs, p.r)).into()).unwrap();
        let g = scalar_g(&mut dist, &basis).unwrap();

        let ncc_first = dense_operators(&dist, v * g, g).unwrap();
        let ncc_last = dense_operators(&dist, g * v, g).unwrap();
        assert_same_operators(&ncc_first, &ncc_last)?;
    }

    #[test]
    fn symmetric_tensor_ncc_contractions_do_not_depend_on_operand_order(
        isotropic in proptest::collection::vec(-2.0 .. 2.0f64, 1 .. 4),
        radial in proptest::collection::vec(-2.0 .. 2.0f64, 1 .. 4)
    ) {
        let (mut dist, basis) = reference_setup().unwrap();
        let tensor = TensorSignature::uniform(dist.coords(), 2);
        let t = dist.new_field("t", &basis, Domain::Radial, tensor).unwrap();
        dist.set_grid_from_fn(t, |p, out| {
            // a(r) I + r^2 b(r) e_r e_r
            let a = even_polynomial(&isotropic, p.r);
            out[0] = a.into();
            out[4] = a.into();
            out[8] = (a + p.r * p.r * even_polynomial(&radial, p.r)).into();
        }).unwrap();
        let u = gradient_g(&mut dist, &basis).unwrap();

        let ncc_first = dense_operators(&dist, dot(t, u), u).unwrap();
        let ncc_last = dense_operators(&dist, dot(u, t), u).unwrap();
        assert_same_operators(&ncc_first, &ncc_last)?;
    }
}
