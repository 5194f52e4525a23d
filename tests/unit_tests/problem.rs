use crate::{gradient_g, radial_power, reference_setup, scalar_g};
use ballncc::basis::{BallBasis, Domain, Mode};
use ballncc::coords::TensorSignature;
use ballncc::problem::{LinearBoundaryValueSolver, Problem};
use ballncc::NccError;
use nalgebra::DMatrix;
use num::complex::Complex64;
use util::assert_approx_complex_eq;

#[test]
fn subproblems_lay_out_variables_and_equations() -> eyre::Result<()> {
    let (mut dist, basis) = reference_setup()?;
    let f = radial_power(&mut dist, &basis, 2)?;
    let g = scalar_g(&mut dist, &basis)?;
    let u = gradient_g(&mut dist, &basis)?;

    let mut problem = Problem::new([g, u]);
    problem.add_equation(&dist, &(f * u))?;
    problem.add_equation(&dist, &(f * g))?;
    let solver = LinearBoundaryValueSolver::new(problem, &dist)?;
    assert_eq!(solver.subproblems().len(), basis.modes().len());

    let subproblem = solver
        .subproblem(Mode { ell: 1, m: 0 })
        .expect("Mode exists");
    let g_block = subproblem.column_block(g).unwrap();
    let u_block = subproblem.column_block(u).unwrap();
    assert_eq!((g_block.offset, g_block.size), (0, 8));
    assert_eq!((u_block.offset, u_block.size), (8, 8 + 8 + 7));
    assert_eq!(subproblem.num_cols(), 31);

    let row_sizes: Vec<_> = subproblem
        .rows()
        .iter()
        .map(|block| (block.offset, block.size))
        .collect();
    assert_eq!(row_sizes, vec![(0, 23), (23, 8)]);
    assert_eq!(subproblem.num_rows(), 31);
    assert!(subproblem.column_block(f).is_none());
    Ok(())
}

#[test]
fn variables_must_be_ball_fields_on_one_basis() -> eyre::Result<()> {
    let (mut dist, basis) = reference_setup()?;
    let f = radial_power(&mut dist, &basis, 2)?;
    let g = scalar_g(&mut dist, &basis)?;
    assert!(matches!(
        LinearBoundaryValueSolver::new(Problem::new([g, f]), &dist),
        Err(NccError::Configuration(_))
    ));
    assert!(matches!(
        LinearBoundaryValueSolver::new(Problem::new(Vec::new()), &dist),
        Err(NccError::Configuration(_))
    ));

    let other = BallBasis::new(dist.coords(), basis.shape(), 2.0)?;
    let h = dist.new_field("h", &other, Domain::Ball, TensorSignature::scalar())?;
    assert!(matches!(
        LinearBoundaryValueSolver::new(Problem::new([g, h]), &dist),
        Err(NccError::Configuration(_))
    ));
    Ok(())
}

#[test]
fn nodes_are_registered_once() -> eyre::Result<()> {
    let (mut dist, basis) = reference_setup()?;
    let f = radial_power(&mut dist, &basis, 2)?;
    let g = scalar_g(&mut dist, &basis)?;
    let node = (f * g).reinitialize(&dist, true, &[g])?;

    let mut problem = Problem::new([g]);
    problem.add_equation(&dist, &node)?;
    assert!(matches!(
        problem.add_equation(&dist, &node),
        Err(NccError::Configuration(_))
    ));
    assert_eq!(problem.num_equations(), 1);
    Ok(())
}

#[test]
fn assembled_matrix_sums_overlapping_blocks() -> eyre::Result<()> {
    let (mut dist, basis) = reference_setup()?;
    let f = radial_power(&mut dist, &basis, 4)?;
    let g = scalar_g(&mut dist, &basis)?;
    let mut first = (f * g).reinitialize(&dist, true, &[g])?;
    let mut second = (g * f).reinitialize(&dist, true, &[g])?;

    let mut problem = Problem::new([g]);
    problem.add_equation(&dist, &(f * g))?;
    let mut solver = LinearBoundaryValueSolver::new(problem, &dist)?;
    solver.prepare_nccs(&dist, &mut [&mut first, &mut second])?;

    for subproblem in solver.subproblems() {
        assert_eq!(subproblem.ncc_blocks().count(), 2);
        let block = DMatrix::from(&subproblem.ncc_block(first.id()).unwrap().matrix);
        let assembled = DMatrix::from(&subproblem.assemble_ncc_matrix()?);
        assert_eq!(assembled.shape(), (subproblem.num_rows(), subproblem.num_cols()));
        assert_approx_complex_eq!(assembled, block.map(|v| v * Complex64::from(2.0)), abstol = 1e-13);
    }
    Ok(())
}

#[test]
fn rank_changing_nodes_outside_the_equations_keep_their_matrices() -> eyre::Result<()> {
    let (mut dist, basis) = reference_setup()?;
    let vector = TensorSignature::uniform(dist.coords(), 1);
    let grad_f = dist.new_field("grad_f", &basis, Domain::Radial, vector)?;
    dist.set_grid_from_fn(grad_f, |p, out| out[2] = p.r.into())?;
    let g = scalar_g(&mut dist, &basis)?;

    let mut node = (grad_f * g).reinitialize(&dist, true, &[g])?;
    let mut problem = Problem::new([g]);
    problem.add_equation(&dist, &(g * g))?;
    let mut solver = LinearBoundaryValueSolver::new(problem, &dist)?;
    solver.prepare_nccs(&dist, &mut [&mut node])?;

    for subproblem in solver.subproblems() {
        assert!(subproblem.ncc_block(node.id()).is_none());
        let stored = node.stored_matrix(subproblem.mode()).unwrap();
        assert_eq!(stored.nrows(), basis.mode_layout(1, subproblem.ell()).size);

        let assembled = subproblem.assemble_ncc_matrix()?;
        assert_eq!(assembled.nrows(), subproblem.num_rows());
        assert_eq!(assembled.ncols(), subproblem.num_cols());
        assert_eq!(assembled.nnz(), 0);
    }
    node.evaluate_as_ncc(&mut dist)?;
    Ok(())
}
