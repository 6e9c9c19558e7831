use crb::model::{MinThetaCoercivityBound, TimeDiscretization, TruthModel};
use crb::models::DiffusionReaction1d;
use crb::CoercivityBound;
use crb_sparse::csr_apply;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector};

use crate::{mu, reference_model};

#[test]
fn affine_structure() {
    let model = reference_model();
    assert_eq!(model.num_dofs(), 31);
    assert_eq!(model.qa(), 2);
    assert_eq!(model.qm(), 0);
    assert_eq!(model.num_outputs(), 2);
    assert!(model.is_steady());

    let decomposition = model.affine_decomposition().unwrap();
    assert_eq!(decomposition.stiffness.len(), 2);
    assert!(decomposition.mass.is_empty());
    for matrix in &decomposition.stiffness {
        let dense = DMatrix::from(matrix);
        assert_matrix_eq!(dense, dense.transpose());
    }
    // The load vector integrates the hat functions
    let total: f64 = decomposition.outputs[0][0].sum();
    assert_scalar_eq!(total, 31.0 / 32.0, comp = abs, tol = 1e-14);
}

#[test]
fn poisson_output_matches_exact_solution() {
    // -u'' = 1 has the solution u = x (1 - x) / 2, which P1 elements interpolate exactly at the
    // nodes in 1D. The compliant output is then the trapezoidal rule applied to u.
    let model = DiffusionReaction1d::new(64).unwrap();
    let h = 1.0 / 64.0;
    let trapezoidal: f64 = (1..64)
        .map(|i| {
            let x = i as f64 * h;
            h * x * (1.0 - x) / 2.0
        })
        .sum();

    let output = model.output(0, &mu(1.0, 0.0)).unwrap();
    assert_scalar_eq!(output, trapezoidal, comp = abs, tol = 1e-10);
    assert_scalar_eq!(output, 1.0 / 12.0, comp = abs, tol = 1e-4);

    // By symmetry, the right half carries half of the integral
    let right = model.output(1, &mu(1.0, 0.0)).unwrap();
    assert_scalar_eq!(right, 0.5 * output, comp = abs, tol = 1e-10);
}

#[test]
fn truth_solve_satisfies_linear_system() {
    let model = reference_model();
    let system = model.update(&mu(0.3, 4.0)).unwrap();
    let u = model.solve(&system.stiffness, &system.outputs[0]).unwrap();
    let residual = csr_apply(&system.stiffness, &u, false) - &system.outputs[0];
    assert!(residual.norm() <= 1e-10 * system.outputs[0].norm());
}

#[test]
fn l2solve_computes_riesz_representer() {
    let model = reference_model();
    let f = DVector::from_fn(model.num_dofs(), |i, _| (i as f64).sin());
    let r = model.l2solve(&f).unwrap();
    // (r, v)_X = f^T v for all v
    for j in [0, 7, 30] {
        let mut v = DVector::zeros(model.num_dofs());
        v[j] = 1.0;
        assert_scalar_eq!(model.scalar_product(&r, &v), f[j], comp = abs, tol = 1e-10);
    }
}

#[test]
fn variance_product_is_symmetric_and_centered() {
    let model = reference_model();
    let a = DVector::from_fn(model.num_dofs(), |i, _| (i as f64 * 0.3).cos());
    let b = DVector::from_fn(model.num_dofs(), |i, _| 1.0 + i as f64);
    let ab = model.variance_product(&a, &b).unwrap();
    let ba = model.variance_product(&b, &a).unwrap();
    assert_scalar_eq!(ab, ba, comp = abs, tol = 1e-12);
    assert!(model.variance_product(&a, &a).unwrap() >= 0.0);
}

#[test]
fn coercivity_bound_is_smallest_coefficient_ratio() {
    let model = reference_model();
    let bound = model.coercivity_bound();
    assert_scalar_eq!(bound.lb(&mu(0.5, 3.0)).unwrap(), 0.5);
    assert_scalar_eq!(bound.ub(&mu(0.5, 3.0)).unwrap(), 3.0);

    let mut degenerate = MinThetaCoercivityBound::new(&mu(1.0, 1.0), |mu| model_theta(mu));
    assert!(degenerate.lb(&mu(0.0, 1.0)).is_err());
    degenerate.set_for_mass_matrix(true);
    assert!(degenerate.lb(&mu(1.0, 1.0)).is_err());
}

fn model_theta(mu: &crb::Parameter) -> crb::model::ThetaCoefficients {
    crb::model::ThetaCoefficients {
        mass: Vec::new(),
        stiffness: vec![mu[0], mu[1]],
        outputs: vec![vec![1.0]],
    }
}

#[test]
fn transient_model_approaches_steady_state() {
    let steady = reference_model();
    let transient = reference_model().with_time_discretization(TimeDiscretization::new(0.1, 20.0));
    assert!(!transient.is_steady());
    assert_eq!(transient.qm(), 1);

    let mu = mu(1.0, 1.0);
    let steady_output = steady.output(0, &mu).unwrap();
    let transient_output = transient.output(0, &mu).unwrap();
    assert_scalar_eq!(transient_output, steady_output, comp = abs, tol = 1e-8);
}
