use crb::model::TruthModel;
use crb::models::DiffusionReaction1d;
use crb::online::empirical_coarse_size;
use crb::{Crb, CrbConfig, CrbError, DatabaseLocation, ErrorType};
use matrixcompare::assert_scalar_eq;

use crate::{mu, reference_model};

pub fn test_config(error_type: ErrorType, max_iterations: usize) -> CrbConfig {
    CrbConfig {
        error_type,
        max_iterations,
        tolerance: 1e-14,
        sampling_size: 20,
        seed: 7,
        ..CrbConfig::default()
    }
}

pub fn built_crb(config: CrbConfig) -> Crb<DiffusionReaction1d> {
    let model = reference_model();
    let bound = model.coercivity_bound();
    let mut crb = Crb::new(model, config).unwrap().with_coercivity_bound(bound);
    crb.offline().unwrap();
    crb
}

#[test]
fn empirical_coarse_size_follows_factor() {
    assert_eq!(empirical_coarse_size(10, 2), 5);
    assert_eq!(empirical_coarse_size(1, 2), 1);
    assert_eq!(empirical_coarse_size(10, -1), 9);
    assert_eq!(empirical_coarse_size(10, -3), 7);
    // N must exceed |f|
    assert_eq!(empirical_coarse_size(3, -3), 1);
    assert_eq!(empirical_coarse_size(5, 0), 1);
}

#[test]
fn lb_on_empty_basis_fails() {
    let crb = Crb::new(reference_model(), test_config(ErrorType::Residual, 3)).unwrap();
    assert_eq!(crb.dimension(), 0);
    assert!(matches!(crb.lb(1, &mu(1.0, 1.0)), Err(CrbError::EmptyBasis)));
}

#[test]
fn lb_clamps_basis_size_and_is_deterministic() {
    let crb = built_crb(test_config(ErrorType::Residual, 3));
    assert_eq!(crb.dimension(), 3);

    let mu = mu(0.7, 2.0);
    let clamped = crb.lb(100, &mu).unwrap();
    assert_eq!(clamped.n, 3);
    let full = crb.lb(3, &mu).unwrap();
    assert_eq!(clamped.output.to_bits(), full.output.to_bits());
    assert_eq!(clamped.coefficients, full.coefficients);

    let smaller = crb.lb(2, &mu).unwrap();
    assert_eq!(smaller.n, 2);
    assert_eq!(smaller.coefficients.len(), 2);
    assert!(full.condition_number >= 1.0);
}

#[test]
fn ub_is_output_plus_bound() {
    let crb = built_crb(test_config(ErrorType::ResidualScm, 3));
    let mu = mu(4.0, 0.2);
    let bounds = crb.ub(3, &mu).unwrap();
    let bound = bounds.estimate.bound.unwrap();
    assert!(bound >= 0.0);
    assert_eq!(bounds.upper, bounds.solution.output + bound);
    assert_eq!(bound, bounds.estimate.delta_primal * bounds.estimate.delta_dual);

    let delta = crb.delta(3, &mu).unwrap();
    assert_eq!(delta, bounds.estimate);
}

#[test]
fn residual_scm_requires_coercivity_bound() {
    let mut crb = Crb::new(reference_model(), test_config(ErrorType::ResidualScm, 2)).unwrap();
    assert!(matches!(crb.offline(), Err(CrbError::MissingCoercivityBound)));
}

#[test]
fn no_residual_has_no_bound() {
    let crb = built_crb(test_config(ErrorType::NoResidual, 4));
    let mu = mu(1.0, 1.0);
    let bounds = crb.ub(crb.dimension(), &mu).unwrap();
    assert_eq!(bounds.estimate.bound, None);
    assert_eq!(bounds.upper, bounds.solution.output);
}

#[test]
fn empirical_bound_compares_basis_sizes() {
    let crb = built_crb(test_config(ErrorType::Empirical, 4));
    assert_eq!(crb.dimension(), 4);
    let mu = mu(0.3, 5.0);

    let fine = crb.lb(4, &mu).unwrap();
    let coarse = crb.lb(3, &mu).unwrap();
    let delta = crb.delta(4, &mu).unwrap();
    assert_eq!(delta.bound, Some((fine.output - coarse.output).abs()));

    // The first selection has no second basis size to compare against
    assert_eq!(crb.convergence().get(1).unwrap().max_error, 1e5);
}

#[test]
fn dual_correction_improves_noncompliant_output() {
    let config = CrbConfig {
        output_index: 1,
        ..test_config(ErrorType::Residual, 2)
    };
    let crb = built_crb(config.clone());
    let uncorrected = built_crb(CrbConfig {
        solve_dual_problem: false,
        ..config
    });

    let mu = mu(0.4, 6.0);
    let truth = crb.model().output(1, &mu).unwrap();
    let corrected_error = (crb.lb(2, &mu).unwrap().output - truth).abs();
    let uncorrected_error = (uncorrected.lb(2, &mu).unwrap().output - truth).abs();
    assert!(corrected_error <= uncorrected_error);
}

#[test]
fn variance_output_uses_variance_matrix() {
    let config = CrbConfig {
        compute_variance: true,
        ..test_config(ErrorType::Residual, 3)
    };
    let crb = built_crb(config);
    let variance = crb.state().variance().expect("variance matrix must be computed");
    assert_eq!(variance.dimension(), 3);

    let mu = mu(2.0, 2.0);
    let solution = crb.lb(3, &mu).unwrap();
    let u = &solution.coefficients;
    let expected = u.dot(&(variance.term(0) * u));
    assert_scalar_eq!(solution.output, expected, comp = abs, tol = 1e-14);
}

#[test]
fn variance_matrix_grows_while_variance_output_is_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let location = DatabaseLocation::new(dir.path(), "variance");
    let config = |max_iterations, compute_variance| CrbConfig {
        compute_variance,
        database: Some(location.clone()),
        ..test_config(ErrorType::Residual, max_iterations)
    };

    let initial = built_crb(config(2, true));
    assert_eq!(initial.state().variance().unwrap().dimension(), 2);

    let mut crb = built_crb(config(4, false));
    assert_eq!(crb.dimension(), 4);
    assert_eq!(crb.state().variance().unwrap().dimension(), 4);

    crb.set_compute_variance(true);
    let mu = mu(2.0, 2.0);
    let solution = crb.lb(4, &mu).unwrap();
    let u = &solution.coefficients;
    let variance = crb.state().variance().unwrap();
    let expected = u.dot(&(variance.term(0) * u));
    assert_scalar_eq!(solution.output, expected, comp = abs, tol = 1e-14);
}
