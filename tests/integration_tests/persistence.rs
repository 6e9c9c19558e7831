use crb::{Crb, CrbConfig, DatabaseLocation, ErrorType};

use crate::{build, config, mu, reference_model};

fn with_database(config: CrbConfig, directory: &std::path::Path) -> CrbConfig {
    CrbConfig {
        database: Some(DatabaseLocation::new(directory, "diffusion-reaction")),
        ..config
    }
}

#[test]
fn offline_persists_and_reloads_basis() {
    let dir = tempfile::tempdir().unwrap();
    let config = with_database(config(ErrorType::Residual, 3), dir.path());
    let built = build(reference_model(), config.clone());
    let path = built.database_path().unwrap();
    assert!(path.exists());

    let reloaded = Crb::new(reference_model(), config).unwrap();
    assert_eq!(reloaded.state(), built.state());

    let mu = mu(3.0, 0.4);
    let expected = built.ub(3, &mu).unwrap();
    let actual = reloaded.ub(3, &mu).unwrap();
    assert_eq!(actual.solution.output.to_bits(), expected.solution.output.to_bits());
    assert_eq!(actual.estimate.bound, expected.estimate.bound);
}

#[test]
fn resumed_offline_matches_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let partial = build(
        reference_model(),
        with_database(config(ErrorType::Residual, 2), dir.path()),
    );
    assert_eq!(partial.dimension(), 2);
    assert!(partial.state().current_mu().is_some());

    let resumed = build(
        reference_model(),
        with_database(config(ErrorType::Residual, 4), dir.path()),
    );
    let fresh = build(reference_model(), config(ErrorType::Residual, 4));

    assert_eq!(resumed.dimension(), 4);
    assert_eq!(resumed.state().selected_indices(), fresh.state().selected_indices());
    for ((n, resumed_entry), (n_fresh, fresh_entry)) in resumed.convergence().iter().zip(fresh.convergence().iter()) {
        assert_eq!(n, n_fresh);
        let scale = fresh_entry.max_error.abs().max(f64::MIN_POSITIVE);
        assert!((resumed_entry.max_error - fresh_entry.max_error).abs() <= 1e-10 * scale);
    }

    let mu = mu(0.2, 8.0);
    let resumed_output = resumed.lb(4, &mu).unwrap().output;
    let fresh_output = fresh.lb(4, &mu).unwrap().output;
    assert!((resumed_output - fresh_output).abs() <= 1e-12 * fresh_output.abs());
}

#[test]
fn save_and_load_adopt_stored_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("explicit.json");
    let built = build(
        reference_model(),
        CrbConfig {
            output_index: 1,
            ..config(ErrorType::ResidualScm, 2)
        },
    );
    built.save_to(&path).unwrap();

    let mut crb = Crb::new(reference_model(), config(ErrorType::Residual, 2)).unwrap();
    crb.load_from(&path).unwrap();
    assert_eq!(crb.config().output_index, 1);
    assert_eq!(crb.config().error_type, ErrorType::ResidualScm);
    assert_eq!(crb.state(), built.state());

    // No configured location
    assert!(crb.save().is_err());
    assert!(crb.load().is_err());
}

#[test]
fn transient_database_is_ignored_by_steady_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = with_database(config(ErrorType::Residual, 2), dir.path());
    let transient = crate::integration_tests::transient::transient_model();
    build(transient, config.clone());

    let steady = Crb::new(reference_model(), config).unwrap();
    assert_eq!(steady.dimension(), 0);
}

#[test]
fn reconstruct_combines_basis_functions() {
    let crb = build(reference_model(), config(ErrorType::Residual, 2));
    let solution = crb.lb(2, &mu(1.5, 1.5)).unwrap();
    let field = crb.reconstruct(&solution.coefficients).unwrap();
    let basis = crb.state().basis().primal();
    let expected = &basis[0] * solution.coefficients[0] + &basis[1] * solution.coefficients[1];
    assert!((field - expected).amax() <= 1e-14);

    assert!(crb.reconstruct(&nalgebra::DVector::zeros(3)).is_err());
}
