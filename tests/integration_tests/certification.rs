use crb::model::TruthModel;
use crb::{CrbConfig, ErrorType, SamplingKind};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{build, config, mu, reference_model};

/// Grows the basis to exactly five functions.
fn certified_config() -> CrbConfig {
    CrbConfig {
        sampling_size: 30,
        ..config(ErrorType::ResidualScm, 5)
    }
}

#[test]
fn bounds_enclose_truth_output() {
    let crb = build(reference_model(), certified_config());
    let n = crb.dimension();
    assert_eq!(n, 5);

    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let sampling = crb
        .model()
        .parameter_space()
        .sample(SamplingKind::Random, 20, &mut rng)
        .unwrap();

    for mu in sampling.iter() {
        let truth = crb.model().output(0, mu).unwrap();
        let bounds = crb.ub(n, mu).unwrap();
        let bound = bounds.estimate.bound.unwrap();
        let error = (truth - bounds.solution.output).abs();
        // The truth output itself comes from an iterative solver
        assert!(
            error <= bound + 1e-10 * truth.abs().max(1.0),
            "error {:e} exceeds bound {:e} at mu = {}",
            error,
            bound,
            mu.transpose()
        );
    }
}

#[test]
fn bound_vanishes_at_selected_parameters() {
    let crb = build(reference_model(), certified_config());
    let reports = crb.check(crb.dimension()).unwrap();
    assert_eq!(reports.len(), 5);
    for report in reports {
        assert!(report.error <= 1e-8 * report.truth_output.abs());
        assert!(report.bound.unwrap() <= 1e-6);
    }
}

#[test]
fn effectivity_indices_are_at_least_one() {
    let crb = build(reference_model(), certified_config());
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let report = crb.effectivity_indices(10, &mut rng).unwrap();
    assert_eq!(report.samples.len(), 10);

    for sample in &report.samples {
        // Errors at round-off level make the ratio meaningless
        if sample.error > 1e-9 {
            assert!(sample.effectivity().unwrap() >= 1.0 - 1e-6);
        }
    }
    assert!(report.min <= report.max);
}

#[test]
fn run_uses_smallest_sufficient_basis() {
    let crb = build(reference_model(), config(ErrorType::ResidualScm, 4));
    let mu = mu(0.8, 3.0);

    let full = crb.run(&mu, 0.0).unwrap();
    assert_eq!(full.n, crb.dimension());

    let (first_n, first) = crb.convergence().iter().next().unwrap();
    let coarse = crb.run(&mu, first.max_error).unwrap();
    assert_eq!(coarse.n, first_n);
    assert_eq!(coarse.output, crb.lb(first_n, &mu).unwrap().output);
    assert!(coarse.error_bound.is_some());
}
