use crb::model::{assemble_truth_system, TruthModel};
use crb::residual::{ResidualErrorEstimator, RieszCache};
use crb_sparse::csr_apply;
use nalgebra::DVector;

use super::reduced::snapshot_basis;
use crate::{mu, reference_model};

/// Dual norm of the functional `r` under the inner product of the model, squared.
fn truth_dual_norm_squared<M: TruthModel>(model: &M, r: &DVector<f64>) -> f64 {
    let riesz = model.l2solve(r).unwrap();
    model.scalar_product(&riesz, &riesz)
}

#[test]
fn residual_norm_matches_truth_riesz_norm() {
    let model = reference_model();
    let decomposition = model.affine_decomposition().unwrap();
    let basis = snapshot_basis(&[(0.1, 0.1), (10.0, 1.0), (1.0, 10.0)]);

    let mut estimator = ResidualErrorEstimator::new(model.qa(), model.qm(), model.ql(0), model.ql(1), false);
    let mut cache = RieszCache::default();
    estimator
        .grow_to(&model, &decomposition, &basis, 1, basis.len(), &mut cache)
        .unwrap();
    assert_eq!(estimator.dimension(), 3);

    let mu = mu(2.5, 0.7);
    let theta = model.theta(&mu, 0.0);
    let system = assemble_truth_system(&decomposition, &theta);
    // Coefficients far from the reduced solution, so that the residual is not dominated by
    // cancellation
    let u = DVector::from_vec(vec![0.3, -1.2, 0.8]);

    let u_full = basis.reconstruct(&u);
    let primal_residual = &system.outputs[0] - csr_apply(&system.stiffness, &u_full, false);
    let expected = truth_dual_norm_squared(&model, &primal_residual);
    let norm = estimator
        .primal
        .squared_norm(&theta.stiffness, &theta.outputs[0], &u);
    assert!((norm.squared - expected).abs() <= 1e-9 * expected);
    assert!((norm.residual_norm() - expected.sqrt()).abs() <= 1e-9 * expected.sqrt());

    let mut psi = DVector::zeros(model.num_dofs());
    for (xi, &c) in basis.dual().iter().zip(u.iter()) {
        psi.axpy(c, xi, 1.0);
    }
    let dual_residual = -&system.outputs[1] - csr_apply(&system.stiffness, &psi, true);
    let expected = truth_dual_norm_squared(&model, &dual_residual);
    let norm = estimator
        .dual
        .squared_norm(&theta.stiffness, &theta.outputs[1], &u);
    assert!((norm.squared - expected).abs() <= 1e-9 * expected);
}

#[test]
fn residual_terms_grow_monotonically() {
    let model = reference_model();
    let decomposition = model.affine_decomposition().unwrap();
    let basis = snapshot_basis(&[(0.1, 0.1), (10.0, 1.0), (1.0, 10.0)]);

    let mut incremental = ResidualErrorEstimator::new(model.qa(), model.qm(), model.ql(0), model.ql(1), false);
    let mut cache = RieszCache::default();
    let mut sizes = Vec::new();
    for n in 1..=basis.len() {
        let mut truncated = crb::basis::ReducedBasis::new();
        for i in 0..n {
            truncated.push(
                basis.primal()[i].clone(),
                basis.dual()[i].clone(),
                basis.provenance()[i].clone(),
            );
        }
        incremental
            .grow_to(&model, &decomposition, &truncated, 1, 1, &mut cache)
            .unwrap();
        sizes.push(incremental.clone());
    }

    let c0 = &sizes[0].primal.c0;
    for (k, estimator) in sizes.iter().enumerate() {
        let n = k + 1;
        assert_eq!(&estimator.primal.c0, c0);
        for q1 in 0..model.qa() {
            for q2 in 0..model.qa() {
                let full = incremental.primal.gamma[q1].term(q2);
                let block = full.view((0, 0), (n, n)).into_owned();
                assert_eq!(&block, estimator.primal.gamma[q1].term(q2));
            }
        }
    }

    // A fresh cache recomputes the representers of the whole basis without altering the
    // already stored terms
    let mut reloaded = sizes[1].clone();
    let mut fresh_cache = RieszCache::default();
    reloaded
        .grow_to(&model, &decomposition, &basis, 1, 1, &mut fresh_cache)
        .unwrap();
    assert_eq!(reloaded.primal.c0, incremental.primal.c0);
    for q in 0..model.qa() {
        let stored = sizes[1].primal.gamma[q].term(q);
        let block = reloaded.primal.gamma[q].term(q).view((0, 0), (2, 2)).into_owned();
        assert_eq!(&block, stored);
    }
}

#[test]
fn default_estimator_is_empty() {
    let estimator = ResidualErrorEstimator::default();
    assert_eq!(estimator.dimension(), 0);
    assert_eq!(estimator.primal.c0.shape(), (0, 0));
    assert_eq!(estimator.dual.c0.shape(), (0, 0));
    assert!(estimator.transient.is_none());
}
