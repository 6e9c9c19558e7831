use crb::model::{TimeDiscretization, TruthModel};
use crb::models::DiffusionReaction1d;
use crb::{CoercivityBound, ErrorType, Parameter};
use crb_sparse::{csr_apply, csr_linear_combination};
use nalgebra::DVector;

use crate::{build, config, mu, reference_model};

pub fn transient_model() -> DiffusionReaction1d {
    reference_model().with_time_discretization(TimeDiscretization::new(0.05, 0.5))
}

#[test]
fn transient_basis_has_finite_bounds() {
    let crb = build(transient_model(), config(ErrorType::Residual, 3));
    assert_eq!(crb.dimension(), 3);
    assert!(!crb.state().formulation().is_steady());

    for (_, entry) in crb.convergence().iter() {
        assert!(entry.max_error.is_finite());
        assert!(entry.delta_primal.is_finite() && entry.delta_primal >= 0.0);
    }

    let mu = mu(1.0, 2.0);
    let bounds = crb.ub(3, &mu).unwrap();
    assert_eq!(bounds.solution.trajectory.len(), 11);
    assert!(bounds.solution.trajectory[0].iter().all(|&c| c == 0.0));
    let bound = bounds.estimate.bound.unwrap();
    assert!(bound.is_finite() && bound >= 0.0);
    let primal = bounds.estimate.primal_residual.unwrap();
    assert!(primal.mass_coupling.is_finite());
}

#[test]
fn transient_output_approximates_truth_at_selected_parameter() {
    let crb = build(transient_model(), config(ErrorType::Residual, 2));
    let mu = crb.selected_parameters().at(0).clone();
    let truth = crb.model().output(0, &mu).unwrap();
    let reduced = crb.lb(2, &mu).unwrap().output;
    // Only the final time snapshot enters the basis, so the trajectory is approximated
    assert!((truth - reduced).abs() <= 0.5 * truth.abs());
    assert!(reduced.is_finite());
}

/// Implicit Euler truth states `u_0 = 0, u_1, ..., u_K` at `mu`.
fn truth_trajectory<M: TruthModel>(model: &M, mu: &Parameter) -> Vec<DVector<f64>> {
    let decomposition = model.affine_decomposition().unwrap();
    let discretization = model.time_discretization().unwrap();
    let dt = discretization.time_step;

    let mut trajectory = vec![DVector::zeros(model.num_dofs())];
    for k in 1..=discretization.num_steps() {
        let theta = model.theta(mu, discretization.time_at(k));
        let mass = csr_linear_combination(&decomposition.mass, &theta.mass);
        let stiffness = csr_linear_combination(&decomposition.stiffness, &theta.stiffness);
        let lhs = csr_linear_combination(&[mass.clone(), stiffness], &[1.0 / dt, 1.0]);

        let mut rhs = csr_apply(&mass, &trajectory[k - 1], false) / dt;
        for (term, &c) in decomposition.outputs[0].iter().zip(&theta.outputs[0]) {
            rhs.axpy(c, term, 1.0);
        }
        trajectory.push(model.solve(&lhs, &rhs).unwrap());
    }
    trajectory
}

#[test]
fn transient_output_error_decreases_with_basis_size() {
    let crb = build(transient_model(), config(ErrorType::ResidualScm, 6));
    assert_eq!(crb.dimension(), 6);

    for mu in [mu(1.0, 2.0), mu(0.3, 7.0), mu(6.0, 0.2)] {
        let truth = crb.model().output(0, &mu).unwrap();
        let errors: Vec<f64> = (1..=6)
            .map(|n| (truth - crb.lb(n, &mu).unwrap().output).abs())
            .collect();
        assert!(
            errors[5] < errors[0],
            "error at N = 6 ({:e}) is not below the error at N = 1 ({:e}) for mu = {}",
            errors[5],
            errors[0],
            mu.transpose()
        );
        assert!(errors[5] <= 0.5 * truth.abs());
    }
}

#[test]
fn primal_estimate_bounds_space_time_energy_error() {
    let crb = build(transient_model(), config(ErrorType::ResidualScm, 4));
    let model = crb.model();
    let coercivity = model.coercivity_bound();
    let dt = model.time_discretization().unwrap().time_step;

    for mu in [mu(1.0, 2.0), mu(0.3, 7.0), mu(6.0, 0.2)] {
        let truth = truth_trajectory(model, &mu);
        let alpha = coercivity.lb(&mu).unwrap();

        for n in 1..=4 {
            let bounds = crb.ub(n, &mu).unwrap();
            assert_eq!(bounds.solution.trajectory.len(), truth.len());

            // sum_k dt * alpha * |u_k - u_N,k|_X^2 <= delta_primal^2 for implicit Euler
            let energy: f64 = bounds
                .solution
                .trajectory
                .iter()
                .zip(&truth)
                .skip(1)
                .map(|(reduced, truth)| {
                    let error = truth - crb.reconstruct(reduced).unwrap();
                    dt * alpha * model.scalar_product(&error, &error)
                })
                .sum();
            let delta_primal = bounds.estimate.delta_primal;
            assert!(
                energy.sqrt() <= delta_primal * (1.0 + 1e-8) + 1e-8,
                "energy error {:e} exceeds primal estimate {:e} at N = {}, mu = {}",
                energy.sqrt(),
                delta_primal,
                n,
                mu.transpose()
            );
        }
    }
}
