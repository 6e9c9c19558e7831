//! Interfaces to the full-order ("truth") model and to coercivity bound providers.
//!
//! The reduced basis engine never looks inside a truth model. It only relies on the affine
//! decomposition
//!
//! ```text
//! M(mu) = sum_q theta_m[q](mu) M_q,    A(mu) = sum_q theta_a[q](mu) A_q,
//! F_l(mu) = sum_q theta_l[q](mu) F_lq,
//! ```
//!
//! a solver for assembled systems, and the inner product `(u, v)_X` of the solution space
//! together with its Riesz map.
use crate::parameter::{Parameter, ParameterSpace};
use crb_sparse::{csr_apply, csr_linear_combination, CsrMatrix};
use eyre::eyre;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Uniform implicit Euler time discretization on `[0, final_time]`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDiscretization {
    pub time_step: f64,
    pub final_time: f64,
}

impl TimeDiscretization {
    pub fn new(time_step: f64, final_time: f64) -> Self {
        Self { time_step, final_time }
    }

    pub fn num_steps(&self) -> usize {
        (self.final_time / self.time_step).round().max(1.0) as usize
    }

    /// Time at the end of step `k`, for `k = 1, ..., num_steps`.
    pub fn time_at(&self, k: usize) -> f64 {
        k as f64 * self.time_step
    }
}

/// The parameter-independent terms of a truth model.
#[derive(Debug, Clone)]
pub struct AffineDecomposition {
    /// Mass terms `M_q`. Empty for steady models.
    pub mass: Vec<CsrMatrix<f64>>,
    /// Stiffness terms `A_q`.
    pub stiffness: Vec<CsrMatrix<f64>>,
    /// `outputs[0]` holds the right-hand side terms `F_q`, `outputs[l]` the terms of output `l`.
    pub outputs: Vec<Vec<DVector<f64>>>,
}

/// The coefficients `theta(mu, t)` matching an [`AffineDecomposition`].
#[derive(Debug, Clone, PartialEq)]
pub struct ThetaCoefficients {
    pub mass: Vec<f64>,
    pub stiffness: Vec<f64>,
    pub outputs: Vec<Vec<f64>>,
}

/// A truth system assembled for a given parameter.
#[derive(Debug, Clone)]
pub struct TruthSystem {
    pub mass: Option<CsrMatrix<f64>>,
    pub stiffness: CsrMatrix<f64>,
    /// `outputs[0]` is the right-hand side, `outputs[l]` is the functional of output `l`.
    pub outputs: Vec<DVector<f64>>,
}

pub trait TruthModel {
    fn parameter_space(&self) -> &ParameterSpace;

    /// `None` for steady models.
    fn time_discretization(&self) -> Option<TimeDiscretization> {
        None
    }

    fn is_steady(&self) -> bool {
        self.time_discretization().is_none()
    }

    fn num_dofs(&self) -> usize;

    /// Number of output functionals, including the right-hand side as output 0.
    fn num_outputs(&self) -> usize;

    fn qa(&self) -> usize;

    fn qm(&self) -> usize {
        0
    }

    fn ql(&self, output_index: usize) -> usize;

    fn affine_decomposition(&self) -> eyre::Result<AffineDecomposition>;

    /// Coefficients at `mu` and time `t`. Steady models may ignore `t`.
    fn theta(&self, mu: &Parameter, time: f64) -> ThetaCoefficients;

    /// Assembles the full system for `mu`.
    fn update(&self, mu: &Parameter) -> eyre::Result<TruthSystem> {
        let decomposition = self.affine_decomposition()?;
        Ok(assemble_truth_system(&decomposition, &self.theta(mu, 0.0)))
    }

    /// Solves `matrix * x = rhs`.
    fn solve(&self, matrix: &CsrMatrix<f64>, rhs: &DVector<f64>) -> eyre::Result<DVector<f64>>;

    /// The inner product `(a, b)_X` of the solution space.
    fn scalar_product(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64;

    /// Solves `(r, v)_X = rhs^T v` for all `v`, i.e. computes the Riesz representer `r` of `rhs`.
    fn l2solve(&self, rhs: &DVector<f64>) -> eyre::Result<DVector<f64>>;

    /// The truth output `s_l(mu)` (at the final time for time-dependent models).
    fn output(&self, output_index: usize, mu: &Parameter) -> eyre::Result<f64> {
        let decomposition = self.affine_decomposition()?;
        let u = truth_primal_solution(self, &decomposition, mu)?;
        let theta = self.theta(mu, final_time(self));
        Ok(assemble_output(&decomposition, &theta, output_index)?.dot(&u))
    }

    /// The bilinear form used to estimate the variance of a solution, if the model has one.
    fn variance_product(&self, _a: &DVector<f64>, _b: &DVector<f64>) -> Option<f64> {
        None
    }
}

/// Time at which steady quantities (dual problem, output functional) are evaluated.
pub(crate) fn final_time<M: TruthModel + ?Sized>(model: &M) -> f64 {
    model
        .time_discretization()
        .map_or(0.0, |discretization| discretization.final_time)
}

pub fn assemble_truth_system(decomposition: &AffineDecomposition, theta: &ThetaCoefficients) -> TruthSystem {
    let mass = if decomposition.mass.is_empty() {
        None
    } else {
        Some(csr_linear_combination(&decomposition.mass, &theta.mass))
    };
    let outputs = decomposition
        .outputs
        .iter()
        .zip(&theta.outputs)
        .map(|(terms, coefficients)| linear_combination(terms, coefficients))
        .collect();
    TruthSystem {
        mass,
        stiffness: csr_linear_combination(&decomposition.stiffness, &theta.stiffness),
        outputs,
    }
}

pub(crate) fn linear_combination(terms: &[DVector<f64>], coefficients: &[f64]) -> DVector<f64> {
    let n = terms.first().map_or(0, |term| term.len());
    let mut result = DVector::zeros(n);
    for (term, &c) in terms.iter().zip(coefficients) {
        result.axpy(c, term, 1.0);
    }
    result
}

pub(crate) fn assemble_output(
    decomposition: &AffineDecomposition,
    theta: &ThetaCoefficients,
    output_index: usize,
) -> eyre::Result<DVector<f64>> {
    let terms = decomposition
        .outputs
        .get(output_index)
        .ok_or_else(|| eyre!("output {} is not part of the affine decomposition", output_index))?;
    Ok(linear_combination(terms, &theta.outputs[output_index]))
}

/// Solves the primal truth problem at `mu`.
///
/// Time-dependent models are integrated with implicit Euler from a zero initial condition, and
/// the final-time state is returned.
pub fn truth_primal_solution<M: TruthModel + ?Sized>(
    model: &M,
    decomposition: &AffineDecomposition,
    mu: &Parameter,
) -> eyre::Result<DVector<f64>> {
    match model.time_discretization() {
        None => {
            let system = model.update(mu)?;
            model.solve(&system.stiffness, &system.outputs[0])
        }
        Some(discretization) => {
            let dt = discretization.time_step;
            let mut u = DVector::zeros(model.num_dofs());
            let terms: Vec<CsrMatrix<f64>> = decomposition
                .mass
                .iter()
                .chain(&decomposition.stiffness)
                .cloned()
                .collect();
            for k in 1..=discretization.num_steps() {
                let theta = model.theta(mu, discretization.time_at(k));
                let weights: Vec<f64> = theta
                    .mass
                    .iter()
                    .map(|m| m / dt)
                    .chain(theta.stiffness.iter().copied())
                    .collect();
                let lhs = csr_linear_combination(&terms, &weights);
                let mass = csr_linear_combination(&decomposition.mass, &theta.mass);
                let mut rhs = linear_combination(&decomposition.outputs[0], &theta.outputs[0]);
                rhs.axpy(1.0 / dt, &csr_apply(&mass, &u, false), 1.0);
                u = model.solve(&lhs, &rhs)?;
            }
            Ok(u)
        }
    }
}

/// Solves the dual truth problem `A(mu)^T psi = -L(mu)` for the given output.
///
/// For time-dependent models the dual problem is steady, with coefficients at the final time.
pub fn truth_dual_solution<M: TruthModel + ?Sized>(
    model: &M,
    decomposition: &AffineDecomposition,
    mu: &Parameter,
    output_index: usize,
) -> eyre::Result<DVector<f64>> {
    let theta = model.theta(mu, final_time(model));
    let stiffness = csr_linear_combination(&decomposition.stiffness, &theta.stiffness);
    let rhs = -assemble_output(decomposition, &theta, output_index)?;
    model.solve(&stiffness.transpose(), &rhs)
}

/// Provider of lower and upper bounds for the coercivity constant of `A(mu)` (or `M(mu)`).
pub trait CoercivityBound: Send + Sync {
    /// Prepares internal data. Called once before the offline phase of the reduced basis.
    fn offline(&mut self) -> eyre::Result<()> {
        Ok(())
    }

    fn lb(&self, mu: &Parameter) -> eyre::Result<f64>;

    fn ub(&self, mu: &Parameter) -> eyre::Result<f64>;

    /// Switches between bounds for the stiffness and the mass operator.
    fn set_for_mass_matrix(&mut self, _for_mass: bool) {}
}

type ThetaFn = dyn Fn(&Parameter) -> ThetaCoefficients + Send + Sync;

/// Coercivity bounds for models whose inner product is `X = sum_q theta_q(mu_ref) A_q` with
/// positive semi-definite terms `A_q`.
///
/// For such models
///
/// ```text
/// min_q theta_q(mu) / theta_q(mu_ref) <= alpha(mu) <= gamma(mu) <= max_q theta_q(mu) / theta_q(mu_ref).
/// ```
pub struct MinThetaCoercivityBound {
    reference: ThetaCoefficients,
    theta: Box<ThetaFn>,
    for_mass: bool,
}

impl MinThetaCoercivityBound {
    pub fn new<F>(reference: &Parameter, theta: F) -> Self
    where
        F: Fn(&Parameter) -> ThetaCoefficients + Send + Sync + 'static,
    {
        Self {
            reference: theta(reference),
            theta: Box::new(theta),
            for_mass: false,
        }
    }

    fn ratios(&self, mu: &Parameter) -> eyre::Result<Vec<f64>> {
        let theta = (self.theta)(mu);
        let (current, reference) = if self.for_mass {
            (theta.mass, &self.reference.mass)
        } else {
            (theta.stiffness, &self.reference.stiffness)
        };
        if current.is_empty() || current.len() != reference.len() {
            return Err(eyre!("coefficients do not match the reference coefficients"));
        }
        current
            .iter()
            .zip(reference)
            .map(|(&t, &t_ref)| {
                if t_ref > 0.0 {
                    Ok(t / t_ref)
                } else {
                    Err(eyre!("reference coefficient {} is not positive", t_ref))
                }
            })
            .collect()
    }
}

impl CoercivityBound for MinThetaCoercivityBound {
    fn lb(&self, mu: &Parameter) -> eyre::Result<f64> {
        let alpha = self.ratios(mu)?.into_iter().fold(f64::INFINITY, f64::min);
        if alpha > 0.0 {
            Ok(alpha)
        } else {
            Err(eyre!("operator is not coercive at mu = {} (bound {})", mu.transpose(), alpha))
        }
    }

    fn ub(&self, mu: &Parameter) -> eyre::Result<f64> {
        Ok(self.ratios(mu)?.into_iter().fold(f64::NEG_INFINITY, f64::max))
    }

    fn set_for_mass_matrix(&mut self, for_mass: bool) {
        self.for_mass = for_mass;
    }
}
