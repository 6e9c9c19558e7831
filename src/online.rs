//! Online evaluation of reduced outputs and their error bounds.
//!
//! Everything in this module only reads the reduced state. Its cost depends on the reduced
//! dimension `N` and the number of affine terms, never on the size of the truth model.
use crate::config::{CrbConfig, ErrorType};
use crate::error::CrbError;
use crate::model::{CoercivityBound, TruthModel};
use crate::parameter::Parameter;
use crate::residual::ResidualNorm;
use crate::state::{CrbState, Formulation};
use nalgebra::{DMatrix, DVector};

/// A reduced solution and its output.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineSolution {
    /// The (possibly corrected) reduced output `s_N(mu)`.
    pub output: f64,
    /// Coefficients `u_N` of the primal solution (at the final time for time-dependent problems).
    pub coefficients: DVector<f64>,
    /// Coefficients of the dual solution, if the dual problem was solved.
    pub dual_coefficients: Option<DVector<f64>>,
    /// Condition number `sigma_max / sigma_min` of the reduced stiffness matrix.
    pub condition_number: f64,
    /// The basis size actually used.
    pub n: usize,
    /// Primal coefficients at every time step, `trajectory[0]` being the initial condition.
    /// Empty for steady problems.
    pub trajectory: Vec<DVector<f64>>,
}

/// An error estimate for a reduced output.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEstimate {
    /// Bound on `|s(mu) - s_N(mu)|`. `None` when error estimation is disabled.
    pub bound: Option<f64>,
    pub delta_primal: f64,
    pub delta_dual: f64,
    /// Primal residual (of the last time step for time-dependent problems).
    pub primal_residual: Option<ResidualNorm>,
    pub dual_residual: Option<ResidualNorm>,
}

/// Output together with lower and upper bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBounds {
    pub solution: OnlineSolution,
    pub estimate: ErrorEstimate,
    /// `output + bound`, or `output` when there is no bound.
    pub upper: f64,
}

/// The basis size compared against by the empirical error estimate.
pub fn empirical_coarse_size(n: usize, factor: i32) -> usize {
    let coarse = if factor > 0 {
        n / factor as usize
    } else if factor < 0 && n > factor.unsigned_abs() as usize {
        n - factor.unsigned_abs() as usize
    } else {
        1
    };
    coarse.max(1)
}

fn solve_reduced(a: &DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>, CrbError> {
    let n = a.nrows();
    a.clone()
        .lu()
        .solve(rhs)
        .filter(|x| x.iter().all(|x_i| x_i.is_finite()))
        .ok_or(CrbError::SingularReducedSystem { n })
}

fn condition_number(a: &DMatrix<f64>) -> f64 {
    let sigma = a.singular_values();
    sigma.max() / sigma.min()
}

fn check_finite(residual: ResidualNorm, problem: &'static str) -> Result<ResidualNorm, CrbError> {
    let [c0, lambda, gamma] = residual.coefficients;
    if (c0 + lambda + gamma + residual.mass_coupling).is_finite() {
        Ok(residual)
    } else {
        Err(CrbError::NonFiniteResidual {
            problem,
            coefficients: residual.coefficients,
        })
    }
}

/// Read-only view of a reduced basis for online queries.
pub struct OnlineEvaluator<'a, M: ?Sized> {
    model: &'a M,
    state: &'a CrbState,
    config: &'a CrbConfig,
    coercivity: Option<&'a dyn CoercivityBound>,
}

impl<'a, M: TruthModel + ?Sized> OnlineEvaluator<'a, M> {
    pub fn new(
        model: &'a M,
        state: &'a CrbState,
        config: &'a CrbConfig,
        coercivity: Option<&'a dyn CoercivityBound>,
    ) -> Self {
        Self {
            model,
            state,
            config,
            coercivity,
        }
    }

    /// The estimator used for queries, which may differ from the one the basis was built with.
    fn error_type(&self) -> ErrorType {
        self.config.error_type
    }

    /// Solves the reduced problem with (at most) `n` basis functions.
    ///
    /// `n` is clamped to the size of the basis.
    pub fn lb(&self, n: usize, mu: &Parameter) -> Result<OnlineSolution, CrbError> {
        let n = n.min(self.state.dimension());
        if n == 0 {
            return Err(CrbError::EmptyBasis);
        }
        let ops = &self.state.operators;
        let output_index = self.state.output_index;

        let (u, a, trajectory, final_time) = match &self.state.formulation {
            Formulation::Steady => {
                let theta = self.model.theta(mu, 0.0);
                let a = ops.aq_pr.assemble(&theta.stiffness, n);
                let f = ops.fq_pr.assemble(&theta.outputs[0], n);
                (solve_reduced(&a, &f)?, a, Vec::new(), 0.0)
            }
            Formulation::TimeDependent(transient) => {
                let discretization = transient.discretization;
                let dt = discretization.time_step;
                let mut trajectory = vec![DVector::zeros(n)];
                let mut a = DMatrix::zeros(n, n);
                for k in 1..=discretization.num_steps() {
                    let theta = self.model.theta(mu, discretization.time_at(k));
                    let m = transient.mass.mq_pr.assemble(&theta.mass, n);
                    a = ops.aq_pr.assemble(&theta.stiffness, n);
                    let mut rhs = ops.fq_pr.assemble(&theta.outputs[0], n);
                    let previous = &trajectory[k - 1];
                    rhs += &m * previous / dt;
                    let lhs = &m / dt + &a;
                    let u = solve_reduced(&lhs, &rhs)?;
                    trajectory.push(u);
                }
                let u = trajectory[trajectory.len() - 1].clone();
                (u, a, trajectory, discretization.final_time)
            }
        };

        let theta = self.model.theta(mu, final_time);
        let l = ops.lq_pr.assemble(&theta.outputs[output_index], n);
        let mut output = l.dot(&u);

        let dual_coefficients = if self.config.needs_dual() {
            let a_du = ops.aq_du.assemble(&theta.stiffness, n);
            let l_du = ops.lq_du.assemble(&theta.outputs[output_index], n);
            let u_du = solve_reduced(&a_du, &-l_du)?;

            if self.config.solve_dual_problem && self.state.formulation.is_steady() {
                let f_du = ops.fq_du.assemble(&theta.outputs[0], n);
                let a_pr_du = ops.aq_pr_du.assemble(&theta.stiffness, n);
                let correction = -(f_du.dot(&u_du) - u_du.dot(&(a_pr_du * &u)));
                output += correction;
            }
            Some(u_du)
        } else {
            None
        };

        if self.config.compute_variance {
            if let Some(variance) = &self.state.variance {
                if variance.dimension() < n {
                    return Err(CrbError::IncompleteVarianceMatrix {
                        dimension: variance.dimension(),
                        n,
                    });
                }
                output = u.dot(&(variance.term(0).view((0, 0), (n, n)) * &u));
            }
        }

        Ok(OnlineSolution {
            output,
            coefficients: u,
            dual_coefficients,
            condition_number: condition_number(&a),
            n,
            trajectory,
        })
    }

    fn coercivity_lower_bound(&self, mu: &Parameter) -> Result<f64, CrbError> {
        match self.error_type() {
            ErrorType::ResidualScm => self
                .coercivity
                .ok_or(CrbError::MissingCoercivityBound)?
                .lb(mu)
                .map_err(CrbError::Coercivity),
            _ => Ok(1.0),
        }
    }

    /// Estimates the error of the output of `solution`, previously computed with [`Self::lb`].
    pub fn delta_for(&self, solution: &OnlineSolution, mu: &Parameter) -> Result<ErrorEstimate, CrbError> {
        match self.error_type() {
            ErrorType::NoResidual => Ok(ErrorEstimate {
                bound: None,
                delta_primal: 0.0,
                delta_dual: 0.0,
                primal_residual: None,
                dual_residual: None,
            }),
            ErrorType::Empirical => {
                let coarse = self.lb(empirical_coarse_size(solution.n, self.config.empirical_factor), mu)?;
                let error = (solution.output - coarse.output).abs();
                Ok(ErrorEstimate {
                    bound: Some(error),
                    delta_primal: error,
                    delta_dual: error,
                    primal_residual: None,
                    dual_residual: None,
                })
            }
            ErrorType::Residual | ErrorType::ResidualScm => self.residual_estimate(solution, mu),
        }
    }

    fn residual_estimate(&self, solution: &OnlineSolution, mu: &Parameter) -> Result<ErrorEstimate, CrbError> {
        let residual = self
            .state
            .residual
            .as_ref()
            .ok_or(CrbError::MissingResidualTerms)?;
        let alpha = self.coercivity_lower_bound(mu)?;
        let output_index = self.state.output_index;

        let (primal_residual, primal_sum, final_time) = match &self.state.formulation {
            Formulation::Steady => {
                let theta = self.model.theta(mu, 0.0);
                let norm = residual
                    .primal
                    .squared_norm(&theta.stiffness, &theta.outputs[0], &solution.coefficients);
                let norm = check_finite(norm, "primal")?;
                (norm, norm.squared, 0.0)
            }
            Formulation::TimeDependent(transient) => {
                let discretization = transient.discretization;
                let dt = discretization.time_step;
                let coupling = residual
                    .transient
                    .as_ref()
                    .ok_or(CrbError::MissingResidualTerms)?;
                let mut sum = 0.0;
                let mut last = None;
                for (k, pair) in solution.trajectory.windows(2).enumerate() {
                    let theta = self.model.theta(mu, discretization.time_at(k + 1));
                    let (previous, u) = (&pair[0], &pair[1]);
                    let u_dot = (u - previous) / dt;
                    let mut norm = residual
                        .primal
                        .squared_norm(&theta.stiffness, &theta.outputs[0], u);
                    norm.mass_coupling =
                        coupling
                            .primal
                            .contribution(&theta.mass, &theta.stiffness, &theta.outputs[0], u, &u_dot);
                    let [c0, lambda, gamma] = norm.coefficients;
                    norm.squared = (c0 + lambda + gamma + norm.mass_coupling).abs();
                    let norm = check_finite(norm, "primal")?;
                    sum += dt * norm.squared;
                    last = Some(norm);
                }
                let last = last.ok_or(CrbError::EmptyBasis)?;
                (last, sum, discretization.final_time)
            }
        };

        let theta = self.model.theta(mu, final_time);
        let dual_residual = match &solution.dual_coefficients {
            Some(u_du) => {
                let norm = residual
                    .dual
                    .squared_norm(&theta.stiffness, &theta.outputs[output_index], u_du);
                Some(check_finite(norm, "dual")?)
            }
            None => None,
        };

        let delta_primal = primal_sum.sqrt() / alpha.sqrt();
        let delta_dual = dual_residual.map_or(1.0, |norm| norm.residual_norm() / alpha.sqrt());

        Ok(ErrorEstimate {
            bound: Some(delta_primal * delta_dual),
            delta_primal,
            delta_dual,
            primal_residual: Some(primal_residual),
            dual_residual,
        })
    }

    /// Solves the reduced problem with `n` basis functions and estimates its error.
    pub fn delta(&self, n: usize, mu: &Parameter) -> Result<ErrorEstimate, CrbError> {
        let solution = self.lb(n, mu)?;
        self.delta_for(&solution, mu)
    }

    /// The reduced output with its error estimate and upper bound `output + bound`.
    pub fn ub(&self, n: usize, mu: &Parameter) -> Result<OutputBounds, CrbError> {
        let solution = self.lb(n, mu)?;
        let estimate = self.delta_for(&solution, mu)?;
        let upper = solution.output + estimate.bound.unwrap_or(0.0);
        Ok(OutputBounds {
            solution,
            estimate,
            upper,
        })
    }
}
