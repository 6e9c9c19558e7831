//! The greedy offline construction of a reduced basis.
//!
//! One greedy iteration goes through the following steps:
//!
//! 1. solve the truth primal (and dual) problem at the current parameter,
//! 2. append the snapshots to the bases,
//! 3. orthonormalize the new basis functions,
//! 4. grow the reduced operators and residual terms,
//! 5. select the next parameter as the one with the largest error estimate,
//! 6. persist the state.
//!
//! The loop stops when the error estimate falls below the tolerance, the basis size budget is
//! exhausted, or no candidate parameters are left.
use crate::basis::BasisProvenance;
use crate::config::{CrbConfig, ErrorType};
use crate::convergence::{ConvergenceEntry, ConvergenceLedger};
use crate::db;
use crate::error::CrbError;
use crate::model::{truth_dual_solution, truth_primal_solution, AffineDecomposition, CoercivityBound, TruthModel};
use crate::online::{ErrorEstimate, OnlineEvaluator};
use crate::orthonormalize::{orthonormality_deviation, orthonormalize};
use crate::parameter::{Parameter, Sampling, SamplingKind};
use crate::reduced::ReducedAffineMatrices;
use crate::residual::RieszCache;
use crate::state::{CrbState, Formulation};
use log::{debug, info, warn};
use nalgebra::DVector;
use ordered_float::OrderedFloat;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::path::PathBuf;

/// Error reported for the second parameter selected with [`ErrorType::Empirical`], before
/// two basis sizes are available to compare.
const EMPIRICAL_BOOTSTRAP_ERROR: f64 = 1e5;

/// A parameter picked by the greedy selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub mu: Parameter,
    /// Index of `mu` in the training sampling.
    pub training_index: usize,
    pub entry: ConvergenceEntry,
}

/// Returns the index and value of the first maximum of `errors`.
///
/// The maximum is found with a plain linear scan, and then once more by walking the errors in
/// reverse order with a bitwise total order. Both scans must agree exactly on index and value.
pub fn select_max_error(errors: &[f64]) -> Result<Option<(usize, f64)>, CrbError> {
    if errors.is_empty() {
        return Ok(None);
    }

    let mut index = 0;
    for (i, &e) in errors.iter().enumerate().skip(1) {
        if e > errors[index] {
            index = i;
        }
    }
    let value = errors[index];

    // max_by_key returns the last maximum, which is the first one in the original order
    let (check_index, &check_value) = errors
        .iter()
        .enumerate()
        .rev()
        .max_by_key(|(_, &e)| OrderedFloat(e))
        .ok_or(CrbError::EmptyBasis)?;

    if check_index != index || check_value.to_bits() != value.to_bits() {
        return Err(CrbError::InconsistentSelection {
            index,
            value,
            check_index,
            check_value,
        });
    }
    Ok(Some((index, value)))
}

pub struct GreedyOfflineBuilder<'a, M: ?Sized> {
    model: &'a M,
    config: &'a CrbConfig,
    state: &'a mut CrbState,
    decomposition: &'a AffineDecomposition,
    riesz: &'a mut RieszCache,
    coercivity: Option<&'a dyn CoercivityBound>,
    database: Option<PathBuf>,
}

impl<'a, M> GreedyOfflineBuilder<'a, M>
where
    M: TruthModel + Sync + ?Sized,
{
    pub fn new(
        model: &'a M,
        config: &'a CrbConfig,
        state: &'a mut CrbState,
        decomposition: &'a AffineDecomposition,
        riesz: &'a mut RieszCache,
    ) -> Self {
        Self {
            model,
            config,
            state,
            decomposition,
            riesz,
            coercivity: None,
            database: None,
        }
    }

    pub fn with_coercivity_bound(self, coercivity: Option<&'a dyn CoercivityBound>) -> Self {
        Self { coercivity, ..self }
    }

    /// Persist the state to the given file after every iteration.
    pub fn with_database(self, database: Option<PathBuf>) -> Self {
        Self { database, ..self }
    }

    fn error_type(&self) -> ErrorType {
        self.state.error_type
    }

    fn reset(&mut self) {
        *self.state = CrbState::empty(self.model, self.config);
        self.riesz.clear();
    }

    fn draw_training_sampling(&self) -> Result<Sampling, CrbError> {
        let space = self.model.parameter_space();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        match self.error_type() {
            ErrorType::NoResidual => {
                let size = (self.config.max_iterations / self.config.added_per_iteration).max(1);
                space.sample(SamplingKind::LogEquidistributed, size, &mut rng)
            }
            _ => space.sample(SamplingKind::Random, self.config.sampling_size, &mut rng),
        }
    }

    /// Position of the greedy loop before the first iteration: the next parameter, its index in
    /// the training sampling, the current maximum error and the NoResidual cursor.
    fn initialize(&mut self) -> Result<(Parameter, usize, f64, usize), CrbError> {
        let tolerance = self.config.tolerance;

        if self.state.dimension() > 0 {
            if self.error_type() == ErrorType::NoResidual {
                return Err(CrbError::EnrichmentNotSupported {
                    error_type: self.error_type(),
                });
            }

            let resume = self.state.current_mu.clone().and_then(|mu| {
                let index = self.state.training.points().iter().position(|p| p == &mu)?;
                Some((mu, index))
            });
            match resume {
                Some((mu, index)) if self.state.has_snapshots() => {
                    let max_error = self
                        .state
                        .convergence
                        .last()
                        .map_or(2.0 * tolerance, |(_, entry)| entry.max_error);
                    info!(
                        "Enriching existing reduced basis of size {} (max error {:e})",
                        self.state.dimension(),
                        max_error
                    );
                    return Ok((mu, index, max_error, 0));
                }
                _ => {
                    warn!(
                        "Existing reduced basis of size {} cannot be enriched (no stored snapshots or \
                         current parameter), rebuilding from scratch",
                        self.state.dimension()
                    );
                    self.reset();
                }
            }
        }

        self.state.training = self.draw_training_sampling()?;
        let (mu, index) = match self.error_type() {
            ErrorType::NoResidual => (self.state.training.at(0).clone(), 0),
            _ => self
                .state
                .training
                .min()
                .ok_or_else(|| CrbError::InvalidSampling("training sampling is empty".to_string()))?,
        };
        info!(
            "Starting offline phase with a training sampling of {} parameters",
            self.state.training.len()
        );
        Ok((mu, index, 2.0 * tolerance, 1))
    }

    /// Runs the greedy loop and returns the resulting convergence ledger.
    pub fn run(mut self) -> Result<ConvergenceLedger, CrbError> {
        let (mut mu, mut training_index, mut max_error, mut no_residual_index) = self.initialize()?;
        let tolerance = self.config.tolerance;

        while max_error > tolerance
            && self.state.dimension() < self.config.max_iterations
            && no_residual_index <= self.state.training.len()
        {
            let iteration = self.state.selected.len();
            info!(
                "Greedy iteration {}: N = {}, mu = {}",
                iteration,
                self.state.dimension(),
                mu.transpose()
            );

            let (primal, dual) = self.truth_solve(&mu)?;
            self.enrich(&mu, training_index, iteration, primal, dual);
            self.orthonormalize_new()?;
            self.update_caches()?;

            let n = self.state.dimension();
            let selection = match self.error_type() {
                ErrorType::NoResidual => {
                    let next = (no_residual_index < self.state.training.len()).then(|| Selection {
                        mu: self.state.training.at(no_residual_index).clone(),
                        training_index: no_residual_index,
                        entry: ConvergenceEntry {
                            max_error: self.config.max_iterations.saturating_sub(n) as f64,
                            delta_primal: 0.0,
                            delta_dual: 0.0,
                        },
                    });
                    no_residual_index += 1;
                    next
                }
                _ => self.select_next()?,
            };

            let Some(selection) = selection else {
                info!("No candidate parameters left, stopping with N = {}", n);
                self.state.current_mu = None;
                self.persist()?;
                break;
            };

            info!(
                "N = {}: max error {:e} at mu = {} (training index {})",
                n,
                selection.entry.max_error,
                selection.mu.transpose(),
                selection.training_index
            );
            self.state.convergence.insert(n, selection.entry);
            max_error = selection.entry.max_error;
            mu = selection.mu;
            training_index = selection.training_index;
            self.state.current_mu = Some(mu.clone());

            self.persist()?;
        }

        self.log_selected_parameters();
        self.state.convergence.log_summary();
        Ok(self.state.convergence.clone())
    }

    fn truth_solve(&self, mu: &Parameter) -> Result<(DVector<f64>, DVector<f64>), CrbError> {
        let primal = truth_primal_solution(self.model, self.decomposition, mu).map_err(CrbError::TruthModel)?;
        let dual = if self.config.needs_dual() {
            truth_dual_solution(self.model, self.decomposition, mu, self.state.output_index)
                .map_err(CrbError::TruthModel)?
        } else {
            primal.clone()
        };
        Ok((primal, dual))
    }

    fn enrich(
        &mut self,
        mu: &Parameter,
        training_index: usize,
        iteration: usize,
        primal: DVector<f64>,
        dual: DVector<f64>,
    ) {
        let provenance = BasisProvenance {
            mu: mu.clone(),
            iteration,
        };
        self.state.basis.push(primal, dual, provenance);
        self.state.selected.push(mu.clone());
        self.state.selected_indices.push(training_index);
    }

    fn orthonormalize_new(&mut self) -> Result<(), CrbError> {
        // The second pass recovers orthogonality lost to round-off in the first
        if self.config.orthonormalize_primal {
            orthonormalize(self.model, self.state.basis.primal_mut(), 1)?;
            orthonormalize(self.model, self.state.basis.primal_mut(), 1)?;
        }
        if self.config.orthonormalize_dual {
            orthonormalize(self.model, self.state.basis.dual_mut(), 1)?;
            orthonormalize(self.model, self.state.basis.dual_mut(), 1)?;
        }
        if self.config.check_orthonormality {
            if self.config.orthonormalize_primal {
                orthonormality_deviation(self.model, self.state.basis.primal());
            }
            if self.config.orthonormalize_dual {
                orthonormality_deviation(self.model, self.state.basis.dual());
            }
        }
        Ok(())
    }

    fn update_caches(&mut self) -> Result<(), CrbError> {
        let state = &mut *self.state;
        let n = state.basis.len();
        state
            .operators
            .grow_to(self.decomposition, &state.basis, state.output_index, 1);

        if let Formulation::TimeDependent(transient) = &mut state.formulation {
            transient.mass.grow_to(self.decomposition, &state.basis, 1);
        }

        if let Some(residual) = &mut state.residual {
            residual.grow_to(
                self.model,
                self.decomposition,
                &state.basis,
                state.output_index,
                1,
                self.riesz,
            )?;
        }

        // An existing variance matrix keeps growing with the basis, even when variance output
        // is currently disabled.
        let wn = state.basis.primal();
        let variance_entry = |_: usize, i: usize, j: usize| self.model.variance_product(&wn[i], &wn[j]).unwrap_or(0.0);
        match &mut state.variance {
            Some(variance) if variance.dimension() + 1 == n => variance.grow_to(n, 1, variance_entry),
            Some(variance) => {
                debug!(
                    "Dropping variance matrix of size {} that cannot grow to N = {}",
                    variance.dimension(),
                    n
                );
                state.variance = None;
            }
            None if self.config.compute_variance && n == 1 => {
                if self.model.variance_product(&wn[0], &wn[0]).is_some() {
                    let mut variance = ReducedAffineMatrices::new(1);
                    variance.grow_to(n, 1, variance_entry);
                    state.variance = Some(variance);
                } else {
                    debug!("Variance matrix not available, skipping");
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Picks the candidate parameter with the largest error estimate at the current basis size.
    fn select_next(&self) -> Result<Option<Selection>, CrbError> {
        let state = &*self.state;
        let use_complement = self.config.seek_mu_in_complement || self.error_type() == ErrorType::Empirical;
        let candidates = if use_complement {
            state.selected.complement(&state.training)
        } else {
            state.training.clone()
        };
        let to_training_index = |k: usize| {
            if use_complement {
                candidates.index_in_super_sampling(k).unwrap_or(k)
            } else {
                k
            }
        };

        if candidates.is_empty() {
            return Ok(None);
        }

        if self.error_type() == ErrorType::Empirical && state.selected.len() == 1 {
            let (mu, training_index) = state
                .training
                .max()
                .ok_or_else(|| CrbError::InvalidSampling("training sampling is empty".to_string()))?;
            return Ok(Some(Selection {
                mu,
                training_index,
                entry: ConvergenceEntry {
                    max_error: EMPIRICAL_BOOTSTRAP_ERROR,
                    delta_primal: EMPIRICAL_BOOTSTRAP_ERROR,
                    delta_dual: EMPIRICAL_BOOTSTRAP_ERROR,
                },
            }));
        }

        let evaluator = OnlineEvaluator::new(self.model, state, self.config, self.coercivity);
        let n = state.dimension();
        let estimates: Vec<ErrorEstimate> = if self.config.parallel_selection {
            candidates
                .points()
                .par_iter()
                .map(|mu| evaluator.delta(n, mu))
                .collect::<Result<_, _>>()?
        } else {
            candidates
                .iter()
                .map(|mu| evaluator.delta(n, mu))
                .collect::<Result<_, _>>()?
        };

        let errors: Vec<f64> = estimates
            .iter()
            .map(|estimate| estimate.bound.unwrap_or(0.0).abs())
            .collect();
        let Some((k, max_error)) = select_max_error(&errors)? else {
            return Ok(None);
        };

        Ok(Some(Selection {
            mu: candidates.at(k).clone(),
            training_index: to_training_index(k),
            entry: ConvergenceEntry {
                max_error,
                delta_primal: estimates[k].delta_primal,
                delta_dual: estimates[k].delta_dual,
            },
        }))
    }

    fn persist(&self) -> Result<(), CrbError> {
        match &self.database {
            Some(path) => db::save(path, self.state).map_err(CrbError::Database),
            None => Ok(()),
        }
    }

    fn log_selected_parameters(&self) {
        info!("Selected parameters ({}):", self.state.selected.len());
        for (k, (mu, index)) in self
            .state
            .selected
            .iter()
            .zip(&self.state.selected_indices)
            .enumerate()
        {
            info!("  [{}] training index {}: mu = {}", k, index, mu.transpose());
        }
    }
}
