use crate::config::{CrbConfig, ErrorType};
use crate::convergence::ConvergenceLedger;
use crate::db;
use crate::error::CrbError;
use crate::model::{AffineDecomposition, CoercivityBound, TruthModel};
use crate::offline::GreedyOfflineBuilder;
use crate::online::{ErrorEstimate, OnlineEvaluator, OnlineSolution, OutputBounds};
use crate::parameter::{Parameter, Sampling, SamplingKind};
use crate::residual::RieszCache;
use crate::state::CrbState;
use eyre::eyre;
use log::{info, warn};
use nalgebra::DVector;
use rand::Rng;
use std::path::{Path, PathBuf};

/// Result of [`Crb::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub output: f64,
    pub error_bound: Option<f64>,
    /// The basis size used.
    pub n: usize,
    pub condition_number: f64,
}

/// Reduced output compared against the truth output at a single parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub mu: Parameter,
    pub truth_output: f64,
    pub reduced_output: f64,
    pub error: f64,
    pub bound: Option<f64>,
}

impl CheckReport {
    /// Ratio of the bound to the actual error, if there is a bound and the error is non-zero.
    pub fn effectivity(&self) -> Option<f64> {
        self.bound
            .filter(|_| self.error > 0.0)
            .map(|bound| bound / self.error)
    }
}

/// Effectivity indices `bound / |s(mu) - s_N(mu)|` over a random sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivityReport {
    /// Smallest effectivity index. `NaN` if no sample had a bound and a non-zero error.
    pub min: f64,
    /// Largest effectivity index. `NaN` if no sample had a bound and a non-zero error.
    pub max: f64,
    pub samples: Vec<CheckReport>,
}

/// A certified reduced basis for a truth model.
///
/// `Crb` owns the truth model, the configuration and the reduced state. The state is loaded
/// from the configured database on construction (unless a rebuild is requested), grown by
/// [`Crb::offline`] and queried through [`Crb::lb`], [`Crb::delta`], [`Crb::ub`] and [`Crb::run`].
pub struct Crb<M> {
    model: M,
    config: CrbConfig,
    state: CrbState,
    decomposition: Option<AffineDecomposition>,
    riesz: RieszCache,
    coercivity: Option<Box<dyn CoercivityBound>>,
}

impl<M> Crb<M>
where
    M: TruthModel + Sync,
{
    pub fn new(model: M, config: CrbConfig) -> Result<Self, CrbError> {
        config.validate()?;
        if config.output_index >= model.num_outputs() {
            return Err(CrbError::InvalidOutputIndex {
                index: config.output_index,
                num_outputs: model.num_outputs(),
            });
        }
        let state = load_or_empty(&model, &config);
        Ok(Self {
            model,
            config,
            state,
            decomposition: None,
            riesz: RieszCache::default(),
            coercivity: None,
        })
    }

    /// Uses `bound` as the coercivity lower bound for [`ErrorType::ResidualScm`].
    pub fn with_coercivity_bound<C>(mut self, bound: C) -> Self
    where
        C: CoercivityBound + 'static,
    {
        self.coercivity = Some(Box::new(bound));
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &CrbConfig {
        &self.config
    }

    pub fn state(&self) -> &CrbState {
        &self.state
    }

    /// The size `N` of the reduced basis.
    pub fn dimension(&self) -> usize {
        self.state.dimension()
    }

    pub fn selected_parameters(&self) -> &Sampling {
        self.state.selected()
    }

    pub fn convergence(&self) -> &ConvergenceLedger {
        self.state.convergence()
    }

    /// Path of the database for the current output index and error type, if a location is
    /// configured.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.config
            .database
            .as_ref()
            .map(|location| location.file_path(self.config.output_index, self.config.error_type))
    }

    fn decomposition(&mut self) -> Result<&AffineDecomposition, CrbError> {
        if self.decomposition.is_none() {
            let decomposition = self
                .model
                .affine_decomposition()
                .map_err(CrbError::TruthModel)?;
            self.decomposition = Some(decomposition);
        }
        self.decomposition
            .as_ref()
            .ok_or_else(|| CrbError::TruthModel(eyre!("affine decomposition unavailable")))
    }

    /// Builds (or enriches) the reduced basis with the greedy algorithm.
    pub fn offline(&mut self) -> Result<&ConvergenceLedger, CrbError> {
        if self.state.error_type() != self.config.error_type {
            info!(
                "Reduced basis was built with {:?}, switching to the {:?} database for enrichment",
                self.state.error_type(),
                self.config.error_type
            );
            self.reload_for(self.config.error_type);
        }
        if self.config.error_type == ErrorType::ResidualScm {
            self.coercivity
                .as_deref_mut()
                .ok_or(CrbError::MissingCoercivityBound)?
                .offline()
                .map_err(CrbError::Coercivity)?;
        }

        let database = self.database_path();
        self.decomposition()?;
        let decomposition = self
            .decomposition
            .as_ref()
            .ok_or_else(|| CrbError::TruthModel(eyre!("affine decomposition unavailable")))?;

        GreedyOfflineBuilder::new(&self.model, &self.config, &mut self.state, decomposition, &mut self.riesz)
            .with_coercivity_bound(self.coercivity.as_deref())
            .with_database(database)
            .run()?;

        if self.config.check_reduced_basis {
            self.check(self.dimension())?;
        }
        Ok(self.state.convergence())
    }

    /// Read-only evaluator for online queries.
    pub fn online(&self) -> OnlineEvaluator<'_, M> {
        OnlineEvaluator::new(&self.model, &self.state, &self.config, self.coercivity.as_deref())
    }

    /// Solves the reduced problem with `n` basis functions (clamped to the basis size).
    pub fn lb(&self, n: usize, mu: &Parameter) -> Result<OnlineSolution, CrbError> {
        self.online().lb(n, mu)
    }

    pub fn delta(&self, n: usize, mu: &Parameter) -> Result<ErrorEstimate, CrbError> {
        self.online().delta(n, mu)
    }

    pub fn ub(&self, n: usize, mu: &Parameter) -> Result<OutputBounds, CrbError> {
        self.online().ub(n, mu)
    }

    /// Evaluates the output at `mu` with the smallest basis whose greedy error is within
    /// `tolerance`, or the full basis if there is none.
    pub fn run(&self, mu: &Parameter, tolerance: f64) -> Result<RunResult, CrbError> {
        let n = self
            .state
            .convergence()
            .smallest_size_within(tolerance)
            .unwrap_or_else(|| self.dimension());
        let bounds = self.ub(n, mu)?;
        Ok(RunResult {
            output: bounds.solution.output,
            error_bound: bounds.estimate.bound,
            n: bounds.solution.n,
            condition_number: bounds.solution.condition_number,
        })
    }

    /// Evaluation with flat input and output arrays.
    ///
    /// `x` holds the parameter followed by the output index, the basis size, a maximum error
    /// (unused), the error type code and a variance flag. On success `y = [output, bound]`,
    /// with a bound of zero when the error type has none.
    pub fn run_array(&mut self, x: &[f64], y: &mut [f64]) -> Result<(), CrbError> {
        if y.len() != 2 {
            return Err(CrbError::InvalidOutputCount {
                expected: 2,
                actual: y.len(),
            });
        }
        let p = self.model.parameter_space().dimension();
        if x.len() != p + 5 {
            return Err(CrbError::InvalidArrayInput(format!(
                "expected {} values ({} parameters and 5 settings), got {}",
                p + 5,
                p,
                x.len()
            )));
        }

        let (mu, settings) = x.split_at(p);
        let output_index = array_index(settings[0], "output index")?;
        let n = array_index(settings[1], "basis size")?;
        let code = array_index(settings[3], "error type")?;
        let error_type = i32::try_from(code)
            .ok()
            .and_then(ErrorType::from_code)
            .ok_or_else(|| CrbError::InvalidArrayInput(format!("unknown error type code {}", settings[3])))?;

        self.set_output_index(output_index);
        self.set_error_type(error_type);
        self.config.compute_variance = settings[4] != 0.0;

        let bounds = self.ub(n, &Parameter::from_column_slice(mu))?;
        y[0] = bounds.solution.output;
        y[1] = bounds.estimate.bound.unwrap_or(0.0);
        Ok(())
    }

    /// Switches to another output.
    ///
    /// Indices that do not refer to an output of the model are ignored. On a change, the
    /// database of the new output is loaded if there is one, otherwise the state is reset.
    pub fn set_output_index(&mut self, index: usize) {
        if index >= self.model.num_outputs() {
            warn!(
                "Ignoring output index {}: the model only has {} outputs",
                index,
                self.model.num_outputs()
            );
            return;
        }
        if index != self.config.output_index {
            warn!(
                "Output index changed from {} to {}, reloading reduced basis",
                self.config.output_index, index
            );
            self.config.output_index = index;
            let build_error_type = self.state.error_type();
            self.reload_for(build_error_type);
        }
    }

    /// Switches the error estimator used by online queries.
    ///
    /// The reduced basis is kept. Residual based estimators still need the residual terms of
    /// a basis built with one of them. A later [`Crb::offline`] call enriches the database of
    /// the new error type instead.
    pub fn set_error_type(&mut self, error_type: ErrorType) {
        if error_type != self.config.error_type {
            info!("Error type changed from {:?} to {:?}", self.config.error_type, error_type);
            self.config.error_type = error_type;
        }
    }

    pub fn set_compute_variance(&mut self, compute_variance: bool) {
        self.config.compute_variance = compute_variance;
    }

    /// Replaces the state with the database of the configured output built with `error_type`.
    fn reload_for(&mut self, error_type: ErrorType) {
        let config = CrbConfig {
            error_type,
            ..self.config.clone()
        };
        self.state = load_or_empty(&self.model, &config);
        self.riesz.clear();
    }

    /// Saves the state to the configured database location, keyed by the output index and
    /// error type the basis was built for.
    pub fn save(&self) -> Result<(), CrbError> {
        let path = self
            .config
            .database
            .as_ref()
            .map(|location| location.file_path(self.state.output_index(), self.state.error_type()))
            .ok_or_else(|| CrbError::Database(eyre!("no database location configured")))?;
        self.save_to(path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), CrbError> {
        db::save(path, &self.state).map_err(CrbError::Database)
    }

    /// Loads the state from the configured database location.
    ///
    /// Unlike construction, which starts from an empty state when the database cannot be
    /// read, this reports the failure.
    pub fn load(&mut self) -> Result<(), CrbError> {
        let path = self
            .database_path()
            .ok_or_else(|| CrbError::Database(eyre!("no database location configured")))?;
        self.load_from(path)
    }

    /// Replaces the state with the one stored at `path`, adopting its output index and
    /// error type.
    pub fn load_from(&mut self, path: impl AsRef<Path>) -> Result<(), CrbError> {
        let state = db::load(path).map_err(CrbError::Database)?;
        check_model_compatibility(&self.model, &state).map_err(CrbError::Database)?;
        self.config.output_index = state.output_index();
        self.config.error_type = state.error_type();
        self.state = state;
        self.riesz.clear();
        Ok(())
    }

    /// Full-order field `sum_i coefficients[i] * WN[i]`.
    pub fn reconstruct(&self, coefficients: &DVector<f64>) -> Result<DVector<f64>, CrbError> {
        let basis = self.state.basis();
        if basis.is_empty() {
            return Err(CrbError::EmptyBasis);
        }
        if coefficients.len() > basis.len() {
            return Err(CrbError::InvalidArrayInput(format!(
                "{} coefficients for a basis of size {}",
                coefficients.len(),
                basis.len()
            )));
        }
        Ok(basis.reconstruct(coefficients))
    }

    fn compare_with_truth(&self, n: usize, mu: &Parameter) -> Result<CheckReport, CrbError> {
        let truth_output = self
            .model
            .output(self.state.output_index(), mu)
            .map_err(CrbError::TruthModel)?;
        let bounds = self.ub(n, mu)?;
        let reduced_output = bounds.solution.output;
        Ok(CheckReport {
            mu: mu.clone(),
            truth_output,
            reduced_output,
            error: (truth_output - reduced_output).abs(),
            bound: bounds.estimate.bound,
        })
    }

    /// Compares reduced and truth outputs at every selected parameter.
    pub fn check(&self, n: usize) -> Result<Vec<CheckReport>, CrbError> {
        let reports = self
            .state
            .selected()
            .iter()
            .map(|mu| self.compare_with_truth(n, mu))
            .collect::<Result<Vec<_>, _>>()?;

        info!("Check of the reduced basis with N = {}:", n.min(self.dimension()));
        for report in &reports {
            info!(
                "  mu = {}: truth {:e}, reduced {:e}, error {:e}, bound {:?}",
                report.mu.transpose(),
                report.truth_output,
                report.reduced_output,
                report.error,
                report.bound
            );
        }
        Ok(reports)
    }

    /// Computes effectivity indices with the full basis over `size` random parameters.
    pub fn effectivity_indices<R: Rng + ?Sized>(&self, size: usize, rng: &mut R) -> Result<EffectivityReport, CrbError> {
        let sampling = self
            .model
            .parameter_space()
            .sample(SamplingKind::Random, size, rng)?;
        let samples = sampling
            .iter()
            .map(|mu| self.compare_with_truth(self.dimension(), mu))
            .collect::<Result<Vec<_>, _>>()?;

        let effectivities: Vec<f64> = samples.iter().filter_map(CheckReport::effectivity).collect();
        let (min, max) = if effectivities.is_empty() {
            (f64::NAN, f64::NAN)
        } else {
            (
                effectivities.iter().copied().fold(f64::INFINITY, f64::min),
                effectivities.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            )
        };
        info!(
            "Effectivity indices over {} parameters ({} with a bound): min {:e}, max {:e}",
            samples.len(),
            effectivities.len(),
            min,
            max
        );
        Ok(EffectivityReport { min, max, samples })
    }

    pub fn log_convergence(&self) {
        self.state.convergence().log_summary();
    }
}

fn array_index(value: f64, name: &str) -> Result<usize, CrbError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(CrbError::InvalidArrayInput(format!("{} must be a non-negative integer, got {}", name, value)))
    }
}

fn check_model_compatibility<M: TruthModel + ?Sized>(model: &M, state: &CrbState) -> eyre::Result<()> {
    if state.formulation().is_steady() != model.is_steady() {
        return Err(eyre!("database formulation does not match the model (steady: {})", model.is_steady()));
    }
    let dimension = model.parameter_space().dimension();
    if let Some(mu) = state.training().iter().find(|mu| mu.len() != dimension) {
        return Err(eyre!(
            "database parameters have dimension {} but the model has dimension {}",
            mu.len(),
            dimension
        ));
    }
    if state.output_index() >= model.num_outputs() {
        return Err(eyre!("database output index {} is not an output of the model", state.output_index()));
    }
    Ok(())
}

/// Loads the database matching `config`, or creates an empty state.
///
/// Databases that cannot be read or were built for another output, error type or model are
/// ignored with a warning.
fn load_or_empty<M: TruthModel + ?Sized>(model: &M, config: &CrbConfig) -> CrbState {
    let empty = || CrbState::empty(model, config);
    if config.rebuild_database {
        return empty();
    }
    let Some(location) = &config.database else {
        return empty();
    };
    let path = location.file_path(config.output_index, config.error_type);
    if !path.exists() {
        return empty();
    }

    match db::load(&path).and_then(|state| check_model_compatibility(model, &state).map(|_| state)) {
        Ok(state) if db::is_compatible(&state, config.output_index, config.error_type) => {
            info!(
                "Loaded reduced basis of size {} from {}",
                state.dimension(),
                path.display()
            );
            state
        }
        Ok(state) => {
            warn!(
                "Ignoring database {}: built for output {} with {:?}, but output {} with {:?} was requested",
                path.display(),
                state.output_index(),
                state.error_type(),
                config.output_index,
                config.error_type
            );
            empty()
        }
        Err(err) => {
            warn!("Ignoring database {}: {:#}", path.display(), err);
            empty()
        }
    }
}
