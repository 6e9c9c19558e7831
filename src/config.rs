//! Configuration of the reduced basis engine.
use crate::error::CrbError;
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Strategy used to estimate the error of the reduced output.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    /// Residual-based bound with a unit coercivity constant.
    Residual,
    /// Residual-based bound with the coercivity lower bound of a [`CoercivityBound`](crate::CoercivityBound).
    ResidualScm,
    /// No error estimation; the greedy loop walks a fixed sampling until the basis size budget
    /// is exhausted.
    NoResidual,
    /// Difference between the outputs computed with two different basis sizes.
    Empirical,
}

impl ErrorType {
    pub fn code(&self) -> i32 {
        match self {
            Self::Residual => 0,
            Self::ResidualScm => 1,
            Self::NoResidual => 2,
            Self::Empirical => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Residual),
            1 => Some(Self::ResidualScm),
            2 => Some(Self::NoResidual),
            3 => Some(Self::Empirical),
            _ => None,
        }
    }

    pub fn is_residual_based(&self) -> bool {
        matches!(self, Self::Residual | Self::ResidualScm)
    }
}

impl Default for ErrorType {
    fn default() -> Self {
        Self::Residual
    }
}

/// Where the database of a reduced basis lives.
///
/// The actual file name also encodes the output index and error type, so that bases built for
/// different outputs can coexist in the same directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseLocation {
    pub directory: PathBuf,
    pub name: String,
}

impl DatabaseLocation {
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
        }
    }

    pub fn file_path(&self, output_index: usize, error_type: ErrorType) -> PathBuf {
        self.directory.join(format!(
            "{}-o{}-e{}.crbdb.json",
            self.name,
            output_index,
            error_type.code()
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrbConfig {
    /// Index of the output functional. Output 0 is the right-hand side (compliant output).
    pub output_index: usize,
    /// Greedy tolerance on the maximum error bound over the training sampling.
    pub tolerance: f64,
    /// Maximum size of the reduced basis.
    pub max_iterations: usize,
    pub error_type: ErrorType,
    /// Size of the (random) training sampling.
    pub sampling_size: usize,
    /// Seed for the training sampling.
    pub seed: u64,
    /// Number of basis functions added per greedy iteration.
    pub added_per_iteration: usize,
    pub orthonormalize_primal: bool,
    pub orthonormalize_dual: bool,
    /// Solve the dual problem and apply the output correction online.
    pub solve_dual_problem: bool,
    /// Only consider parameters that have not been selected yet in the greedy search.
    pub seek_mu_in_complement: bool,
    /// Replace the output by the variance of the reduced solution.
    pub compute_variance: bool,
    /// Ignore any existing database and start from scratch.
    pub rebuild_database: bool,
    /// Determines the coarse basis size used by [`ErrorType::Empirical`].
    ///
    /// With `N` basis functions, a positive factor `f` compares against `N / f`, a negative
    /// factor against `N + f`.
    pub empirical_factor: i32,
    /// Log the deviation of the Gram matrix from the identity after orthonormalization.
    pub check_orthonormality: bool,
    /// Run [`Crb::check`](crate::Crb::check) at the end of the offline phase.
    pub check_reduced_basis: bool,
    /// Evaluate candidate parameters in parallel during greedy selection.
    pub parallel_selection: bool,
    pub database: Option<DatabaseLocation>,
}

impl Default for CrbConfig {
    fn default() -> Self {
        Self {
            output_index: 0,
            tolerance: 1e-2,
            max_iterations: 10,
            error_type: ErrorType::Residual,
            sampling_size: 100,
            seed: 0,
            added_per_iteration: 1,
            orthonormalize_primal: true,
            orthonormalize_dual: true,
            solve_dual_problem: true,
            seek_mu_in_complement: true,
            compute_variance: false,
            rebuild_database: false,
            empirical_factor: -1,
            check_orthonormality: false,
            check_reduced_basis: false,
            parallel_selection: false,
            database: None,
        }
    }
}

impl CrbConfig {
    /// Reads a configuration from a JSON file. Missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).wrap_err_with(|| format!("failed to open config file {}", path.display()))?;
        let config = serde_json::from_reader(BufReader::new(file))
            .wrap_err_with(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<(), CrbError> {
        if self.added_per_iteration == 0 {
            return Err(CrbError::InvalidSampling(
                "at least one basis function must be added per iteration".to_string(),
            ));
        }
        if self.sampling_size == 0 {
            return Err(CrbError::InvalidSampling("training sampling must not be empty".to_string()));
        }
        Ok(())
    }

    /// Whether the dual reduced problem has to be solved online.
    pub(crate) fn needs_dual(&self) -> bool {
        self.solve_dual_problem || self.error_type.is_residual_based()
    }
}
