//! Error type shared by all parts of the reduced basis engine.
use crate::config::ErrorType;
use std::error::Error;
use std::fmt;

/// Errors raised by the reduced basis engine.
///
/// The variants fall in four groups:
///
/// - configuration errors (bad parameter space, incompatible modes, bad array input),
/// - internal-consistency errors ([`CrbError::InconsistentSelection`]), which indicate a bug in
///   the precomputed data rather than bad input,
/// - numerical degeneracies (singular reduced systems, degenerate basis vectors),
/// - failures reported by collaborators (truth model, coercivity bound, database IO).
///
/// Missing or unreadable databases are *not* errors when loading: the engine logs a warning
/// and starts from an empty state instead.
#[derive(Debug)]
#[non_exhaustive]
pub enum CrbError {
    InvalidParameterSpace(String),
    InvalidSampling(String),
    EnrichmentNotSupported { error_type: ErrorType },
    MissingCoercivityBound,
    NonFiniteResidual { problem: &'static str, coefficients: [f64; 3] },
    InvalidOutputCount { expected: usize, actual: usize },
    InvalidArrayInput(String),
    InvalidOutputIndex { index: usize, num_outputs: usize },
    InconsistentSelection {
        index: usize,
        value: f64,
        check_index: usize,
        check_value: f64,
    },
    EmptyBasis,
    MissingResidualTerms,
    IncompleteVarianceMatrix { dimension: usize, n: usize },
    DegenerateBasis { index: usize, norm: f64 },
    SingularReducedSystem { n: usize },
    TruthModel(eyre::Report),
    Coercivity(eyre::Report),
    Database(eyre::Report),
}

impl fmt::Display for CrbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameterSpace(msg) => write!(f, "Invalid parameter space: {}", msg),
            Self::InvalidSampling(msg) => write!(f, "Invalid sampling: {}", msg),
            Self::EnrichmentNotSupported { error_type } => write!(
                f,
                "Cannot enrich an existing reduced basis with error type {:?}: \
                 use another error type or rebuild the database",
                error_type
            ),
            Self::MissingCoercivityBound => {
                write!(f, "Error type ResidualScm requires a coercivity bound, but none was provided")
            }
            Self::NonFiniteResidual { problem, coefficients } => write!(
                f,
                "Non-finite {} residual (c0 = {:e}, lambda = {:e}, gamma = {:e})",
                problem, coefficients[0], coefficients[1], coefficients[2]
            ),
            Self::InvalidOutputCount { expected, actual } => {
                write!(f, "Expected {} output slots, got {}", expected, actual)
            }
            Self::InvalidArrayInput(msg) => write!(f, "Invalid array input: {}", msg),
            Self::InvalidOutputIndex { index, num_outputs } => write!(
                f,
                "Output index {} out of range (model has {} outputs)",
                index, num_outputs
            ),
            Self::InconsistentSelection {
                index,
                value,
                check_index,
                check_value,
            } => write!(
                f,
                "Greedy selection is inconsistent: linear scan picked index {} (error {:e}), \
                 check scan picked index {} (error {:e})",
                index, value, check_index, check_value
            ),
            Self::EmptyBasis => write!(f, "The reduced basis is empty, run the offline phase first"),
            Self::MissingResidualTerms => write!(
                f,
                "Residual terms are not available: the reduced basis was built without a residual error estimator"
            ),
            Self::IncompleteVarianceMatrix { dimension, n } => write!(
                f,
                "Variance matrix has size {} but N = {} basis functions were requested",
                dimension, n
            ),
            Self::DegenerateBasis { index, norm } => write!(
                f,
                "Basis function {} is numerically linearly dependent (norm after projection: {:e})",
                index, norm
            ),
            Self::SingularReducedSystem { n } => write!(f, "Reduced system of dimension {} is singular", n),
            Self::TruthModel(err) => write!(f, "Truth model failure: {}", err),
            Self::Coercivity(err) => write!(f, "Coercivity bound failure: {}", err),
            Self::Database(err) => write!(f, "Database failure: {}", err),
        }
    }
}

impl Error for CrbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::TruthModel(err) | Self::Coercivity(err) | Self::Database(err) => Some(&**err),
            _ => None,
        }
    }
}
