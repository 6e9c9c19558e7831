//! Persistence of reduced basis states.
//!
//! A database is a JSON document
//!
//! ```text
//! { "format": "crb-database", "version": <u32>, "payload": { ... } }
//! ```
//!
//! Every version of the payload has its own schema. Loading upgrades older payloads one version
//! at a time up to the current one, while saving always writes the current version. Floating
//! point values are written with enough digits to round-trip bit-exactly.
//!
//! | Version | Contents                                                                      |
//! |---------|-------------------------------------------------------------------------------|
//! | 1       | steady operators, residual terms, samplings, max error per basis size         |
//! | 2       | adds the formulation (time discretization, mass operators) and the variance   |
//! | 3       | the convergence ledger also records the primal and dual error indicators       |
//! | 4       | adds the basis snapshots, their provenance and the greedy position for resume  |
use crate::basis::{BasisProvenance, ReducedBasis};
use crate::config::ErrorType;
use crate::convergence::{ConvergenceEntry, ConvergenceLedger};
use crate::parameter::{Parameter, Sampling};
use crate::reduced::{ReducedAffineMatrices, ReducedOperators};
use crate::residual::{ResidualErrorEstimator, RieszResidualTerms};
use crate::state::{CrbState, Formulation};
use eyre::{eyre, WrapErr};
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FORMAT: &str = "crb-database";
pub const CURRENT_VERSION: u32 = 4;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<P> {
    format: String,
    version: u32,
    payload: P,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SteadyResidualV1 {
    primal: RieszResidualTerms,
    dual: RieszResidualTerms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaV1 {
    output_index: usize,
    error_type: i32,
    training: Vec<Parameter>,
    selected: Vec<Parameter>,
    operators: ReducedOperators,
    residual: Option<SteadyResidualV1>,
    max_errors: BTreeMap<usize, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaV2 {
    output_index: usize,
    error_type: i32,
    training: Vec<Parameter>,
    selected: Vec<Parameter>,
    operators: ReducedOperators,
    formulation: Formulation,
    residual: Option<ResidualErrorEstimator>,
    variance: Option<ReducedAffineMatrices>,
    max_errors: BTreeMap<usize, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaV3 {
    output_index: usize,
    error_type: i32,
    training: Vec<Parameter>,
    selected: Vec<Parameter>,
    operators: ReducedOperators,
    formulation: Formulation,
    residual: Option<ResidualErrorEstimator>,
    variance: Option<ReducedAffineMatrices>,
    convergence: ConvergenceLedger,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaV4 {
    output_index: usize,
    error_type: i32,
    training: Sampling,
    selected: Sampling,
    selected_indices: Vec<usize>,
    primal_basis: Vec<DVector<f64>>,
    dual_basis: Vec<DVector<f64>>,
    provenance: Vec<BasisProvenance>,
    operators: ReducedOperators,
    formulation: Formulation,
    residual: Option<ResidualErrorEstimator>,
    variance: Option<ReducedAffineMatrices>,
    convergence: ConvergenceLedger,
    current_mu: Option<Parameter>,
}

impl From<SchemaV1> for SchemaV2 {
    fn from(v1: SchemaV1) -> Self {
        Self {
            output_index: v1.output_index,
            error_type: v1.error_type,
            training: v1.training,
            selected: v1.selected,
            operators: v1.operators,
            formulation: Formulation::Steady,
            residual: v1.residual.map(|residual| ResidualErrorEstimator {
                primal: residual.primal,
                dual: residual.dual,
                transient: None,
            }),
            variance: None,
            max_errors: v1.max_errors,
        }
    }
}

impl From<SchemaV2> for SchemaV3 {
    fn from(v2: SchemaV2) -> Self {
        let mut convergence = ConvergenceLedger::new();
        for (n, max_error) in v2.max_errors {
            // Unknown indicators
            convergence.insert(
                n,
                ConvergenceEntry {
                    max_error,
                    delta_primal: f64::NAN,
                    delta_dual: f64::NAN,
                },
            );
        }
        Self {
            output_index: v2.output_index,
            error_type: v2.error_type,
            training: v2.training,
            selected: v2.selected,
            operators: v2.operators,
            formulation: v2.formulation,
            residual: v2.residual,
            variance: v2.variance,
            convergence,
        }
    }
}

impl From<SchemaV3> for SchemaV4 {
    fn from(v3: SchemaV3) -> Self {
        // Recover the training indices of the selected parameters, each training point being
        // matched at most once
        let mut used = vec![false; v3.training.len()];
        let selected_indices = v3
            .selected
            .iter()
            .filter_map(|mu| {
                let index = v3
                    .training
                    .iter()
                    .enumerate()
                    .position(|(k, p)| !used[k] && p == mu)?;
                used[index] = true;
                Some(index)
            })
            .collect();

        Self {
            output_index: v3.output_index,
            error_type: v3.error_type,
            training: Sampling::from_points(v3.training),
            selected: Sampling::from_points(v3.selected),
            selected_indices,
            primal_basis: Vec::new(),
            dual_basis: Vec::new(),
            provenance: Vec::new(),
            operators: v3.operators,
            formulation: v3.formulation,
            residual: v3.residual,
            variance: v3.variance,
            convergence: v3.convergence,
            current_mu: None,
        }
    }
}

impl From<&CrbState> for SchemaV4 {
    fn from(state: &CrbState) -> Self {
        Self {
            output_index: state.output_index,
            error_type: state.error_type.code(),
            training: state.training.clone(),
            selected: state.selected.clone(),
            selected_indices: state.selected_indices.clone(),
            primal_basis: state.basis.primal().to_vec(),
            dual_basis: state.basis.dual().to_vec(),
            provenance: state.basis.provenance().to_vec(),
            operators: state.operators.clone(),
            formulation: state.formulation.clone(),
            residual: state.residual.clone(),
            variance: state.variance.clone(),
            convergence: state.convergence.clone(),
            current_mu: state.current_mu.clone(),
        }
    }
}

impl SchemaV4 {
    fn into_state(self) -> eyre::Result<CrbState> {
        let v4 = self;
        let error_type =
            ErrorType::from_code(v4.error_type).ok_or_else(|| eyre!("unknown error type code {}", v4.error_type))?;
        let n = v4.operators.dimension();

        if v4.selected.len() != n {
            return Err(eyre!(
                "database contains {} selected parameters for a basis of size {}",
                v4.selected.len(),
                n
            ));
        }
        let basis_lengths = [v4.primal_basis.len(), v4.dual_basis.len(), v4.provenance.len()];
        if basis_lengths.iter().any(|&len| len != basis_lengths[0]) || (basis_lengths[0] != 0 && basis_lengths[0] != n) {
            return Err(eyre!(
                "inconsistent basis in database (primal {}, dual {}, provenance {}, N = {})",
                basis_lengths[0],
                basis_lengths[1],
                basis_lengths[2],
                n
            ));
        }
        if let Some(residual) = &v4.residual {
            if residual.dimension() != n {
                return Err(eyre!(
                    "residual terms have size {} but the basis has size {}",
                    residual.dimension(),
                    n
                ));
            }
        }

        Ok(CrbState {
            output_index: v4.output_index,
            error_type,
            training: v4.training,
            selected: v4.selected,
            selected_indices: v4.selected_indices,
            basis: ReducedBasis::from_parts(v4.primal_basis, v4.dual_basis, v4.provenance),
            operators: v4.operators,
            formulation: v4.formulation,
            residual: v4.residual,
            variance: v4.variance,
            convergence: v4.convergence,
            current_mu: v4.current_mu,
        })
    }
}

fn parse_payload<P: for<'de> Deserialize<'de>>(payload: Value, version: u32) -> eyre::Result<P> {
    serde_json::from_value(payload).wrap_err_with(|| format!("malformed payload for database version {}", version))
}

/// Writes `state` to `path` in the current format.
///
/// The state is first written to a temporary file next to `path`, which then replaces `path`,
/// so that an interrupted write never leaves a truncated database behind.
pub fn save(path: impl AsRef<Path>, state: &CrbState) -> eyre::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).wrap_err_with(|| format!("failed to create directory {}", parent.display()))?;
    }

    let envelope = Envelope {
        format: FORMAT.to_string(),
        version: CURRENT_VERSION,
        payload: SchemaV4::from(state),
    };

    let temp_path = temporary_path(path);
    {
        let file = File::create(&temp_path)
            .wrap_err_with(|| format!("failed to create temporary database file {}", temp_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &envelope).wrap_err("failed to serialize reduced basis database")?;
        writer.flush()?;
    }
    fs::rename(&temp_path, path)
        .wrap_err_with(|| format!("failed to move database into place at {}", path.display()))?;
    debug!("Saved reduced basis database of size {} to {}", state.dimension(), path.display());
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Reads a state written by [`save`] with any supported format version.
pub fn load(path: impl AsRef<Path>) -> eyre::Result<CrbState> {
    let path = path.as_ref();
    let file = File::open(path).wrap_err_with(|| format!("failed to open database {}", path.display()))?;
    let envelope: Envelope<Value> = serde_json::from_reader(BufReader::new(file))
        .wrap_err_with(|| format!("failed to parse database {}", path.display()))?;

    if envelope.format != FORMAT {
        return Err(eyre!("unknown database format '{}'", envelope.format));
    }

    let version = envelope.version;
    let payload = envelope.payload;
    let v4: SchemaV4 = match version {
        1 => SchemaV3::from(SchemaV2::from(parse_payload::<SchemaV1>(payload, version)?)).into(),
        2 => SchemaV3::from(parse_payload::<SchemaV2>(payload, version)?).into(),
        3 => parse_payload::<SchemaV3>(payload, version)?.into(),
        4 => parse_payload(payload, version)?,
        _ => {
            return Err(eyre!(
                "unsupported database version {} (supported: 1 to {})",
                version,
                CURRENT_VERSION
            ))
        }
    };
    if version < CURRENT_VERSION {
        debug!("Upgraded database {} from version {}", path.display(), version);
    }

    v4.into_state().wrap_err_with(|| format!("invalid database {}", path.display()))
}

/// Writes `state` with an older schema. Only used to exercise upgrades in tests.
#[doc(hidden)]
pub fn save_with_version(path: impl AsRef<Path>, state: &CrbState, version: u32) -> eyre::Result<()> {
    let v4 = SchemaV4::from(state);
    let max_errors = || {
        v4.convergence
            .iter()
            .map(|(n, entry)| (n, entry.max_error))
            .collect::<BTreeMap<_, _>>()
    };
    let payload = match version {
        1 => serde_json::to_value(SchemaV1 {
            output_index: v4.output_index,
            error_type: v4.error_type,
            training: v4.training.points().to_vec(),
            selected: v4.selected.points().to_vec(),
            operators: v4.operators.clone(),
            residual: v4.residual.clone().map(|residual| SteadyResidualV1 {
                primal: residual.primal,
                dual: residual.dual,
            }),
            max_errors: max_errors(),
        })?,
        2 => serde_json::to_value(SchemaV2 {
            output_index: v4.output_index,
            error_type: v4.error_type,
            training: v4.training.points().to_vec(),
            selected: v4.selected.points().to_vec(),
            operators: v4.operators.clone(),
            formulation: v4.formulation.clone(),
            residual: v4.residual.clone(),
            variance: v4.variance.clone(),
            max_errors: max_errors(),
        })?,
        3 => serde_json::to_value(SchemaV3 {
            output_index: v4.output_index,
            error_type: v4.error_type,
            training: v4.training.points().to_vec(),
            selected: v4.selected.points().to_vec(),
            operators: v4.operators.clone(),
            formulation: v4.formulation.clone(),
            residual: v4.residual.clone(),
            variance: v4.variance.clone(),
            convergence: v4.convergence.clone(),
        })?,
        4 => serde_json::to_value(&v4)?,
        _ => return Err(eyre!("cannot write database version {}", version)),
    };
    let envelope = Envelope {
        format: FORMAT.to_string(),
        version,
        payload,
    };
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer(&mut writer, &envelope)?;
    writer.flush()?;
    Ok(())
}

/// Returns whether a loaded state can be used with the given settings.
pub(crate) fn is_compatible(state: &CrbState, output_index: usize, error_type: ErrorType) -> bool {
    state.output_index == output_index && state.error_type == error_type
}

