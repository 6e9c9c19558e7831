//! The complete (persistable) state of a reduced basis.
use crate::basis::ReducedBasis;
use crate::config::{CrbConfig, ErrorType};
use crate::convergence::ConvergenceLedger;
use crate::model::{TimeDiscretization, TruthModel};
use crate::parameter::{Parameter, Sampling};
use crate::reduced::{ReducedAffineMatrices, ReducedMassOperators, ReducedOperators};
use crate::residual::ResidualErrorEstimator;
use serde::{Deserialize, Serialize};

/// Reduced mass operators and the time discretization of a time-dependent problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransientOperators {
    pub discretization: TimeDiscretization,
    pub mass: ReducedMassOperators,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Formulation {
    Steady,
    TimeDependent(TransientOperators),
}

impl Formulation {
    pub fn is_steady(&self) -> bool {
        matches!(self, Self::Steady)
    }
}

/// Everything the offline phase produces and the online phase consumes.
///
/// The basis size `N` is the size of the reduced operators. Databases written by older versions
/// do not contain the basis snapshots, in which case [`CrbState::basis`] is empty while `N` is
/// not: such a state can be evaluated online, but not enriched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrbState {
    pub(crate) output_index: usize,
    pub(crate) error_type: ErrorType,
    pub(crate) training: Sampling,
    pub(crate) selected: Sampling,
    /// Index of each selected parameter in the training sampling.
    pub(crate) selected_indices: Vec<usize>,
    pub(crate) basis: ReducedBasis,
    pub(crate) operators: ReducedOperators,
    pub(crate) formulation: Formulation,
    pub(crate) residual: Option<ResidualErrorEstimator>,
    pub(crate) variance: Option<ReducedAffineMatrices>,
    pub(crate) convergence: ConvergenceLedger,
    pub(crate) current_mu: Option<Parameter>,
}

impl CrbState {
    /// An empty state matching the affine structure of `model`.
    pub fn empty<M: TruthModel + ?Sized>(model: &M, config: &CrbConfig) -> Self {
        let output_index = config.output_index;
        let (qa, qm) = (model.qa(), model.qm());
        let (qf, ql) = (model.ql(0), model.ql(output_index));
        let formulation = match model.time_discretization() {
            None => Formulation::Steady,
            Some(discretization) => Formulation::TimeDependent(TransientOperators {
                discretization,
                mass: ReducedMassOperators::new(qm),
            }),
        };
        let residual = config
            .error_type
            .is_residual_based()
            .then(|| ResidualErrorEstimator::new(qa, qm, qf, ql, !formulation.is_steady()));

        Self {
            output_index,
            error_type: config.error_type,
            training: Sampling::new(),
            selected: Sampling::new(),
            selected_indices: Vec::new(),
            basis: ReducedBasis::new(),
            operators: ReducedOperators::new(qa, qf, ql),
            formulation,
            residual,
            variance: None,
            convergence: ConvergenceLedger::new(),
            current_mu: None,
        }
    }

    /// The size `N` of the reduced basis.
    pub fn dimension(&self) -> usize {
        self.operators.dimension()
    }

    /// Whether the basis snapshots are available, which is required to enrich the basis.
    pub fn has_snapshots(&self) -> bool {
        self.basis.len() == self.dimension()
    }

    pub fn output_index(&self) -> usize {
        self.output_index
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    pub fn training(&self) -> &Sampling {
        &self.training
    }

    pub fn selected(&self) -> &Sampling {
        &self.selected
    }

    pub fn selected_indices(&self) -> &[usize] {
        &self.selected_indices
    }

    pub fn basis(&self) -> &ReducedBasis {
        &self.basis
    }

    pub fn operators(&self) -> &ReducedOperators {
        &self.operators
    }

    pub fn formulation(&self) -> &Formulation {
        &self.formulation
    }

    pub fn residual(&self) -> Option<&ResidualErrorEstimator> {
        self.residual.as_ref()
    }

    pub fn variance(&self) -> Option<&ReducedAffineMatrices> {
        self.variance.as_ref()
    }

    pub fn convergence(&self) -> &ConvergenceLedger {
        &self.convergence
    }

    pub fn current_mu(&self) -> Option<&Parameter> {
        self.current_mu.as_ref()
    }
}
