//! Storage for the primal and dual reduced bases.
use crate::parameter::Parameter;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// The parameter and greedy iteration that produced a basis function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisProvenance {
    pub mu: Parameter,
    pub iteration: usize,
}

/// The primal (`WN`) and dual (`WNdu`) reduced bases.
///
/// Both bases always have the same length. `provenance[i]` describes where the `i`-th pair of
/// snapshots came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReducedBasis {
    primal: Vec<DVector<f64>>,
    dual: Vec<DVector<f64>>,
    provenance: Vec<BasisProvenance>,
}

impl ReducedBasis {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        primal: Vec<DVector<f64>>,
        dual: Vec<DVector<f64>>,
        provenance: Vec<BasisProvenance>,
    ) -> Self {
        assert_eq!(primal.len(), dual.len());
        assert_eq!(primal.len(), provenance.len());
        Self {
            primal,
            dual,
            provenance,
        }
    }

    pub fn len(&self) -> usize {
        self.primal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primal.is_empty()
    }

    pub fn push(&mut self, primal: DVector<f64>, dual: DVector<f64>, provenance: BasisProvenance) {
        self.primal.push(primal);
        self.dual.push(dual);
        self.provenance.push(provenance);
    }

    pub fn primal(&self) -> &[DVector<f64>] {
        &self.primal
    }

    pub fn dual(&self) -> &[DVector<f64>] {
        &self.dual
    }

    pub fn provenance(&self) -> &[BasisProvenance] {
        &self.provenance
    }

    pub(crate) fn primal_mut(&mut self) -> &mut [DVector<f64>] {
        &mut self.primal
    }

    pub(crate) fn dual_mut(&mut self) -> &mut [DVector<f64>] {
        &mut self.dual
    }

    /// Computes `sum_i coefficients[i] * WN[i]`.
    ///
    /// Panics if there are more coefficients than basis functions or the basis is empty.
    pub fn reconstruct(&self, coefficients: &DVector<f64>) -> DVector<f64> {
        assert!(coefficients.len() <= self.len(), "Too many coefficients for the basis.");
        let mut u = DVector::zeros(self.primal[0].len());
        for (xi, &c) in self.primal.iter().zip(coefficients.iter()) {
            u.axpy(c, xi, 1.0);
        }
        u
    }
}
