//! Offline/online decomposition of the dual norm of residuals.
//!
//! For the primal problem, the residual of a reduced solution `u_N = sum_j u_j WN[j]` is
//!
//! ```text
//! r(mu) = sum_q f_q(mu) F_q - sum_q theta_q(mu) sum_j u_j A_q WN[j].
//! ```
//!
//! With `R(.)` the Riesz representer under the inner product `X` of the truth model, its dual
//! norm expands to
//!
//! ```text
//! ||r||^2 = sum_{q1,q2} f_q1 f_q2 C0[q1][q2]
//!         + sum_{q1,q2} theta_q1 f_q2 Lambda[q1][q2] . u
//!         + sum_{q1,q2} theta_q1 theta_q2 u . Gamma[q1][q2] u,
//!
//! C0[q1][q2]           = (R(F_q1), R(F_q2))_X,
//! Lambda[q1][q2](j)    = 2 (R(-A_q1 WN[j]), R(F_q2))_X,
//! Gamma[q1][q2](i, j)  = (R(-A_q1 WN[i]), R(-A_q2 WN[j]))_X,
//! ```
//!
//! which can be evaluated online without touching the truth space. The dual problem uses
//! `A^T`, the dual basis and the output functional `-L` in place of `F`. Time-dependent problems
//! add coupling terms between the mass operators and the other terms.
use crate::basis::ReducedBasis;
use crate::error::CrbError;
use crate::model::{AffineDecomposition, TruthModel};
use crate::reduced::{ReducedAffineMatrices, ReducedAffineVectors};
use crb_sparse::{csr_apply, CsrMatrix};
use itertools::iproduct;
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Squared dual norm of a residual together with its three contributions.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ResidualNorm {
    /// `|c0 + lambda + gamma + mass_coupling|`.
    pub squared: f64,
    /// `[c0, lambda, gamma]`.
    pub coefficients: [f64; 3],
    /// Contribution of the mass coupling terms. Zero for steady problems.
    pub mass_coupling: f64,
}

impl ResidualNorm {
    /// The dual norm of the residual, `sqrt(squared)`.
    pub fn residual_norm(&self) -> f64 {
        self.squared.sqrt()
    }
}

/// The tensors `C0`, `Lambda` and `Gamma` of one (primal or dual) problem.
///
/// `lambda[q1].term(q2)` and `gamma[q1].term(q2)` correspond to `Lambda[q1][q2]` and
/// `Gamma[q1][q2]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RieszResidualTerms {
    pub c0: DMatrix<f64>,
    pub lambda: Vec<ReducedAffineVectors>,
    pub gamma: Vec<ReducedAffineMatrices>,
}

impl Default for RieszResidualTerms {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl RieszResidualTerms {
    pub fn new(qa: usize, qf: usize) -> Self {
        Self {
            c0: DMatrix::zeros(0, 0),
            lambda: (0..qa).map(|_| ReducedAffineVectors::new(qf)).collect(),
            gamma: (0..qa).map(|_| ReducedAffineMatrices::new(qa)).collect(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.gamma.first().map_or(0, |gamma| gamma.dimension())
    }

    fn grow_to<M: TruthModel + ?Sized>(
        &mut self,
        model: &M,
        representers: &ProblemRepresenters,
        n: usize,
        count_new: usize,
    ) {
        let inner = |a: &DVector<f64>, b: &DVector<f64>| model.scalar_product(a, b);
        let rhs = &representers.rhs;
        let lhs = &representers.lhs;

        // The constant term does not depend on the basis, so it is only ever computed once
        if self.c0.is_empty() {
            let qf = rhs.len();
            self.c0 = DMatrix::from_fn(qf, qf, |q1, q2| inner(&rhs[q1], &rhs[q2]));
        }

        for (q1, lambda) in self.lambda.iter_mut().enumerate() {
            lambda.grow_to(n, count_new, |q2, j| 2.0 * inner(&lhs[j][q1], &rhs[q2]));
        }
        for (q1, gamma) in self.gamma.iter_mut().enumerate() {
            gamma.grow_to(n, count_new, |q2, i, l| inner(&lhs[i][q1], &lhs[l][q2]));
        }
    }

    /// Reconstructs the squared dual norm of the residual for reduced coefficients `u`.
    ///
    /// `theta_a` are the stiffness coefficients and `theta_f` the coefficients of the
    /// right-hand side (primal) or output (dual) terms. Only the leading `u.len()` basis
    /// functions are used.
    pub fn squared_norm(&self, theta_a: &[f64], theta_f: &[f64], u: &DVector<f64>) -> ResidualNorm {
        let n = u.len();

        let c0 = iproduct!(0..theta_f.len(), 0..theta_f.len())
            .map(|(q1, q2)| self.c0[(q1, q2)] * theta_f[q1] * theta_f[q2])
            .sum::<f64>();

        let lambda = iproduct!(0..theta_a.len(), 0..theta_f.len())
            .map(|(q1, q2)| theta_a[q1] * theta_f[q2] * self.lambda[q1].term(q2).rows(0, n).dot(u))
            .sum::<f64>();

        let gamma = iproduct!(0..theta_a.len(), 0..theta_a.len())
            .map(|(q1, q2)| {
                let g = self.gamma[q1].term(q2).view((0, 0), (n, n));
                theta_a[q1] * theta_a[q2] * u.dot(&(g * u))
            })
            .sum::<f64>();

        ResidualNorm {
            squared: (c0 + lambda + gamma).abs(),
            coefficients: [c0, lambda, gamma],
            mass_coupling: 0.0,
        }
    }
}

/// Coupling between mass terms and the other residual terms of a time-dependent problem.
///
/// - `cmf[q1].term(q2)(j) = 2 (R(-M_q1 WN[j]), R(F_q2))_X`
/// - `cma[q1].term(q2)(i, j) = 2 (R(-M_q1 WN[i]), R(-A_q2 WN[j]))_X`
/// - `cmm[q1].term(q2)(i, j) = (R(-M_q1 WN[i]), R(-M_q2 WN[j]))_X`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MassCouplingTerms {
    pub cmf: Vec<ReducedAffineVectors>,
    pub cma: Vec<ReducedAffineMatrices>,
    pub cmm: Vec<ReducedAffineMatrices>,
}

impl MassCouplingTerms {
    pub fn new(qm: usize, qa: usize, qf: usize) -> Self {
        Self {
            cmf: (0..qm).map(|_| ReducedAffineVectors::new(qf)).collect(),
            cma: (0..qm).map(|_| ReducedAffineMatrices::new(qa)).collect(),
            cmm: (0..qm).map(|_| ReducedAffineMatrices::new(qm)).collect(),
        }
    }

    fn grow_to<M: TruthModel + ?Sized>(
        &mut self,
        model: &M,
        representers: &ProblemRepresenters,
        n: usize,
        count_new: usize,
    ) {
        let inner = |a: &DVector<f64>, b: &DVector<f64>| model.scalar_product(a, b);
        let (rhs, lhs, mass) = (&representers.rhs, &representers.lhs, &representers.mass);

        for (q1, cmf) in self.cmf.iter_mut().enumerate() {
            cmf.grow_to(n, count_new, |q2, j| 2.0 * inner(&mass[j][q1], &rhs[q2]));
        }
        for (q1, cma) in self.cma.iter_mut().enumerate() {
            cma.grow_to(n, count_new, |q2, i, l| 2.0 * inner(&mass[i][q1], &lhs[l][q2]));
        }
        for (q1, cmm) in self.cmm.iter_mut().enumerate() {
            cmm.grow_to(n, count_new, |q2, i, l| inner(&mass[i][q1], &mass[l][q2]));
        }
    }

    /// Contribution of the mass terms to the squared residual norm, for the reduced solution
    /// `u` and its discrete time derivative `u_dot`.
    pub fn contribution(
        &self,
        theta_m: &[f64],
        theta_a: &[f64],
        theta_f: &[f64],
        u: &DVector<f64>,
        u_dot: &DVector<f64>,
    ) -> f64 {
        let n = u.len();
        let mf = iproduct!(0..theta_m.len(), 0..theta_f.len())
            .map(|(q1, q2)| theta_m[q1] * theta_f[q2] * self.cmf[q1].term(q2).rows(0, n).dot(u_dot))
            .sum::<f64>();
        let ma = iproduct!(0..theta_m.len(), 0..theta_a.len())
            .map(|(q1, q2)| {
                let c = self.cma[q1].term(q2).view((0, 0), (n, n));
                theta_m[q1] * theta_a[q2] * u_dot.dot(&(c * u))
            })
            .sum::<f64>();
        let mm = iproduct!(0..theta_m.len(), 0..theta_m.len())
            .map(|(q1, q2)| {
                let c = self.cmm[q1].term(q2).view((0, 0), (n, n));
                theta_m[q1] * theta_m[q2] * u_dot.dot(&(c * u_dot))
            })
            .sum::<f64>();
        mf + ma + mm
    }
}

/// Mass coupling terms of the primal and dual problems.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransientResidualTerms {
    pub primal: MassCouplingTerms,
    pub dual: MassCouplingTerms,
}

/// Precomputed residual data for the primal and dual problems.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualErrorEstimator {
    pub primal: RieszResidualTerms,
    pub dual: RieszResidualTerms,
    /// Present only for time-dependent problems.
    pub transient: Option<TransientResidualTerms>,
}

impl ResidualErrorEstimator {
    pub fn new(qa: usize, qm: usize, qf: usize, ql: usize, time_dependent: bool) -> Self {
        let transient = time_dependent.then(|| TransientResidualTerms {
            primal: MassCouplingTerms::new(qm, qa, qf),
            dual: MassCouplingTerms::new(qm, qa, ql),
        });
        Self {
            primal: RieszResidualTerms::new(qa, qf),
            dual: RieszResidualTerms::new(qa, ql),
            transient,
        }
    }

    pub fn dimension(&self) -> usize {
        self.primal.dimension()
    }

    /// Grows all residual terms to the size of `basis`, of which the last `count_new`
    /// functions are new.
    pub fn grow_to<M: TruthModel + ?Sized>(
        &mut self,
        model: &M,
        decomposition: &AffineDecomposition,
        basis: &ReducedBasis,
        output_index: usize,
        count_new: usize,
        cache: &mut RieszCache,
    ) -> Result<(), CrbError> {
        let n = basis.len();
        let time_dependent = self.transient.is_some();
        let mass: &[CsrMatrix<f64>] = if time_dependent { &decomposition.mass } else { &[] };

        cache
            .primal
            .populate(model, &decomposition.outputs[0], 1.0, &decomposition.stiffness, mass, basis.primal(), false)
            .map_err(CrbError::TruthModel)?;
        cache
            .dual
            .populate(
                model,
                &decomposition.outputs[output_index],
                -1.0,
                &decomposition.stiffness,
                mass,
                basis.dual(),
                true,
            )
            .map_err(CrbError::TruthModel)?;

        self.primal.grow_to(model, &cache.primal, n, count_new);
        self.dual.grow_to(model, &cache.dual, n, count_new);
        if let Some(transient) = &mut self.transient {
            transient.primal.grow_to(model, &cache.primal, n, count_new);
            transient.dual.grow_to(model, &cache.dual, n, count_new);
        }
        debug!("Residual terms grown to N = {}", n);
        Ok(())
    }
}

/// Riesz representers of one problem.
#[derive(Debug, Clone, Default)]
struct ProblemRepresenters {
    /// `R(sign * F_q)` for every right-hand side (or output) term.
    rhs: Vec<DVector<f64>>,
    /// `lhs[j][q] = R(-A_q w_j)`, with `A_q` transposed for the dual problem.
    lhs: Vec<Vec<DVector<f64>>>,
    /// `mass[j][q] = R(-M_q w_j)`. Empty for steady problems.
    mass: Vec<Vec<DVector<f64>>>,
}

impl ProblemRepresenters {
    #[allow(clippy::too_many_arguments)]
    fn populate<M: TruthModel + ?Sized>(
        &mut self,
        model: &M,
        rhs_terms: &[DVector<f64>],
        rhs_sign: f64,
        stiffness: &[CsrMatrix<f64>],
        mass: &[CsrMatrix<f64>],
        basis: &[DVector<f64>],
        transpose: bool,
    ) -> eyre::Result<()> {
        if self.rhs.is_empty() {
            self.rhs = rhs_terms
                .iter()
                .map(|f| model.l2solve(&(f * rhs_sign)))
                .collect::<eyre::Result<_>>()?;
        }

        let riesz_of_negated = |operators: &[CsrMatrix<f64>], w: &DVector<f64>| {
            operators
                .iter()
                .map(|op| model.l2solve(&-csr_apply(op, w, transpose)))
                .collect::<eyre::Result<Vec<_>>>()
        };

        for w in &basis[self.lhs.len()..] {
            self.lhs.push(riesz_of_negated(stiffness, w)?);
        }
        if !mass.is_empty() {
            for w in &basis[self.mass.len()..] {
                self.mass.push(riesz_of_negated(mass, w)?);
            }
        }
        Ok(())
    }
}

/// Riesz representers needed to grow the residual terms.
///
/// This cache only lives in memory. After loading a database it is repopulated on demand from
/// the stored basis, which costs Riesz solves but leaves all stored residual terms untouched.
#[derive(Debug, Clone, Default)]
pub struct RieszCache {
    primal: ProblemRepresenters,
    dual: ProblemRepresenters,
}

impl RieszCache {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
