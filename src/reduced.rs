//! Reduced (projected) operators for each affine term.
//!
//! All containers here grow monotonically: when the basis grows from `N - k` to `N` functions,
//! only the rows and columns with index in `[N - k, N)` are computed, and every previously
//! computed entry is kept exactly as it was.
use crate::basis::ReducedBasis;
use crate::model::AffineDecomposition;
use crb_sparse::{csr_apply, CsrMatrix};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// A family of `N x N` matrices, one per affine term.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReducedAffineMatrices {
    terms: Vec<DMatrix<f64>>,
}

/// A family of vectors of length `N`, one per affine term.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReducedAffineVectors {
    terms: Vec<DVector<f64>>,
}

impl ReducedAffineMatrices {
    pub fn new(num_terms: usize) -> Self {
        Self {
            terms: vec![DMatrix::zeros(0, 0); num_terms],
        }
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn term(&self, q: usize) -> &DMatrix<f64> {
        &self.terms[q]
    }

    pub fn terms(&self) -> &[DMatrix<f64>] {
        &self.terms
    }

    /// Current size `N`. Zero when there are no terms.
    pub fn dimension(&self) -> usize {
        self.terms.first().map_or(0, |term| term.nrows())
    }

    /// Grows every term to `n x n`, computing only entries `(i, j)` where `i` or `j` is one of
    /// the `count_new` new indices. `entry(q, i, j)` computes the entry of term `q`.
    pub fn grow_to(&mut self, n: usize, count_new: usize, mut entry: impl FnMut(usize, usize, usize) -> f64) {
        assert!(count_new <= n);
        let old = n - count_new;
        for (q, term) in self.terms.iter_mut().enumerate() {
            assert_eq!(term.nrows(), old, "Reduced matrix must only grow by the new basis functions.");
            term.resize_mut(n, n, 0.0);
            for j in 0..n {
                for i in 0..n {
                    if i >= old || j >= old {
                        term[(i, j)] = entry(q, i, j);
                    }
                }
            }
        }
    }

    /// Computes `sum_q weights[q] * term_q`, restricted to the leading `n x n` block.
    pub fn assemble(&self, weights: &[f64], n: usize) -> DMatrix<f64> {
        assert_eq!(weights.len(), self.terms.len(), "One weight per affine term required.");
        let mut result = DMatrix::zeros(n, n);
        for (term, &w) in self.terms.iter().zip(weights) {
            result += term.view((0, 0), (n, n)) * w;
        }
        result
    }
}

impl ReducedAffineVectors {
    pub fn new(num_terms: usize) -> Self {
        Self {
            terms: vec![DVector::zeros(0); num_terms],
        }
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn term(&self, q: usize) -> &DVector<f64> {
        &self.terms[q]
    }

    pub fn terms(&self) -> &[DVector<f64>] {
        &self.terms
    }

    pub fn dimension(&self) -> usize {
        self.terms.first().map_or(0, |term| term.len())
    }

    /// Grows every term to length `n`, computing only the last `count_new` entries with
    /// `entry(q, i)`.
    pub fn grow_to(&mut self, n: usize, count_new: usize, mut entry: impl FnMut(usize, usize) -> f64) {
        assert!(count_new <= n);
        let old = n - count_new;
        for (q, term) in self.terms.iter_mut().enumerate() {
            assert_eq!(term.len(), old, "Reduced vector must only grow by the new basis functions.");
            term.resize_vertically_mut(n, 0.0);
            for i in old..n {
                term[i] = entry(q, i);
            }
        }
    }

    /// Computes `sum_q weights[q] * term_q`, restricted to the leading `n` entries.
    pub fn assemble(&self, weights: &[f64], n: usize) -> DVector<f64> {
        assert_eq!(weights.len(), self.terms.len(), "One weight per affine term required.");
        let mut result = DVector::zeros(n);
        for (term, &w) in self.terms.iter().zip(weights) {
            result.axpy(w, &term.rows(0, n), 1.0);
        }
        result
    }
}

/// Grows `target` with the entries `left[i]^T op_q right[j]`, where `op_q` is `operators[q]` or
/// its transpose.
///
/// Only matrix-vector products involving new basis functions are computed: new columns use
/// `op_q right[j]`, new rows use `op_q^T left[i]`.
fn grow_projection(
    target: &mut ReducedAffineMatrices,
    operators: &[CsrMatrix<f64>],
    left: &[DVector<f64>],
    right: &[DVector<f64>],
    transpose: bool,
    count_new: usize,
) {
    let n = left.len();
    let old = n - count_new;
    // op_right[q][j - old] = op_q right[j], op_t_left[q][i - old] = op_q^T left[i]
    let op_right: Vec<Vec<DVector<f64>>> = operators
        .iter()
        .map(|op| right[old..].iter().map(|r| csr_apply(op, r, transpose)).collect())
        .collect();
    let op_t_left: Vec<Vec<DVector<f64>>> = operators
        .iter()
        .map(|op| left[old..].iter().map(|l| csr_apply(op, l, !transpose)).collect())
        .collect();

    target.grow_to(n, count_new, |q, i, j| {
        if j >= old {
            left[i].dot(&op_right[q][j - old])
        } else {
            op_t_left[q][i - old].dot(&right[j])
        }
    });
}

fn grow_functional(target: &mut ReducedAffineVectors, functionals: &[DVector<f64>], basis: &[DVector<f64>], count_new: usize) {
    target.grow_to(basis.len(), count_new, |q, i| functionals[q].dot(&basis[i]));
}

/// Reduced stiffness, right-hand side and output operators.
///
/// - `aq_pr[q](i, j) = WN[i]^T A_q WN[j]`
/// - `aq_du[q](i, j) = WNdu[i]^T A_q^T WNdu[j]`
/// - `aq_pr_du[q](i, j) = WNdu[i]^T A_q WN[j]`
/// - `fq_pr[q](i) = F_q^T WN[i]`, `fq_du[q](i) = F_q^T WNdu[i]`
/// - `lq_pr[q](i) = L_q^T WN[i]`, `lq_du[q](i) = L_q^T WNdu[i]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReducedOperators {
    pub aq_pr: ReducedAffineMatrices,
    pub aq_du: ReducedAffineMatrices,
    pub aq_pr_du: ReducedAffineMatrices,
    pub fq_pr: ReducedAffineVectors,
    pub fq_du: ReducedAffineVectors,
    pub lq_pr: ReducedAffineVectors,
    pub lq_du: ReducedAffineVectors,
}

impl ReducedOperators {
    pub fn new(qa: usize, qf: usize, ql: usize) -> Self {
        Self {
            aq_pr: ReducedAffineMatrices::new(qa),
            aq_du: ReducedAffineMatrices::new(qa),
            aq_pr_du: ReducedAffineMatrices::new(qa),
            fq_pr: ReducedAffineVectors::new(qf),
            fq_du: ReducedAffineVectors::new(qf),
            lq_pr: ReducedAffineVectors::new(ql),
            lq_du: ReducedAffineVectors::new(ql),
        }
    }

    pub fn dimension(&self) -> usize {
        self.aq_pr.dimension()
    }

    pub fn grow_to(
        &mut self,
        decomposition: &AffineDecomposition,
        basis: &ReducedBasis,
        output_index: usize,
        count_new: usize,
    ) {
        let (wn, wndu) = (basis.primal(), basis.dual());
        let stiffness = &decomposition.stiffness;
        grow_projection(&mut self.aq_pr, stiffness, wn, wn, false, count_new);
        grow_projection(&mut self.aq_du, stiffness, wndu, wndu, true, count_new);
        grow_projection(&mut self.aq_pr_du, stiffness, wndu, wn, false, count_new);

        let rhs = &decomposition.outputs[0];
        let output = &decomposition.outputs[output_index];
        grow_functional(&mut self.fq_pr, rhs, wn, count_new);
        grow_functional(&mut self.fq_du, rhs, wndu, count_new);
        grow_functional(&mut self.lq_pr, output, wn, count_new);
        grow_functional(&mut self.lq_du, output, wndu, count_new);
    }
}

/// Reduced mass operators of a time-dependent model, analogous to [`ReducedOperators`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReducedMassOperators {
    pub mq_pr: ReducedAffineMatrices,
    pub mq_du: ReducedAffineMatrices,
    pub mq_pr_du: ReducedAffineMatrices,
}

impl ReducedMassOperators {
    pub fn new(qm: usize) -> Self {
        Self {
            mq_pr: ReducedAffineMatrices::new(qm),
            mq_du: ReducedAffineMatrices::new(qm),
            mq_pr_du: ReducedAffineMatrices::new(qm),
        }
    }

    pub fn grow_to(&mut self, decomposition: &AffineDecomposition, basis: &ReducedBasis, count_new: usize) {
        let (wn, wndu) = (basis.primal(), basis.dual());
        let mass = &decomposition.mass;
        grow_projection(&mut self.mq_pr, mass, wn, wn, false, count_new);
        grow_projection(&mut self.mq_du, mass, wndu, wndu, true, count_new);
        grow_projection(&mut self.mq_pr_du, mass, wndu, wn, false, count_new);
    }
}
