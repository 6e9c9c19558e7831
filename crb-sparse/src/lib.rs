//! Sparse linear algebra used by truth models in `crb`.
//!
//! This is a thin layer on top of `nalgebra-sparse`: a preconditioned Conjugate-Gradient solver
//! with pluggable operators, and a couple of helpers for working with affinely decomposed
//! operators.
pub mod cg;

pub use nalgebra_sparse::{CooMatrix, CsrMatrix};

use nalgebra::{DVector, RealField, Scalar};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use num::Zero;

/// Extracts the diagonal of a square CSR matrix.
///
/// Missing (structurally zero) diagonal entries are returned as zero.
pub fn csr_diagonal<T: Scalar + Zero>(matrix: &CsrMatrix<T>) -> DVector<T> {
    let mut diagonal = DVector::zeros(matrix.nrows().min(matrix.ncols()));
    for (i, j, v) in matrix.triplet_iter() {
        if i == j {
            diagonal[i] = v.clone();
        }
    }
    diagonal
}

/// Computes `sum_q weights[q] * terms[q]`.
///
/// The terms may have different sparsity patterns. Panics if the number of weights does not
/// match the number of terms, or if the terms have different shapes.
pub fn csr_linear_combination<T: RealField>(terms: &[CsrMatrix<T>], weights: &[T]) -> CsrMatrix<T> {
    assert_eq!(terms.len(), weights.len(), "One weight per term required.");
    let (nrows, ncols) = terms
        .first()
        .map(|term| (term.nrows(), term.ncols()))
        .unwrap_or((0, 0));

    let mut coo = CooMatrix::new(nrows, ncols);
    for (term, weight) in terms.iter().zip(weights) {
        assert_eq!((term.nrows(), term.ncols()), (nrows, ncols), "Terms must have the same shape.");
        for (i, j, v) in term.triplet_iter() {
            coo.push(i, j, weight.clone() * v.clone());
        }
    }
    CsrMatrix::from(&coo)
}

/// Computes the bilinear form `u^T A v`.
pub fn csr_bilinear_form<T: RealField>(matrix: &CsrMatrix<T>, u: &DVector<T>, v: &DVector<T>) -> T {
    let mut a_v = DVector::zeros(matrix.nrows());
    spmm_csr_dense(T::zero(), &mut a_v, T::one(), Op::NoOp(matrix), Op::NoOp(v));
    u.dot(&a_v)
}

/// Computes `A x` or `A^T x`, depending on `transpose`.
pub fn csr_apply<T: RealField>(matrix: &CsrMatrix<T>, x: &DVector<T>, transpose: bool) -> DVector<T> {
    if transpose {
        let mut y = DVector::zeros(matrix.ncols());
        spmm_csr_dense(T::zero(), &mut y, T::one(), Op::Transpose(matrix), Op::NoOp(x));
        y
    } else {
        let mut y = DVector::zeros(matrix.nrows());
        spmm_csr_dense(T::zero(), &mut y, T::one(), Op::NoOp(matrix), Op::NoOp(x));
        y
    }
}
