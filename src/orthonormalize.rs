//! Gram-Schmidt orthonormalization of reduced bases under the inner product of a truth model.
use crate::error::CrbError;
use crate::model::TruthModel;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Orthonormalizes the last `count_new` vectors of `basis` against all preceding vectors.
///
/// This is modified Gram-Schmidt restricted to the new vectors: each new vector is projected
/// against every earlier vector (old ones, then earlier new ones, in index order) and then
/// normalized. The first `basis.len() - count_new` vectors are assumed to already be
/// orthonormal and are not modified.
///
/// Calling the function again is harmless, and in fact reduces the loss of orthogonality due to
/// round-off.
pub fn orthonormalize<M: TruthModel + ?Sized>(
    model: &M,
    basis: &mut [DVector<f64>],
    count_new: usize,
) -> Result<(), CrbError> {
    let n = basis.len();
    assert!(count_new <= n, "Cannot orthonormalize more vectors than there are in the basis.");

    for i in (n - count_new)..n {
        let (previous, rest) = basis.split_at_mut(i);
        let current = &mut rest[0];
        for xi in previous.iter() {
            let projection = model.scalar_product(current, xi);
            current.axpy(-projection, xi, 1.0);
        }

        let norm = model.scalar_product(current, current).sqrt();
        if !(norm.is_finite() && norm > 0.0) {
            return Err(CrbError::DegenerateBasis { index: i, norm });
        }
        *current /= norm;
    }
    Ok(())
}

/// The Gram matrix `G_ij = (basis[i], basis[j])_X`.
pub fn gram_matrix<M: TruthModel + ?Sized>(model: &M, basis: &[DVector<f64>]) -> DMatrix<f64> {
    let n = basis.len();
    let mut gram = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in i..n {
            let g = model.scalar_product(&basis[i], &basis[j]);
            gram[(i, j)] = g;
            gram[(j, i)] = g;
        }
    }
    gram
}

/// Frobenius norm of `G - I`, where `G` is the Gram matrix of `basis`.
pub fn orthonormality_deviation<M: TruthModel + ?Sized>(model: &M, basis: &[DVector<f64>]) -> f64 {
    let n = basis.len();
    let deviation = (gram_matrix(model, basis) - DMatrix::identity(n, n)).norm();
    debug!("Orthonormality deviation of basis of size {}: {:e}", n, deviation);
    deviation
}
