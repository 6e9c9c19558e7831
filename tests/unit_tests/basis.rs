use crb::basis::{BasisProvenance, ReducedBasis};
use matrixcompare::assert_matrix_eq;
use nalgebra::DVector;

use crate::mu;

fn provenance(iteration: usize) -> BasisProvenance {
    BasisProvenance {
        mu: mu(1.0, iteration as f64),
        iteration,
    }
}

#[test]
fn push_keeps_bases_and_provenance_parallel() {
    let mut basis = ReducedBasis::new();
    assert!(basis.is_empty());

    basis.push(DVector::from_vec(vec![1.0, 0.0]), DVector::from_vec(vec![0.0, 1.0]), provenance(0));
    basis.push(DVector::from_vec(vec![0.0, 1.0]), DVector::from_vec(vec![1.0, 0.0]), provenance(1));

    assert_eq!(basis.len(), 2);
    assert_eq!(basis.primal().len(), 2);
    assert_eq!(basis.dual().len(), 2);
    assert_eq!(basis.provenance()[1].iteration, 1);
    assert_eq!(basis.provenance()[1].mu, mu(1.0, 1.0));
}

#[test]
fn reconstruct_combines_primal_basis() {
    let mut basis = ReducedBasis::new();
    basis.push(DVector::from_vec(vec![1.0, 0.0, 1.0]), DVector::zeros(3), provenance(0));
    basis.push(DVector::from_vec(vec![0.0, 2.0, 0.0]), DVector::zeros(3), provenance(1));

    let u = basis.reconstruct(&DVector::from_vec(vec![3.0, -1.0]));
    assert_matrix_eq!(u, DVector::from_vec(vec![3.0, -2.0, 3.0]));

    // Fewer coefficients than basis functions use a leading subset of the basis
    let u = basis.reconstruct(&DVector::from_vec(vec![2.0]));
    assert_matrix_eq!(u, DVector::from_vec(vec![2.0, 0.0, 2.0]));
}
