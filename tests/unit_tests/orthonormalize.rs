use crb::model::TruthModel;
use crb::orthonormalize::{gram_matrix, orthonormality_deviation, orthonormalize};
use crb::CrbError;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::reference_model;

fn random_vectors(count: usize, dim: usize, seed: u64) -> Vec<DVector<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| DVector::from_fn(dim, |_, _| rng.gen_range(-1.0..1.0)))
        .collect()
}

#[test]
fn orthonormalize_all_at_once_gives_identity_gram_matrix() {
    let model = reference_model();
    let mut basis = random_vectors(6, model.num_dofs(), 1);
    orthonormalize(&model, &mut basis, 6).unwrap();

    let gram = gram_matrix(&model, &basis);
    assert_matrix_eq!(gram, DMatrix::identity(6, 6), comp = abs, tol = 1e-12);
    assert!(orthonormality_deviation(&model, &basis) < 1e-10);
}

#[test]
fn orthonormalize_does_not_modify_existing_vectors() {
    let model = reference_model();
    let mut basis = random_vectors(3, model.num_dofs(), 2);
    orthonormalize(&model, &mut basis, 3).unwrap();
    let existing = basis.clone();

    basis.extend(random_vectors(2, model.num_dofs(), 3));
    orthonormalize(&model, &mut basis, 2).unwrap();

    assert_eq!(&basis[..3], &existing[..]);
    assert!(orthonormality_deviation(&model, &basis) < 1e-10);
}

#[test]
fn repeated_orthonormalization_is_idempotent() {
    let model = reference_model();
    let mut basis = random_vectors(4, model.num_dofs(), 4);
    orthonormalize(&model, &mut basis, 4).unwrap();
    let once = basis.clone();
    orthonormalize(&model, &mut basis, 4).unwrap();

    for (a, b) in once.iter().zip(&basis) {
        assert!((a - b).amax() < 1e-12);
    }
}

#[test]
fn zero_vector_is_degenerate() {
    let model = reference_model();
    let mut basis = random_vectors(2, model.num_dofs(), 5);
    basis.push(DVector::zeros(model.num_dofs()));

    let result = orthonormalize(&model, &mut basis, 3);
    assert!(matches!(result, Err(CrbError::DegenerateBasis { index: 2, .. })));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]
    #[test]
    fn incremental_orthonormalization_keeps_basis_orthonormal(
        seed in any::<u64>(),
        count in 1usize..8,
        batch in 1usize..3
    ) {
        let model = reference_model();
        let vectors = random_vectors(count, model.num_dofs(), seed);
        let mut basis = Vec::new();
        for chunk in vectors.chunks(batch) {
            basis.extend_from_slice(chunk);
            orthonormalize(&model, &mut basis, chunk.len()).unwrap();
            orthonormalize(&model, &mut basis, chunk.len()).unwrap();
            prop_assert!(orthonormality_deviation(&model, &basis) < 1e-10);
        }
    }
}
