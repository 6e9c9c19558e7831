use crb::convergence::{ConvergenceEntry, ConvergenceLedger};

fn entry(max_error: f64) -> ConvergenceEntry {
    ConvergenceEntry {
        max_error,
        delta_primal: max_error.sqrt(),
        delta_dual: max_error.sqrt(),
    }
}

#[test]
fn first_insertion_wins() {
    let mut ledger = ConvergenceLedger::new();
    assert!(ledger.insert(1, entry(1.0)));
    assert!(!ledger.insert(1, entry(0.5)));
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.get(1), Some(&entry(1.0)));
}

#[test]
fn entries_are_ordered_by_basis_size() {
    let mut ledger = ConvergenceLedger::new();
    ledger.insert(3, entry(1e-3));
    ledger.insert(1, entry(1e-1));
    ledger.insert(2, entry(1e-2));

    let sizes: Vec<usize> = ledger.iter().map(|(n, _)| n).collect();
    assert_eq!(sizes, vec![1, 2, 3]);
    assert_eq!(ledger.last(), Some((3, &entry(1e-3))));
}

#[test]
fn smallest_size_within_tolerance() {
    let mut ledger = ConvergenceLedger::new();
    ledger.insert(1, entry(1e-1));
    ledger.insert(2, entry(1e-2));
    ledger.insert(3, entry(1e-3));

    assert_eq!(ledger.smallest_size_within(1e-2), Some(2));
    assert_eq!(ledger.smallest_size_within(5e-2), Some(2));
    assert_eq!(ledger.smallest_size_within(1.0), Some(1));
    assert_eq!(ledger.smallest_size_within(1e-4), None);
    assert_eq!(ConvergenceLedger::new().smallest_size_within(1.0), None);
}

#[test]
fn unknown_indicators_survive_serialization() {
    let mut ledger = ConvergenceLedger::new();
    ledger.insert(
        1,
        ConvergenceEntry {
            max_error: 0.25,
            delta_primal: f64::NAN,
            delta_dual: f64::NAN,
        },
    );
    let json = serde_json::to_string(&ledger).unwrap();
    let restored: ConvergenceLedger = serde_json::from_str(&json).unwrap();
    let restored = restored.get(1).unwrap();
    assert_eq!(restored.max_error, 0.25);
    assert!(restored.delta_primal.is_nan());
    assert!(restored.delta_dual.is_nan());
}
