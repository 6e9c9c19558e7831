//! Greedy convergence history: the error indicators recorded for every basis size.
use log::info;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Error indicators recorded at the end of a greedy iteration.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceEntry {
    /// The maximum error (bound) over the candidate parameters.
    pub max_error: f64,
    /// `NaN` when unknown, which is the case for entries upgraded from old databases.
    #[serde(deserialize_with = "nan_from_null")]
    pub delta_primal: f64,
    #[serde(deserialize_with = "nan_from_null")]
    pub delta_dual: f64,
}

/// JSON has no representation of `NaN`, which `serde_json` writes as `null`.
fn nan_from_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Maps basis size `N` to the error indicators of the greedy iteration that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceLedger {
    entries: BTreeMap<usize, ConvergenceEntry>,
}

impl ConvergenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the entry for basis size `n`.
    ///
    /// The ledger is append-only: if `n` is already present, the existing entry is kept and
    /// `false` is returned.
    pub fn insert(&mut self, n: usize, entry: ConvergenceEntry) -> bool {
        match self.entries.entry(n) {
            std::collections::btree_map::Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, n: usize) -> Option<&ConvergenceEntry> {
        self.entries.get(&n)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in increasing order of basis size.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ConvergenceEntry)> {
        self.entries.iter().map(|(&n, entry)| (n, entry))
    }

    pub fn last(&self) -> Option<(usize, &ConvergenceEntry)> {
        self.entries.iter().next_back().map(|(&n, entry)| (n, entry))
    }

    /// The smallest basis size whose recorded maximum error is at most `tolerance`.
    pub fn smallest_size_within(&self, tolerance: f64) -> Option<usize> {
        self.iter()
            .find(|(_, entry)| entry.max_error <= tolerance)
            .map(|(n, _)| n)
    }

    /// Logs the whole ledger at `info` level.
    pub fn log_summary(&self) {
        info!("Convergence of the reduced basis ({} entries):", self.len());
        for (n, entry) in self.iter() {
            info!(
                "  N = {:4}  max error = {:e}  delta_pr = {:e}  delta_du = {:e}",
                n, entry.max_error, entry.delta_primal, entry.delta_dual
            );
        }
    }
}
