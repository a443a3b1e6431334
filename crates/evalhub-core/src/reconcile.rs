//! Desired-state set reconciliation
//!
//! Both evaluator and criteria syncs reduce to the same computation: diff the
//! current id set against the desired one and report what to add, what to
//! remove and what stays. Outputs are sorted and free of duplicates.

use std::collections::BTreeSet;

use evalhub_state::CriterionId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub kept: Vec<T>,
}

impl<T> SyncOutcome<T> {
    /// Nothing to write.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Diff `current` against `desired`.
pub fn reconcile<T: Ord + Copy>(
    current: impl IntoIterator<Item = T>,
    desired: impl IntoIterator<Item = T>,
) -> SyncOutcome<T> {
    let current: BTreeSet<T> = current.into_iter().collect();
    let desired: BTreeSet<T> = desired.into_iter().collect();

    SyncOutcome {
        added: desired.difference(&current).copied().collect(),
        removed: current.difference(&desired).copied().collect(),
        kept: current.intersection(&desired).copied().collect(),
    }
}

/// Criteria sync report, with the full sets on both sides of the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriteriaSyncOutcome {
    pub added: Vec<CriterionId>,
    pub removed: Vec<CriterionId>,
    pub kept: Vec<CriterionId>,
    pub before: Vec<CriterionId>,
    pub after: Vec<CriterionId>,
}

impl CriteriaSyncOutcome {
    pub fn new(before: &BTreeSet<CriterionId>, after: &BTreeSet<CriterionId>) -> Self {
        let SyncOutcome {
            added,
            removed,
            kept,
        } = reconcile(before.iter().copied(), after.iter().copied());
        Self {
            added,
            removed,
            kept,
            before: before.iter().copied().collect(),
            after: after.iter().copied().collect(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
