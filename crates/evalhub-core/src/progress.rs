//! Progress Calculator
//!
//! Derives per-evaluator completion from recorded results. The expected
//! count for every evaluator is `|subjects| × |criteria|`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use evalhub_state::{
    AssignmentStatus, CriterionId, EvaluationResult, Event, EventId, EventStore, ResultFilter,
    SubjectId, UserId,
};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::{EvaluationConfig, ProgressCounting};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatorProgress {
    pub evaluator_id: UserId,
    pub status: AssignmentStatus,
    pub completed: u64,
    pub total: u64,
    /// 0.0 when nothing is expected
    pub percentage: f64,
}

#[derive(Clone)]
pub struct ProgressCalculator {
    store: Arc<dyn EventStore>,
    config: EvaluationConfig,
}

impl ProgressCalculator {
    pub fn new(store: Arc<dyn EventStore>, config: EvaluationConfig) -> Self {
        Self { store, config }
    }

    /// Completion of every assigned evaluator, ordered by evaluator id.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn get_progress(&self, event_id: EventId) -> Result<Vec<EvaluatorProgress>> {
        let event = self.store.get_event(event_id).await?;
        let assignments = self.store.list_assignments(event_id).await?;
        let results = self
            .store
            .list_results(event_id, ResultFilter::default())
            .await?;

        let completed = count_completed(&event, &results, self.config.progress_counting);
        let total = event.expected_cells();
        debug!(total, evaluators = assignments.len(), "computing progress");

        let mut progress: Vec<EvaluatorProgress> = assignments
            .into_iter()
            .map(|a| {
                let done = completed.get(&a.evaluator_id).copied().unwrap_or(0);
                EvaluatorProgress {
                    evaluator_id: a.evaluator_id,
                    status: a.status,
                    completed: done,
                    total,
                    percentage: percentage(done, total),
                }
            })
            .collect();
        progress.sort_by_key(|p| p.evaluator_id);
        Ok(progress)
    }
}

fn count_completed(
    event: &Event,
    results: &[EvaluationResult],
    counting: ProgressCounting,
) -> BTreeMap<UserId, u64> {
    let mut counts = BTreeMap::new();
    match counting {
        ProgressCounting::RawRows => {
            for r in results {
                *counts.entry(r.evaluator_id).or_insert(0) += 1;
            }
        }
        ProgressCounting::Distinct => {
            let mut cells: BTreeMap<UserId, BTreeSet<(SubjectId, CriterionId)>> = BTreeMap::new();
            for r in results {
                if event.subjects.contains(&r.subject_id) && event.criteria.contains(r.criterion_id)
                {
                    cells
                        .entry(r.evaluator_id)
                        .or_default()
                        .insert((r.subject_id, r.criterion_id));
                }
            }
            for (evaluator, set) in cells {
                counts.insert(evaluator, set.len() as u64);
            }
        }
    }
    counts
}

fn percentage(completed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    }
}
