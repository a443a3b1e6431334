//! Criteria Assignment Manager
//!
//! Reconciles the skill or metric set of an event. The criterion kind is
//! fixed by the event's mode, and every desired id is checked against the
//! owning group's catalog before anything is written.

use std::collections::BTreeSet;
use std::sync::Arc;

use evalhub_state::{Criteria, CriterionId, Event, EventChange, EventId, EventStore};
use tracing::{debug, instrument};

use crate::config::EvaluationConfig;
use crate::directory::Directory;
use crate::error::{EvaluationError, Result};
use crate::evaluators::check_version;
use crate::metrics::METRICS;
use crate::obs;
use crate::reconcile::CriteriaSyncOutcome;

/// A validated criteria replacement that has not been committed yet.
#[derive(Debug, Clone)]
pub(crate) struct CriteriaPlan {
    pub outcome: CriteriaSyncOutcome,
    pub criteria: Criteria,
}

#[derive(Clone)]
pub struct CriteriaAssignmentManager {
    store: Arc<dyn EventStore>,
    directory: Directory,
    config: EvaluationConfig,
}

impl CriteriaAssignmentManager {
    pub fn new(store: Arc<dyn EventStore>, directory: Directory, config: EvaluationConfig) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    pub(crate) async fn plan(
        &self,
        event: &Event,
        desired: &BTreeSet<CriterionId>,
    ) -> Result<CriteriaPlan> {
        let kind = event.mode.criterion_kind();
        self.directory
            .require_criteria(event.group_id, kind, desired)
            .await?;

        let outcome = CriteriaSyncOutcome::new(event.criteria.ids(), desired);
        debug!(
            event_id = %event.id,
            kind = %kind,
            added = ?outcome.added,
            removed = ?outcome.removed,
            "planned criteria sync"
        );
        Ok(CriteriaPlan {
            outcome,
            criteria: Criteria::of_kind(kind, desired.iter().copied()),
        })
    }

    /// Replace the event's criteria with `desired`.
    ///
    /// An empty set clears the criteria. Skills are expected for standard
    /// evaluations and metrics for self-assessments.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn sync_criteria(
        &self,
        event_id: EventId,
        desired: impl IntoIterator<Item = CriterionId>,
        expected_version: Option<u64>,
    ) -> Result<CriteriaSyncOutcome> {
        let desired: BTreeSet<CriterionId> = desired.into_iter().collect();
        let result = self.sync_inner(event_id, &desired, expected_version).await;
        if let Err(err) = &result {
            METRICS.inc_rejected_writes();
            obs::emit_operation_rejected("sync_criteria", Some(&event_id), err);
        }
        result
    }

    async fn sync_inner(
        &self,
        event_id: EventId,
        desired: &BTreeSet<CriterionId>,
        expected_version: Option<u64>,
    ) -> Result<CriteriaSyncOutcome> {
        let event = self.store.get_event(event_id).await?;
        check_version(&event, expected_version)?;
        if event.is_locked() {
            return Err(EvaluationError::LockedEvent(event_id.to_string()));
        }

        let plan = self.plan(&event, desired).await?;
        if plan.outcome.is_noop() {
            return Ok(plan.outcome);
        }

        let mut change = EventChange::new(event_id);
        change.expected_version = Some(event.version);
        change.lock_scope = self.config.lock_scope;
        change.criteria = Some(plan.criteria);
        self.store.apply_change(change).await?;

        METRICS.inc_criteria_syncs();
        obs::emit_criteria_synced(
            &event_id,
            plan.outcome.added.len(),
            plan.outcome.removed.len(),
            plan.outcome.kept.len(),
        );
        Ok(plan.outcome)
    }
}
