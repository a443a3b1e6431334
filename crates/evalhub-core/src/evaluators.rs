//! Evaluator Assignment Manager
//!
//! Owns the evaluator status machine and evaluator-set reconciliation.
//! Membership changes are computed as a plan against one read of the event
//! and committed with that read's version, so a concurrent writer surfaces
//! as `StaleWrite` instead of a lost update.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use evalhub_state::{
    AssignmentDelta, AssignmentStatus, EvaluatorAssignment, Event, EventChange, EventId,
    EventMode, EventStore, UserId,
};
use tracing::{debug, instrument};

use crate::config::{EvaluationConfig, TransitionPolicy};
use crate::directory::Directory;
use crate::error::{EvaluationError, ReferenceKind, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::reconcile::{reconcile, SyncOutcome};

/// Where added evaluator ids come from, which decides how they are validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvaluatorSource {
    /// Caller-supplied ids, checked against the identity reader
    Caller,
    /// Role members read from the roster, already known to exist
    RoleMembership,
}

/// A validated membership change that has not been committed yet.
#[derive(Debug, Clone)]
pub(crate) struct EvaluatorPlan {
    pub outcome: SyncOutcome<UserId>,
    pub delta: AssignmentDelta,
}

#[derive(Clone)]
pub struct EvaluatorAssignmentManager {
    store: Arc<dyn EventStore>,
    directory: Directory,
    config: EvaluationConfig,
}

impl EvaluatorAssignmentManager {
    pub fn new(store: Arc<dyn EventStore>, directory: Directory, config: EvaluationConfig) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    /// Diff the current assignments against `desired` and validate additions.
    pub(crate) async fn plan(
        &self,
        event: &Event,
        current: &[EvaluatorAssignment],
        desired: &BTreeSet<UserId>,
        source: EvaluatorSource,
        send_invites: bool,
    ) -> Result<EvaluatorPlan> {
        let outcome = reconcile(
            current.iter().map(|a| a.evaluator_id),
            desired.iter().copied(),
        );

        if source == EvaluatorSource::Caller {
            let added: BTreeSet<UserId> = outcome.added.iter().copied().collect();
            self.directory.require_identities(&added).await?;
        }

        let now = Utc::now();
        let delta = AssignmentDelta {
            remove: outcome.removed.clone(),
            add: outcome
                .added
                .iter()
                .map(|evaluator| EvaluatorAssignment::invited(event.id, *evaluator, send_invites, now))
                .collect(),
        };

        debug!(
            event_id = %event.id,
            added = ?outcome.added,
            removed = ?outcome.removed,
            "planned evaluator sync"
        );
        Ok(EvaluatorPlan { outcome, delta })
    }

    /// Make the event's evaluator set equal `desired`.
    ///
    /// Removed evaluators lose their assignment row, added ones get a fresh
    /// `Invited` row. Re-running with the same set reports everything as kept.
    /// Self-assessments are rejected with `InvalidReference`; their evaluators
    /// are refreshed from role membership by `update`.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn sync_evaluators(
        &self,
        event_id: EventId,
        desired: impl IntoIterator<Item = UserId>,
        expected_version: Option<u64>,
    ) -> Result<SyncOutcome<UserId>> {
        let desired: BTreeSet<UserId> = desired.into_iter().collect();
        let result = self.sync_inner(event_id, &desired, expected_version).await;
        if let Err(err) = &result {
            METRICS.inc_rejected_writes();
            obs::emit_operation_rejected("sync_evaluators", Some(&event_id), err);
        }
        result
    }

    async fn sync_inner(
        &self,
        event_id: EventId,
        desired: &BTreeSet<UserId>,
        expected_version: Option<u64>,
    ) -> Result<SyncOutcome<UserId>> {
        let event = self.store.get_event(event_id).await?;
        check_version(&event, expected_version)?;
        if event.is_locked() {
            return Err(EvaluationError::LockedEvent(event_id.to_string()));
        }
        match event.mode {
            EventMode::StandardEvaluation => {}
            EventMode::SelfAssessment => {
                return Err(EvaluationError::InvalidReference(format!(
                    "self-assessment {event_id} takes its evaluators from the group's Evaluator role"
                )));
            }
        }

        let current = self.store.list_assignments(event_id).await?;
        let plan = self
            .plan(
                &event,
                &current,
                desired,
                EvaluatorSource::Caller,
                event.flags.send_invites,
            )
            .await?;

        if plan.outcome.is_noop() {
            return Ok(plan.outcome);
        }

        let mut change = EventChange::new(event_id);
        change.expected_version = Some(event.version);
        change.lock_scope = self.config.lock_scope;
        change.assignments = plan.delta;
        let committed = self.store.apply_change(change).await?;

        METRICS.inc_evaluator_syncs();
        obs::emit_evaluators_synced(
            &event_id,
            plan.outcome.added.len(),
            plan.outcome.removed.len(),
            plan.outcome.kept.len(),
        );
        notify_added(&self.directory, &committed, &plan.outcome.added);

        Ok(plan.outcome)
    }

    /// Write an evaluator's status and stamp the matching timestamp.
    ///
    /// Allowed on locked events. Under [`TransitionPolicy::Strict`] only the
    /// lifecycle edges (and rewriting the current status) are accepted.
    #[instrument(skip_all, fields(event_id = %event_id, evaluator_id = %evaluator_id, status = %status))]
    pub async fn update_status(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        status: AssignmentStatus,
    ) -> Result<EvaluatorAssignment> {
        let result = self.update_status_inner(event_id, evaluator_id, status).await;
        match &result {
            Ok(_) => obs::emit_status_changed(&event_id, evaluator_id, status),
            Err(err) => obs::emit_operation_rejected("update_status", Some(&event_id), err),
        }
        result
    }

    async fn update_status_inner(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        status: AssignmentStatus,
    ) -> Result<EvaluatorAssignment> {
        if self.config.transition_policy == TransitionPolicy::Strict {
            let current = self
                .store
                .list_assignments(event_id)
                .await?
                .into_iter()
                .find(|a| a.evaluator_id == evaluator_id)
                .ok_or_else(|| EvaluationError::not_found(ReferenceKind::Assignment, [evaluator_id]))?;

            if current.status != status && !current.status.can_transition_to(status) {
                return Err(EvaluationError::InvalidTransition {
                    from: current.status,
                    to: status,
                });
            }
        }

        Ok(self
            .store
            .set_assignment_status(event_id, evaluator_id, status, Utc::now())
            .await?)
    }

    /// Assignments of an event, ordered by evaluator id.
    pub async fn list(&self, event_id: EventId) -> Result<Vec<EvaluatorAssignment>> {
        Ok(self.store.list_assignments(event_id).await?)
    }
}

/// Fail with `StaleWrite` when the caller saw an older version.
pub(crate) fn check_version(event: &Event, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(expected) if expected != event.version => Err(EvaluationError::StaleWrite {
            event_id: event.id.to_string(),
            expected,
            actual: event.version,
        }),
        _ => Ok(()),
    }
}

/// Raise the invitation trigger for newly added evaluators, if the event sends invites.
pub(crate) fn notify_added(directory: &Directory, event: &Event, added: &[UserId]) {
    if event.flags.send_invites && !added.is_empty() {
        directory.notifier.invitations_sent(event, added);
    }
}
