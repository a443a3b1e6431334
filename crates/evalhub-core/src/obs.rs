//! Structured observability hooks for evaluation lifecycle events.
//!
//! This module provides:
//! - Event-scoped tracing spans via the `EventSpan` RAII guard
//! - Emission functions for committed changes (created, updated, synced, recorded, ...)
//!
//! Events are emitted at `info!` level; rejected operations at `warn!`.
//! Use `telemetry::init_tracing(true, ..)` for JSON output.

use evalhub_state::{AssignmentStatus, EventId, EventMode, GroupId, ResultId, UserId};
use tracing::{info, warn};

/// RAII guard that enters an event-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = EventSpan::enter(&event_id);
/// // every log line now carries event_id
/// ```
pub struct EventSpan {
    _span: tracing::span::EnteredSpan,
}

impl EventSpan {
    pub fn enter(event_id: &EventId) -> Self {
        Self {
            _span: event_span(event_id).entered(),
        }
    }
}

/// The event-scoped span, for attaching to futures with `Instrument`.
pub fn event_span(event_id: &EventId) -> tracing::Span {
    tracing::info_span!("evalhub.event", event_id = %event_id)
}

/// Emit event: evaluation event created.
///
/// # Example
///
/// ```ignore
/// emit_event_created(&id, GroupId(1), EventMode::SelfAssessment, 12, 4, 3);
/// // logs: event=evaluation.created event_id=... mode=self_assessment evaluators=3
/// ```
pub fn emit_event_created(
    event_id: &EventId,
    group_id: GroupId,
    mode: EventMode,
    subjects: usize,
    criteria: usize,
    evaluators: usize,
) {
    info!(
        event = "evaluation.created",
        event_id = %event_id,
        group_id = %group_id,
        mode = %mode,
        subjects = subjects,
        criteria = criteria,
        evaluators = evaluators,
    );
}

pub fn emit_event_updated(event_id: &EventId, version: u64, actor: UserId) {
    info!(event = "evaluation.updated", event_id = %event_id, version = version, actor = %actor);
}

pub fn emit_event_deleted(event_id: &EventId) {
    info!(event = "evaluation.deleted", event_id = %event_id);
}

pub fn emit_lock_changed(event_id: &EventId, locked: bool, version: u64) {
    info!(event = "evaluation.lock_changed", event_id = %event_id, locked = locked, version = version);
}

/// Emit event: evaluator membership reconciled.
pub fn emit_evaluators_synced(event_id: &EventId, added: usize, removed: usize, kept: usize) {
    info!(
        event = "evaluation.evaluators_synced",
        event_id = %event_id,
        added = added,
        removed = removed,
        kept = kept,
    );
}

/// Emit event: criteria set reconciled.
pub fn emit_criteria_synced(event_id: &EventId, added: usize, removed: usize, kept: usize) {
    info!(
        event = "evaluation.criteria_synced",
        event_id = %event_id,
        added = added,
        removed = removed,
        kept = kept,
    );
}

pub fn emit_status_changed(event_id: &EventId, evaluator_id: UserId, status: AssignmentStatus) {
    info!(
        event = "evaluation.status_changed",
        event_id = %event_id,
        evaluator_id = %evaluator_id,
        status = %status,
    );
}

pub fn emit_results_recorded(event_id: &EventId, evaluator_id: UserId, rows: usize) {
    info!(
        event = "evaluation.results_recorded",
        event_id = %event_id,
        evaluator_id = %evaluator_id,
        rows = rows,
    );
}

pub fn emit_note_changed(event_id: &EventId, result_id: &ResultId, action: &str) {
    info!(
        event = "evaluation.note_changed",
        event_id = %event_id,
        result_id = %result_id,
        action = action,
    );
}

pub fn emit_invitations_sent(event_id: &EventId, evaluators: usize) {
    info!(event = "evaluation.invitations_sent", event_id = %event_id, evaluators = evaluators);
}

/// Emit event: operation rejected (warning level).
pub fn emit_operation_rejected(operation: &str, event_id: Option<&EventId>, error: &crate::EvaluationError) {
    match event_id {
        Some(id) => warn!(
            event = "evaluation.rejected",
            operation = operation,
            event_id = %id,
            code = error.code(),
            error = %error,
        ),
        None => warn!(
            event = "evaluation.rejected",
            operation = operation,
            code = error.code(),
            error = %error,
        ),
    }
}
