//! Storage trait definitions for evaluation events
//!
//! `EventStore` is the single persistence seam. Every write method is one
//! atomic unit: either the whole change commits or nothing does, and the
//! store itself re-checks existence, lock state and optimistic version
//! inside that unit.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::model::{
    AssignmentStatus, Criteria, CriterionId, EvaluationResult, EvaluatorAssignment, Event,
    EventFlags, EventId, EventMode, GroupId, ResultId, ResultValues, SubjectId, TeamId, UserId,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Write commands
// ---------------------------------------------------------------------------

/// A fully validated event ready to be inserted together with its assignments.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub id: EventId,
    pub name: String,
    pub mode: EventMode,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub group_id: GroupId,
    pub team_id: Option<TeamId>,
    pub flags: EventFlags,
    pub subjects: BTreeSet<SubjectId>,
    pub criteria: Criteria,
    pub created_by: UserId,
    pub assignments: Vec<EvaluatorAssignment>,
}

impl NewEvent {
    /// Materialize the stored aggregate (version 1).
    pub fn to_event(&self, now: DateTime<Utc>) -> Event {
        Event {
            id: self.id,
            name: self.name.clone(),
            mode: self.mode,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            group_id: self.group_id,
            team_id: self.team_id,
            flags: self.flags,
            subjects: self.subjects.clone(),
            criteria: self.criteria.clone(),
            created_by: self.created_by,
            updated_by: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Scalar (non-relationship) fields of an event; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarChanges {
    pub name: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// `Some(None)` clears the team
    pub team_id: Option<Option<TeamId>>,
    pub hide_subject_names: Option<bool>,
    pub hide_preferred_positions: Option<bool>,
    pub send_invites: Option<bool>,
    pub active: Option<bool>,
}

impl ScalarChanges {
    pub fn is_empty(&self) -> bool {
        *self == ScalarChanges::default()
    }

    /// Apply the present fields to an event.
    pub fn apply_to(&self, event: &mut Event) {
        if let Some(name) = &self.name {
            event.name = name.clone();
        }
        if let Some(starts_at) = self.starts_at {
            event.starts_at = starts_at;
        }
        if let Some(ends_at) = self.ends_at {
            event.ends_at = ends_at;
        }
        if let Some(team_id) = self.team_id {
            event.team_id = team_id;
        }
        if let Some(v) = self.hide_subject_names {
            event.flags.hide_subject_names = v;
        }
        if let Some(v) = self.hide_preferred_positions {
            event.flags.hide_preferred_positions = v;
        }
        if let Some(v) = self.send_invites {
            event.flags.send_invites = v;
        }
        if let Some(v) = self.active {
            event.flags.active = v;
        }
    }
}

/// Membership delta for evaluator assignments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentDelta {
    /// Evaluators whose assignment rows are hard-deleted
    pub remove: Vec<UserId>,
    /// New `Invited` rows
    pub add: Vec<EvaluatorAssignment>,
}

impl AssignmentDelta {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

/// Which parts of a locked event are frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// Subjects, criteria and evaluator membership only
    #[default]
    Relationships,
    /// Every field except the lock flag itself
    AllFields,
}

/// One atomic change to an existing event.
#[derive(Debug, Clone, Default)]
pub struct EventChange {
    pub event_id: EventId,
    /// Commit only if the stored version still equals this
    pub expected_version: Option<u64>,
    pub lock_scope: LockScope,
    pub actor: Option<UserId>,
    pub scalars: ScalarChanges,
    /// Replace the subject set
    pub subjects: Option<BTreeSet<SubjectId>>,
    /// Replace the criteria set
    pub criteria: Option<Criteria>,
    pub assignments: AssignmentDelta,
}

impl EventChange {
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            ..Default::default()
        }
    }

    /// Whether the change touches a lock-protected relationship.
    pub fn touches_relationships(&self) -> bool {
        self.subjects.is_some() || self.criteria.is_some() || !self.assignments.is_empty()
    }

    /// Whether the stored event's lock forbids this change.
    pub fn blocked_by_lock(&self) -> bool {
        self.touches_relationships()
            || (self.lock_scope == LockScope::AllFields && !self.scalars.is_empty())
    }
}

/// One row of a result submission after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultUpsert {
    pub subject_id: SubjectId,
    pub criterion_id: CriterionId,
    pub values: ResultValues,
    pub note: Option<String>,
    /// Id used only when the key does not exist yet
    pub new_id: ResultId,
}

/// AND-composed optional filters for result reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFilter {
    pub subject_id: Option<SubjectId>,
    pub evaluator_id: Option<UserId>,
    pub criterion_id: Option<CriterionId>,
}

impl ResultFilter {
    pub fn matches(&self, result: &EvaluationResult) -> bool {
        self.subject_id.map_or(true, |s| result.subject_id == s)
            && self.evaluator_id.map_or(true, |e| result.evaluator_id == e)
            && self.criterion_id.map_or(true, |c| result.criterion_id == c)
    }
}

/// Note edits with their guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteWrite {
    /// Fails if a non-empty note already exists
    Add(String),
    /// Fails if no note exists
    Replace(String),
    /// Clears the note; the result row stays
    Clear,
}

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

/// Event aggregate persistence.
///
/// Guarantees:
/// - Each write is all-or-nothing.
/// - A change touching subjects, criteria or assignment membership on a
///   locked event fails with `EventLocked`; `set_locked` always succeeds.
/// - `expected_version` mismatches fail with `VersionMismatch`. Result
///   upserts do not bump the event version.
/// - Results are unique per (event, subject, evaluator, criterion); writing an
///   existing key updates it in place.
/// - `delete_event` cascades to assignments and results.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert an event and its initial assignments.
    async fn create_event(&self, event: NewEvent) -> StorageResult<Event>;

    /// Fetch an event by id.
    async fn get_event(&self, event_id: EventId) -> StorageResult<Event>;

    /// List the events of a group, oldest first.
    async fn list_events(&self, group_id: GroupId) -> StorageResult<Vec<Event>>;

    /// Apply a change to an existing event and return the committed event.
    async fn apply_change(&self, change: EventChange) -> StorageResult<Event>;

    /// Set the lock flag. Always permitted.
    async fn set_locked(&self, event_id: EventId, locked: bool) -> StorageResult<Event>;

    /// Delete an unlocked event with its assignments and results.
    async fn delete_event(&self, event_id: EventId) -> StorageResult<()>;

    /// Assignments of an event, ordered by evaluator id.
    async fn list_assignments(&self, event_id: EventId)
        -> StorageResult<Vec<EvaluatorAssignment>>;

    /// Write an assignment status and stamp its timestamp.
    async fn set_assignment_status(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        status: AssignmentStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<EvaluatorAssignment>;

    /// Insert or update results for one evaluator. Returns the stored rows
    /// in input order (one entry per distinct key).
    ///
    /// With `expected_version`, nothing is written unless the event is still
    /// at that version, so rows validated against an older subject, criteria
    /// or evaluator set fail with `VersionMismatch`.
    async fn upsert_results(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        expected_version: Option<u64>,
        rows: Vec<ResultUpsert>,
    ) -> StorageResult<Vec<EvaluationResult>>;

    /// Results of an event matching the filter.
    async fn list_results(
        &self,
        event_id: EventId,
        filter: ResultFilter,
    ) -> StorageResult<Vec<EvaluationResult>>;

    /// Edit the note of one evaluator's result.
    async fn write_note(
        &self,
        event_id: EventId,
        result_id: ResultId,
        evaluator_id: UserId,
        write: NoteWrite,
    ) -> StorageResult<EvaluationResult>;
}
