//! Domain records for evaluation events
//!
//! - `Event`: the aggregate root (schedule, flags, subjects, criteria)
//! - `EvaluatorAssignment`: one evaluator's membership and status on an event
//! - `EvaluationResult`: one scored cell keyed by (event, subject, evaluator, criterion)
//!
//! Identifiers owned by external systems (groups, teams, subjects, users,
//! catalog criteria) are integer newtypes; identifiers minted here are UUIDs.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! external_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                $name(value)
            }
        }
    };
}

external_id!(
    /// Organization/group owning events, rosters and catalogs
    GroupId
);
external_id!(
    /// Team within a group
    TeamId
);
external_id!(
    /// Roster member being evaluated
    SubjectId
);
external_id!(
    /// Identity: evaluators and event creators
    UserId
);
external_id!(
    /// Skill or metric id from a group catalog
    CriterionId
);

/// Unique identifier for an evaluation event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Generate a new random EventId
    pub fn new() -> Self {
        EventId(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(EventId)
    }
}

/// Unique identifier for an evaluation result row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(pub Uuid);

impl ResultId {
    pub fn new() -> Self {
        ResultId(Uuid::new_v4())
    }
}

impl Default for ResultId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ResultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ResultId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(ResultId)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// How an event is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMode {
    /// Assigned evaluators score named subjects against skills
    StandardEvaluation,
    /// Subjects score themselves against metrics; every Evaluator-role
    /// member of the group is assigned
    SelfAssessment,
}

impl EventMode {
    /// The catalog a mode draws its criteria from
    pub fn criterion_kind(self) -> CriterionKind {
        match self {
            EventMode::StandardEvaluation => CriterionKind::Skill,
            EventMode::SelfAssessment => CriterionKind::Metric,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventMode::StandardEvaluation => "standard_evaluation",
            EventMode::SelfAssessment => "self_assessment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard_evaluation" => Some(EventMode::StandardEvaluation),
            "self_assessment" => Some(EventMode::SelfAssessment),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog a criterion id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    Skill,
    Metric,
}

impl CriterionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CriterionKind::Skill => "skill",
            CriterionKind::Metric => "metric",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "skill" => Some(CriterionKind::Skill),
            "metric" => Some(CriterionKind::Metric),
            _ => None,
        }
    }
}

impl std::fmt::Display for CriterionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Criteria in scope for an event: skills or metrics, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum Criteria {
    Skills(BTreeSet<CriterionId>),
    Metrics(BTreeSet<CriterionId>),
}

impl Criteria {
    /// Build criteria of the given kind from a list of ids.
    pub fn of_kind(kind: CriterionKind, ids: impl IntoIterator<Item = CriterionId>) -> Self {
        let ids = ids.into_iter().collect();
        match kind {
            CriterionKind::Skill => Criteria::Skills(ids),
            CriterionKind::Metric => Criteria::Metrics(ids),
        }
    }

    /// Empty criteria for an event mode.
    pub fn empty_for(mode: EventMode) -> Self {
        Self::of_kind(mode.criterion_kind(), [])
    }

    pub fn kind(&self) -> CriterionKind {
        match self {
            Criteria::Skills(_) => CriterionKind::Skill,
            Criteria::Metrics(_) => CriterionKind::Metric,
        }
    }

    pub fn ids(&self) -> &BTreeSet<CriterionId> {
        match self {
            Criteria::Skills(ids) | Criteria::Metrics(ids) => ids,
        }
    }

    pub fn contains(&self, id: CriterionId) -> bool {
        self.ids().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }
}

/// Boolean switches on an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventFlags {
    pub hide_subject_names: bool,
    pub hide_preferred_positions: bool,
    pub send_invites: bool,
    pub active: bool,
    /// Freezes subjects, criteria and evaluator membership
    pub locked: bool,
}

/// The evaluation event aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
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
    pub updated_by: Option<UserId>,
    /// Optimistic concurrency counter, bumped by every committed change
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_locked(&self) -> bool {
        self.flags.locked
    }

    /// Number of (subject, criterion) cells each evaluator is expected to score
    pub fn expected_cells(&self) -> u64 {
        (self.subjects.len() * self.criteria.len()) as u64
    }
}

// ---------------------------------------------------------------------------
// EvaluatorAssignment
// ---------------------------------------------------------------------------

/// Status of an evaluator on an event.
///
/// Lifecycle: `Invited → Accepted → Completed`, `Invited → Declined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Invited,
    Accepted,
    Declined,
    Completed,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Invited => "invited",
            AssignmentStatus::Accepted => "accepted",
            AssignmentStatus::Declined => "declined",
            AssignmentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invited" => Some(AssignmentStatus::Invited),
            "accepted" => Some(AssignmentStatus::Accepted),
            "declined" => Some(AssignmentStatus::Declined),
            "completed" => Some(AssignmentStatus::Completed),
            _ => None,
        }
    }

    /// Whether `self → next` is one of the lifecycle edges.
    pub fn can_transition_to(self, next: AssignmentStatus) -> bool {
        use AssignmentStatus::*;
        matches!(
            (self, next),
            (Invited, Accepted) | (Accepted, Completed) | (Invited, Declined)
        )
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One evaluator's membership on an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorAssignment {
    pub event_id: EventId,
    pub evaluator_id: UserId,
    pub status: AssignmentStatus,
    pub invited_at: DateTime<Utc>,
    pub invitation_sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EvaluatorAssignment {
    /// A fresh `Invited` assignment.
    pub fn invited(
        event_id: EventId,
        evaluator_id: UserId,
        send_invites: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            evaluator_id,
            status: AssignmentStatus::Invited,
            invited_at: now,
            invitation_sent_at: send_invites.then_some(now),
            accepted_at: None,
            declined_at: None,
            completed_at: None,
        }
    }

    /// Write `status` and stamp the timestamp belonging to it.
    pub fn apply_status(&mut self, status: AssignmentStatus, at: DateTime<Utc>) {
        self.status = status;
        match status {
            AssignmentStatus::Invited => self.invited_at = at,
            AssignmentStatus::Accepted => self.accepted_at = Some(at),
            AssignmentStatus::Declined => self.declined_at = Some(at),
            AssignmentStatus::Completed => self.completed_at = Some(at),
        }
    }
}

// ---------------------------------------------------------------------------
// EvaluationResult
// ---------------------------------------------------------------------------

/// Score fields of a result. Which ones are used depends on the criterion's
/// scoring type; absent fields are `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultValues {
    pub score: Option<f64>,
    pub comment: Option<String>,
    pub choice: Option<String>,
    pub attempt: Option<u32>,
}

impl ResultValues {
    /// Overwrite the fields present in `patch`, keep the rest.
    pub fn merge(&mut self, patch: &ResultValues) {
        if let Some(score) = patch.score {
            self.score = Some(score);
        }
        if let Some(comment) = &patch.comment {
            self.comment = Some(comment.clone());
        }
        if let Some(choice) = &patch.choice {
            self.choice = Some(choice.clone());
        }
        if let Some(attempt) = patch.attempt {
            self.attempt = Some(attempt);
        }
    }
}

/// Uniqueness key of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub event_id: EventId,
    pub subject_id: SubjectId,
    pub evaluator_id: UserId,
    pub criterion_id: CriterionId,
}

/// A recorded score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: ResultId,
    pub event_id: EventId,
    pub subject_id: SubjectId,
    pub evaluator_id: UserId,
    pub criterion_id: CriterionId,
    pub values: ResultValues,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvaluationResult {
    pub fn key(&self) -> ResultKey {
        ResultKey {
            event_id: self.event_id,
            subject_id: self.subject_id,
            evaluator_id: self.evaluator_id,
            criterion_id: self.criterion_id,
        }
    }

    /// True when a non-empty note is attached
    pub fn has_note(&self) -> bool {
        self.note.as_deref().is_some_and(|n| !n.is_empty())
    }
}
