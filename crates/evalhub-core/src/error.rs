//! Error taxonomy for evaluation operations

use std::fmt;

use evalhub_state::{AssignmentStatus, StorageError};
use thiserror::Error;

use crate::directory::DirectoryError;

/// The kind of entity a `NotFound` error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Group,
    Team,
    Event,
    Subject,
    Skill,
    Metric,
    Evaluator,
    Assignment,
    Result,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceKind::Group => "group",
            ReferenceKind::Team => "team",
            ReferenceKind::Event => "event",
            ReferenceKind::Subject => "subject",
            ReferenceKind::Skill => "skill",
            ReferenceKind::Metric => "metric",
            ReferenceKind::Evaluator => "evaluator",
            ReferenceKind::Assignment => "assignment",
            ReferenceKind::Result => "result",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum EvaluationError {
    /// One or more referenced ids do not resolve. `ids` lists every missing id.
    #[error("{kind} not found: {}", .ids.join(", "))]
    NotFound { kind: ReferenceKind, ids: Vec<String> },

    #[error("event {0} is locked")]
    LockedEvent(String),

    /// A reference resolves, but to the wrong kind of entity for this event
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("event {event_id} was modified concurrently: expected version {expected}, found {actual}")]
    StaleWrite {
        event_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("assignment cannot move from {from} to {to}")]
    InvalidTransition {
        from: AssignmentStatus,
        to: AssignmentStatus,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EvaluationError {
    /// Build a `NotFound` from any displayable ids.
    pub fn not_found<I, T>(kind: ReferenceKind, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        EvaluationError::NotFound {
            kind,
            ids: ids.into_iter().map(|id| id.to_string()).collect(),
        }
    }

    /// Stable short name, used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            EvaluationError::NotFound { .. } => "not_found",
            EvaluationError::LockedEvent(_) => "locked_event",
            EvaluationError::InvalidReference(_) => "invalid_reference",
            EvaluationError::Conflict(_) => "conflict",
            EvaluationError::StaleWrite { .. } => "stale_write",
            EvaluationError::InvalidTransition { .. } => "invalid_transition",
            EvaluationError::InvalidInput(_) => "invalid_input",
            EvaluationError::Directory(_) => "directory",
            EvaluationError::Storage(_) => "storage",
        }
    }
}

impl From<StorageError> for EvaluationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::EventNotFound { event_id } => {
                EvaluationError::not_found(ReferenceKind::Event, [event_id])
            }
            StorageError::EventLocked { event_id } => EvaluationError::LockedEvent(event_id),
            StorageError::VersionMismatch {
                event_id,
                expected,
                actual,
            } => EvaluationError::StaleWrite {
                event_id,
                expected,
                actual,
            },
            StorageError::AssignmentNotFound { evaluator_id, .. } => {
                EvaluationError::not_found(ReferenceKind::Assignment, [evaluator_id])
            }
            StorageError::ResultNotFound { result_id, .. } => {
                EvaluationError::not_found(ReferenceKind::Result, [result_id])
            }
            StorageError::NoteConflict { result_id, reason } => {
                EvaluationError::Conflict(format!("result {result_id}: {reason}"))
            }
            StorageError::Backend(msg) => EvaluationError::Storage(msg),
        }
    }
}

/// Result type for evaluation operations
pub type Result<T> = std::result::Result<T, EvaluationError>;
