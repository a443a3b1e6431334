//! Error types for evalhub-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by [`crate::storage_traits::EventStore`] implementations.
///
/// Every variant describes a whole-operation failure: a store never applies
/// part of a change before returning one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("event not found: {event_id}")]
    EventNotFound { event_id: String },

    #[error("event {event_id} is locked")]
    EventLocked { event_id: String },

    #[error("event {event_id} changed concurrently: expected version {expected}, found {actual}")]
    VersionMismatch {
        event_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("no assignment for evaluator {evaluator_id} on event {event_id}")]
    AssignmentNotFound { event_id: String, evaluator_id: i64 },

    #[error("result {result_id} not found on event {event_id}")]
    ResultNotFound { event_id: String, result_id: String },

    #[error("note conflict on result {result_id}: {reason}")]
    NoteConflict { result_id: String, reason: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
