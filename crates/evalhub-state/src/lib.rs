//! evalhub-state: persistence for evaluation events
//!
//! Owns every durable row of the evaluation domain: events with their
//! subject and criteria sets, evaluator assignments, and per-cell results.
//!
//! ## Key Components
//!
//! - `EventStore`: the async persistence seam used by `evalhub-core`
//! - `SurrealEventStore`: SurrealDB implementation (memory, SurrealKV or cloud)
//! - `MemoryEventStore`: in-memory fake with the same contract
//! - `SurrealHandle`: connection management and schema migrations

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
pub mod model;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use fakes::MemoryEventStore;
pub use handle::{CloudConfig, SurrealHandle};
pub use model::{
    AssignmentStatus, Criteria, CriterionId, CriterionKind, EvaluationResult,
    EvaluatorAssignment, Event, EventFlags, EventId, EventMode, GroupId, ResultId, ResultKey,
    ResultValues, SubjectId, TeamId, UserId,
};
pub use storage_traits::{
    AssignmentDelta, EventChange, EventStore, LockScope, NewEvent, NoteWrite, ResultFilter,
    ResultUpsert, ScalarChanges, StorageResult,
};
pub use surreal_store::SurrealEventStore;

/// Result type for evalhub-state operations
pub type Result<T> = std::result::Result<T, StateError>;
