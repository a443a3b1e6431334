//! evalhub-core: evaluation event domain logic
//!
//! Scheduling, evaluator and criteria reconciliation, result recording and
//! progress tracking on top of the `evalhub-state` persistence layer.
//!
//! ## Key Components
//!
//! - `EventLifecycleController`: create/update/delete/lock, branching on event mode
//! - `EvaluatorAssignmentManager`: evaluator status machine and set sync
//! - `CriteriaAssignmentManager`: skill/metric set sync
//! - `ResultRecorder`: upsert-by-key results and the note sub-API
//! - `ProgressCalculator`: per-evaluator completion
//! - `Directory`: read-only roster, catalog and identity collaborators

pub mod config;
pub mod criteria;
pub mod directory;
pub mod error;
pub mod evaluators;
pub mod lifecycle;
pub mod metrics;
pub mod obs;
pub mod progress;
pub mod reconcile;
pub mod results;
pub mod telemetry;

pub use config::{EvaluationConfig, ProgressCounting, TransitionPolicy};
pub use criteria::CriteriaAssignmentManager;
pub use directory::{
    CatalogEntry, CatalogReader, Directory, DirectoryError, IdentityReader, InvitationNotifier,
    RosterReader, TracingNotifier,
};
pub use error::{EvaluationError, ReferenceKind, Result};
pub use evaluators::EvaluatorAssignmentManager;
pub use lifecycle::{EventLifecycleController, EventPatch, EventSpec};
pub use progress::{EvaluatorProgress, ProgressCalculator};
pub use reconcile::{reconcile, CriteriaSyncOutcome, SyncOutcome};
pub use results::{ResultInput, ResultRecorder};

pub use evalhub_state::{
    AssignmentStatus, Criteria, CriterionId, CriterionKind, EvaluationResult,
    EvaluatorAssignment, Event, EventFlags, EventId, EventMode, GroupId, LockScope, ResultFilter,
    ResultId, ResultValues, SubjectId, TeamId, UserId,
};
