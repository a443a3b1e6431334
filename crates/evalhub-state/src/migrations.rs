//! SurrealDB schema migrations and initialization
//!
//! This module provides initialization functions to set up all tables
//! with their uniqueness constraints and lookup indexes.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all evalhub tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing evalhub SurrealDB schema");

    init_events_table(db).await?;
    init_assignments_table(db).await?;
    init_results_table(db).await?;

    info!("evalhub schema initialization complete");
    Ok(())
}

/// Initialize `events` table
///
/// Schema:
/// ```text
/// TABLE events {
///   event_id:        STRING (unique)
///   name:            STRING
///   mode:            STRING (enum: standard_evaluation | self_assessment)
///   starts_at:       DATETIME
///   ends_at:         DATETIME
///   group_id:        INT (indexed)
///   team_id:         INT?
///   hide_subject_names, hide_preferred_positions, send_invites, active, locked: BOOL
///   subjects:        ARRAY<INT>
///   criteria_kind:   STRING (enum: skill | metric)
///   criteria:        ARRAY<INT>
///   created_by:      INT
///   updated_by:      INT?
///   version:         INT (optimistic concurrency counter)
///   created_at:      DATETIME
///   updated_at:      DATETIME
/// }
/// ```
///
/// Constraints:
/// - `criteria_kind` follows `mode` (enforced via app logic)
/// - subjects/criteria/assignments are frozen while `locked` (enforced in
///   the write transactions)
async fn init_events_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing events table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS events SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_event_id ON TABLE events COLUMNS event_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_event_group ON TABLE events COLUMNS group_id;
        DEFINE INDEX IF NOT EXISTS idx_event_group_created_at ON TABLE events COLUMNS group_id, created_at;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ events table initialized");
    Ok(())
}

/// Initialize `assignments` table
///
/// Schema:
/// ```text
/// TABLE assignments {
///   event_id:            STRING (foreign key to events.event_id)
///   evaluator_id:        INT
///   status:              STRING (enum: invited | accepted | declined | completed)
///   invited_at:          DATETIME
///   invitation_sent_at:  DATETIME?
///   accepted_at:         DATETIME?
///   declined_at:         DATETIME?
///   completed_at:        DATETIME?
/// }
/// ```
///
/// Constraints:
/// - `(event_id, evaluator_id)` is unique
async fn init_assignments_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing assignments table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS assignments SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_assignment_key ON TABLE assignments COLUMNS event_id, evaluator_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_assignment_event ON TABLE assignments COLUMNS event_id;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ assignments table initialized");
    Ok(())
}

/// Initialize `results` table
///
/// Schema:
/// ```text
/// TABLE results {
///   id:            [event_id, subject_id, evaluator_id, criterion_id]
///   result_id:     STRING (stable public id, unique)
///   event_id:      STRING
///   subject_id:    INT
///   evaluator_id:  INT
///   criterion_id:  INT
///   score:         FLOAT?
///   comment:       STRING?
///   choice:        STRING?
///   attempt:       INT?
///   note:          STRING?
///   created_at:    DATETIME
///   updated_at:    DATETIME
/// }
/// ```
///
/// Constraints:
/// - The record id is the unique key, so `UPSERT` on it updates in place
///   instead of inserting a duplicate.
async fn init_results_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing results table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS results SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_result_id ON TABLE results COLUMNS result_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_result_key ON TABLE results COLUMNS event_id, subject_id, evaluator_id, criterion_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_result_event_evaluator ON TABLE results COLUMNS event_id, evaluator_id;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ results table initialized");
    Ok(())
}
