//! SurrealDB-backed EventStore implementation
//!
//! Uses the `schema` rows for persistence, converting to/from `model` types
//! at the boundary. Every multi-statement write runs inside one
//! `BEGIN TRANSACTION … COMMIT TRANSACTION` block whose guards `THROW` a
//! marker string; the marker is mapped back to a `StorageError` here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::{Response, Surreal};
use tracing::{debug, info, instrument, warn};

use crate::error::StorageError;
use crate::fakes::apply_note_write;
use crate::model::*;
use crate::schema::{AssignmentRow, EventRow, EventRowPatch, ResultRow, ResultUpsertRow};
use crate::storage_traits::*;
use crate::SurrealHandle;

const EVENT_NOT_FOUND: &str = "evalhub:event_not_found";
const EVENT_LOCKED: &str = "evalhub:event_locked";
const VERSION_MISMATCH: &str = "evalhub:version_mismatch";
const RESULT_NOT_FOUND: &str = "evalhub:result_not_found";
const NOTE_CONFLICT: &str = "evalhub:note_conflict";

/// Statements shared by every guarded transaction: load the event into
/// `$ev` and fail when it does not exist.
const LOAD_EVENT: &str = r#"
    LET $ev = (SELECT * FROM events WHERE event_id = $id)[0];
    IF $ev = NONE { THROW "evalhub:event_not_found" };
"#;

fn backend(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// SurrealDB-backed implementation of [`EventStore`].
#[derive(Clone)]
pub struct SurrealEventStore {
    handle: Arc<SurrealHandle>,
}

impl SurrealEventStore {
    pub fn new(handle: Arc<SurrealHandle>) -> Self {
        Self { handle }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let handle = SurrealHandle::setup_db().await?;
        info!("SurrealEventStore connected (in-memory)");
        Ok(Self::new(Arc::new(handle)))
    }

    fn db(&self) -> &Surreal<Any> {
        self.handle.db()
    }

    // -- private helpers -----------------------------------------------------

    /// Fetch an event row by ID, returning the DB row or EventNotFound.
    async fn fetch_event(&self, event_id: EventId) -> StorageResult<EventRow> {
        let mut res = self
            .db()
            .query("SELECT * FROM events WHERE event_id = $id")
            .bind(("id", event_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<EventRow> = res.take(0).map_err(backend)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::EventNotFound {
                event_id: event_id.to_string(),
            })
    }

    /// Map the statement errors of a finished transaction.
    ///
    /// A failed transaction reports an error for every statement; only the
    /// statement that threw carries our marker, so all of them are scanned.
    async fn check_transaction(
        &self,
        event_id: EventId,
        expected_version: Option<u64>,
        mut response: Response,
    ) -> StorageResult<Response> {
        let errors = response.take_errors();
        if errors.is_empty() {
            return Ok(response);
        }

        let messages: Vec<String> = errors.into_values().map(|e| e.to_string()).collect();
        let has = |marker: &str| messages.iter().any(|m| m.contains(marker));

        let err = if has(EVENT_NOT_FOUND) {
            StorageError::EventNotFound {
                event_id: event_id.to_string(),
            }
        } else if has(VERSION_MISMATCH) {
            let actual = self
                .fetch_event(event_id)
                .await
                .map(|row| row.version.max(0) as u64)?;
            StorageError::VersionMismatch {
                event_id: event_id.to_string(),
                expected: expected_version.unwrap_or_default(),
                actual,
            }
        } else if has(EVENT_LOCKED) {
            StorageError::EventLocked {
                event_id: event_id.to_string(),
            }
        } else {
            StorageError::Backend(messages.join("; "))
        };

        warn!(event_id = %event_id, error = %err, "transaction rejected");
        Err(err)
    }

    async fn fetch_results(
        &self,
        event_id: EventId,
        evaluator_id: Option<UserId>,
    ) -> StorageResult<Vec<EvaluationResult>> {
        let sql = if evaluator_id.is_some() {
            "SELECT * FROM results WHERE event_id = $id AND evaluator_id = $evaluator \
             ORDER BY subject_id, criterion_id, evaluator_id"
        } else {
            "SELECT * FROM results WHERE event_id = $id \
             ORDER BY subject_id, criterion_id, evaluator_id"
        };

        let mut res = self
            .db()
            .query(sql)
            .bind(("id", event_id.to_string()))
            .bind(("evaluator", evaluator_id.map(|e| e.0)))
            .await
            .map_err(backend)?;

        let rows: Vec<ResultRow> = res.take(0).map_err(backend)?;
        rows.into_iter().map(ResultRow::into_result).collect()
    }
}

#[async_trait]
impl EventStore for SurrealEventStore {
    #[instrument(skip(self, event), fields(event_id = %event.id, group_id = %event.group_id))]
    async fn create_event(&self, event: NewEvent) -> StorageResult<Event> {
        let stored = event.to_event(Utc::now());
        let row = EventRow::from_event(&stored);
        let assignments: Vec<AssignmentRow> = event
            .assignments
            .iter()
            .map(AssignmentRow::from_assignment)
            .collect();

        let mut sql = String::from("BEGIN TRANSACTION;\nCREATE events CONTENT $event;\n");
        if !assignments.is_empty() {
            sql.push_str("INSERT INTO assignments $assignments;\n");
        }
        sql.push_str("COMMIT TRANSACTION;");

        debug!(assignments = assignments.len(), "creating event");

        let response = self
            .db()
            .query(sql)
            .bind(("event", row))
            .bind(("assignments", assignments))
            .await
            .map_err(backend)?;
        self.check_transaction(stored.id, None, response).await?;

        self.get_event(stored.id).await
    }

    async fn get_event(&self, event_id: EventId) -> StorageResult<Event> {
        self.fetch_event(event_id).await?.into_event()
    }

    async fn list_events(&self, group_id: GroupId) -> StorageResult<Vec<Event>> {
        let mut res = self
            .db()
            .query("SELECT * FROM events WHERE group_id = $group ORDER BY created_at ASC")
            .bind(("group", group_id.0))
            .await
            .map_err(backend)?;

        let rows: Vec<EventRow> = res.take(0).map_err(backend)?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    #[instrument(skip(self, change), fields(event_id = %change.event_id))]
    async fn apply_change(&self, change: EventChange) -> StorageResult<Event> {
        let mut sql = String::from("BEGIN TRANSACTION;\n");
        sql.push_str(LOAD_EVENT);
        if change.expected_version.is_some() {
            sql.push_str("IF $ev.version != $expected { THROW \"evalhub:version_mismatch\" };\n");
        }
        if change.blocked_by_lock() {
            sql.push_str("IF $ev.locked { THROW \"evalhub:event_locked\" };\n");
        }
        sql.push_str("UPDATE events MERGE $patch WHERE event_id = $id;\n");
        if change.scalars.team_id == Some(None) {
            sql.push_str("UPDATE events SET team_id = NONE WHERE event_id = $id;\n");
        }
        sql.push_str(
            "UPDATE events SET version += 1, updated_at = time::now() WHERE event_id = $id;\n",
        );
        if !change.assignments.remove.is_empty() {
            sql.push_str(
                "DELETE assignments WHERE event_id = $id AND evaluator_id IN $removed;\n",
            );
        }
        if !change.assignments.add.is_empty() {
            sql.push_str("INSERT INTO assignments $added;\n");
        }
        sql.push_str("COMMIT TRANSACTION;");

        let patch = EventRowPatch::new(
            &change.scalars,
            change.subjects.as_ref(),
            change.criteria.as_ref(),
            change.actor,
        );
        let removed: Vec<i64> = change.assignments.remove.iter().map(|u| u.0).collect();
        let added: Vec<AssignmentRow> = change
            .assignments
            .add
            .iter()
            .map(AssignmentRow::from_assignment)
            .collect();

        debug!(
            removed = removed.len(),
            added = added.len(),
            relationships = change.touches_relationships(),
            "applying event change"
        );

        let response = self
            .db()
            .query(sql)
            .bind(("id", change.event_id.to_string()))
            .bind(("expected", change.expected_version.map(|v| v as i64)))
            .bind(("patch", patch))
            .bind(("removed", removed))
            .bind(("added", added))
            .await
            .map_err(backend)?;
        self.check_transaction(change.event_id, change.expected_version, response)
            .await?;

        self.get_event(change.event_id).await
    }

    #[instrument(skip(self))]
    async fn set_locked(&self, event_id: EventId, locked: bool) -> StorageResult<Event> {
        let sql = format!(
            "BEGIN TRANSACTION;\n{LOAD_EVENT}\
             UPDATE events SET locked = $locked, version += 1, updated_at = time::now() \
             WHERE event_id = $id;\nCOMMIT TRANSACTION;"
        );

        let response = self
            .db()
            .query(sql)
            .bind(("id", event_id.to_string()))
            .bind(("locked", locked))
            .await
            .map_err(backend)?;
        self.check_transaction(event_id, None, response).await?;

        self.get_event(event_id).await
    }

    #[instrument(skip(self))]
    async fn delete_event(&self, event_id: EventId) -> StorageResult<()> {
        let sql = format!(
            "BEGIN TRANSACTION;\n{LOAD_EVENT}\
             IF $ev.locked {{ THROW \"evalhub:event_locked\" }};\n\
             DELETE results WHERE event_id = $id;\n\
             DELETE assignments WHERE event_id = $id;\n\
             DELETE events WHERE event_id = $id;\n\
             COMMIT TRANSACTION;"
        );

        let response = self
            .db()
            .query(sql)
            .bind(("id", event_id.to_string()))
            .await
            .map_err(backend)?;
        self.check_transaction(event_id, None, response).await?;

        info!(event_id = %event_id, "event deleted");
        Ok(())
    }

    async fn list_assignments(
        &self,
        event_id: EventId,
    ) -> StorageResult<Vec<EvaluatorAssignment>> {
        self.fetch_event(event_id).await?;

        let mut res = self
            .db()
            .query("SELECT * FROM assignments WHERE event_id = $id ORDER BY evaluator_id ASC")
            .bind(("id", event_id.to_string()))
            .await
            .map_err(backend)?;

        let rows: Vec<AssignmentRow> = res.take(0).map_err(backend)?;
        rows.into_iter().map(AssignmentRow::into_assignment).collect()
    }

    #[instrument(skip(self, at))]
    async fn set_assignment_status(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        status: AssignmentStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<EvaluatorAssignment> {
        let stamp_field = match status {
            AssignmentStatus::Invited => "invited_at",
            AssignmentStatus::Accepted => "accepted_at",
            AssignmentStatus::Declined => "declined_at",
            AssignmentStatus::Completed => "completed_at",
        };
        let sql = format!(
            "UPDATE assignments SET status = $status, {stamp_field} = $at \
             WHERE event_id = $id AND evaluator_id = $evaluator RETURN AFTER"
        );

        let mut res = self
            .db()
            .query(sql)
            .bind(("id", event_id.to_string()))
            .bind(("evaluator", evaluator_id.0))
            .bind(("status", status.as_str().to_string()))
            .bind(("at", SurrealDatetime::from(at)))
            .await
            .map_err(backend)?;

        let rows: Vec<AssignmentRow> = res.take(0).map_err(backend)?;
        match rows.into_iter().next() {
            Some(row) => row.into_assignment(),
            None => {
                self.fetch_event(event_id).await?;
                Err(StorageError::AssignmentNotFound {
                    event_id: event_id.to_string(),
                    evaluator_id: evaluator_id.0,
                })
            }
        }
    }

    #[instrument(skip(self, rows), fields(row_count = rows.len()))]
    async fn upsert_results(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        expected_version: Option<u64>,
        rows: Vec<ResultUpsert>,
    ) -> StorageResult<Vec<EvaluationResult>> {
        let keys: Vec<(SubjectId, CriterionId)> =
            rows.iter().map(|r| (r.subject_id, r.criterion_id)).collect();
        let db_rows: Vec<ResultUpsertRow> = rows
            .iter()
            .map(|r| ResultUpsertRow::new(event_id, evaluator_id, r))
            .collect();

        let version_guard = if expected_version.is_some() {
            "IF $ev.version != $expected { THROW \"evalhub:version_mismatch\" };\n"
        } else {
            ""
        };
        let sql = format!(
            "BEGIN TRANSACTION;\n{LOAD_EVENT}{version_guard}\
             FOR $row IN $rows {{\n\
                 UPSERT type::thing(\"results\", [$row.event_id, $row.subject_id, $row.evaluator_id, $row.criterion_id]) SET\n\
                     result_id = result_id ?? $row.result_id,\n\
                     event_id = $row.event_id,\n\
                     subject_id = $row.subject_id,\n\
                     evaluator_id = $row.evaluator_id,\n\
                     criterion_id = $row.criterion_id,\n\
                     score = $row.score ?? score,\n\
                     comment = $row.comment ?? comment,\n\
                     choice = $row.choice ?? choice,\n\
                     attempt = $row.attempt ?? attempt,\n\
                     note = $row.note ?? note,\n\
                     created_at = created_at ?? time::now(),\n\
                     updated_at = time::now();\n\
             }};\n\
             COMMIT TRANSACTION;"
        );

        let response = self
            .db()
            .query(sql)
            .bind(("id", event_id.to_string()))
            .bind(("expected", expected_version.map(|v| v as i64)))
            .bind(("rows", db_rows))
            .await
            .map_err(backend)?;
        self.check_transaction(event_id, expected_version, response)
            .await?;

        let stored = self.fetch_results(event_id, Some(evaluator_id)).await?;
        let mut out: Vec<EvaluationResult> = Vec::with_capacity(keys.len());
        for (subject_id, criterion_id) in keys {
            if out
                .iter()
                .any(|r| r.subject_id == subject_id && r.criterion_id == criterion_id)
            {
                continue;
            }
            let found = stored
                .iter()
                .find(|r| r.subject_id == subject_id && r.criterion_id == criterion_id)
                .cloned()
                .ok_or_else(|| {
                    StorageError::Backend(format!(
                        "result for subject {subject_id} / criterion {criterion_id} missing after upsert"
                    ))
                })?;
            out.push(found);
        }
        Ok(out)
    }

    async fn list_results(
        &self,
        event_id: EventId,
        filter: ResultFilter,
    ) -> StorageResult<Vec<EvaluationResult>> {
        self.fetch_event(event_id).await?;

        let mut sql = String::from("SELECT * FROM results WHERE event_id = $id");
        if filter.subject_id.is_some() {
            sql.push_str(" AND subject_id = $subject");
        }
        if filter.evaluator_id.is_some() {
            sql.push_str(" AND evaluator_id = $evaluator");
        }
        if filter.criterion_id.is_some() {
            sql.push_str(" AND criterion_id = $criterion");
        }
        sql.push_str(" ORDER BY subject_id, criterion_id, evaluator_id");

        let mut res = self
            .db()
            .query(sql)
            .bind(("id", event_id.to_string()))
            .bind(("subject", filter.subject_id.map(|s| s.0)))
            .bind(("evaluator", filter.evaluator_id.map(|e| e.0)))
            .bind(("criterion", filter.criterion_id.map(|c| c.0)))
            .await
            .map_err(backend)?;

        let rows: Vec<ResultRow> = res.take(0).map_err(backend)?;
        rows.into_iter().map(ResultRow::into_result).collect()
    }

    #[instrument(skip(self, write))]
    async fn write_note(
        &self,
        event_id: EventId,
        result_id: ResultId,
        evaluator_id: UserId,
        write: NoteWrite,
    ) -> StorageResult<EvaluationResult> {
        let guard = match &write {
            NoteWrite::Add(_) => {
                "IF $r.note != NONE AND $r.note != \"\" { THROW \"evalhub:note_conflict\" };\n"
            }
            NoteWrite::Replace(_) => {
                "IF $r.note = NONE OR $r.note = \"\" { THROW \"evalhub:note_conflict\" };\n"
            }
            NoteWrite::Clear => "",
        };
        let note = match &write {
            NoteWrite::Add(n) | NoteWrite::Replace(n) => Some(n.clone()),
            NoteWrite::Clear => None,
        };

        let sql = format!(
            "BEGIN TRANSACTION;\n{LOAD_EVENT}\
             LET $r = (SELECT * FROM results WHERE event_id = $id AND result_id = $rid \
             AND evaluator_id = $evaluator)[0];\n\
             IF $r = NONE {{ THROW \"evalhub:result_not_found\" }};\n\
             {guard}\
             UPDATE results SET note = $note, updated_at = time::now() WHERE result_id = $rid;\n\
             COMMIT TRANSACTION;"
        );

        let mut response = self
            .db()
            .query(sql)
            .bind(("id", event_id.to_string()))
            .bind(("rid", result_id.to_string()))
            .bind(("evaluator", evaluator_id.0))
            .bind(("note", note))
            .await
            .map_err(backend)?;

        let errors = response.take_errors();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.into_values().map(|e| e.to_string()).collect();
            let has = |marker: &str| messages.iter().any(|m| m.contains(marker));
            if has(EVENT_NOT_FOUND) {
                return Err(StorageError::EventNotFound {
                    event_id: event_id.to_string(),
                });
            }
            if has(RESULT_NOT_FOUND) {
                return Err(StorageError::ResultNotFound {
                    event_id: event_id.to_string(),
                    result_id: result_id.to_string(),
                });
            }
            if has(NOTE_CONFLICT) {
                // Re-derive the precise guard message from the stored row.
                let current = self
                    .fetch_results(event_id, Some(evaluator_id))
                    .await?
                    .into_iter()
                    .find(|r| r.id == result_id)
                    .ok_or_else(|| StorageError::ResultNotFound {
                        event_id: event_id.to_string(),
                        result_id: result_id.to_string(),
                    })?;
                apply_note_write(&current, write)?;
                return Err(StorageError::NoteConflict {
                    result_id: result_id.to_string(),
                    reason: "note changed concurrently".to_string(),
                });
            }
            return Err(StorageError::Backend(messages.join("; ")));
        }

        self.fetch_results(event_id, Some(evaluator_id))
            .await?
            .into_iter()
            .find(|r| r.id == result_id)
            .ok_or_else(|| StorageError::ResultNotFound {
                event_id: event_id.to_string(),
                result_id: result_id.to_string(),
            })
    }
}
