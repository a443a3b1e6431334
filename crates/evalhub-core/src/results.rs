//! Evaluation Result Recorder
//!
//! Results are keyed by (event, subject, evaluator, criterion). Submitting a
//! key that already exists updates that row in place, overwriting only the
//! fields present in the input. A submission is validated as a whole before
//! the store writes any row.

use std::collections::BTreeSet;
use std::sync::Arc;

use evalhub_state::{
    CriterionId, CriterionKind, EvaluationResult, EventId, EventStore, NoteWrite, ResultFilter,
    ResultId, ResultUpsert, ResultValues, SubjectId, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{EvaluationError, ReferenceKind, Result};
use crate::metrics::METRICS;
use crate::obs;

/// One submitted cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultInput {
    pub subject_id: SubjectId,
    pub criterion_id: CriterionId,
    #[serde(default)]
    pub values: ResultValues,
    #[serde(default)]
    pub note: Option<String>,
}

impl ResultInput {
    pub fn score(subject_id: SubjectId, criterion_id: CriterionId, score: f64) -> Self {
        Self {
            subject_id,
            criterion_id,
            values: ResultValues {
                score: Some(score),
                ..Default::default()
            },
            note: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.values.comment = Some(comment.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Clone)]
pub struct ResultRecorder {
    store: Arc<dyn EventStore>,
}

impl ResultRecorder {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Upsert every row for `evaluator_id`, all or nothing.
    ///
    /// The rows are checked against one read of the event and written only
    /// if the event still has that version; a concurrent membership or
    /// criteria change fails the call with `StaleWrite`. Submitting does not
    /// change the evaluator's assignment status.
    #[instrument(skip_all, fields(event_id = %event_id, evaluator_id = %evaluator_id, row_count = rows.len()))]
    pub async fn submit(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        rows: Vec<ResultInput>,
    ) -> Result<Vec<EvaluationResult>> {
        let result = self.submit_inner(event_id, evaluator_id, rows).await;
        match &result {
            Ok(written) if !written.is_empty() => {
                METRICS.add_results_recorded(written.len() as u64);
                obs::emit_results_recorded(&event_id, evaluator_id, written.len());
            }
            Ok(_) => {}
            Err(err) => {
                METRICS.inc_rejected_writes();
                obs::emit_operation_rejected("submit_results", Some(&event_id), err);
            }
        }
        result
    }

    async fn submit_inner(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        rows: Vec<ResultInput>,
    ) -> Result<Vec<EvaluationResult>> {
        let event = self.store.get_event(event_id).await?;

        let assigned = self
            .store
            .list_assignments(event_id)
            .await?
            .iter()
            .any(|a| a.evaluator_id == evaluator_id);
        if !assigned {
            return Err(EvaluationError::not_found(
                ReferenceKind::Evaluator,
                [evaluator_id],
            ));
        }

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let unknown_subjects: BTreeSet<SubjectId> = rows
            .iter()
            .map(|r| r.subject_id)
            .filter(|s| !event.subjects.contains(s))
            .collect();
        if !unknown_subjects.is_empty() {
            return Err(EvaluationError::not_found(
                ReferenceKind::Subject,
                unknown_subjects,
            ));
        }

        let unknown_criteria: BTreeSet<CriterionId> = rows
            .iter()
            .map(|r| r.criterion_id)
            .filter(|c| !event.criteria.contains(*c))
            .collect();
        if !unknown_criteria.is_empty() {
            let kind = match event.criteria.kind() {
                CriterionKind::Skill => ReferenceKind::Skill,
                CriterionKind::Metric => ReferenceKind::Metric,
            };
            return Err(EvaluationError::not_found(kind, unknown_criteria));
        }

        let upserts: Vec<ResultUpsert> = rows
            .into_iter()
            .map(|row| ResultUpsert {
                subject_id: row.subject_id,
                criterion_id: row.criterion_id,
                values: row.values,
                note: row.note,
                new_id: ResultId::new(),
            })
            .collect();

        debug!(rows = upserts.len(), "upserting results");
        Ok(self
            .store
            .upsert_results(event_id, evaluator_id, Some(event.version), upserts)
            .await?)
    }

    /// Results of an event matching every present filter.
    pub async fn get_results(
        &self,
        event_id: EventId,
        filter: ResultFilter,
    ) -> Result<Vec<EvaluationResult>> {
        Ok(self.store.list_results(event_id, filter).await?)
    }

    /// Attach a note; fails with `Conflict` if one is already present.
    pub async fn add_note(
        &self,
        event_id: EventId,
        result_id: ResultId,
        evaluator_id: UserId,
        note: impl Into<String>,
    ) -> Result<EvaluationResult> {
        let note = non_blank(note.into())?;
        self.write_note(event_id, result_id, evaluator_id, NoteWrite::Add(note), "added")
            .await
    }

    /// Replace the note; fails with `Conflict` if there is none.
    pub async fn update_note(
        &self,
        event_id: EventId,
        result_id: ResultId,
        evaluator_id: UserId,
        note: impl Into<String>,
    ) -> Result<EvaluationResult> {
        let note = non_blank(note.into())?;
        self.write_note(
            event_id,
            result_id,
            evaluator_id,
            NoteWrite::Replace(note),
            "updated",
        )
        .await
    }

    /// Clear the note. The result row itself stays.
    pub async fn delete_note(
        &self,
        event_id: EventId,
        result_id: ResultId,
        evaluator_id: UserId,
    ) -> Result<EvaluationResult> {
        self.write_note(event_id, result_id, evaluator_id, NoteWrite::Clear, "deleted")
            .await
    }

    async fn write_note(
        &self,
        event_id: EventId,
        result_id: ResultId,
        evaluator_id: UserId,
        write: NoteWrite,
        action: &str,
    ) -> Result<EvaluationResult> {
        let result: Result<EvaluationResult> = self
            .store
            .write_note(event_id, result_id, evaluator_id, write)
            .await
            .map_err(Into::into);
        match &result {
            Ok(_) => obs::emit_note_changed(&event_id, &result_id, action),
            Err(err) => obs::emit_operation_rejected("write_note", Some(&event_id), err),
        }
        result
    }
}

fn non_blank(note: String) -> Result<String> {
    if note.trim().is_empty() {
        Err(EvaluationError::InvalidInput(
            "note must not be empty".to_string(),
        ))
    } else {
        Ok(note)
    }
}
