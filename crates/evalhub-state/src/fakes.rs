//! In-memory fake for the event store (testing only)
//!
//! `MemoryEventStore` satisfies the `EventStore` contract without any
//! external dependencies. One mutex guards all tables, and every operation
//! checks its preconditions before mutating anything, which gives the same
//! all-or-nothing behavior as a database transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::model::*;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<EventId, Event>,
    /// Insertion order for `list_events`
    order: Vec<EventId>,
    assignments: HashMap<EventId, BTreeMap<UserId, EvaluatorAssignment>>,
    results: HashMap<EventId, BTreeMap<(SubjectId, UserId, CriterionId), EvaluationResult>>,
}

impl Tables {
    fn event(&self, event_id: EventId) -> StorageResult<&Event> {
        self.events
            .get(&event_id)
            .ok_or_else(|| StorageError::EventNotFound {
                event_id: event_id.to_string(),
            })
    }
}

/// In-memory event store backed by `HashMap`s behind a single `Mutex`.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    tables: Mutex<Tables>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StorageError::Backend("memory store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn create_event(&self, event: NewEvent) -> StorageResult<Event> {
        let mut tables = self.lock()?;
        if tables.events.contains_key(&event.id) {
            return Err(StorageError::Backend(format!(
                "event {} already exists",
                event.id
            )));
        }

        let stored = event.to_event(Utc::now());
        let assignments = event
            .assignments
            .into_iter()
            .map(|a| (a.evaluator_id, a))
            .collect();

        tables.assignments.insert(stored.id, assignments);
        tables.results.insert(stored.id, BTreeMap::new());
        tables.order.push(stored.id);
        tables.events.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_event(&self, event_id: EventId) -> StorageResult<Event> {
        let tables = self.lock()?;
        tables.event(event_id).cloned()
    }

    async fn list_events(&self, group_id: GroupId) -> StorageResult<Vec<Event>> {
        let tables = self.lock()?;
        Ok(tables
            .order
            .iter()
            .filter_map(|id| tables.events.get(id))
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn apply_change(&self, change: EventChange) -> StorageResult<Event> {
        let mut tables = self.lock()?;
        let current = tables.event(change.event_id)?;

        if let Some(expected) = change.expected_version {
            if current.version != expected {
                return Err(StorageError::VersionMismatch {
                    event_id: change.event_id.to_string(),
                    expected,
                    actual: current.version,
                });
            }
        }
        if current.is_locked() && change.blocked_by_lock() {
            return Err(StorageError::EventLocked {
                event_id: change.event_id.to_string(),
            });
        }
        if let Some(criteria) = &change.criteria {
            if criteria.kind() != current.mode.criterion_kind() {
                return Err(StorageError::Backend(format!(
                    "{} criteria cannot be stored on a {} event",
                    criteria.kind(),
                    current.mode
                )));
            }
        }

        let mut updated = current.clone();
        change.scalars.apply_to(&mut updated);
        if let Some(subjects) = change.subjects {
            updated.subjects = subjects;
        }
        if let Some(criteria) = change.criteria {
            updated.criteria = criteria;
        }
        if change.actor.is_some() {
            updated.updated_by = change.actor;
        }
        updated.version += 1;
        updated.updated_at = Utc::now();

        let assignments = tables.assignments.entry(change.event_id).or_default();
        for evaluator in &change.assignments.remove {
            assignments.remove(evaluator);
        }
        for assignment in change.assignments.add {
            assignments
                .entry(assignment.evaluator_id)
                .or_insert(assignment);
        }

        tables.events.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn set_locked(&self, event_id: EventId, locked: bool) -> StorageResult<Event> {
        let mut tables = self.lock()?;
        let mut event = tables.event(event_id)?.clone();
        event.flags.locked = locked;
        event.version += 1;
        event.updated_at = Utc::now();
        tables.events.insert(event_id, event.clone());
        Ok(event)
    }

    async fn delete_event(&self, event_id: EventId) -> StorageResult<()> {
        let mut tables = self.lock()?;
        if tables.event(event_id)?.is_locked() {
            return Err(StorageError::EventLocked {
                event_id: event_id.to_string(),
            });
        }
        tables.events.remove(&event_id);
        tables.order.retain(|id| *id != event_id);
        tables.assignments.remove(&event_id);
        tables.results.remove(&event_id);
        Ok(())
    }

    async fn list_assignments(
        &self,
        event_id: EventId,
    ) -> StorageResult<Vec<EvaluatorAssignment>> {
        let tables = self.lock()?;
        tables.event(event_id)?;
        Ok(tables
            .assignments
            .get(&event_id)
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_assignment_status(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        status: AssignmentStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<EvaluatorAssignment> {
        let mut tables = self.lock()?;
        tables.event(event_id)?;
        let assignment = tables
            .assignments
            .get_mut(&event_id)
            .and_then(|a| a.get_mut(&evaluator_id))
            .ok_or_else(|| StorageError::AssignmentNotFound {
                event_id: event_id.to_string(),
                evaluator_id: evaluator_id.0,
            })?;
        assignment.apply_status(status, at);
        Ok(assignment.clone())
    }

    async fn upsert_results(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        expected_version: Option<u64>,
        rows: Vec<ResultUpsert>,
    ) -> StorageResult<Vec<EvaluationResult>> {
        let mut tables = self.lock()?;
        let current = tables.event(event_id)?.version;
        if let Some(expected) = expected_version {
            if current != expected {
                return Err(StorageError::VersionMismatch {
                    event_id: event_id.to_string(),
                    expected,
                    actual: current,
                });
            }
        }
        let now = Utc::now();
        let results = tables.results.entry(event_id).or_default();

        let mut touched = Vec::new();
        for row in rows {
            let key = (row.subject_id, evaluator_id, row.criterion_id);
            match results.get_mut(&key) {
                Some(existing) => {
                    existing.values.merge(&row.values);
                    if row.note.is_some() {
                        existing.note = row.note;
                    }
                    existing.updated_at = now;
                }
                None => {
                    results.insert(
                        key,
                        EvaluationResult {
                            id: row.new_id,
                            event_id,
                            subject_id: row.subject_id,
                            evaluator_id,
                            criterion_id: row.criterion_id,
                            values: row.values,
                            note: row.note,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                }
            }
            if !touched.contains(&key) {
                touched.push(key);
            }
        }

        Ok(touched
            .iter()
            .filter_map(|key| results.get(key).cloned())
            .collect())
    }

    async fn list_results(
        &self,
        event_id: EventId,
        filter: ResultFilter,
    ) -> StorageResult<Vec<EvaluationResult>> {
        let tables = self.lock()?;
        tables.event(event_id)?;
        Ok(tables
            .results
            .get(&event_id)
            .map(|r| r.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    async fn write_note(
        &self,
        event_id: EventId,
        result_id: ResultId,
        evaluator_id: UserId,
        write: NoteWrite,
    ) -> StorageResult<EvaluationResult> {
        let mut tables = self.lock()?;
        tables.event(event_id)?;
        let result = tables
            .results
            .get_mut(&event_id)
            .and_then(|r| {
                r.values_mut()
                    .find(|r| r.id == result_id && r.evaluator_id == evaluator_id)
            })
            .ok_or_else(|| StorageError::ResultNotFound {
                event_id: event_id.to_string(),
                result_id: result_id.to_string(),
            })?;

        result.note = apply_note_write(result, write)?;
        result.updated_at = Utc::now();
        Ok(result.clone())
    }
}

/// Resolve a note write against the current note, enforcing the guards.
pub(crate) fn apply_note_write(
    result: &EvaluationResult,
    write: NoteWrite,
) -> StorageResult<Option<String>> {
    match write {
        NoteWrite::Add(_) if result.has_note() => Err(StorageError::NoteConflict {
            result_id: result.id.to_string(),
            reason: "a note already exists".to_string(),
        }),
        NoteWrite::Add(note) => Ok(Some(note)),
        NoteWrite::Replace(_) if !result.has_note() => Err(StorageError::NoteConflict {
            result_id: result.id.to_string(),
            reason: "no note to update".to_string(),
        }),
        NoteWrite::Replace(note) => Ok(Some(note)),
        NoteWrite::Clear => Ok(None),
    }
}
