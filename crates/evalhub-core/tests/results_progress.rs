//! Result recording, the note sub-API and progress, against both stores.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use evalhub_core::directory::fakes::{InMemoryDirectory, RecordingNotifier};
use evalhub_core::*;
use evalhub_state::fakes::MemoryEventStore;
use evalhub_state::{
    EventChange, EventStore, NewEvent, NoteWrite, ResultUpsert, StorageResult, SurrealEventStore,
};

const GROUP: GroupId = GroupId(1);
const ALICE: UserId = UserId(100);
const BOB: UserId = UserId(101);

fn controller(store: Arc<dyn EventStore>, config: EvaluationConfig) -> EventLifecycleController {
    let directory = Arc::new(
        InMemoryDirectory::new()
            .with_group(GROUP)
            .with_subjects(GROUP, [1, 2, 3])
            .with_skills(GROUP, [10, 11])
            .with_identities([100, 101, 102]),
    );
    EventLifecycleController::new(
        store,
        Directory::from_shared(directory, Arc::new(RecordingNotifier::new())),
        config,
    )
}

fn memory_controller() -> EventLifecycleController {
    controller(Arc::new(MemoryEventStore::new()), EvaluationConfig::default())
}

/// Two subjects, two skills, Alice and Bob assigned: four cells each.
async fn two_by_two(c: &EventLifecycleController) -> Event {
    let now = Utc::now();
    let spec = EventSpec::new("Scrimmage", EventMode::StandardEvaluation, now, now + Duration::hours(1))
        .with_subjects([1, 2])
        .with_criteria([10, 11])
        .with_evaluators([100, 101]);
    c.create(GROUP, spec, UserId(1)).await.unwrap()
}

fn cell(subject: i64, criterion: i64, score: f64) -> ResultInput {
    ResultInput::score(SubjectId(subject), CriterionId(criterion), score)
}

fn progress_of(progress: &[EvaluatorProgress], evaluator: UserId) -> &EvaluatorProgress {
    progress
        .iter()
        .find(|p| p.evaluator_id == evaluator)
        .unwrap()
}

// ===========================================================================
// submit
// ===========================================================================

#[tokio::test]
async fn resubmitting_a_key_updates_in_place() {
    let c = memory_controller();
    let event = two_by_two(&c).await;
    let results = c.results();

    let first = results
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0).with_comment("solid")])
        .await
        .unwrap();
    let second = results
        .submit(event.id, ALICE, vec![cell(1, 10, 4.5)])
        .await
        .unwrap();

    assert_eq!(first[0].id, second[0].id);
    let stored = results
        .get_results(event.id, ResultFilter::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].values.score, Some(4.5));
    assert_eq!(stored[0].values.comment.as_deref(), Some("solid"));
}

#[tokio::test]
async fn one_bad_subject_rejects_the_whole_submission() {
    let c = memory_controller();
    let event = two_by_two(&c).await;

    let err = c
        .results()
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0), cell(3, 10, 2.0)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EvaluationError::NotFound { kind: ReferenceKind::Subject, ref ids } if ids == &vec!["3".to_string()]
    ));

    let stored = c
        .results()
        .get_results(event.id, ResultFilter::default())
        .await
        .unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn criterion_outside_the_event_is_not_found() {
    let c = memory_controller();
    let event = two_by_two(&c).await;
    c.criteria()
        .sync_criteria(event.id, [CriterionId(10)], None)
        .await
        .unwrap();

    let err = c
        .results()
        .submit(event.id, ALICE, vec![cell(1, 11, 3.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, EvaluationError::NotFound { kind: ReferenceKind::Skill, .. }));
}

#[tokio::test]
async fn unassigned_evaluator_cannot_submit() {
    let c = memory_controller();
    let event = two_by_two(&c).await;

    let err = c
        .results()
        .submit(event.id, UserId(102), vec![cell(1, 10, 3.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, EvaluationError::NotFound { kind: ReferenceKind::Evaluator, .. }));
}

#[tokio::test]
async fn empty_submission_writes_nothing() {
    let c = memory_controller();
    let event = two_by_two(&c).await;

    let written = c.results().submit(event.id, ALICE, Vec::new()).await.unwrap();
    assert!(written.is_empty());
}

#[tokio::test]
async fn submit_leaves_status_alone_and_works_when_locked() {
    let c = memory_controller();
    let event = two_by_two(&c).await;
    c.set_locked(event.id, true).await.unwrap();

    c.results()
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0)])
        .await
        .unwrap();

    let alice = c
        .assignments(event.id)
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.evaluator_id == ALICE)
        .unwrap();
    assert_eq!(alice.status, AssignmentStatus::Invited);
}

/// Commits a queued change right after the next assignment read, the window
/// between a submission's validation and its write.
struct InterleavingStore {
    inner: MemoryEventStore,
    after_assignment_read: Mutex<Option<EventChange>>,
}

#[async_trait]
impl EventStore for InterleavingStore {
    async fn create_event(&self, event: NewEvent) -> StorageResult<Event> {
        self.inner.create_event(event).await
    }

    async fn get_event(&self, event_id: EventId) -> StorageResult<Event> {
        self.inner.get_event(event_id).await
    }

    async fn list_events(&self, group_id: GroupId) -> StorageResult<Vec<Event>> {
        self.inner.list_events(group_id).await
    }

    async fn apply_change(&self, change: EventChange) -> StorageResult<Event> {
        self.inner.apply_change(change).await
    }

    async fn set_locked(&self, event_id: EventId, locked: bool) -> StorageResult<Event> {
        self.inner.set_locked(event_id, locked).await
    }

    async fn delete_event(&self, event_id: EventId) -> StorageResult<()> {
        self.inner.delete_event(event_id).await
    }

    async fn list_assignments(
        &self,
        event_id: EventId,
    ) -> StorageResult<Vec<EvaluatorAssignment>> {
        let seen = self.inner.list_assignments(event_id).await?;
        let queued = self.after_assignment_read.lock().unwrap().take();
        if let Some(change) = queued {
            self.inner.apply_change(change).await?;
        }
        Ok(seen)
    }

    async fn set_assignment_status(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        status: AssignmentStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<EvaluatorAssignment> {
        self.inner
            .set_assignment_status(event_id, evaluator_id, status, at)
            .await
    }

    async fn upsert_results(
        &self,
        event_id: EventId,
        evaluator_id: UserId,
        expected_version: Option<u64>,
        rows: Vec<ResultUpsert>,
    ) -> StorageResult<Vec<EvaluationResult>> {
        self.inner
            .upsert_results(event_id, evaluator_id, expected_version, rows)
            .await
    }

    async fn list_results(
        &self,
        event_id: EventId,
        filter: ResultFilter,
    ) -> StorageResult<Vec<EvaluationResult>> {
        self.inner.list_results(event_id, filter).await
    }

    async fn write_note(
        &self,
        event_id: EventId,
        result_id: ResultId,
        evaluator_id: UserId,
        write: NoteWrite,
    ) -> StorageResult<EvaluationResult> {
        self.inner
            .write_note(event_id, result_id, evaluator_id, write)
            .await
    }
}

#[tokio::test]
async fn submit_racing_an_evaluator_removal_is_a_stale_write() {
    let store = Arc::new(InterleavingStore {
        inner: MemoryEventStore::new(),
        after_assignment_read: Mutex::new(None),
    });
    let c = controller(store.clone(), EvaluationConfig::default());
    let event = two_by_two(&c).await;

    let mut removal = EventChange::new(event.id);
    removal.assignments.remove = vec![ALICE];
    *store.after_assignment_read.lock().unwrap() = Some(removal);

    let err = c
        .results()
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EvaluationError::StaleWrite {
            expected: 1,
            actual: 2,
            ..
        }
    ));
    assert!(c
        .results()
        .get_results(event.id, ResultFilter::default())
        .await
        .unwrap()
        .is_empty());

    let err = c
        .results()
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, EvaluationError::NotFound { .. }));
}

#[tokio::test]
async fn get_results_applies_every_filter() {
    let c = memory_controller();
    let event = two_by_two(&c).await;
    let results = c.results();
    results
        .submit(event.id, ALICE, vec![cell(1, 10, 1.0), cell(2, 10, 2.0), cell(2, 11, 3.0)])
        .await
        .unwrap();
    results
        .submit(event.id, BOB, vec![cell(2, 10, 4.0)])
        .await
        .unwrap();

    let filter = ResultFilter {
        subject_id: Some(SubjectId(2)),
        criterion_id: Some(CriterionId(10)),
        ..Default::default()
    };
    assert_eq!(results.get_results(event.id, filter).await.unwrap().len(), 2);

    let filter = ResultFilter {
        evaluator_id: Some(ALICE),
        ..filter
    };
    let only = results.get_results(event.id, filter).await.unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].values.score, Some(2.0));
}

// ===========================================================================
// notes
// ===========================================================================

#[tokio::test]
async fn note_lifecycle_enforces_presence() {
    let c = memory_controller();
    let event = two_by_two(&c).await;
    let results = c.results();
    let row = results
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0)])
        .await
        .unwrap()
        .remove(0);

    let err = results
        .update_note(event.id, row.id, ALICE, "too early")
        .await
        .unwrap_err();
    assert!(matches!(err, EvaluationError::Conflict(_)));

    let noted = results
        .add_note(event.id, row.id, ALICE, "quick feet")
        .await
        .unwrap();
    assert_eq!(noted.note.as_deref(), Some("quick feet"));

    let err = results
        .add_note(event.id, row.id, ALICE, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, EvaluationError::Conflict(_)));

    let replaced = results
        .update_note(event.id, row.id, ALICE, "quick feet, weak left")
        .await
        .unwrap();
    assert_eq!(replaced.note.as_deref(), Some("quick feet, weak left"));

    let cleared = results.delete_note(event.id, row.id, ALICE).await.unwrap();
    assert!(cleared.note.is_none());
    assert_eq!(cleared.values.score, Some(3.0));

    let again = results.delete_note(event.id, row.id, ALICE).await.unwrap();
    assert!(again.note.is_none());

    results
        .add_note(event.id, row.id, ALICE, "fresh start")
        .await
        .unwrap();
}

#[tokio::test]
async fn notes_belong_to_the_scoring_evaluator() {
    let c = memory_controller();
    let event = two_by_two(&c).await;
    let row = c
        .results()
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0)])
        .await
        .unwrap()
        .remove(0);

    let err = c
        .results()
        .add_note(event.id, row.id, BOB, "not mine")
        .await
        .unwrap_err();
    assert!(matches!(err, EvaluationError::NotFound { kind: ReferenceKind::Result, .. }));
}

#[tokio::test]
async fn blank_note_is_invalid_input() {
    let c = memory_controller();
    let event = two_by_two(&c).await;
    let row = c
        .results()
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0)])
        .await
        .unwrap()
        .remove(0);

    let err = c
        .results()
        .add_note(event.id, row.id, ALICE, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, EvaluationError::InvalidInput(_)));
}

// ===========================================================================
// progress
// ===========================================================================

#[tokio::test]
async fn progress_is_completed_over_subjects_times_criteria() {
    let c = memory_controller();
    let event = two_by_two(&c).await;
    c.results()
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0)])
        .await
        .unwrap();

    let progress = c.progress().get_progress(event.id).await.unwrap();
    assert_eq!(progress.len(), 2);

    let alice = progress_of(&progress, ALICE);
    assert_eq!((alice.completed, alice.total), (1, 4));
    assert_eq!(alice.percentage, 25.0);

    let bob = progress_of(&progress, BOB);
    assert_eq!(bob.completed, 0);
    assert_eq!(bob.percentage, 0.0);
}

#[tokio::test]
async fn event_without_criteria_reports_zero_percent() {
    let c = memory_controller();
    let now = Utc::now();
    let spec = EventSpec::new("Empty", EventMode::StandardEvaluation, now, now)
        .with_subjects([1, 2])
        .with_evaluators([100]);
    let event = c.create(GROUP, spec, UserId(1)).await.unwrap();

    let progress = c.progress().get_progress(event.id).await.unwrap();
    assert_eq!(progress[0].total, 0);
    assert_eq!(progress[0].percentage, 0.0);
}

#[tokio::test]
async fn counting_mode_decides_how_orphaned_rows_count() {
    let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
    let distinct = controller(store.clone(), EvaluationConfig::default());
    let raw = controller(
        store,
        EvaluationConfig::default().with_progress_counting(ProgressCounting::RawRows),
    );

    let event = two_by_two(&distinct).await;
    distinct
        .results()
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0), cell(1, 11, 2.0)])
        .await
        .unwrap();
    distinct
        .criteria()
        .sync_criteria(event.id, [CriterionId(10)], None)
        .await
        .unwrap();

    let by_cells = distinct.progress().get_progress(event.id).await.unwrap();
    let alice = progress_of(&by_cells, ALICE);
    assert_eq!((alice.completed, alice.total), (1, 2));
    assert_eq!(alice.percentage, 50.0);

    let by_rows = raw.progress().get_progress(event.id).await.unwrap();
    let alice = progress_of(&by_rows, ALICE);
    assert_eq!((alice.completed, alice.total), (2, 2));
    assert_eq!(alice.percentage, 100.0);
}

#[tokio::test]
async fn progress_for_unknown_event_is_not_found() {
    let c = memory_controller();
    let err = c.progress().get_progress(EventId::new()).await.unwrap_err();
    assert!(matches!(err, EvaluationError::NotFound { kind: ReferenceKind::Event, .. }));
}

// ===========================================================================
// SurrealDB-backed flow
// ===========================================================================

#[tokio::test]
async fn full_flow_on_surreal_store() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let c = controller(Arc::new(store), EvaluationConfig::default());
    let event = two_by_two(&c).await;

    c.evaluators()
        .update_status(event.id, ALICE, AssignmentStatus::Accepted)
        .await
        .unwrap();
    let rows = c
        .results()
        .submit(event.id, ALICE, vec![cell(1, 10, 3.0), cell(2, 11, 4.0)])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    c.results()
        .add_note(event.id, rows[0].id, ALICE, "good reads")
        .await
        .unwrap();

    let outcome = c
        .evaluators()
        .sync_evaluators(event.id, [ALICE, UserId(102)], None)
        .await
        .unwrap();
    assert_eq!(outcome.removed, vec![BOB]);

    let progress = c.progress().get_progress(event.id).await.unwrap();
    let alice = progress_of(&progress, ALICE);
    assert_eq!(alice.status, AssignmentStatus::Accepted);
    assert_eq!(alice.percentage, 50.0);

    c.set_locked(event.id, true).await.unwrap();
    assert!(matches!(
        c.delete(event.id).await.unwrap_err(),
        EvaluationError::LockedEvent(_)
    ));
    c.set_locked(event.id, false).await.unwrap();
    c.delete(event.id).await.unwrap();
    assert!(matches!(
        c.get_event(event.id).await.unwrap_err(),
        EvaluationError::NotFound { kind: ReferenceKind::Event, .. }
    ));
}
