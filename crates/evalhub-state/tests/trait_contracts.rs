//! Trait contract tests for EventStore.
//!
//! These tests verify the behavioral contracts of the storage trait
//! using the in-memory fake. Any conforming implementation must pass these.

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use evalhub_state::fakes::MemoryEventStore;
use evalhub_state::storage_traits::*;
use evalhub_state::*;

fn new_event(mode: EventMode, evaluators: &[i64]) -> NewEvent {
    let id = EventId::new();
    let now = Utc::now();
    let kind = mode.criterion_kind();
    NewEvent {
        id,
        name: "Spring tryouts".to_string(),
        mode,
        starts_at: now,
        ends_at: now + Duration::days(7),
        group_id: GroupId(1),
        team_id: Some(TeamId(5)),
        flags: EventFlags {
            active: true,
            ..Default::default()
        },
        subjects: [SubjectId(1), SubjectId(2)].into_iter().collect(),
        criteria: Criteria::of_kind(kind, [CriterionId(10), CriterionId(11)]),
        created_by: UserId(100),
        assignments: evaluators
            .iter()
            .map(|e| EvaluatorAssignment::invited(id, UserId(*e), false, now))
            .collect(),
    }
}

fn score(subject: i64, criterion: i64, value: f64) -> ResultUpsert {
    ResultUpsert {
        subject_id: SubjectId(subject),
        criterion_id: CriterionId(criterion),
        values: ResultValues {
            score: Some(value),
            ..Default::default()
        },
        note: None,
        new_id: ResultId::new(),
    }
}

// ===========================================================================
// Event contract tests
// ===========================================================================

#[tokio::test]
async fn create_starts_at_version_one_with_assignments() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100, 101]))
        .await
        .unwrap();

    assert_eq!(event.version, 1);
    assert_eq!(event.updated_by, None);

    let assignments = store.list_assignments(event.id).await.unwrap();
    let evaluators: Vec<i64> = assignments.iter().map(|a| a.evaluator_id.0).collect();
    assert_eq!(evaluators, vec![100, 101]);
    assert!(assignments
        .iter()
        .all(|a| a.status == AssignmentStatus::Invited));
}

#[tokio::test]
async fn get_missing_event_is_not_found() {
    let store = MemoryEventStore::new();
    let err = store.get_event(EventId::new()).await.unwrap_err();

    assert!(matches!(err, StorageError::EventNotFound { .. }));
}

#[tokio::test]
async fn list_events_filters_by_group_in_creation_order() {
    let store = MemoryEventStore::new();
    let first = store
        .create_event(new_event(EventMode::StandardEvaluation, &[]))
        .await
        .unwrap();
    let mut other = new_event(EventMode::StandardEvaluation, &[]);
    other.group_id = GroupId(2);
    store.create_event(other).await.unwrap();
    let second = store
        .create_event(new_event(EventMode::SelfAssessment, &[]))
        .await
        .unwrap();

    let listed: Vec<EventId> = store
        .list_events(GroupId(1))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(listed, vec![first.id, second.id]);
}

#[tokio::test]
async fn apply_change_bumps_version_and_applies_delta() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100, 101]))
        .await
        .unwrap();

    let mut change = EventChange::new(event.id);
    change.expected_version = Some(1);
    change.actor = Some(UserId(7));
    change.scalars.name = Some("Renamed".to_string());
    change.subjects = Some([SubjectId(2), SubjectId(3)].into_iter().collect());
    change.assignments = AssignmentDelta {
        remove: vec![UserId(100)],
        add: vec![EvaluatorAssignment::invited(
            event.id,
            UserId(102),
            false,
            Utc::now(),
        )],
    };

    let updated = store.apply_change(change).await.unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.updated_by, Some(UserId(7)));
    assert_eq!(
        updated.subjects,
        [SubjectId(2), SubjectId(3)].into_iter().collect::<BTreeSet<_>>()
    );

    let evaluators: Vec<i64> = store
        .list_assignments(event.id)
        .await
        .unwrap()
        .iter()
        .map(|a| a.evaluator_id.0)
        .collect();
    assert_eq!(evaluators, vec![101, 102]);
}

#[tokio::test]
async fn apply_change_with_stale_version_changes_nothing() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100]))
        .await
        .unwrap();

    let mut change = EventChange::new(event.id);
    change.expected_version = Some(5);
    change.assignments.remove = vec![UserId(100)];

    let err = store.apply_change(change).await.unwrap_err();
    assert_eq!(
        err,
        StorageError::VersionMismatch {
            event_id: event.id.to_string(),
            expected: 5,
            actual: 1,
        }
    );
    assert_eq!(store.list_assignments(event.id).await.unwrap().len(), 1);
    assert_eq!(store.get_event(event.id).await.unwrap().version, 1);
}

#[tokio::test]
async fn locked_event_rejects_relationship_changes_only() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100]))
        .await
        .unwrap();
    store.set_locked(event.id, true).await.unwrap();

    let mut relationships = EventChange::new(event.id);
    relationships.criteria = Some(Criteria::of_kind(
        CriterionKind::Skill,
        [CriterionId(10)],
    ));
    let err = store.apply_change(relationships).await.unwrap_err();
    assert!(matches!(err, StorageError::EventLocked { .. }));

    let mut scalars = EventChange::new(event.id);
    scalars.scalars.active = Some(false);
    let updated = store.apply_change(scalars).await.unwrap();
    assert!(!updated.flags.active);
    assert!(updated.flags.locked);
}

#[tokio::test]
async fn all_fields_lock_scope_rejects_scalar_changes() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[]))
        .await
        .unwrap();
    store.set_locked(event.id, true).await.unwrap();

    let mut change = EventChange::new(event.id);
    change.lock_scope = LockScope::AllFields;
    change.scalars.name = Some("Frozen?".to_string());

    let err = store.apply_change(change).await.unwrap_err();
    assert!(matches!(err, StorageError::EventLocked { .. }));
    assert_eq!(store.get_event(event.id).await.unwrap().name, "Spring tryouts");
}

#[tokio::test]
async fn set_locked_toggles_and_bumps_version() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[]))
        .await
        .unwrap();

    let locked = store.set_locked(event.id, true).await.unwrap();
    assert!(locked.flags.locked);
    assert_eq!(locked.version, 2);

    let unlocked = store.set_locked(event.id, false).await.unwrap();
    assert!(!unlocked.flags.locked);
    assert_eq!(unlocked.version, 3);
}

#[tokio::test]
async fn delete_cascades_and_refuses_locked() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100]))
        .await
        .unwrap();
    store
        .upsert_results(event.id, UserId(100), None, vec![score(1, 10, 3.0)])
        .await
        .unwrap();

    store.set_locked(event.id, true).await.unwrap();
    let err = store.delete_event(event.id).await.unwrap_err();
    assert!(matches!(err, StorageError::EventLocked { .. }));

    store.set_locked(event.id, false).await.unwrap();
    store.delete_event(event.id).await.unwrap();

    assert!(matches!(
        store.get_event(event.id).await.unwrap_err(),
        StorageError::EventNotFound { .. }
    ));
    assert!(matches!(
        store.list_assignments(event.id).await.unwrap_err(),
        StorageError::EventNotFound { .. }
    ));
}

// ===========================================================================
// Assignment contract tests
// ===========================================================================

#[tokio::test]
async fn status_write_stamps_matching_timestamp() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100]))
        .await
        .unwrap();
    let at = Utc::now();

    let updated = store
        .set_assignment_status(event.id, UserId(100), AssignmentStatus::Accepted, at)
        .await
        .unwrap();

    assert_eq!(updated.status, AssignmentStatus::Accepted);
    assert_eq!(updated.accepted_at, Some(at));
    assert_eq!(updated.completed_at, None);
}

#[tokio::test]
async fn status_write_for_unassigned_evaluator_fails() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100]))
        .await
        .unwrap();

    let err = store
        .set_assignment_status(event.id, UserId(999), AssignmentStatus::Accepted, Utc::now())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        StorageError::AssignmentNotFound {
            event_id: event.id.to_string(),
            evaluator_id: 999,
        }
    );
}

// ===========================================================================
// Result contract tests
// ===========================================================================

#[tokio::test]
async fn upsert_updates_existing_key_in_place() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100]))
        .await
        .unwrap();

    let first = store
        .upsert_results(event.id, UserId(100), None, vec![score(1, 10, 3.0)])
        .await
        .unwrap();
    let mut patch = score(1, 10, 4.5);
    patch.values.comment = Some("better".to_string());
    let second = store
        .upsert_results(event.id, UserId(100), None, vec![patch])
        .await
        .unwrap();

    assert_eq!(first[0].id, second[0].id);
    assert_eq!(second[0].values.score, Some(4.5));
    assert_eq!(second[0].values.comment.as_deref(), Some("better"));

    let all = store
        .list_results(event.id, ResultFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn upsert_keeps_fields_absent_from_the_patch() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100]))
        .await
        .unwrap();

    let mut first = score(1, 10, 3.0);
    first.values.comment = Some("keep me".to_string());
    store
        .upsert_results(event.id, UserId(100), None, vec![first])
        .await
        .unwrap();

    let only_score = score(1, 10, 5.0);
    let updated = store
        .upsert_results(event.id, UserId(100), None, vec![only_score])
        .await
        .unwrap();

    assert_eq!(updated[0].values.score, Some(5.0));
    assert_eq!(updated[0].values.comment.as_deref(), Some("keep me"));
}

#[tokio::test]
async fn list_results_applies_and_composed_filters() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100, 101]))
        .await
        .unwrap();
    store
        .upsert_results(
            event.id,
            UserId(100),
            None,
            vec![score(1, 10, 1.0), score(2, 10, 2.0), score(1, 11, 3.0)],
        )
        .await
        .unwrap();
    store
        .upsert_results(event.id, UserId(101), None, vec![score(1, 10, 4.0)])
        .await
        .unwrap();

    let filter = ResultFilter {
        subject_id: Some(SubjectId(1)),
        criterion_id: Some(CriterionId(10)),
        ..Default::default()
    };
    let hits = store.list_results(event.id, filter).await.unwrap();
    let evaluators: Vec<i64> = hits.iter().map(|r| r.evaluator_id.0).collect();
    assert_eq!(evaluators, vec![100, 101]);
}

#[tokio::test]
async fn upsert_after_membership_change_fails_on_version_and_writes_nothing() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100, 101]))
        .await
        .unwrap();

    let mut change = EventChange::new(event.id);
    change.assignments.remove = vec![UserId(100)];
    store.apply_change(change).await.unwrap();

    let err = store
        .upsert_results(
            event.id,
            UserId(100),
            Some(event.version),
            vec![score(1, 10, 3.0)],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::VersionMismatch {
            expected: 1,
            actual: 2,
            ..
        }
    ));
    assert!(store
        .list_results(event.id, ResultFilter::default())
        .await
        .unwrap()
        .is_empty());

    let rows = store
        .upsert_results(event.id, UserId(101), Some(2), vec![score(1, 10, 3.0)])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(store.get_event(event.id).await.unwrap().version, 2);
}

#[tokio::test]
async fn note_guards_reject_double_add_and_missing_update() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100]))
        .await
        .unwrap();
    let rows = store
        .upsert_results(event.id, UserId(100), None, vec![score(1, 10, 3.0)])
        .await
        .unwrap();
    let result_id = rows[0].id;

    let err = store
        .write_note(
            event.id,
            result_id,
            UserId(100),
            NoteWrite::Replace("x".to_string()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NoteConflict { .. }));

    let noted = store
        .write_note(
            event.id,
            result_id,
            UserId(100),
            NoteWrite::Add("watch footwork".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(noted.note.as_deref(), Some("watch footwork"));

    let err = store
        .write_note(
            event.id,
            result_id,
            UserId(100),
            NoteWrite::Add("again".to_string()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NoteConflict { .. }));

    let cleared = store
        .write_note(event.id, result_id, UserId(100), NoteWrite::Clear)
        .await
        .unwrap();
    assert_eq!(cleared.note, None);
    assert_eq!(cleared.values.score, Some(3.0));
}

#[tokio::test]
async fn note_write_by_other_evaluator_is_not_found() {
    let store = MemoryEventStore::new();
    let event = store
        .create_event(new_event(EventMode::StandardEvaluation, &[100, 101]))
        .await
        .unwrap();
    let rows = store
        .upsert_results(event.id, UserId(100), None, vec![score(1, 10, 3.0)])
        .await
        .unwrap();

    let err = store
        .write_note(
            event.id,
            rows[0].id,
            UserId(101),
            NoteWrite::Add("not mine".to_string()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ResultNotFound { .. }));
}
