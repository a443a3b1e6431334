//! SurrealEventStore tests against the in-memory SurrealDB engine.

use chrono::{Duration, Utc};
use evalhub_state::*;

fn new_event(evaluators: &[i64]) -> NewEvent {
    let id = EventId::new();
    let now = Utc::now();
    NewEvent {
        id,
        name: "Fall camp".to_string(),
        mode: EventMode::StandardEvaluation,
        starts_at: now,
        ends_at: now + Duration::days(3),
        group_id: GroupId(1),
        team_id: None,
        flags: EventFlags::default(),
        subjects: [SubjectId(1), SubjectId(2)].into_iter().collect(),
        criteria: Criteria::of_kind(CriterionKind::Skill, [CriterionId(10), CriterionId(11)]),
        created_by: UserId(100),
        assignments: evaluators
            .iter()
            .map(|e| EvaluatorAssignment::invited(id, UserId(*e), true, now))
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

#[tokio::test]
async fn surreal_create_and_get_round_trip() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let created = store.create_event(new_event(&[100, 101])).await.unwrap();

    let fetched = store.get_event(created.id).await.unwrap();
    assert_eq!(fetched.name, "Fall camp");
    assert_eq!(fetched.version, 1);
    assert_eq!(fetched.subjects.len(), 2);
    assert_eq!(fetched.criteria.kind(), CriterionKind::Skill);

    let assignments = store.list_assignments(created.id).await.unwrap();
    assert_eq!(assignments.len(), 2);
    assert!(assignments.iter().all(|a| a.invitation_sent_at.is_some()));
}

#[tokio::test]
async fn surreal_missing_event_is_not_found() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let err = store.get_event(EventId::new()).await.unwrap_err();

    assert!(matches!(err, StorageError::EventNotFound { .. }));
}

#[tokio::test]
async fn surreal_apply_change_commits_delta() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let event = store.create_event(new_event(&[100, 101])).await.unwrap();

    let mut change = EventChange::new(event.id);
    change.expected_version = Some(event.version);
    change.scalars.name = Some("Fall camp (day 2)".to_string());
    change.assignments.remove = vec![UserId(101)];
    change.assignments.add = vec![EvaluatorAssignment::invited(
        event.id,
        UserId(102),
        false,
        Utc::now(),
    )];

    let updated = store.apply_change(change).await.unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.name, "Fall camp (day 2)");

    let evaluators: Vec<i64> = store
        .list_assignments(event.id)
        .await
        .unwrap()
        .iter()
        .map(|a| a.evaluator_id.0)
        .collect();
    assert_eq!(evaluators, vec![100, 102]);
}

#[tokio::test]
async fn surreal_locked_event_rejects_membership_change() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let event = store.create_event(new_event(&[100])).await.unwrap();
    store.set_locked(event.id, true).await.unwrap();

    let mut change = EventChange::new(event.id);
    change.assignments.remove = vec![UserId(100)];

    let err = store.apply_change(change).await.unwrap_err();
    assert!(matches!(err, StorageError::EventLocked { .. }));
    assert_eq!(store.list_assignments(event.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn surreal_stale_version_reports_actual() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let event = store.create_event(new_event(&[])).await.unwrap();

    let mut change = EventChange::new(event.id);
    change.expected_version = Some(9);
    change.scalars.active = Some(true);

    let err = store.apply_change(change).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::VersionMismatch {
            expected: 9,
            actual: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn surreal_team_can_be_set_and_cleared() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let event = store.create_event(new_event(&[])).await.unwrap();

    let mut set = EventChange::new(event.id);
    set.scalars.team_id = Some(Some(TeamId(5)));
    assert_eq!(store.apply_change(set).await.unwrap().team_id, Some(TeamId(5)));

    let mut clear = EventChange::new(event.id);
    clear.scalars.team_id = Some(None);
    let cleared = store.apply_change(clear).await.unwrap();
    assert_eq!(cleared.team_id, None);
    assert_eq!(cleared.version, 3);
}

#[tokio::test]
async fn surreal_results_upsert_by_key() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let event = store.create_event(new_event(&[100])).await.unwrap();

    let first = store
        .upsert_results(event.id, UserId(100), None, vec![score(1, 10, 2.0)])
        .await
        .unwrap();
    let second = store
        .upsert_results(event.id, UserId(100), None, vec![score(1, 10, 4.0), score(2, 11, 1.0)])
        .await
        .unwrap();

    assert_eq!(second.len(), 2);
    assert_eq!(second[0].id, first[0].id);
    assert_eq!(second[0].values.score, Some(4.0));

    let all = store
        .list_results(event.id, ResultFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn surreal_upsert_with_stale_version_writes_nothing() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let event = store.create_event(new_event(&[100, 101])).await.unwrap();

    let mut change = EventChange::new(event.id);
    change.criteria = Some(Criteria::of_kind(CriterionKind::Skill, [CriterionId(11)]));
    store.apply_change(change).await.unwrap();

    let err = store
        .upsert_results(
            event.id,
            UserId(100),
            Some(event.version),
            vec![score(1, 10, 2.0)],
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
        .upsert_results(event.id, UserId(100), Some(2), vec![score(1, 11, 2.0)])
        .await
        .unwrap();
    assert_eq!(rows[0].criterion_id, CriterionId(11));
}

#[tokio::test]
async fn surreal_delete_cascades() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let event = store.create_event(new_event(&[100])).await.unwrap();
    store
        .upsert_results(event.id, UserId(100), None, vec![score(1, 10, 2.0)])
        .await
        .unwrap();

    store.delete_event(event.id).await.unwrap();

    assert!(matches!(
        store.get_event(event.id).await.unwrap_err(),
        StorageError::EventNotFound { .. }
    ));
    assert!(store.list_events(GroupId(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn surreal_status_write_for_unassigned_evaluator_fails() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let event = store.create_event(new_event(&[100])).await.unwrap();

    let ok = store
        .set_assignment_status(event.id, UserId(100), AssignmentStatus::Accepted, Utc::now())
        .await
        .unwrap();
    assert_eq!(ok.status, AssignmentStatus::Accepted);
    assert!(ok.accepted_at.is_some());

    let err = store
        .set_assignment_status(event.id, UserId(555), AssignmentStatus::Accepted, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AssignmentNotFound { .. }));
}

#[tokio::test]
async fn surreal_note_guard() {
    let store = SurrealEventStore::in_memory().await.unwrap();
    let event = store.create_event(new_event(&[100])).await.unwrap();
    let rows = store
        .upsert_results(event.id, UserId(100), None, vec![score(1, 10, 2.0)])
        .await
        .unwrap();

    let noted = store
        .write_note(event.id, rows[0].id, UserId(100), NoteWrite::Add("ok".to_string()))
        .await
        .unwrap();
    assert_eq!(noted.note.as_deref(), Some("ok"));

    let err = store
        .write_note(event.id, rows[0].id, UserId(100), NoteWrite::Add("twice".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NoteConflict { .. }));
}
