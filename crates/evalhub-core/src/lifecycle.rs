//! Event Lifecycle Controller
//!
//! Orchestrates create/update/delete/lock for evaluation events. Both create
//! and update branch explicitly on the event mode:
//!
//! - `StandardEvaluation`: skills as criteria, evaluators supplied by the caller
//! - `SelfAssessment`: metrics as criteria, evaluators broadcast to every
//!   Evaluator-role member of the group, display and invite flags forced
//!
//! Every reference is validated before the single store write, so a failed
//! call leaves no partial event behind.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use evalhub_state::{
    CriterionId, EvaluatorAssignment, Event, EventChange, EventFlags, EventId,
    EventMode, EventStore, GroupId, NewEvent, ScalarChanges, SubjectId, TeamId, UserId,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument};

use crate::config::EvaluationConfig;
use crate::criteria::CriteriaAssignmentManager;
use crate::directory::Directory;
use crate::error::{EvaluationError, ReferenceKind, Result};
use crate::evaluators::{check_version, notify_added, EvaluatorAssignmentManager, EvaluatorSource};
use crate::metrics::METRICS;
use crate::obs;
use crate::progress::ProgressCalculator;
use crate::results::ResultRecorder;

/// Input for creating an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub name: String,
    pub mode: EventMode,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub hide_subject_names: bool,
    #[serde(default)]
    pub hide_preferred_positions: bool,
    #[serde(default)]
    pub send_invites: bool,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub subject_ids: Vec<SubjectId>,
    /// Skill ids for standard evaluations, metric ids for self-assessments
    #[serde(default)]
    pub criteria_ids: Vec<CriterionId>,
    /// Ignored for self-assessments
    #[serde(default)]
    pub evaluator_ids: Vec<UserId>,
}

fn default_active() -> bool {
    true
}

/// Tell an explicit `null` apart from an absent field.
fn present_or_null<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl EventSpec {
    pub fn new(
        name: impl Into<String>,
        mode: EventMode,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            mode,
            starts_at,
            ends_at,
            team_id: None,
            hide_subject_names: false,
            hide_preferred_positions: false,
            send_invites: false,
            active: true,
            subject_ids: Vec::new(),
            criteria_ids: Vec::new(),
            evaluator_ids: Vec::new(),
        }
    }

    pub fn with_team(mut self, team_id: TeamId) -> Self {
        self.team_id = Some(team_id);
        self
    }

    pub fn with_subjects(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.subject_ids = ids.into_iter().map(SubjectId).collect();
        self
    }

    pub fn with_criteria(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.criteria_ids = ids.into_iter().map(CriterionId).collect();
        self
    }

    pub fn with_evaluators(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.evaluator_ids = ids.into_iter().map(UserId).collect();
        self
    }

    pub fn with_send_invites(mut self, send_invites: bool) -> Self {
        self.send_invites = send_invites;
        self
    }
}

/// Partial update. Absent fields are left untouched and not re-validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPatch {
    pub name: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// `Some(None)` (JSON `null`) detaches the event from its team
    #[serde(
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub team_id: Option<Option<TeamId>>,
    pub hide_subject_names: Option<bool>,
    pub hide_preferred_positions: Option<bool>,
    pub send_invites: Option<bool>,
    pub active: Option<bool>,
    pub subject_ids: Option<Vec<SubjectId>>,
    pub criteria_ids: Option<Vec<CriterionId>>,
    /// Ignored for self-assessments, whose evaluators follow role membership
    pub evaluator_ids: Option<Vec<UserId>>,
    /// Commit only if the event is still at this version
    pub expected_version: Option<u64>,
}

impl EventPatch {
    fn scalars(&self) -> ScalarChanges {
        ScalarChanges {
            name: self.name.clone(),
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            team_id: self.team_id,
            hide_subject_names: self.hide_subject_names,
            hide_preferred_positions: self.hide_preferred_positions,
            send_invites: self.send_invites,
            active: self.active,
        }
    }
}

#[derive(Clone)]
pub struct EventLifecycleController {
    store: Arc<dyn EventStore>,
    directory: Directory,
    config: EvaluationConfig,
    evaluators: EvaluatorAssignmentManager,
    criteria: CriteriaAssignmentManager,
    results: ResultRecorder,
    progress: ProgressCalculator,
}

impl EventLifecycleController {
    pub fn new(store: Arc<dyn EventStore>, directory: Directory, config: EvaluationConfig) -> Self {
        Self {
            evaluators: EvaluatorAssignmentManager::new(store.clone(), directory.clone(), config),
            criteria: CriteriaAssignmentManager::new(store.clone(), directory.clone(), config),
            results: ResultRecorder::new(store.clone()),
            progress: ProgressCalculator::new(store.clone(), config),
            store,
            directory,
            config,
        }
    }

    pub fn evaluators(&self) -> &EvaluatorAssignmentManager {
        &self.evaluators
    }

    pub fn criteria(&self) -> &CriteriaAssignmentManager {
        &self.criteria
    }

    pub fn results(&self) -> &ResultRecorder {
        &self.results
    }

    pub fn progress(&self) -> &ProgressCalculator {
        &self.progress
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    // -- create --------------------------------------------------------------

    /// Create an event with its subjects, criteria and evaluator assignments.
    #[instrument(skip_all, fields(group_id = %group_id, mode = %spec.mode, creator = %creator))]
    pub async fn create(&self, group_id: GroupId, spec: EventSpec, creator: UserId) -> Result<Event> {
        let result = self.create_inner(group_id, spec, creator).await;
        if let Err(err) = &result {
            METRICS.inc_rejected_writes();
            obs::emit_operation_rejected("create_event", None, err);
        }
        result
    }

    async fn create_inner(
        &self,
        group_id: GroupId,
        spec: EventSpec,
        creator: UserId,
    ) -> Result<Event> {
        validate_name(&spec.name)?;
        validate_schedule(spec.starts_at, spec.ends_at)?;

        self.directory.require_group(group_id).await?;
        if let Some(team_id) = spec.team_id {
            self.directory.require_team(group_id, team_id).await?;
        }

        let subjects: BTreeSet<SubjectId> = spec.subject_ids.iter().copied().collect();
        let criteria_ids: BTreeSet<CriterionId> = spec.criteria_ids.iter().copied().collect();
        let kind = spec.mode.criterion_kind();

        let (flags, evaluators) = match spec.mode {
            EventMode::StandardEvaluation => {
                let evaluators: BTreeSet<UserId> = spec.evaluator_ids.iter().copied().collect();
                futures::try_join!(
                    self.directory.require_subjects(group_id, &subjects),
                    self.directory.require_criteria(group_id, kind, &criteria_ids),
                    self.directory.require_identities(&evaluators),
                )?;
                let flags = EventFlags {
                    hide_subject_names: spec.hide_subject_names,
                    hide_preferred_positions: spec.hide_preferred_positions,
                    send_invites: spec.send_invites,
                    active: spec.active,
                    locked: false,
                };
                (flags, evaluators)
            }
            EventMode::SelfAssessment => {
                if !spec.evaluator_ids.is_empty() {
                    debug!(
                        ignored = spec.evaluator_ids.len(),
                        "self-assessment ignores caller evaluator ids"
                    );
                }
                let (_, _, members) = futures::try_join!(
                    self.directory.require_subjects(group_id, &subjects),
                    self.directory.require_criteria(group_id, kind, &criteria_ids),
                    self.role_members(group_id),
                )?;
                (self_assessment_flags(spec.active, false), members)
            }
        };

        let id = EventId::new();
        let now = Utc::now();
        let assignments: Vec<EvaluatorAssignment> = evaluators
            .iter()
            .map(|e| EvaluatorAssignment::invited(id, *e, flags.send_invites, now))
            .collect();
        let invited: Vec<UserId> = evaluators.into_iter().collect();

        let event = self
            .store
            .create_event(NewEvent {
                id,
                name: spec.name.trim().to_string(),
                mode: spec.mode,
                starts_at: spec.starts_at,
                ends_at: spec.ends_at,
                group_id,
                team_id: spec.team_id,
                flags,
                subjects,
                criteria: evalhub_state::Criteria::of_kind(kind, criteria_ids),
                created_by: creator,
                assignments,
            })
            .await?;

        METRICS.inc_events_created();
        obs::emit_event_created(
            &event.id,
            group_id,
            event.mode,
            event.subjects.len(),
            event.criteria.len(),
            invited.len(),
        );
        notify_added(&self.directory, &event, &invited);
        Ok(event)
    }

    // -- update --------------------------------------------------------------

    /// Apply a partial update. Only fields present in `patch` are validated.
    #[instrument(skip_all, fields(group_id = %group_id, event_id = %event_id, actor = %actor))]
    pub async fn update(
        &self,
        group_id: GroupId,
        event_id: EventId,
        patch: EventPatch,
        actor: UserId,
    ) -> Result<Event> {
        let result = self.update_inner(group_id, event_id, patch, actor).await;
        if let Err(err) = &result {
            METRICS.inc_rejected_writes();
            obs::emit_operation_rejected("update_event", Some(&event_id), err);
        }
        result
    }

    async fn update_inner(
        &self,
        group_id: GroupId,
        event_id: EventId,
        patch: EventPatch,
        actor: UserId,
    ) -> Result<Event> {
        self.directory.require_group(group_id).await?;
        let event = self.store.get_event(event_id).await?;
        if event.group_id != group_id {
            return Err(EvaluationError::not_found(ReferenceKind::Event, [event_id]));
        }
        check_version(&event, patch.expected_version)?;

        let mut scalars = patch.scalars();
        if event.mode == EventMode::SelfAssessment {
            force_self_assessment_scalars(&mut scalars);
        }
        if let Some(name) = &scalars.name {
            validate_name(name)?;
            scalars.name = Some(name.trim().to_string());
        }
        validate_schedule(
            scalars.starts_at.unwrap_or(event.starts_at),
            scalars.ends_at.unwrap_or(event.ends_at),
        )?;

        let caller_evaluators = match event.mode {
            EventMode::StandardEvaluation => patch.evaluator_ids.as_ref(),
            EventMode::SelfAssessment => None,
        };
        let targets_relationships = patch.subject_ids.is_some()
            || patch.criteria_ids.is_some()
            || caller_evaluators.is_some();
        if event.is_locked() && (targets_relationships || self.locks_scalars(&scalars)) {
            return Err(EvaluationError::LockedEvent(event_id.to_string()));
        }

        if let Some(Some(team_id)) = scalars.team_id {
            self.directory.require_team(group_id, team_id).await?;
        }

        let subjects = match &patch.subject_ids {
            Some(ids) => {
                let ids: BTreeSet<SubjectId> = ids.iter().copied().collect();
                self.directory.require_subjects(group_id, &ids).await?;
                Some(ids)
            }
            None => None,
        };

        let criteria = match &patch.criteria_ids {
            Some(ids) => {
                let ids: BTreeSet<CriterionId> = ids.iter().copied().collect();
                Some(self.criteria.plan(&event, &ids).await?)
            }
            None => None,
        };

        let send_invites = scalars.send_invites.unwrap_or(event.flags.send_invites);
        let evaluator_plan = match event.mode {
            EventMode::StandardEvaluation => match caller_evaluators {
                Some(ids) => {
                    let desired: BTreeSet<UserId> = ids.iter().copied().collect();
                    let current = self.store.list_assignments(event_id).await?;
                    Some(
                        self.evaluators
                            .plan(&event, &current, &desired, EvaluatorSource::Caller, send_invites)
                            .await?,
                    )
                }
                None => None,
            },
            EventMode::SelfAssessment if event.is_locked() => {
                debug!("locked self-assessment keeps its evaluators");
                None
            }
            EventMode::SelfAssessment => {
                let desired = self.role_members(group_id).await?;
                let current = self.store.list_assignments(event_id).await?;
                let plan = self
                    .evaluators
                    .plan(
                        &event,
                        &current,
                        &desired,
                        EvaluatorSource::RoleMembership,
                        send_invites,
                    )
                    .await?;
                (!plan.outcome.is_noop()).then_some(plan)
            }
        };

        let mut change = EventChange::new(event_id);
        change.expected_version = Some(event.version);
        change.lock_scope = self.config.lock_scope;
        change.actor = Some(actor);
        change.scalars = scalars;
        change.subjects = subjects;
        change.criteria = criteria.as_ref().map(|c| c.criteria.clone());
        change.assignments = evaluator_plan
            .as_ref()
            .map(|p| p.delta.clone())
            .unwrap_or_default();

        let updated = self.store.apply_change(change).await?;
        obs::emit_event_updated(&updated.id, updated.version, actor);

        if let Some(plan) = &criteria {
            obs::emit_criteria_synced(
                &event_id,
                plan.outcome.added.len(),
                plan.outcome.removed.len(),
                plan.outcome.kept.len(),
            );
        }
        if let Some(plan) = &evaluator_plan {
            obs::emit_evaluators_synced(
                &event_id,
                plan.outcome.added.len(),
                plan.outcome.removed.len(),
                plan.outcome.kept.len(),
            );
            notify_added(&self.directory, &updated, &plan.outcome.added);
        }
        Ok(updated)
    }

    fn locks_scalars(&self, scalars: &ScalarChanges) -> bool {
        self.config.lock_scope == evalhub_state::LockScope::AllFields && !scalars.is_empty()
    }

    async fn role_members(&self, group_id: GroupId) -> Result<BTreeSet<UserId>> {
        Ok(self
            .directory
            .roster
            .find_evaluator_role_members(group_id)
            .await?
            .into_iter()
            .collect())
    }

    // -- delete / lock -------------------------------------------------------

    /// Delete an unlocked event together with its assignments and results.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn delete(&self, event_id: EventId) -> Result<()> {
        match self.store.delete_event(event_id).await {
            Ok(()) => {
                obs::emit_event_deleted(&event_id);
                Ok(())
            }
            Err(err) => {
                let err = EvaluationError::from(err);
                METRICS.inc_rejected_writes();
                obs::emit_operation_rejected("delete_event", Some(&event_id), &err);
                Err(err)
            }
        }
    }

    /// Toggle the lock. Always permitted, including on a locked event.
    #[instrument(skip_all, fields(event_id = %event_id, locked = locked))]
    pub async fn set_locked(&self, event_id: EventId, locked: bool) -> Result<Event> {
        let event = self.store.set_locked(event_id, locked).await?;
        obs::emit_lock_changed(&event_id, locked, event.version);
        Ok(event)
    }

    // -- reads ---------------------------------------------------------------

    pub async fn get_event(&self, event_id: EventId) -> Result<Event> {
        Ok(self.store.get_event(event_id).await?)
    }

    pub async fn list_events(&self, group_id: GroupId) -> Result<Vec<Event>> {
        Ok(self.store.list_events(group_id).await?)
    }

    pub async fn assignments(&self, event_id: EventId) -> Result<Vec<EvaluatorAssignment>> {
        self.evaluators.list(event_id).await
    }
}

fn self_assessment_flags(active: bool, locked: bool) -> EventFlags {
    EventFlags {
        hide_subject_names: false,
        hide_preferred_positions: false,
        send_invites: true,
        active,
        locked,
    }
}

fn force_self_assessment_scalars(scalars: &mut ScalarChanges) {
    if scalars.hide_subject_names.is_some() {
        scalars.hide_subject_names = Some(false);
    }
    if scalars.hide_preferred_positions.is_some() {
        scalars.hide_preferred_positions = Some(false);
    }
    if scalars.send_invites.is_some() {
        scalars.send_invites = Some(true);
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(EvaluationError::InvalidInput(
            "event name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_schedule(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Result<()> {
    if ends_at < starts_at {
        return Err(EvaluationError::InvalidInput(format!(
            "event ends ({ends_at}) before it starts ({starts_at})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_scalars_override_caller_values() {
        let mut scalars = ScalarChanges {
            hide_subject_names: Some(true),
            send_invites: Some(false),
            ..Default::default()
        };
        force_self_assessment_scalars(&mut scalars);

        assert_eq!(scalars.hide_subject_names, Some(false));
        assert_eq!(scalars.send_invites, Some(true));
        assert_eq!(scalars.hide_preferred_positions, None);
    }

    #[test]
    fn schedule_must_not_end_before_start() {
        let now = Utc::now();
        assert!(validate_schedule(now, now).is_ok());
        assert!(matches!(
            validate_schedule(now, now - chrono::Duration::hours(1)),
            Err(EvaluationError::InvalidInput(_))
        ));
    }

    #[test]
    fn patch_deserializes_with_missing_fields() {
        let patch: EventPatch = serde_json::from_str(r#"{"name":"Day 2"}"#).unwrap();
        assert_eq!(patch.name.as_deref(), Some("Day 2"));
        assert!(patch.subject_ids.is_none());
        assert!(patch.expected_version.is_none());
        assert_eq!(patch.team_id, None);
    }

    #[test]
    fn patch_distinguishes_null_team_from_absent() {
        let cleared: EventPatch = serde_json::from_str(r#"{"team_id":null}"#).unwrap();
        assert_eq!(cleared.team_id, Some(None));

        let moved: EventPatch = serde_json::from_str(r#"{"team_id":5}"#).unwrap();
        assert_eq!(moved.team_id, Some(Some(TeamId(5))));
    }
}
