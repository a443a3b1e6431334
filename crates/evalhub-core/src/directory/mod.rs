//! Read-only collaborators owned by other systems
//!
//! Rosters, catalogs and identities live outside this crate. The managers
//! only ever ask "which of these ids exist?", so each reader returns the
//! subset of requested ids it could resolve and the caller reports the rest.

pub mod fakes;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use evalhub_state::{CriterionId, CriterionKind, Event, GroupId, SubjectId, TeamId, UserId};
use thiserror::Error;
use tracing::debug;

use crate::error::{EvaluationError, ReferenceKind, Result};
use crate::obs;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("directory lookup failed: {0}")]
    Lookup(String),
}

pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// A catalog criterion together with the group that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: CriterionId,
    pub group_id: GroupId,
}

/// Groups, teams, roster members and Evaluator-role membership.
#[async_trait]
pub trait RosterReader: Send + Sync {
    async fn group_exists(&self, group_id: GroupId) -> DirectoryResult<bool>;

    async fn team_exists(&self, group_id: GroupId, team_id: TeamId) -> DirectoryResult<bool>;

    /// Roster members of the group among `ids`.
    async fn find_subjects_by_ids(
        &self,
        group_id: GroupId,
        ids: &[SubjectId],
    ) -> DirectoryResult<Vec<SubjectId>>;

    /// Current members holding the Evaluator role in the group.
    async fn find_evaluator_role_members(&self, group_id: GroupId) -> DirectoryResult<Vec<UserId>>;
}

/// Skill and metric catalogs.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Skills among `ids` owned by the group.
    async fn find_skills_by_ids(
        &self,
        group_id: GroupId,
        ids: &[CriterionId],
    ) -> DirectoryResult<Vec<CatalogEntry>>;

    /// Metrics among `ids`, regardless of owner.
    async fn find_metrics_by_ids(&self, ids: &[CriterionId]) -> DirectoryResult<Vec<CatalogEntry>>;
}

#[async_trait]
pub trait IdentityReader: Send + Sync {
    /// Identities among `ids` that exist.
    async fn find_identities_by_ids(&self, ids: &[UserId]) -> DirectoryResult<Vec<UserId>>;
}

/// Fire-and-forget trigger raised after invitations were recorded.
///
/// Delivery is someone else's job; implementations must not block.
pub trait InvitationNotifier: Send + Sync {
    fn invitations_sent(&self, event: &Event, evaluators: &[UserId]);
}

/// Notifier that only logs the trigger.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl InvitationNotifier for TracingNotifier {
    fn invitations_sent(&self, event: &Event, evaluators: &[UserId]) {
        let _span = obs::EventSpan::enter(&event.id);
        obs::emit_invitations_sent(&event.id, evaluators.len());
    }
}

/// The bundle of collaborators every manager validates against.
#[derive(Clone)]
pub struct Directory {
    pub roster: Arc<dyn RosterReader>,
    pub catalog: Arc<dyn CatalogReader>,
    pub identities: Arc<dyn IdentityReader>,
    pub notifier: Arc<dyn InvitationNotifier>,
}

impl Directory {
    pub fn new(
        roster: Arc<dyn RosterReader>,
        catalog: Arc<dyn CatalogReader>,
        identities: Arc<dyn IdentityReader>,
        notifier: Arc<dyn InvitationNotifier>,
    ) -> Self {
        Self {
            roster,
            catalog,
            identities,
            notifier,
        }
    }

    /// Use one object for all three readers.
    pub fn from_shared<D>(shared: Arc<D>, notifier: Arc<dyn InvitationNotifier>) -> Self
    where
        D: RosterReader + CatalogReader + IdentityReader + 'static,
    {
        Self {
            roster: shared.clone(),
            catalog: shared.clone(),
            identities: shared,
            notifier,
        }
    }

    pub(crate) async fn require_group(&self, group_id: GroupId) -> Result<()> {
        if self.roster.group_exists(group_id).await? {
            Ok(())
        } else {
            Err(EvaluationError::not_found(ReferenceKind::Group, [group_id]))
        }
    }

    pub(crate) async fn require_team(&self, group_id: GroupId, team_id: TeamId) -> Result<()> {
        if self.roster.team_exists(group_id, team_id).await? {
            Ok(())
        } else {
            Err(EvaluationError::not_found(ReferenceKind::Team, [team_id]))
        }
    }

    pub(crate) async fn require_subjects(
        &self,
        group_id: GroupId,
        ids: &BTreeSet<SubjectId>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let wanted: Vec<SubjectId> = ids.iter().copied().collect();
        let found: BTreeSet<SubjectId> = self
            .roster
            .find_subjects_by_ids(group_id, &wanted)
            .await?
            .into_iter()
            .collect();

        let missing: Vec<SubjectId> = ids.difference(&found).copied().collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EvaluationError::not_found(ReferenceKind::Subject, missing))
        }
    }

    pub(crate) async fn require_identities(&self, ids: &BTreeSet<UserId>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let wanted: Vec<UserId> = ids.iter().copied().collect();
        let found: BTreeSet<UserId> = self
            .identities
            .find_identities_by_ids(&wanted)
            .await?
            .into_iter()
            .collect();

        let missing: Vec<UserId> = ids.difference(&found).copied().collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EvaluationError::not_found(ReferenceKind::Evaluator, missing))
        }
    }

    /// Every id must be a `kind` criterion owned by the group.
    ///
    /// Ids missing from the expected catalog but present in the other one
    /// for the same group are reported as `InvalidReference`.
    pub(crate) async fn require_criteria(
        &self,
        group_id: GroupId,
        kind: CriterionKind,
        ids: &BTreeSet<CriterionId>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let wanted: Vec<CriterionId> = ids.iter().copied().collect();

        let found = self.lookup_criteria(group_id, kind, &wanted).await?;
        let missing: Vec<CriterionId> = ids.difference(&found).copied().collect();
        if missing.is_empty() {
            return Ok(());
        }

        let other = match kind {
            CriterionKind::Skill => CriterionKind::Metric,
            CriterionKind::Metric => CriterionKind::Skill,
        };
        let mismatched = self.lookup_criteria(group_id, other, &missing).await?;
        if !mismatched.is_empty() {
            let ids: Vec<String> = mismatched.iter().map(|id| id.to_string()).collect();
            return Err(EvaluationError::InvalidReference(format!(
                "{other} ids [{}] cannot be used where {kind} ids are expected",
                ids.join(", ")
            )));
        }

        debug!(group_id = %group_id, kind = %kind, missing = ?missing, "unresolved criteria");
        let ref_kind = match kind {
            CriterionKind::Skill => ReferenceKind::Skill,
            CriterionKind::Metric => ReferenceKind::Metric,
        };
        Err(EvaluationError::not_found(ref_kind, missing))
    }

    /// Group-owned ids of `kind` among `ids`.
    async fn lookup_criteria(
        &self,
        group_id: GroupId,
        kind: CriterionKind,
        ids: &[CriterionId],
    ) -> Result<BTreeSet<CriterionId>> {
        let entries = match kind {
            CriterionKind::Skill => self.catalog.find_skills_by_ids(group_id, ids).await?,
            CriterionKind::Metric => self.catalog.find_metrics_by_ids(ids).await?,
        };
        Ok(entries
            .into_iter()
            .filter(|e| e.group_id == group_id)
            .map(|e| e.id)
            .collect())
    }
}
