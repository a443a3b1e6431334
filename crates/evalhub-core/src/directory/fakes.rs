//! In-memory collaborators (testing and local tooling)
//!
//! `InMemoryDirectory` is built up front with a builder API. Evaluator-role
//! membership can also be changed afterwards through a shared handle, since
//! self-assessment updates re-read it on every call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use evalhub_state::{CriterionId, Event, EventId, GroupId, SubjectId, TeamId, UserId};

use super::{
    CatalogEntry, CatalogReader, DirectoryError, DirectoryResult, IdentityReader,
    InvitationNotifier, RosterReader,
};

#[derive(Debug, Default)]
struct DirectoryData {
    groups: BTreeSet<GroupId>,
    teams: BTreeSet<(GroupId, TeamId)>,
    subjects: BTreeSet<(GroupId, SubjectId)>,
    evaluator_roles: BTreeMap<GroupId, BTreeSet<UserId>>,
    skills: BTreeMap<CriterionId, GroupId>,
    metrics: BTreeMap<CriterionId, GroupId>,
    identities: BTreeSet<UserId>,
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    data: RwLock<DirectoryData>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DirectoryData> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> DirectoryResult<std::sync::RwLockReadGuard<'_, DirectoryData>> {
        self.data
            .read()
            .map_err(|_| DirectoryError::Unavailable("directory lock poisoned".to_string()))
    }

    pub fn with_group(self, group_id: GroupId) -> Self {
        self.write().groups.insert(group_id);
        self
    }

    pub fn with_team(self, group_id: GroupId, team_id: TeamId) -> Self {
        self.write().teams.insert((group_id, team_id));
        self
    }

    pub fn with_subjects(self, group_id: GroupId, ids: impl IntoIterator<Item = i64>) -> Self {
        {
            let mut data = self.write();
            for id in ids {
                data.subjects.insert((group_id, SubjectId(id)));
            }
        }
        self
    }

    pub fn with_skills(self, group_id: GroupId, ids: impl IntoIterator<Item = i64>) -> Self {
        {
            let mut data = self.write();
            for id in ids {
                data.skills.insert(CriterionId(id), group_id);
            }
        }
        self
    }

    pub fn with_metrics(self, group_id: GroupId, ids: impl IntoIterator<Item = i64>) -> Self {
        {
            let mut data = self.write();
            for id in ids {
                data.metrics.insert(CriterionId(id), group_id);
            }
        }
        self
    }

    pub fn with_identities(self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.write().identities.extend(ids.into_iter().map(UserId));
        self
    }

    /// Grant the Evaluator role; members are also registered as identities.
    pub fn with_evaluator_role(self, group_id: GroupId, ids: impl IntoIterator<Item = i64>) -> Self {
        self.set_evaluator_role(group_id, ids);
        self
    }

    /// Replace the Evaluator-role membership of a group.
    pub fn set_evaluator_role(&self, group_id: GroupId, ids: impl IntoIterator<Item = i64>) {
        let members: BTreeSet<UserId> = ids.into_iter().map(UserId).collect();
        let mut data = self.write();
        data.identities.extend(members.iter().copied());
        data.evaluator_roles.insert(group_id, members);
    }
}

#[async_trait]
impl RosterReader for InMemoryDirectory {
    async fn group_exists(&self, group_id: GroupId) -> DirectoryResult<bool> {
        Ok(self.read()?.groups.contains(&group_id))
    }

    async fn team_exists(&self, group_id: GroupId, team_id: TeamId) -> DirectoryResult<bool> {
        Ok(self.read()?.teams.contains(&(group_id, team_id)))
    }

    async fn find_subjects_by_ids(
        &self,
        group_id: GroupId,
        ids: &[SubjectId],
    ) -> DirectoryResult<Vec<SubjectId>> {
        let data = self.read()?;
        Ok(ids
            .iter()
            .filter(|id| data.subjects.contains(&(group_id, **id)))
            .copied()
            .collect())
    }

    async fn find_evaluator_role_members(&self, group_id: GroupId) -> DirectoryResult<Vec<UserId>> {
        let data = self.read()?;
        Ok(data
            .evaluator_roles
            .get(&group_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CatalogReader for InMemoryDirectory {
    async fn find_skills_by_ids(
        &self,
        group_id: GroupId,
        ids: &[CriterionId],
    ) -> DirectoryResult<Vec<CatalogEntry>> {
        let data = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                data.skills
                    .get(id)
                    .filter(|owner| **owner == group_id)
                    .map(|owner| CatalogEntry {
                        id: *id,
                        group_id: *owner,
                    })
            })
            .collect())
    }

    async fn find_metrics_by_ids(&self, ids: &[CriterionId]) -> DirectoryResult<Vec<CatalogEntry>> {
        let data = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                data.metrics.get(id).map(|owner| CatalogEntry {
                    id: *id,
                    group_id: *owner,
                })
            })
            .collect())
    }
}

#[async_trait]
impl IdentityReader for InMemoryDirectory {
    async fn find_identities_by_ids(&self, ids: &[UserId]) -> DirectoryResult<Vec<UserId>> {
        let data = self.read()?;
        Ok(ids
            .iter()
            .filter(|id| data.identities.contains(*id))
            .copied()
            .collect())
    }
}

/// Notifier that records every trigger for later assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(EventId, Vec<UserId>)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All triggers received so far, oldest first.
    pub fn calls(&self) -> Vec<(EventId, Vec<UserId>)> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

impl InvitationNotifier for RecordingNotifier {
    fn invitations_sent(&self, event: &Event, evaluators: &[UserId]) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((event.id, evaluators.to_vec()));
        }
    }
}
