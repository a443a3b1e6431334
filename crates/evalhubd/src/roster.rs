//! Roster snapshot loaded from a JSON file.
//!
//! The CLI has no live connection to the group roster or catalogs, so the
//! read-only collaborators are served from a snapshot:
//!
//! ```json
//! {
//!   "groups": [
//!     { "id": 1, "teams": [5], "subjects": [1, 2], "skills": [10],
//!       "metrics": [30], "evaluators": [200] }
//!   ],
//!   "identities": [100, 101]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use evalhub_core::directory::fakes::InMemoryDirectory;
use evalhub_core::{Directory, GroupId, InvitationNotifier, TeamId};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RosterSnapshot {
    pub groups: Vec<GroupSnapshot>,
    pub identities: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GroupSnapshot {
    pub id: i64,
    pub teams: Vec<i64>,
    pub subjects: Vec<i64>,
    pub skills: Vec<i64>,
    pub metrics: Vec<i64>,
    /// Members holding the Evaluator role
    pub evaluators: Vec<i64>,
}

impl RosterSnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read roster file: {:?}", path))?;
        serde_json::from_str(&raw).context("Failed to parse roster as JSON")
    }

    pub fn into_directory(self, notifier: Arc<dyn InvitationNotifier>) -> Directory {
        let mut dir = InMemoryDirectory::new().with_identities(self.identities);
        for group in self.groups {
            let id = GroupId(group.id);
            dir = dir
                .with_group(id)
                .with_subjects(id, group.subjects)
                .with_skills(id, group.skills)
                .with_metrics(id, group.metrics)
                .with_evaluator_role(id, group.evaluators);
            for team in group.teams {
                dir = dir.with_team(id, TeamId(team));
            }
        }
        Directory::from_shared(Arc::new(dir), notifier)
    }
}
