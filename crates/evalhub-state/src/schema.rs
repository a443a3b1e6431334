//! Schema definitions for evalhub SurrealDB tables
//!
//! Tables:
//! - events: Event aggregate (schedule, flags, subject and criteria sets)
//! - assignments: Evaluator membership and status per event
//! - results: Scored cells, record id = [event, subject, evaluator, criterion]
//!
//! Rows store identifiers as plain strings/integers and convert to the
//! `model` types at the boundary.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;
use crate::model::*;
use crate::storage_traits::{ResultUpsert, ScalarChanges, StorageResult};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

fn parse_uuid(field: &str, raw: &str) -> StorageResult<Uuid> {
    Uuid::from_str(raw)
        .map_err(|e| StorageError::Backend(format!("invalid {field} '{raw}': {e}")))
}

// ---------------------------------------------------------------------------
// events
// ---------------------------------------------------------------------------

/// Event row stored in SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: String,
    pub name: String,
    /// "standard_evaluation" | "self_assessment"
    pub mode: String,
    #[serde(with = "surreal_datetime")]
    pub starts_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub ends_at: DateTime<Utc>,
    pub group_id: i64,
    pub team_id: Option<i64>,
    pub hide_subject_names: bool,
    pub hide_preferred_positions: bool,
    pub send_invites: bool,
    pub active: bool,
    pub locked: bool,
    pub subjects: Vec<i64>,
    /// "skill" | "metric"
    pub criteria_kind: String,
    pub criteria: Vec<i64>,
    pub created_by: i64,
    pub updated_by: Option<i64>,
    pub version: i64,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl EventRow {
    pub fn from_event(event: &Event) -> Self {
        EventRow {
            event_id: event.id.to_string(),
            name: event.name.clone(),
            mode: event.mode.as_str().to_string(),
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            group_id: event.group_id.0,
            team_id: event.team_id.map(|t| t.0),
            hide_subject_names: event.flags.hide_subject_names,
            hide_preferred_positions: event.flags.hide_preferred_positions,
            send_invites: event.flags.send_invites,
            active: event.flags.active,
            locked: event.flags.locked,
            subjects: event.subjects.iter().map(|s| s.0).collect(),
            criteria_kind: event.criteria.kind().as_str().to_string(),
            criteria: event.criteria.ids().iter().map(|c| c.0).collect(),
            created_by: event.created_by.0,
            updated_by: event.updated_by.map(|u| u.0),
            version: event.version as i64,
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }

    pub fn into_event(self) -> StorageResult<Event> {
        let mode = EventMode::parse(&self.mode)
            .ok_or_else(|| StorageError::Backend(format!("unknown event mode: {}", self.mode)))?;
        let kind = CriterionKind::parse(&self.criteria_kind).ok_or_else(|| {
            StorageError::Backend(format!("unknown criteria kind: {}", self.criteria_kind))
        })?;

        Ok(Event {
            id: EventId(parse_uuid("event_id", &self.event_id)?),
            name: self.name,
            mode,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            group_id: GroupId(self.group_id),
            team_id: self.team_id.map(TeamId),
            flags: EventFlags {
                hide_subject_names: self.hide_subject_names,
                hide_preferred_positions: self.hide_preferred_positions,
                send_invites: self.send_invites,
                active: self.active,
                locked: self.locked,
            },
            subjects: self.subjects.into_iter().map(SubjectId).collect(),
            criteria: Criteria::of_kind(kind, self.criteria.into_iter().map(CriterionId)),
            created_by: UserId(self.created_by),
            updated_by: self.updated_by.map(UserId),
            version: self.version.max(0) as u64,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Partial event row used with `MERGE`; absent fields are not serialized.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventRowPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "surreal_datetime_opt"
    )]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "surreal_datetime_opt"
    )]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide_subject_names: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide_preferred_positions: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_invites: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<i64>,
}

impl EventRowPatch {
    pub fn new(
        scalars: &ScalarChanges,
        subjects: Option<&BTreeSet<SubjectId>>,
        criteria: Option<&Criteria>,
        actor: Option<UserId>,
    ) -> Self {
        EventRowPatch {
            name: scalars.name.clone(),
            starts_at: scalars.starts_at,
            ends_at: scalars.ends_at,
            team_id: scalars.team_id.flatten().map(|t| t.0),
            hide_subject_names: scalars.hide_subject_names,
            hide_preferred_positions: scalars.hide_preferred_positions,
            send_invites: scalars.send_invites,
            active: scalars.active,
            subjects: subjects.map(|s| s.iter().map(|s| s.0).collect()),
            criteria_kind: criteria.map(|c| c.kind().as_str().to_string()),
            criteria: criteria.map(|c| c.ids().iter().map(|c| c.0).collect()),
            updated_by: actor.map(|u| u.0),
        }
    }
}

// ---------------------------------------------------------------------------
// assignments
// ---------------------------------------------------------------------------

/// Evaluator assignment row stored in SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub event_id: String,
    pub evaluator_id: i64,
    /// "invited" | "accepted" | "declined" | "completed"
    pub status: String,
    #[serde(with = "surreal_datetime")]
    pub invited_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub invitation_sent_at: Option<DateTime<Utc>>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub declined_at: Option<DateTime<Utc>>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AssignmentRow {
    pub fn from_assignment(a: &EvaluatorAssignment) -> Self {
        AssignmentRow {
            event_id: a.event_id.to_string(),
            evaluator_id: a.evaluator_id.0,
            status: a.status.as_str().to_string(),
            invited_at: a.invited_at,
            invitation_sent_at: a.invitation_sent_at,
            accepted_at: a.accepted_at,
            declined_at: a.declined_at,
            completed_at: a.completed_at,
        }
    }

    pub fn into_assignment(self) -> StorageResult<EvaluatorAssignment> {
        let status = AssignmentStatus::parse(&self.status).ok_or_else(|| {
            StorageError::Backend(format!("unknown assignment status: {}", self.status))
        })?;
        Ok(EvaluatorAssignment {
            event_id: EventId(parse_uuid("event_id", &self.event_id)?),
            evaluator_id: UserId(self.evaluator_id),
            status,
            invited_at: self.invited_at,
            invitation_sent_at: self.invitation_sent_at,
            accepted_at: self.accepted_at,
            declined_at: self.declined_at,
            completed_at: self.completed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// results
// ---------------------------------------------------------------------------

/// Evaluation result row stored in SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub result_id: String,
    pub event_id: String,
    pub subject_id: i64,
    pub evaluator_id: i64,
    pub criterion_id: i64,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub choice: Option<String>,
    #[serde(default)]
    pub attempt: Option<i64>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl ResultRow {
    pub fn into_result(self) -> StorageResult<EvaluationResult> {
        Ok(EvaluationResult {
            id: ResultId(parse_uuid("result_id", &self.result_id)?),
            event_id: EventId(parse_uuid("event_id", &self.event_id)?),
            subject_id: SubjectId(self.subject_id),
            evaluator_id: UserId(self.evaluator_id),
            criterion_id: CriterionId(self.criterion_id),
            values: ResultValues {
                score: self.score,
                comment: self.comment,
                choice: self.choice,
                attempt: self.attempt.map(|a| a.clamp(0, u32::MAX as i64) as u32),
            },
            note: self.note,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Input row for the results `UPSERT` loop
#[derive(Debug, Clone, Serialize)]
pub struct ResultUpsertRow {
    pub result_id: String,
    pub event_id: String,
    pub subject_id: i64,
    pub evaluator_id: i64,
    pub criterion_id: i64,
    pub score: Option<f64>,
    pub comment: Option<String>,
    pub choice: Option<String>,
    pub attempt: Option<i64>,
    pub note: Option<String>,
}

impl ResultUpsertRow {
    pub fn new(event_id: EventId, evaluator_id: UserId, row: &ResultUpsert) -> Self {
        ResultUpsertRow {
            result_id: row.new_id.to_string(),
            event_id: event_id.to_string(),
            subject_id: row.subject_id.0,
            evaluator_id: evaluator_id.0,
            criterion_id: row.criterion_id.0,
            score: row.values.score,
            comment: row.values.comment.clone(),
            choice: row.values.choice.clone(),
            attempt: row.values.attempt.map(i64::from),
            note: row.note.clone(),
        }
    }
}
