//! Behavior switches for evaluation operations
//!
//! Defaults match the documented behavior; every switch can be overridden
//! from the environment:
//!
//! - `EVALHUB_LOCK_SCOPE`: `relationships` (default) | `all`
//! - `EVALHUB_PROGRESS_COUNTING`: `distinct` (default) | `raw`
//! - `EVALHUB_TRANSITIONS`: `unchecked` (default) | `strict`

use evalhub_state::LockScope;
use serde::{Deserialize, Serialize};

use crate::error::{EvaluationError, Result};

const LOCK_SCOPE_VAR: &str = "EVALHUB_LOCK_SCOPE";
const PROGRESS_COUNTING_VAR: &str = "EVALHUB_PROGRESS_COUNTING";
const TRANSITIONS_VAR: &str = "EVALHUB_TRANSITIONS";

/// How completed cells are counted for progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressCounting {
    /// Distinct (subject, criterion) cells inside the event's current cross product
    #[default]
    Distinct,
    /// Every stored result row of the evaluator
    RawRows,
}

/// Which assignment status writes are accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Any status may be written
    #[default]
    Unchecked,
    /// Only lifecycle edges and same-status rewrites
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub lock_scope: LockScope,
    pub progress_counting: ProgressCounting,
    pub transition_policy: TransitionPolicy,
}

impl EvaluationConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Read overrides through a lookup function; unset keys keep defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(LOCK_SCOPE_VAR) {
            config.lock_scope = match raw.trim().to_lowercase().as_str() {
                "relationships" => LockScope::Relationships,
                "all" | "all_fields" => LockScope::AllFields,
                _ => return Err(invalid(LOCK_SCOPE_VAR, &raw)),
            };
        }
        if let Some(raw) = lookup(PROGRESS_COUNTING_VAR) {
            config.progress_counting = match raw.trim().to_lowercase().as_str() {
                "distinct" => ProgressCounting::Distinct,
                "raw" | "raw_rows" => ProgressCounting::RawRows,
                _ => return Err(invalid(PROGRESS_COUNTING_VAR, &raw)),
            };
        }
        if let Some(raw) = lookup(TRANSITIONS_VAR) {
            config.transition_policy = match raw.trim().to_lowercase().as_str() {
                "unchecked" => TransitionPolicy::Unchecked,
                "strict" => TransitionPolicy::Strict,
                _ => return Err(invalid(TRANSITIONS_VAR, &raw)),
            };
        }

        Ok(config)
    }

    pub fn with_lock_scope(mut self, scope: LockScope) -> Self {
        self.lock_scope = scope;
        self
    }

    pub fn with_progress_counting(mut self, counting: ProgressCounting) -> Self {
        self.progress_counting = counting;
        self
    }

    pub fn with_transition_policy(mut self, policy: TransitionPolicy) -> Self {
        self.transition_policy = policy;
        self
    }
}

fn invalid(var: &str, value: &str) -> EvaluationError {
    EvaluationError::InvalidInput(format!("unsupported value '{value}' for {var}"))
}
