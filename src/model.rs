//! Domain types shared across the storage, runner, and scheduler layers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recurrence::RecurrenceRule;

/// A named, recurring instruction to run a collection of API tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub owner_id: String,
    /// Unique per owner.
    pub name: String,
    pub collection_id: Uuid,
    pub rule: RecurrenceRule,
    pub notify: NotifySettings,
    /// Set only by the dispatcher after a completed execution.
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Report delivery settings for a schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifySettings {
    pub enabled: bool,
    pub recipient: Option<String>,
}

/// A group of API tests, owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub owner_id: String,
    /// Unique per owner.
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One HTTP request definition inside a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: Uuid,
    pub collection_id: Uuid,
    /// Unique within the owning collection.
    pub name: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Informational; success classification is status-range based.
    pub expected_status: Option<u16>,
    /// Stable display order within the collection.
    pub position: i64,
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    /// Assigned by the staleness reaper when a run never completed.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(anyhow::anyhow!("unknown run status '{}'", other)),
        }
    }
}

/// One execution instance of a collection, ad hoc or schedule-triggered.
///
/// Invariant: `success_count + failure_count == total_tests` once
/// `status == Completed`, never while `Running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub owner_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_tests: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub total_duration_ms: i64,
}

/// Outcome of one test within a run.
///
/// Invariant: `error.is_some()` iff the request could not be completed at
/// the transport level; a completed request with a non-2xx/3xx status is a
/// normal result carrying that status code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Uuid,
    pub run_id: Uuid,
    pub test_id: Uuid,
    /// 0 is reserved for transport failure.
    pub status_code: u16,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub response_body: Option<String>,
}
