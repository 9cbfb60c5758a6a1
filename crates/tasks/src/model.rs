//! Task and run model
//!
//! ## Run Lifecycle
//!
//! - scheduled → started → success | failed | canceled
//!
//! Runs live in the transactional tier while active and for a few days after
//! they finish. Finished runs are also recorded as points in the tasks system
//! bucket, where they stay for much longer. A run keeps its ID in both tiers.

use chrono::{DateTime, Utc};
use chronicle_core::PlatformId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ========== Archival field labels ==========

/// Measurement holding recorded runs
pub const RUNS_MEASUREMENT: &str = "runs";
/// Run identity field
pub const RUN_ID_FIELD: &str = "runID";
/// Task name field
pub const NAME_FIELD: &str = "name";
/// Scheduled-for field (RFC-3339)
pub const SCHEDULED_FOR_FIELD: &str = "scheduledFor";
/// Started-at field (RFC-3339 with fractional seconds)
pub const STARTED_AT_FIELD: &str = "startedAt";
/// Finished-at field (RFC-3339 with fractional seconds)
pub const FINISHED_AT_FIELD: &str = "finishedAt";
/// Requested-at field (RFC-3339 with fractional seconds)
pub const REQUESTED_AT_FIELD: &str = "requestedAt";
/// JSON-encoded log array
pub const LOG_FIELD: &str = "logs";
/// Rendered script text
pub const FLUX_FIELD: &str = "flux";
/// Trace identity field
pub const TRACE_ID_FIELD: &str = "ot_trace_id";
/// Trace sampling tag
pub const TRACE_SAMPLED_TAG: &str = "ot_trace_sampled";
/// Task identity tag
pub const TASK_ID_TAG: &str = "taskID";
/// Run status tag
pub const STATUS_TAG: &str = "status";

/// A scheduled script owned by an organization
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task identity
    pub id: PlatformId,
    /// Owning organization
    #[serde(rename = "orgID")]
    pub org_id: PlatformId,
    /// Display name
    pub name: String,
    /// Script source
    #[serde(default)]
    pub flux: String,
}

/// Run lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Waiting for its scheduled time
    Scheduled,
    /// Executing
    Started,
    /// Finished without error
    Success,
    /// Finished with an error
    Failed,
    /// Stopped before finishing
    Canceled,
}

impl RunStatus {
    /// Canonical string form
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Scheduled => "scheduled",
            RunStatus::Started => "started",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }

    /// Whether the run has stopped executing
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Canceled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(RunStatus::Scheduled),
            "started" => Ok(RunStatus::Started),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "canceled" => Ok(RunStatus::Canceled),
            other => Err(format!("unknown run status {:?}", other)),
        }
    }
}

/// One log line emitted by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEvent {
    /// Run that emitted the line
    #[serde(rename = "runID", default)]
    pub run_id: PlatformId,
    /// When the line was emitted
    pub time: DateTime<Utc>,
    /// Message text
    pub message: String,
}

/// One execution of a task
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Run identity; invalid while unknown
    pub id: PlatformId,
    /// Owning task
    #[serde(rename = "taskID")]
    pub task_id: PlatformId,
    /// Lifecycle state, if known
    pub status: Option<RunStatus>,
    /// Logical time the run executes for
    pub scheduled_for: DateTime<Utc>,
    /// When a manual run was requested
    pub requested_at: Option<DateTime<Utc>>,
    /// When execution began
    pub started_at: Option<DateTime<Utc>>,
    /// When execution ended
    pub finished_at: Option<DateTime<Utc>>,
    /// Rendered script text
    #[serde(default)]
    pub flux: String,
    /// Trace identity; empty when untraced
    #[serde(default)]
    pub trace_id: String,
    /// Whether the trace was sampled
    #[serde(default)]
    pub is_sampled: bool,
    /// Log lines
    #[serde(default)]
    pub log: Vec<RunLogEvent>,
}

impl Run {
    /// A run of `task_id` scheduled for `scheduled_for`
    pub fn new(id: PlatformId, task_id: PlatformId, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            id,
            task_id,
            scheduled_for,
            ..Self::default()
        }
    }

    /// Set the status
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Filter for run listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    /// Task whose runs are listed
    pub task: PlatformId,
    /// Only runs with an ID greater than this
    pub after: Option<PlatformId>,
    /// Page size; zero means the default, negative is rejected
    pub limit: i64,
    /// RFC-3339 lower bound on scheduled-for (exclusive)
    pub after_time: Option<String>,
    /// RFC-3339 upper bound on scheduled-for (exclusive)
    pub before_time: Option<String>,
}

impl RunFilter {
    /// All runs of `task` with the default page size
    pub fn task(task: PlatformId) -> Self {
        Self {
            task,
            ..Self::default()
        }
    }

    /// Set the page size
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Filter for log lookups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Task whose logs are listed
    pub task: PlatformId,
    /// Restrict to one run
    pub run: Option<PlatformId>,
}
