use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a check suite, check run or job step.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Completed,
    InProgress,
    Pending,
    Queued,
    Requested,
    Waiting,
    #[serde(other)]
    Unknown,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::InProgress => "in_progress",
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Requested => "requested",
            Self::Waiting => "waiting",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Terminal outcome of a check suite, check run or job step.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    ActionRequired,
    Cancelled,
    Failure,
    Neutral,
    Skipped,
    Stale,
    StartupFailure,
    Success,
    TimedOut,
    #[serde(other)]
    Unknown,
}

impl CheckConclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionRequired => "action_required",
            Self::Cancelled => "cancelled",
            Self::Failure => "failure",
            Self::Neutral => "neutral",
            Self::Skipped => "skipped",
            Self::Stale => "stale",
            Self::StartupFailure => "startup_failure",
            Self::Success => "success",
            Self::TimedOut => "timed_out",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this conclusion should mark the corresponding span as an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::StartupFailure | Self::TimedOut | Self::Cancelled)
    }
}

impl fmt::Display for CheckConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// All workflow runs triggered by one event on one commit, with aggregate
/// timestamps over the runs that survived filtering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowEvent {
    pub workflow_runs: Vec<WorkflowRun>,
    /// Earliest `created_at` among the workflow runs, if any.
    pub started_at: Option<DateTime<Utc>>,
    /// Latest job completion among the workflow runs, if any.
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub event: String,
    pub workflow_name: String,
    pub url: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub created_at: DateTime<Utc>,
    /// Latest `completed_at` among this run's jobs. `None` when every job was
    /// excluded, e.g. a run where all jobs were skipped.
    pub completed_at: Option<DateTime<Utc>>,
    pub jobs: Vec<WorkflowJob>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowJob {
    pub id: Option<u64>,
    pub name: String,
    pub url: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    /// Only available when jobs are fetched from the REST API.
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// First label of the runner, e.g. `ubuntu-latest`.
    pub runner_label: Option<String>,
    pub run_attempt: Option<u64>,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStep {
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
