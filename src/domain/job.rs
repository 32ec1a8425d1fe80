use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::summary::ResultSummary;

/// The status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker (and for its dependencies)
    Pending,
    /// Claimed by a worker and executing
    Running,
    /// The agent stopped and asked for human input; resumable
    AwaitingInput,
    /// Completed successfully
    Done,
    /// Execution failed
    Failed,
    /// Cancelled by a client or by an upstream failure
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::AwaitingInput => "awaiting_input",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "awaiting_input" => Some(JobStatus::AwaitingInput),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Protected jobs must not be deleted and their worktrees must not be
    /// reclaimed; no other job sharing their branch may be claimed.
    pub fn is_protected(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::AwaitingInput)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the worker pushes the job branch after a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushMode {
    #[default]
    Always,
    Never,
}

impl PushMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushMode::Always => "always",
            PushMode::Never => "never",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(PushMode::Always),
            "never" => Some(PushMode::Never),
            _ => None,
        }
    }
}

/// Task specification supplied by the submitter. Opaque to the scheduler;
/// rendered into the agent prompt by the worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSpec {
    /// Natural-language task prompt
    pub prompt: String,

    /// Repository-relative files the agent should look at first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_files: Vec<String>,

    /// Submitter-defined extension fields, carried verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A job represents one agent invocation against one branch of one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique identifier (UUID v4)
    pub id: String,

    /// Origin repository: remote URL or local path
    pub repo_url: String,

    /// Ref the job branch is forked from (e.g. `origin/main`)
    pub base_ref: String,

    /// Branch the agent works on
    pub branch_name: String,

    /// Absolute path of the isolated checkout; None when running in place
    pub worktree_path: Option<String>,

    /// Routing tag partitioning the queue across worker classes
    pub worker_type: String,

    /// Optional grouping tags
    #[serde(default)]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub feature_part: Option<String>,

    pub push_mode: PushMode,

    /// When false the job runs in place at `repo_url` with no git isolation
    pub use_worktree: bool,

    pub status: JobStatus,

    pub spec: JobSpec,

    /// Written on transition to a terminal or paused state
    #[serde(default)]
    pub result_summary: Option<ResultSummary>,

    /// Agent session handle for resume (stored as `conversation_id`)
    #[serde(default)]
    pub session_id: Option<String>,

    /// Client hint: resume the stored session instead of starting fresh
    #[serde(default)]
    pub resume_requested: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for job creation; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct CreateJobInput {
    pub repo_url: String,
    pub base_ref: String,
    pub branch_name: String,
    pub worktree_path: Option<String>,
    pub worker_type: String,
    pub feature_id: Option<String>,
    pub feature_part: Option<String>,
    pub push_mode: PushMode,
    pub use_worktree: bool,
    pub spec: JobSpec,
    pub depends_on: Vec<String>,
    pub session_id: Option<String>,
    pub resume_requested: bool,
}

/// Filters accepted by `ListJobs`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub worker_type: Option<String>,
    pub feature_id: Option<String>,
}

/// One append-only log record streamed from a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub job_id: String,
    pub seq: i64,
    pub stream: super::LogStream,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
