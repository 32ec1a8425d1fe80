use serde::{Deserialize, Serialize};

use super::Job;

/// Which standard stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdout" => Some(LogStream::Stdout),
            "stderr" => Some(LogStream::Stderr),
            _ => None,
        }
    }
}

/// Domain events fanned out by the event bus and mirrored onto `/events`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    JobCreated(Job),
    JobUpdated(Job),
    JobDeleted { id: String },
    WorktreeChanged,
    LogAppended {
        job_id: String,
        stream: LogStream,
        text: String,
    },
}

impl Event {
    /// Event name used on the wire (`event:` line of the SSE frame).
    pub fn name(&self) -> &'static str {
        match self {
            Event::JobCreated(_) => "job_created",
            Event::JobUpdated(_) => "job_updated",
            Event::JobDeleted { .. } => "job_deleted",
            Event::WorktreeChanged => "worktree_changed",
            Event::LogAppended { .. } => "log_appended",
        }
    }

    /// JSON payload for the `data:` line of the SSE frame.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Event::JobCreated(job) | Event::JobUpdated(job) => {
                serde_json::to_value(job).unwrap_or(serde_json::Value::Null)
            }
            Event::JobDeleted { id } => serde_json::json!({ "id": id }),
            Event::WorktreeChanged => serde_json::json!({}),
            Event::LogAppended {
                job_id,
                stream,
                text,
            } => serde_json::json!({
                "job_id": job_id,
                "stream": stream,
                "text": text,
            }),
        }
    }
}
