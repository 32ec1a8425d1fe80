//! Structured job outcome record, persisted as JSON text.
//!
//! Known fields are explicit; submitter- or agent-specific extras ride along
//! in the flattened extension map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the repository test run (npm test) after a successful agent run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestOutcome {
    pub passed: bool,
    /// Captured combined output, truncated by the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Facts about the agent invocation itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CodexOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub timed_out: bool,
}

/// One continuation prompt sent after the initial run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Continuation {
    pub prompt: String,
    pub at: DateTime<Utc>,
}

/// Result record written when a job reaches a terminal or paused state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,

    #[serde(default)]
    pub pushed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex: Option<CodexOutcome>,

    /// Prompt a client asked the worker to continue with (consumed on claim)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_prompt: Option<String>,

    /// Continuation history, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub continuations: Vec<Continuation>,

    /// Mirror of the newest `continuations` entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_continuation: Option<Continuation>,

    /// Id of the upstream job whose failure cascaded into this cancellation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResultSummary {
    /// Summary describing a cascade cancellation caused by `upstream`.
    pub fn cascade_from(upstream_id: &str, upstream_status: &str) -> Self {
        Self {
            error: Some(format!(
                "cancelled: upstream job {} is {}",
                upstream_id, upstream_status
            )),
            cancelled_by: Some(upstream_id.to_string()),
            ..Default::default()
        }
    }

    /// Append a continuation prompt, keeping `last_continuation` in sync.
    pub fn push_continuation(&mut self, prompt: &str) {
        let entry = Continuation {
            prompt: prompt.to_string(),
            at: Utc::now(),
        };
        self.continuations.push(entry.clone());
        self.last_continuation = Some(entry);
    }

    pub fn timed_out(&self) -> bool {
        self.codex.as_ref().map(|c| c.timed_out).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cascade_summary_names_upstream() {
        let summary = ResultSummary::cascade_from("abc", "failed");
        assert_eq!(summary.cancelled_by.as_deref(), Some("abc"));
        assert!(summary.error.as_deref().unwrap().contains("abc"));
    }

    #[test]
    fn continuation_mirrors_last_entry() {
        let mut summary = ResultSummary::default();
        summary.push_continuation("first");
        summary.push_continuation("second");
        assert_eq!(summary.continuations.len(), 2);
        assert_eq!(
            summary.last_continuation.as_ref().map(|c| c.prompt.as_str()),
            Some("second")
        );
    }

    #[test]
    fn extension_fields_survive_round_trip() {
        let raw = r#"{"error":null,"pushed":false,"review_url":"https://x"}"#;
        let summary: ResultSummary = serde_json::from_str(raw).unwrap();
        let back = serde_json::to_string(&summary).unwrap();
        assert!(back.contains("review_url"));
    }
}
