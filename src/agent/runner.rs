//! Generic agent runner trait

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::LogStream;
use crate::error::Result;

/// One captured output line, forwarded to the caller as it arrives.
#[derive(Debug, Clone)]
pub struct LogChunk {
    pub stream: LogStream,
    pub text: String,
}

/// Everything needed to launch one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Working directory of the child process
    pub cwd: PathBuf,
    /// Rendered task prompt
    pub prompt: String,
    /// Session to resume; None starts a fresh conversation
    pub resume_session: Option<String>,
    /// Value for the agent's own sandbox flag, passed through verbatim
    pub sandbox: Option<String>,
    /// Value for the agent's approval-policy flag
    pub approval: Option<String>,
    /// `-c key=value` style config overrides
    pub config_overrides: Vec<(String, String)>,
    /// Wall-clock limit; SIGTERM at T, SIGKILL five seconds later
    pub timeout: Duration,
    /// Live line feed back to the worker; None discards the feed
    pub log_tx: Option<mpsc::UnboundedSender<LogChunk>>,
}

impl AgentInvocation {
    pub fn new(cwd: PathBuf, prompt: String, timeout: Duration) -> Self {
        Self {
            cwd,
            prompt,
            resume_session: None,
            sandbox: None,
            approval: None,
            config_overrides: Vec::new(),
            timeout,
            log_tx: None,
        }
    }
}

/// Outcome of one agent invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Conversation handle usable for `resume`
    pub session_id: Option<String>,
    /// The agent stopped to ask for input rather than failing
    pub awaiting_input: bool,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub error: Option<String>,
}

/// Trait for agent CLI adapters.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Start a fresh conversation in `invocation.cwd`.
    async fn exec(&self, invocation: AgentInvocation) -> Result<ExecResult>;

    /// Resume the conversation named by `invocation.resume_session`.
    async fn resume(&self, invocation: AgentInvocation) -> Result<ExecResult>;
}
