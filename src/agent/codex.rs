//! Codex CLI adapter.
//!
//! Runs `codex exec --json` (or `codex exec resume <session>` for
//! continuations) as a child process. Output is captured line by line and
//! simultaneously forwarded to this process's stderr; stdout stays clean for
//! machine consumers of the orchestrator itself.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::runner::{AgentInvocation, AgentRunner, ExecResult, LogChunk};
use super::session::{extract_session_id, find_rollout_session};
use crate::domain::LogStream;
use crate::error::{OrchestratorError, Result};

/// Grace period between SIGTERM and SIGKILL on timeout.
const KILL_GRACE: Duration = Duration::from_secs(5);

pub struct CodexRunner {
    binary: String,
    reasoning_effort: Option<String>,
}

impl CodexRunner {
    pub fn new(binary: impl Into<String>, reasoning_effort: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            reasoning_effort,
        }
    }

    /// Codex CLI format: `codex exec [resume <session>] [OPTIONS] -- PROMPT`
    fn build_args(&self, invocation: &AgentInvocation) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if let Some(session) = &invocation.resume_session {
            args.push("resume".to_string());
            args.push(session.clone());
        }
        args.push("--json".to_string());

        if let Some(sandbox) = &invocation.sandbox {
            args.push("--sandbox".to_string());
            args.push(sandbox.clone());
        }
        if let Some(approval) = &invocation.approval {
            args.push("--ask-for-approval".to_string());
            args.push(approval.clone());
        }
        if let Some(effort) = &self.reasoning_effort {
            args.push("-c".to_string());
            args.push(format!("model_reasoning_effort={}", effort));
        }
        for (key, value) in &invocation.config_overrides {
            args.push("-c".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push("--".to_string());
        args.push(invocation.prompt.clone());
        args
    }

    async fn run(&self, invocation: AgentInvocation) -> Result<ExecResult> {
        let args = self.build_args(&invocation);
        let started_at = Utc::now();
        let started = std::time::Instant::now();

        debug!("spawning {} in {}", self.binary, invocation.cwd.display());
        let mut child = Command::new(&self.binary)
            .args(&args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OrchestratorError::ExecFailure {
                message: format!("failed to spawn {}: {}", self.binary, e),
                timed_out: false,
            })?;

        let stdout = child.stdout.take().expect("stdout not captured");
        let stderr = child.stderr.take().expect("stderr not captured");
        let stdout_task = tokio::spawn(drain_lines(
            stdout,
            LogStream::Stdout,
            invocation.log_tx.clone(),
        ));
        let stderr_task = tokio::spawn(drain_lines(
            stderr,
            LogStream::Stderr,
            invocation.log_tx.clone(),
        ));

        let mut timed_out = false;
        let status = match tokio::time::timeout(invocation.timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                return Err(OrchestratorError::ExecFailure {
                    message: format!("waiting for agent failed: {}", e),
                    timed_out: false,
                });
            }
            Err(_) => {
                warn!(
                    "agent exceeded {}ms, terminating",
                    invocation.timeout.as_millis()
                );
                timed_out = true;
                terminate(&mut child).await;
                None
            }
        };

        let (stdout_buf, stdout_session) = stdout_task.await.unwrap_or_default();
        let (stderr_buf, stderr_session) = stderr_task.await.unwrap_or_default();

        let exit_code = status.and_then(|s| s.code());
        let success = !timed_out && status.map(|s| s.success()).unwrap_or(false);
        let awaiting_input = infer_awaiting(success, timed_out, &stderr_buf);

        let session_id = stdout_session
            .or(stderr_session)
            .or_else(|| find_rollout_session(started_at));

        let error = if timed_out {
            Some(format!(
                "agent timed out after {}ms",
                invocation.timeout.as_millis()
            ))
        } else if !success {
            Some(match exit_code {
                Some(code) => format!("agent exited with code {}", code),
                None => "agent terminated by signal".to_string(),
            })
        } else {
            None
        };

        Ok(ExecResult {
            success,
            exit_code,
            stdout: stdout_buf,
            stderr: stderr_buf,
            session_id,
            awaiting_input,
            duration_ms: started.elapsed().as_millis() as u64,
            timed_out,
            error,
        })
    }
}

#[async_trait]
impl AgentRunner for CodexRunner {
    async fn exec(&self, mut invocation: AgentInvocation) -> Result<ExecResult> {
        invocation.resume_session = None;
        self.run(invocation).await
    }

    async fn resume(&self, invocation: AgentInvocation) -> Result<ExecResult> {
        if invocation.resume_session.is_none() {
            return Err(OrchestratorError::Validation(
                "resume requires a session id".into(),
            ));
        }
        self.run(invocation).await
    }
}

/// Read lines until EOF: buffer them, mirror them to our stderr, feed the
/// worker's log channel, and watch for a session id.
async fn drain_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: LogStream,
    log_tx: Option<mpsc::UnboundedSender<LogChunk>>,
) -> (String, Option<String>) {
    let mut lines = BufReader::new(reader).lines();
    let mut buffer = String::new();
    let mut session = None;

    while let Ok(Some(line)) = lines.next_line().await {
        eprintln!("[codex:{}] {}", stream.as_str(), line);
        if session.is_none() {
            session = extract_session_id(&line);
        }
        if let Some(tx) = &log_tx {
            let _ = tx.send(LogChunk {
                stream,
                text: line.clone(),
            });
        }
        buffer.push_str(&line);
        buffer.push('\n');
    }
    (buffer, session)
}

/// The agent signals "I need input" only through its stderr wording.
fn infer_awaiting(success: bool, timed_out: bool, stderr: &str) -> bool {
    if success || timed_out {
        return false;
    }
    let lower = stderr.to_ascii_lowercase();
    lower.contains("awaiting") || lower.contains("waiting for input")
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
                return;
            }
            warn!("agent ignored SIGTERM, killing");
        }
    }
    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn invocation() -> AgentInvocation {
        AgentInvocation::new(
            PathBuf::from("/tmp"),
            "fix the tests".to_string(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn exec_args_end_with_prompt_after_separator() {
        let runner = CodexRunner::new("codex", None);
        let args = runner.build_args(&invocation());
        assert_eq!(args[0], "exec");
        assert_eq!(args[1], "--json");
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(args[sep + 1], "fix the tests");
    }

    #[test]
    fn resume_args_name_the_session() {
        let runner = CodexRunner::new("codex", Some("high".to_string()));
        let mut inv = invocation();
        inv.resume_session = Some("sess-9".to_string());
        let args = runner.build_args(&inv);
        assert_eq!(&args[0..3], &["exec", "resume", "sess-9"]);
        assert!(args.contains(&"model_reasoning_effort=high".to_string()));
    }

    #[test]
    fn sandbox_and_overrides_are_forwarded() {
        let runner = CodexRunner::new("codex", None);
        let mut inv = invocation();
        inv.sandbox = Some("workspace-write".to_string());
        inv.config_overrides = vec![("model".to_string(), "o4".to_string())];
        let args = runner.build_args(&inv);
        let idx = args.iter().position(|a| a == "--sandbox").unwrap();
        assert_eq!(args[idx + 1], "workspace-write");
        assert!(args.contains(&"model=o4".to_string()));
    }

    #[test]
    fn awaiting_is_inferred_only_from_failed_runs() {
        assert!(infer_awaiting(false, false, "Awaiting further instructions"));
        assert!(infer_awaiting(false, false, "agent is waiting for input"));
        assert!(!infer_awaiting(true, false, "awaiting"));
        assert!(!infer_awaiting(false, true, "awaiting"));
        assert!(!infer_awaiting(false, false, "plain failure"));
    }

    #[tokio::test]
    async fn resume_without_session_is_rejected() {
        let runner = CodexRunner::new("codex", None);
        let err = runner.resume(invocation()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }
}
