//! Single job execution logic.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::{AgentInvocation, AgentRunner, ExecResult, LogChunk};
use crate::app::AppContext;
use crate::domain::{
    CodexOutcome, Event, Job, JobStatus, PushMode, ResultSummary, TestOutcome,
};
use crate::error::{OrchestratorError, Result};

/// Cap on captured test output persisted into the summary.
const TEST_OUTPUT_CAP: usize = 4000;

/// Render the agent prompt from the job spec.
pub fn render_prompt(job: &Job) -> String {
    let mut prompt = job.spec.prompt.trim().to_string();
    if !job.spec.context_files.is_empty() {
        prompt.push_str("\n\nRelevant files to start from:\n");
        for file in &job.spec.context_files {
            prompt.push_str(&format!("- {}\n", file));
        }
    }
    prompt
}

/// Drive one claimed job to its next resting state and report it.
///
/// Execution failures never escape: they land in the result summary and the
/// job completes as failed. Only a failure to *write* the completion back to
/// the store is returned to the caller.
pub async fn handle_job(
    ctx: &AppContext,
    runner: &dyn AgentRunner,
    job: Job,
) -> Result<()> {
    let job_id = job.id.clone();
    info!("handling job {} ({})", job_id, job.branch_name);

    let outcome = match execute(ctx, runner, &job).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("job {} failed: {}", job_id, e);
            let mut summary = job.result_summary.clone().unwrap_or_default();
            summary.error = Some(e.to_string());
            JobOutcome {
                status: JobStatus::Failed,
                summary,
                session_id: None,
                worktree_removed: false,
            }
        }
    };

    let updated = ctx.store.update_status(
        &job_id,
        outcome.status,
        Some(&outcome.summary),
        Some(&[JobStatus::Running, JobStatus::AwaitingInput]),
        outcome.session_id.as_deref(),
    )?;
    ctx.bus.emit(Event::JobUpdated(updated));
    if outcome.worktree_removed {
        ctx.bus.emit(Event::WorktreeChanged);
    }
    Ok(())
}

struct JobOutcome {
    status: JobStatus,
    summary: ResultSummary,
    session_id: Option<String>,
    worktree_removed: bool,
}

async fn execute(
    ctx: &AppContext,
    runner: &dyn AgentRunner,
    job: &Job,
) -> Result<JobOutcome> {
    // 1/2: materialise the working directory. Without isolation the job runs
    // in place and no git operation is ever attempted.
    let cwd: PathBuf = if !job.use_worktree {
        PathBuf::from(&job.repo_url)
    } else {
        let worktree_path = job
            .worktree_path
            .as_ref()
            .ok_or_else(|| {
                OrchestratorError::Validation(format!(
                    "job {} uses a worktree but has no path",
                    job.id
                ))
            })
            .map(PathBuf::from)?;
        let repo_path = ctx.worktrees.ensure_repo_path(&job.repo_url)?;
        ctx.worktrees
            .acquire(&repo_path, &job.base_ref, &job.branch_name, &worktree_path)?;
        worktree_path
    };

    // Stream agent output into the log table as it arrives.
    let (log_tx, log_rx) = mpsc::unbounded_channel::<LogChunk>();
    let log_pump = spawn_log_pump(ctx, &job.id, log_rx);

    // 3: pick execution mode.
    let prior = job.result_summary.clone().unwrap_or_default();
    let mut summary = prior.clone();
    summary.continue_prompt = None;
    summary.error = None;

    let mut invocation =
        AgentInvocation::new(cwd.clone(), render_prompt(job), ctx.config.agent_timeout);
    invocation.log_tx = Some(log_tx);

    let result: ExecResult = if job.resume_requested && job.session_id.is_some() {
        let prompt = prior
            .continue_prompt
            .clone()
            .unwrap_or_else(|| render_prompt(job));
        summary.push_continuation(&prompt);
        invocation.prompt = prompt;
        invocation.resume_session = job.session_id.clone();
        ctx.store.clear_resume_hints(&job.id)?;
        runner.resume(invocation).await?
    } else if prior.continue_prompt.is_some() && job.session_id.is_some() {
        let prompt = prior.continue_prompt.clone().unwrap_or_default();
        summary.push_continuation(&prompt);
        invocation.prompt = prompt;
        invocation.resume_session = job.session_id.clone();
        runner.resume(invocation).await?
    } else {
        runner.exec(invocation).await?
    };

    log_pump.await.ok();

    let session_id = result.session_id.clone().or_else(|| job.session_id.clone());
    summary.codex = Some(CodexOutcome {
        session_id: session_id.clone(),
        exit_code: result.exit_code,
        duration_ms: Some(result.duration_ms),
        timed_out: result.timed_out,
    });

    // 4: the agent paused for input. Keep the worktree.
    if result.awaiting_input {
        return Ok(JobOutcome {
            status: JobStatus::AwaitingInput,
            summary,
            session_id,
            worktree_removed: false,
        });
    }

    // 5: plain failure.
    if !result.success {
        summary.error = result
            .error
            .clone()
            .or_else(|| Some("agent failed".to_string()));
        return Ok(JobOutcome {
            status: JobStatus::Failed,
            summary,
            session_id,
            worktree_removed: false,
        });
    }

    // 6: commit and push whatever the agent left behind.
    if job.use_worktree {
        let dirty = !ctx.worktrees.status_porcelain(&cwd)?.is_empty();
        if dirty {
            let message = format!("Codex job {}", job.id);
            let commit = ctx.worktrees.commit_all(&cwd, &message)?;
            summary.commit_hash = Some(commit);
        } else if let Ok(head) = ctx.worktrees.head_commit(&cwd) {
            summary.commit_hash = Some(head);
        }

        if job.push_mode == PushMode::Always {
            ctx.worktrees.push_upstream(&cwd, &job.branch_name)?;
            summary.pushed = true;
        }
    }

    // 7: honour the repository's own test suite when it has one.
    let mut status = JobStatus::Done;
    if let Some(tests) = run_npm_tests(&cwd).await? {
        if !tests.passed {
            summary.error = Some("npm test failed".to_string());
            status = JobStatus::Failed;
        }
        summary.tests = Some(tests);
    }

    // 8: cleanup before the final status write, so a crash in between leaves
    // a running job with a missing worktree and the retry is a no-op.
    let mut worktree_removed = false;
    if status == JobStatus::Done && job.use_worktree && job.push_mode != PushMode::Never {
        ctx.worktrees.remove(&cwd)?;
        worktree_removed = true;
    }

    Ok(JobOutcome {
        status,
        summary,
        session_id,
        worktree_removed,
    })
}

fn spawn_log_pump(
    ctx: &AppContext,
    job_id: &str,
    mut rx: mpsc::UnboundedReceiver<LogChunk>,
) -> tokio::task::JoinHandle<()> {
    let store = ctx.store.clone();
    let bus = ctx.bus.clone();
    let job_id = job_id.to_string();
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            match store.append_log(&job_id, chunk.stream, &chunk.text, None) {
                Ok(entry) => bus.emit(Event::LogAppended {
                    job_id: entry.job_id,
                    stream: entry.stream,
                    text: entry.text,
                }),
                Err(e) => {
                    warn!("dropping log line for {}: {}", job_id, e);
                }
            }
        }
    })
}

/// Run `npm test` when package.json declares a non-empty test script.
/// Returns None when the repository has no test script at all.
async fn run_npm_tests(cwd: &Path) -> Result<Option<TestOutcome>> {
    let manifest = cwd.join("package.json");
    let Ok(raw) = std::fs::read_to_string(&manifest) else {
        return Ok(None);
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return Ok(None);
    };
    let has_test_script = parsed
        .get("scripts")
        .and_then(|s| s.get("test"))
        .and_then(|t| t.as_str())
        .map(|t| !t.trim().is_empty())
        .unwrap_or(false);
    if !has_test_script {
        return Ok(None);
    }

    info!("running npm test in {}", cwd.display());
    let output = tokio::process::Command::new("npm")
        .arg("test")
        .env("CI", "1")
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| OrchestratorError::io(cwd, e))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    if combined.len() > TEST_OUTPUT_CAP {
        combined.truncate(TEST_OUTPUT_CAP);
    }

    Ok(Some(TestOutcome {
        passed: output.status.success(),
        output: Some(combined),
    }))
}
