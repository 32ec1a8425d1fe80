//! Job endpoints: create, query, transition, delete.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::app::AppContext;
use crate::domain::{
    CreateJobInput, Event, JobFilter, JobSpec, JobStatus, LogStream, PushMode, ResultSummary,
    derive_branch_name, feature_branch_name, worktree_dir_name,
};
use crate::error::OrchestratorError;
use crate::server::{HandlerResult, parse_query, query_value};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub repo_url: String,
    #[serde(default)]
    pub base_ref: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub worker_type: Option<String>,
    #[serde(default)]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub feature_part: Option<String>,
    #[serde(default)]
    pub push_mode: Option<String>,
    #[serde(default)]
    pub use_worktree: Option<bool>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Full task specification; `prompt` alone is accepted as a shorthand
    #[serde(default)]
    pub spec: Option<JobSpec>,
    #[serde(default)]
    pub prompt: Option<String>,
}

fn bad_json(e: serde_json::Error) -> OrchestratorError {
    OrchestratorError::Validation(format!("invalid json: {}", e))
}

pub fn create(ctx: &AppContext, body: &str) -> HandlerResult {
    let req: CreateJobRequest = serde_json::from_str(body).map_err(bad_json)?;

    if req.repo_url.trim().is_empty() {
        return Err(OrchestratorError::Validation("repo_url is required".into()));
    }

    let spec = match (req.spec, req.prompt) {
        (Some(spec), _) => spec,
        (None, Some(prompt)) => JobSpec {
            prompt,
            ..Default::default()
        },
        (None, None) => {
            return Err(OrchestratorError::Validation(
                "spec.prompt is required".into(),
            ));
        }
    };
    if spec.prompt.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "spec.prompt must not be empty".into(),
        ));
    }

    let push_mode = match req.push_mode.as_deref() {
        None => PushMode::default(),
        Some(raw) => PushMode::parse(raw).ok_or_else(|| {
            OrchestratorError::Validation(format!("invalid push_mode {:?}", raw))
        })?,
    };

    let use_worktree = req.use_worktree.unwrap_or(true);

    let branch_name = req
        .branch_name
        .filter(|b| !b.trim().is_empty())
        .or_else(|| {
            req.feature_id
                .as_deref()
                .and_then(feature_branch_name)
        })
        .unwrap_or_else(|| derive_branch_name(&spec.prompt));

    let worktree_path = if use_worktree {
        let dir = worktree_dir_name(&req.repo_url, &branch_name);
        Some(
            ctx.config
                .worktree_base_dir
                .join(dir)
                .display()
                .to_string(),
        )
    } else {
        None
    };

    let job = ctx.store.create_job(CreateJobInput {
        repo_url: req.repo_url,
        base_ref: req
            .base_ref
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "origin/main".to_string()),
        branch_name,
        worktree_path,
        worker_type: req.worker_type.unwrap_or_else(|| "codex".to_string()),
        feature_id: req.feature_id,
        feature_part: req.feature_part,
        push_mode,
        use_worktree,
        spec,
        depends_on: req.depends_on,
        session_id: None,
        resume_requested: false,
    })?;

    ctx.bus.emit(Event::JobCreated(job.clone()));
    Ok((201, serde_json::json!({ "job": job })))
}

pub fn list(ctx: &AppContext, query: &str) -> HandlerResult {
    let pairs = parse_query(query);
    let status = match query_value(&pairs, "status") {
        Some(raw) => Some(JobStatus::parse(raw).ok_or_else(|| {
            OrchestratorError::Validation(format!("invalid status {:?}", raw))
        })?),
        None => None,
    };

    let jobs = ctx.store.list_jobs(&JobFilter {
        status,
        worker_type: query_value(&pairs, "worker_type").map(str::to_string),
        feature_id: query_value(&pairs, "feature_id").map(str::to_string),
    })?;
    Ok((200, serde_json::json!({ "jobs": jobs })))
}

pub fn get(ctx: &AppContext, id: &str) -> HandlerResult {
    let job = ctx.store.get_job(id)?;
    Ok((200, serde_json::json!({ "job": job })))
}

pub fn claim(ctx: &AppContext, query: &str) -> HandlerResult {
    let pairs = parse_query(query);
    let worker_type = query_value(&pairs, "worker_type").unwrap_or("codex");

    match ctx.store.claim_oldest(worker_type)? {
        Some(job) => {
            ctx.bus.emit(Event::JobUpdated(job.clone()));
            Ok((200, serde_json::json!({ "job": job })))
        }
        None => Ok((404, serde_json::json!({ "error": "no_claimable_job" }))),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub status: String,
    #[serde(default)]
    pub result_summary: Option<ResultSummary>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub expected_status: Option<Vec<String>>,
}

pub fn complete(ctx: &AppContext, id: &str, body: &str) -> HandlerResult {
    let req: CompleteRequest = serde_json::from_str(body).map_err(bad_json)?;

    let new_status = JobStatus::parse(&req.status).ok_or_else(|| {
        OrchestratorError::Validation(format!("invalid status {:?}", req.status))
    })?;
    if !new_status.is_terminal() && new_status != JobStatus::AwaitingInput {
        return Err(OrchestratorError::Validation(format!(
            "complete only accepts terminal or awaiting_input statuses, got {:?}",
            req.status
        )));
    }

    let expected: Option<Vec<JobStatus>> = match req.expected_status {
        None => None,
        Some(raw) => Some(
            raw.iter()
                .map(|s| {
                    JobStatus::parse(s).ok_or_else(|| {
                        OrchestratorError::Validation(format!("invalid expected status {:?}", s))
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
    };

    let job = ctx.store.update_status(
        id,
        new_status,
        req.result_summary.as_ref(),
        expected.as_deref(),
        req.session_id.as_deref(),
    )?;
    ctx.bus.emit(Event::JobUpdated(job.clone()));
    Ok((200, serde_json::json!({ "job": job })))
}

#[derive(Debug, Deserialize)]
pub struct AppendLogRequest {
    pub stream: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

pub fn append_log(ctx: &AppContext, id: &str, body: &str) -> HandlerResult {
    let req: AppendLogRequest = serde_json::from_str(body).map_err(bad_json)?;
    let stream = LogStream::parse(&req.stream).ok_or_else(|| {
        OrchestratorError::Validation(format!("invalid stream {:?}", req.stream))
    })?;

    let entry = ctx.store.append_log(id, stream, &req.text, req.timestamp)?;
    ctx.bus.emit(Event::LogAppended {
        job_id: entry.job_id.clone(),
        stream: entry.stream,
        text: entry.text.clone(),
    });
    Ok((200, serde_json::json!({ "log": entry })))
}

pub fn logs(ctx: &AppContext, id: &str) -> HandlerResult {
    let logs = ctx.store.read_logs(id)?;
    Ok((200, serde_json::json!({ "logs": logs })))
}

pub fn dependencies(ctx: &AppContext, id: &str) -> HandlerResult {
    let (depends_on, depended_by) = ctx.store.job_dependencies(id)?;
    Ok((
        200,
        serde_json::json!({ "depends_on": depends_on, "depended_by": depended_by }),
    ))
}

pub fn delete(ctx: &AppContext, id: &str) -> HandlerResult {
    let job = ctx.store.delete_job(id)?;
    ctx.bus.emit(Event::JobDeleted { id: id.to_string() });

    // Take the worktree with it when no other job still points there.
    let mut worktree_removed = false;
    if let Some(path) = &job.worktree_path {
        if !ctx.store.worktree_in_use(path, &[id])? {
            match ctx.worktrees.remove(Path::new(path)) {
                Ok(()) => {
                    worktree_removed = true;
                    ctx.bus.emit(Event::WorktreeChanged);
                }
                Err(e) => warn!("failed to remove worktree {}: {}", path, e),
            }
        }
    }

    Ok((
        200,
        serde_json::json!({
            "status": "ok",
            "job_id": id,
            "worktree_removed": worktree_removed,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ContinueRequest {
    pub prompt: String,
}

/// Drive an awaiting (or plainly failed) job back to pending with a
/// continuation prompt. Timed-out jobs must go through `resume`, which
/// restarts the stored session in a fresh job.
pub fn continue_job(ctx: &AppContext, id: &str, body: &str) -> HandlerResult {
    let req: ContinueRequest = serde_json::from_str(body).map_err(bad_json)?;
    if req.prompt.trim().is_empty() {
        return Err(OrchestratorError::Validation("prompt is required".into()));
    }

    let job = ctx.store.get_job(id)?;
    match job.status {
        JobStatus::AwaitingInput | JobStatus::Failed => {}
        JobStatus::Running => return Err(OrchestratorError::ProtectedState(id.to_string())),
        other => {
            return Err(OrchestratorError::Validation(format!(
                "cannot continue a {} job",
                other
            )));
        }
    }
    if job.session_id.is_none() {
        return Err(OrchestratorError::Validation(
            "job has no stored session to continue".into(),
        ));
    }

    let mut summary = job.result_summary.clone().unwrap_or_default();
    if job.status == JobStatus::Failed && summary.timed_out() {
        return Err(OrchestratorError::Validation(
            "job timed out; use resume instead".into(),
        ));
    }
    summary.continue_prompt = Some(req.prompt.trim().to_string());

    let updated = ctx.store.update_status(
        id,
        JobStatus::Pending,
        Some(&summary),
        Some(&[JobStatus::AwaitingInput, JobStatus::Failed]),
        None,
    )?;
    ctx.bus.emit(Event::JobUpdated(updated.clone()));
    Ok((200, serde_json::json!({ "job": updated })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResumeRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Mint a fresh job that resumes the stored session; used after timeouts,
/// where the original process is gone but the conversation survives.
pub fn resume(ctx: &AppContext, id: &str, body: &str) -> HandlerResult {
    let req: ResumeRequest = if body.trim().is_empty() {
        ResumeRequest::default()
    } else {
        serde_json::from_str(body).map_err(bad_json)?
    };

    let original = ctx.store.get_job(id)?;
    if original.status == JobStatus::Running {
        return Err(OrchestratorError::ProtectedState(id.to_string()));
    }
    let Some(session_id) = original.session_id.clone() else {
        return Err(OrchestratorError::Validation(
            "job has no stored session to resume".into(),
        ));
    };

    let prompt = req
        .prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| "continue".to_string());

    let job = ctx.store.create_job(CreateJobInput {
        repo_url: original.repo_url.clone(),
        base_ref: original.base_ref.clone(),
        branch_name: original.branch_name.clone(),
        worktree_path: original.worktree_path.clone(),
        worker_type: original.worker_type.clone(),
        feature_id: original.feature_id.clone(),
        feature_part: original.feature_part.clone(),
        push_mode: original.push_mode,
        use_worktree: original.use_worktree,
        spec: JobSpec {
            prompt,
            context_files: Vec::new(),
            extra: original.spec.extra.clone(),
        },
        depends_on: Vec::new(),
        session_id: Some(session_id),
        resume_requested: true,
    })?;

    ctx.bus.emit(Event::JobCreated(job.clone()));
    Ok((201, serde_json::json!({ "job": job })))
}

/// Cancel a pending or awaiting job; cascades to pending dependents.
pub fn cancel(ctx: &AppContext, id: &str) -> HandlerResult {
    let job = ctx.store.get_job(id)?;
    if job.status == JobStatus::Running {
        return Err(OrchestratorError::ProtectedState(id.to_string()));
    }

    let mut summary = job.result_summary.clone().unwrap_or_default();
    summary.error = Some("cancelled by client".to_string());

    let updated = ctx.store.update_status(
        id,
        JobStatus::Cancelled,
        Some(&summary),
        Some(&[JobStatus::Pending, JobStatus::AwaitingInput]),
        None,
    )?;
    ctx.bus.emit(Event::JobUpdated(updated.clone()));
    Ok((200, serde_json::json!({ "job": updated })))
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub statuses: Option<Vec<String>>,
    #[serde(default)]
    pub max_age_days: Option<i64>,
}

pub fn cleanup(ctx: &AppContext, body: &str) -> HandlerResult {
    let req: CleanupRequest = if body.trim().is_empty() {
        CleanupRequest::default()
    } else {
        serde_json::from_str(body).map_err(bad_json)?
    };

    let statuses: Option<Vec<JobStatus>> = match req.statuses {
        None => None,
        Some(raw) => Some(
            raw.iter()
                .map(|s| {
                    JobStatus::parse(s).ok_or_else(|| {
                        OrchestratorError::Validation(format!("invalid status {:?}", s))
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
    };

    let removed = ctx.store.delete_jobs(statuses.as_deref(), req.max_age_days)?;
    for job in &removed {
        ctx.bus.emit(Event::JobDeleted { id: job.id.clone() });
    }
    Ok((
        200,
        serde_json::json!({ "removed": removed.iter().map(|j| j.id.clone()).collect::<Vec<_>>() }),
    ))
}
