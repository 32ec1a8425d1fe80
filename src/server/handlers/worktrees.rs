//! Worktree endpoints: enumerate, delete one, sweep orphans.

use std::path::Path;

use crate::app::AppContext;
use crate::domain::Event;
use crate::error::OrchestratorError;
use crate::server::HandlerResult;

pub fn list(ctx: &AppContext) -> HandlerResult {
    let jobs = ctx.store.jobs_with_worktrees()?;
    let entries = ctx.worktrees.list(&jobs)?;
    Ok((200, serde_json::json!({ "worktrees": entries })))
}

pub fn delete(ctx: &AppContext, raw_path: &str) -> HandlerResult {
    let jobs = ctx.store.jobs_with_worktrees()?;
    let entries = ctx.worktrees.list(&jobs)?;

    let entry = entries
        .iter()
        .find(|e| e.path == Path::new(raw_path))
        .ok_or_else(|| OrchestratorError::NotFound(raw_path.to_string()))?;

    if !entry.deletable() {
        return Ok((
            400,
            serde_json::json!({
                "error": "not_deletable",
                "state": entry.state,
                "reasons": entry.blocked_reasons,
            }),
        ));
    }

    ctx.worktrees.remove(&entry.path)?;
    ctx.bus.emit(Event::WorktreeChanged);
    Ok((
        200,
        serde_json::json!({ "status": "ok", "path": entry.path }),
    ))
}

/// Remove every orphaned managed worktree; everything else is reported under
/// `skipped` with the reason that protects it.
pub fn cleanup(ctx: &AppContext) -> HandlerResult {
    let jobs = ctx.store.jobs_with_worktrees()?;
    let entries = ctx.worktrees.list(&jobs)?;

    let mut removed = Vec::new();
    let mut skipped = Vec::new();
    for entry in entries {
        if entry.deletable() {
            match ctx.worktrees.remove(&entry.path) {
                Ok(()) => removed.push(entry.path),
                Err(e) => skipped.push(serde_json::json!({
                    "path": entry.path,
                    "reasons": [e.to_string()],
                })),
            }
        } else {
            skipped.push(serde_json::json!({
                "path": entry.path,
                "state": entry.state,
                "reasons": entry.blocked_reasons,
            }));
        }
    }

    if !removed.is_empty() {
        ctx.bus.emit(Event::WorktreeChanged);
    }
    Ok((
        200,
        serde_json::json!({ "removed": removed, "skipped": skipped }),
    ))
}
