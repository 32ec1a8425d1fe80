//! Administrative batch cleanup: jobs, orphaned worktrees, stale repo caches.
//!
//! Every operation supports a dry run and an interactive confirmation gate
//! before anything destructive happens.

use std::io::Write;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::app::AppContext;
use crate::domain::{Event, JobStatus};
use crate::error::Result;
use crate::git::WorktreeManager;

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupOptions {
    /// Enumerate only, change nothing
    pub dry_run: bool,
    /// Skip the interactive confirmation
    pub assume_yes: bool,
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub skipped: Vec<(String, String)>,
}

impl CleanupReport {
    fn print(&self, noun: &str, dry_run: bool) {
        let verb = if dry_run { "would remove" } else { "removed" };
        println!("{} {} {}(s)", verb, self.removed.len(), noun);
        for item in &self.removed {
            println!("  - {}", item);
        }
        for (item, reason) in &self.skipped {
            println!("  skipped {} ({})", item, reason);
        }
    }
}

fn confirm(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

/// Bulk-delete jobs by status and age. Protected statuses never qualify.
pub fn cleanup_jobs(
    ctx: &AppContext,
    statuses: Option<&[JobStatus]>,
    max_age_days: Option<i64>,
    opts: CleanupOptions,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    let candidates = ctx.store.deletable_jobs(statuses, max_age_days)?;
    if candidates.is_empty() {
        report.print("job", opts.dry_run);
        return Ok(report);
    }

    if opts.dry_run {
        report.removed = candidates.into_iter().map(|j| j.id).collect();
        report.print("job", true);
        return Ok(report);
    }

    if !opts.assume_yes && !confirm(&format!("Delete {} job(s)?", candidates.len())) {
        info!("job cleanup aborted");
        return Ok(report);
    }

    let removed = ctx.store.delete_jobs(statuses, max_age_days)?;
    for job in &removed {
        ctx.bus.emit(Event::JobDeleted {
            id: job.id.clone(),
        });
    }
    report.removed = removed.into_iter().map(|j| j.id).collect();
    report.print("job", false);
    Ok(report)
}

/// Remove every managed worktree no live job references. The repo cache
/// directory is never touched here.
pub fn cleanup_worktrees(ctx: &AppContext, opts: CleanupOptions) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    let jobs = ctx.store.jobs_with_worktrees()?;
    let entries = ctx.worktrees.list(&jobs)?;
    let (orphans, blocked): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(|e| e.deletable());

    for entry in &blocked {
        if entry.managed {
            report.skipped.push((
                entry.path.display().to_string(),
                entry.blocked_reasons.join(", "),
            ));
        }
    }

    if opts.dry_run {
        report.removed = orphans
            .iter()
            .map(|e| e.path.display().to_string())
            .collect();
        report.print("worktree", true);
        return Ok(report);
    }

    if orphans.is_empty() {
        report.print("worktree", false);
        return Ok(report);
    }

    if !opts.assume_yes && !confirm(&format!("Delete {} worktree(s)?", orphans.len())) {
        info!("worktree cleanup aborted");
        return Ok(report);
    }

    for entry in orphans {
        match ctx.worktrees.remove(&entry.path) {
            Ok(()) => report.removed.push(entry.path.display().to_string()),
            Err(e) => {
                warn!("failed to remove {}: {}", entry.path.display(), e);
                report
                    .skipped
                    .push((entry.path.display().to_string(), e.to_string()));
            }
        }
    }
    if !report.removed.is_empty() {
        ctx.bus.emit(Event::WorktreeChanged);
    }
    report.print("worktree", false);
    Ok(report)
}

/// Remove cached clones whose name no live job's repo_url maps to.
pub fn cleanup_repo_caches(ctx: &AppContext, opts: CleanupOptions) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    let live: std::collections::HashSet<String> = ctx
        .store
        .distinct_repo_urls()?
        .iter()
        .map(|url| WorktreeManager::cache_dir_name(url))
        .collect();

    let mut stale: Vec<PathBuf> = Vec::new();
    if let Ok(dir) = std::fs::read_dir(ctx.worktrees.repos_dir()) {
        for entry in dir.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match path.file_name().and_then(|n| n.to_str()) {
                Some(name) if live.contains(name) => {}
                Some(_) | None => stale.push(path),
            }
        }
    }

    if opts.dry_run {
        report.removed = stale.iter().map(|p| p.display().to_string()).collect();
        report.print("repo cache", true);
        return Ok(report);
    }

    if stale.is_empty() {
        report.print("repo cache", false);
        return Ok(report);
    }

    if !opts.assume_yes && !confirm(&format!("Delete {} repo cache(s)?", stale.len())) {
        info!("repo cache cleanup aborted");
        return Ok(report);
    }

    for path in stale {
        match std::fs::remove_dir_all(&path) {
            Ok(()) => report.removed.push(path.display().to_string()),
            Err(e) => {
                warn!("failed to remove {}: {}", path.display(), e);
                report
                    .skipped
                    .push((path.display().to_string(), e.to_string()));
            }
        }
    }
    report.print("repo cache", false);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::Store;

    fn test_ctx(base: &std::path::Path) -> AppContext {
        let config = Config {
            worktree_base_dir: base.to_path_buf(),
            ..Default::default()
        };
        AppContext::with_store(config, Store::open_in_memory().unwrap())
    }

    #[test]
    fn repo_cache_sweep_keeps_live_and_drops_stale() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let repos = ctx.worktrees.repos_dir().to_path_buf();

        let live_url = "https://example.com/org/live.git";
        let live_dir = repos.join(WorktreeManager::cache_dir_name(live_url));
        let stale_dir = repos.join("stale-deadbeef0000");
        std::fs::create_dir_all(&live_dir).unwrap();
        std::fs::create_dir_all(&stale_dir).unwrap();

        let mut input = crate::store::test_input(live_url, "feat/x");
        input.use_worktree = false;
        input.worktree_path = None;
        ctx.store.create_job(input).unwrap();

        let report = cleanup_repo_caches(
            &ctx,
            CleanupOptions {
                dry_run: false,
                assume_yes: true,
            },
        )
        .unwrap();

        assert_eq!(report.removed.len(), 1);
        assert!(report.removed[0].contains("stale"));
        assert!(live_dir.exists());
        assert!(!stale_dir.exists());
    }

    #[test]
    fn dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let stale_dir = ctx.worktrees.repos_dir().join("stale-deadbeef0000");
        std::fs::create_dir_all(&stale_dir).unwrap();

        let report = cleanup_repo_caches(
            &ctx,
            CleanupOptions {
                dry_run: true,
                assume_yes: true,
            },
        )
        .unwrap();

        assert_eq!(report.removed.len(), 1);
        assert!(stale_dir.exists());
    }
}
