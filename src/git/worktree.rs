//! Worktree lifecycle: create/reuse, delete, enumerate.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::manager::WorktreeManager;
use crate::domain::{Job, WorktreeEntry, WorktreeJobRef, WorktreeState};
use crate::error::{OrchestratorError, Result};

/// One block of `git worktree list --porcelain` output.
#[derive(Debug, Clone, Default)]
pub struct PorcelainWorktree {
    pub path: PathBuf,
    pub head: Option<String>,
    pub branch: Option<String>,
    pub locked: bool,
    pub prunable: bool,
    pub bare: bool,
    pub detached: bool,
}

/// Parse the porcelain output of `git worktree list`. Blocks are separated by
/// blank lines; attribute lines may carry a reason after the keyword.
pub fn parse_worktree_porcelain(output: &str) -> Vec<PorcelainWorktree> {
    let mut entries = Vec::new();
    let mut current: Option<PorcelainWorktree> = None;

    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(PorcelainWorktree {
                path: PathBuf::from(path),
                ..Default::default()
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            entry.branch = Some(
                branch
                    .strip_prefix("refs/heads/")
                    .unwrap_or(branch)
                    .to_string(),
            );
        } else if line == "locked" || line.starts_with("locked ") {
            entry.locked = true;
        } else if line == "prunable" || line.starts_with("prunable ") {
            entry.prunable = true;
        } else if line == "bare" {
            entry.bare = true;
        } else if line == "detached" {
            entry.detached = true;
        }
    }
    if let Some(entry) = current.take() {
        entries.push(entry);
    }
    entries
}

fn derive_state(
    managed: bool,
    locked: bool,
    jobs: &[WorktreeJobRef],
) -> (WorktreeState, Vec<String>) {
    if !managed {
        return (
            WorktreeState::Unmanaged,
            vec!["outside the managed base directory".to_string()],
        );
    }
    if locked {
        return (
            WorktreeState::Locked,
            vec!["worktree is locked by git".to_string()],
        );
    }
    let protected: Vec<&WorktreeJobRef> =
        jobs.iter().filter(|j| j.status.is_protected()).collect();
    if let Some(job) = protected.first() {
        return (
            WorktreeState::Protected,
            vec![format!("job {} is {}", job.id, job.status)],
        );
    }
    if !jobs.is_empty() {
        return (
            WorktreeState::InUse,
            vec![format!("referenced by {} job(s)", jobs.len())],
        );
    }
    (WorktreeState::Orphaned, Vec::new())
}

impl WorktreeManager {
    /// Create or reuse the worktree at `worktree_path` for `branch`.
    ///
    /// A live worktree (`.git` marker present) is reused: refs are fetched,
    /// the branch checked out, and a pull is attempted only when an upstream
    /// is configured. Otherwise a worktree is added in the source repository,
    /// creating the branch at `base_ref` when it does not exist yet.
    pub fn acquire(
        &self,
        repo_path: &Path,
        base_ref: &str,
        branch: &str,
        worktree_path: &Path,
    ) -> Result<()> {
        if worktree_path.join(".git").exists() {
            debug!("reusing worktree at {}", worktree_path.display());
            self.run_git(worktree_path, &["fetch", "--all", "--prune"])?;
            self.run_git(worktree_path, &["checkout", branch])?;
            if self.has_upstream(worktree_path) {
                self.run_git(worktree_path, &["pull"])?;
            }
            return Ok(());
        }

        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OrchestratorError::io(parent, e))?;
        }

        self.run_git(repo_path, &["fetch", "--all", "--prune"])?;

        let branch_ref = format!("refs/heads/{}", branch);
        let branch_exists = self
            .run_git(repo_path, &["show-ref", "--verify", "--quiet", &branch_ref])
            .is_ok();

        let path_str = worktree_path.display().to_string();
        if branch_exists {
            info!("adding worktree for existing branch {}", branch);
            self.run_git(repo_path, &["worktree", "add", &path_str, branch])?;
        } else {
            info!("creating branch {} at {} with new worktree", branch, base_ref);
            self.run_git(
                repo_path,
                &["worktree", "add", "-B", branch, &path_str, base_ref],
            )?;
        }
        Ok(())
    }

    /// True when `@{u}` resolves for the current branch of `cwd`.
    pub fn has_upstream(&self, cwd: &Path) -> bool {
        self.run_git(
            cwd,
            &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
        )
        .is_ok()
    }

    /// Remove the worktree at `path`. A missing path is a no-op; a stale
    /// directory that git no longer recognises is deleted directly.
    pub fn remove(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let common_dir = match self.run_git(path, &["rev-parse", "--git-common-dir"]) {
            Ok(dir) => {
                let dir = PathBuf::from(dir);
                if dir.is_absolute() { dir } else { path.join(dir) }
            }
            Err(OrchestratorError::GitFailure { stderr, .. })
                if stderr.contains("not a git repository") =>
            {
                warn!(
                    "stale worktree dir {} is not a git repository, deleting",
                    path.display()
                );
                return std::fs::remove_dir_all(path)
                    .map_err(|e| OrchestratorError::io(path, e));
            }
            Err(e) => return Err(e),
        };

        // The repository that owns the worktree is the parent of its common
        // git dir.
        let repo_root = common_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| common_dir.clone());

        let path_str = path.display().to_string();
        match self.run_git(&repo_root, &["worktree", "remove", "--force", &path_str]) {
            Ok(_) => Ok(()),
            Err(OrchestratorError::GitFailure { stderr, .. })
                if stderr.contains("not a git repository")
                    || stderr.contains("is not a working tree") =>
            {
                warn!("git no longer tracks {}: {}", path.display(), stderr);
                if path.exists() {
                    std::fs::remove_dir_all(path)
                        .map_err(|e| OrchestratorError::io(path, e))?;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Enumerate worktrees: git's own list per known repository, joined with
    /// the job rows that reference each path, plus managed directories git
    /// has forgotten about.
    pub fn list(&self, jobs: &[Job]) -> Result<Vec<WorktreeEntry>> {
        let mut jobs_by_path: HashMap<String, Vec<WorktreeJobRef>> = HashMap::new();
        for job in jobs {
            if let Some(path) = &job.worktree_path {
                jobs_by_path
                    .entry(path.clone())
                    .or_default()
                    .push(WorktreeJobRef {
                        id: job.id.clone(),
                        status: job.status,
                    });
            }
        }

        let mut repos: Vec<PathBuf> = Vec::new();
        if let Ok(entries) = std::fs::read_dir(self.repos_dir()) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.join(".git").exists() {
                    repos.push(path);
                }
            }
        }
        for job in jobs {
            let as_path = Path::new(&job.repo_url);
            if as_path.is_dir() && as_path.join(".git").exists() {
                let path = as_path.to_path_buf();
                if !repos.contains(&path) {
                    repos.push(path);
                }
            }
        }

        let mut entries: Vec<WorktreeEntry> = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for repo in &repos {
            let porcelain = match self.run_git(repo, &["worktree", "list", "--porcelain"]) {
                Ok(out) => out,
                Err(e) => {
                    warn!("worktree list failed in {}: {}", repo.display(), e);
                    continue;
                }
            };
            for wt in parse_worktree_porcelain(&porcelain) {
                // The repository's own checkout is not a job worktree.
                if wt.bare || &wt.path == repo {
                    continue;
                }
                if !seen.insert(wt.path.clone()) {
                    continue;
                }
                let path_str = wt.path.display().to_string();
                let job_refs = jobs_by_path.remove(&path_str).unwrap_or_default();
                let managed = self.is_managed(&wt.path);
                let (state, blocked_reasons) = derive_state(managed, wt.locked, &job_refs);
                entries.push(WorktreeEntry {
                    path: wt.path,
                    branch: wt.branch,
                    head: wt.head,
                    locked: wt.locked,
                    prunable: wt.prunable,
                    managed,
                    state,
                    blocked_reasons,
                    jobs: job_refs,
                });
            }
        }

        // Managed directories git does not report: stale checkouts from
        // crashed runs. They are deletable unless a job still points there.
        if let Ok(dir) = std::fs::read_dir(self.base_dir()) {
            for entry in dir.flatten() {
                let path = entry.path();
                if !path.is_dir() || path == self.repos_dir() || seen.contains(&path) {
                    continue;
                }
                let path_str = path.display().to_string();
                let job_refs = jobs_by_path.remove(&path_str).unwrap_or_default();
                let (state, blocked_reasons) = derive_state(true, false, &job_refs);
                entries.push(WorktreeEntry {
                    path,
                    branch: None,
                    head: None,
                    locked: false,
                    prunable: true,
                    managed: true,
                    state,
                    blocked_reasons,
                    jobs: job_refs,
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    // Helpers the worker uses to finish a job inside its worktree.

    /// `git status --porcelain`, non-empty when dirty.
    pub fn status_porcelain(&self, cwd: &Path) -> Result<String> {
        self.run_git(cwd, &["status", "--porcelain"])
    }

    /// Stage everything and commit; returns the new HEAD commit hash.
    pub fn commit_all(&self, cwd: &Path, message: &str) -> Result<String> {
        self.run_git(cwd, &["add", "-A"])?;
        self.run_git(cwd, &["commit", "-m", message])?;
        self.head_commit(cwd)
    }

    pub fn head_commit(&self, cwd: &Path) -> Result<String> {
        self.run_git(cwd, &["rev-parse", "HEAD"])
    }

    /// Push the branch, setting the upstream on first push.
    pub fn push_upstream(&self, cwd: &Path, branch: &str) -> Result<()> {
        self.run_git(cwd, &["push", "--set-upstream", "origin", branch])?;
        Ok(())
    }
}
