//! Managed base directory and repository clone cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::domain::repo_hash;
use crate::error::{OrchestratorError, Result};

/// Owns the managed worktree base directory and the nested repo clone cache.
///
/// All git invocations shell out to the configured binary; stderr of a failed
/// invocation is carried in the error.
pub struct WorktreeManager {
    base_dir: PathBuf,
    repos_dir: PathBuf,
    git_path: String,
    /// Serialises concurrent clones of the same cache target.
    clone_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorktreeManager {
    pub fn new(base_dir: impl Into<PathBuf>, git_path: impl Into<String>) -> Self {
        let base_dir = base_dir.into();
        Self {
            repos_dir: base_dir.join("_repos"),
            base_dir,
            git_path: git_path.into(),
            clone_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn repos_dir(&self) -> &Path {
        &self.repos_dir
    }

    /// True when `path` lives under the managed base directory (and is not
    /// the repo cache itself).
    pub fn is_managed(&self, path: &Path) -> bool {
        path.starts_with(&self.base_dir) && !path.starts_with(&self.repos_dir)
    }

    /// Run git with `args` in `cwd`, returning trimmed stdout.
    pub(super) fn run_git(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.git_path)
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| OrchestratorError::io(cwd, e))?;

        if !output.status.success() {
            return Err(OrchestratorError::GitFailure {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Cache directory name for a remote URL: sanitised tail plus a stable
    /// 12-hex hash of the full URL.
    pub fn cache_dir_name(repo_url: &str) -> String {
        let tail = repo_url
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()
            .unwrap_or("repo")
            .trim_end_matches(".git");
        let slug: String = tail
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let slug = slug.trim_matches('-');
        let slug = if slug.is_empty() { "repo" } else { slug };
        format!("{}-{}", slug, repo_hash(repo_url))
    }

    /// Resolve `repo_url` to a local repository path, cloning into the cache
    /// when necessary. Existing local repositories are used in place.
    pub fn ensure_repo_path(&self, repo_url: &str) -> Result<PathBuf> {
        let as_path = Path::new(repo_url);
        if as_path.is_dir() && as_path.join(".git").exists() {
            return Ok(as_path.to_path_buf());
        }

        let cache_path = self.repos_dir.join(Self::cache_dir_name(repo_url));
        if cache_path.join(".git").exists() {
            return Ok(cache_path);
        }

        // Two workers cloning the same target race the same directory; take
        // the per-target lock and re-check before cloning.
        let lock = {
            let mut locks = self.clone_locks.lock().expect("clone locks poisoned");
            Arc::clone(
                locks
                    .entry(cache_path.display().to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = lock.lock().expect("clone lock poisoned");

        if cache_path.join(".git").exists() {
            debug!("clone of {} already present in cache", repo_url);
            return Ok(cache_path);
        }

        std::fs::create_dir_all(&self.repos_dir)
            .map_err(|e| OrchestratorError::io(&self.repos_dir, e))?;

        info!("cloning {} into {}", repo_url, cache_path.display());
        let cache_str = cache_path.display().to_string();
        self.run_git(&self.repos_dir, &["clone", repo_url, &cache_str])?;
        Ok(cache_path)
    }
}
