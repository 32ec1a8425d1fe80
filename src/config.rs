//! Environment-sourced orchestrator configuration.
//!
//! Every knob has a built-in default; unparseable numeric values fall back to
//! the default rather than aborting startup.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, resolved once at startup and threaded through the
/// application context.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory that holds managed worktrees and the repo clone cache.
    pub worktree_base_dir: PathBuf,
    /// Path to the SQLite database.
    pub db_path: PathBuf,
    /// Codex CLI binary.
    pub codex_cli_path: String,
    /// Git binary.
    pub git_path: String,
    /// TCP port for the control API.
    pub port: u16,
    /// Advertised base URL (used in client-facing payloads).
    pub orchestrator_url: String,
    /// Worker idle poll interval.
    pub worker_poll_interval: Duration,
    /// Number of concurrent workers.
    pub worker_concurrency: usize,
    /// Worker type tag the built-in pool claims for.
    pub worker_type: String,
    /// Wall-clock limit for a single agent invocation.
    pub agent_timeout: Duration,
    /// Optional reasoning-effort hint forwarded to the agent CLI.
    pub reasoning_effort: Option<String>,
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        let base_dir = env_path("WORKTREE_BASE_DIR").unwrap_or_else(default_base_dir);
        let port = env_number("ORCHESTRATOR_PORT", 4100u64) as u16;

        Self {
            db_path: env_path("ORCHESTRATOR_DB_PATH")
                .unwrap_or_else(|| base_dir.join("orchestrator.sqlite")),
            codex_cli_path: env_string("CODEX_CLI_PATH", "codex"),
            git_path: env_string("GIT_PATH", "git"),
            orchestrator_url: std::env::var("ORCHESTRATOR_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", port)),
            port,
            worker_poll_interval: Duration::from_millis(env_number(
                "WORKER_POLL_INTERVAL_MS",
                1000,
            )),
            worker_concurrency: env_number("WORKER_CONCURRENCY", 2) as usize,
            worker_type: env_string("WORKER_TYPE", "codex"),
            agent_timeout: Duration::from_millis(env_number("AGENT_TIMEOUT_MS", 30 * 60 * 1000)),
            reasoning_effort: std::env::var("CODEX_REASONING_EFFORT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            worktree_base_dir: base_dir,
        }
    }

    /// Address the HTTP server binds to. Loopback only: the control plane is
    /// not authenticated.
    pub fn bind_addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Repo clone cache directory, nested under the managed base dir.
    pub fn repo_cache_dir(&self) -> PathBuf {
        self.worktree_base_dir.join("_repos")
    }
}

impl Default for Config {
    fn default() -> Self {
        let base_dir = default_base_dir();
        Self {
            db_path: base_dir.join("orchestrator.sqlite"),
            codex_cli_path: "codex".to_string(),
            git_path: "git".to_string(),
            port: 4100,
            orchestrator_url: "http://127.0.0.1:4100".to_string(),
            worker_poll_interval: Duration::from_millis(1000),
            worker_concurrency: 2,
            worker_type: "codex".to_string(),
            agent_timeout: Duration::from_millis(30 * 60 * 1000),
            reasoning_effort: None,
            worktree_base_dir: base_dir,
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codexd")
        .join("worktrees")
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Parse a numeric env var, falling back to `default` when absent or invalid.
fn env_number(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!("invalid {}={:?}, using default {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
