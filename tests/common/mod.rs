//! Shared test utilities: scratch git repositories, stub agent binaries and
//! a wired application context.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;

use codexd::store::Store;
use codexd::{AppContext, Config};

pub fn git(repo: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Creates a bare "origin" plus a clone of it with one commit on main.
/// Returns (tempdir holding both, path of the clone).
pub fn create_origin_and_clone() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let origin = temp_dir.path().join("origin.git");
    fs::create_dir_all(&origin).expect("failed to create origin dir");
    git(&origin, &["init", "--bare", "--initial-branch=main"]);

    let clone = temp_dir.path().join("work");
    git(
        temp_dir.path(),
        &["clone", origin.to_str().unwrap(), clone.to_str().unwrap()],
    );
    git(&clone, &["config", "user.email", "test@test.com"]);
    git(&clone, &["config", "user.name", "Test User"]);

    fs::write(clone.join("README.md"), "hello\n").expect("failed to write file");
    git(&clone, &["add", "."]);
    git(&clone, &["commit", "-m", "initial commit"]);
    git(&clone, &["push", "-u", "origin", "main"]);

    (temp_dir, clone)
}

/// Standalone repository without a remote.
pub fn create_test_repo() -> TempDir {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let repo = temp_dir.path();
    git(repo, &["init", "--initial-branch=main"]);
    git(repo, &["config", "user.email", "test@test.com"]);
    git(repo, &["config", "user.name", "Test User"]);
    fs::write(repo.join("README.md"), "hello\n").expect("failed to write file");
    git(repo, &["add", "."]);
    git(repo, &["commit", "-m", "initial commit"]);
    temp_dir
}

/// Write an executable stub standing in for the codex CLI.
#[cfg(unix)]
pub fn write_stub_agent(dir: &Path, name: &str, script_body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", script_body)).expect("failed to write stub");
    let mut perms = fs::metadata(&path).expect("stub metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("failed to chmod stub");
    path
}

/// Context around a temp base dir and an in-memory store, with a short agent
/// timeout suitable for stub runs.
pub fn test_context(base_dir: &Path) -> AppContext {
    let config = Config {
        worktree_base_dir: base_dir.to_path_buf(),
        db_path: base_dir.join("orchestrator.sqlite"),
        agent_timeout: Duration::from_secs(30),
        worker_poll_interval: Duration::from_millis(20),
        worker_concurrency: 1,
        ..Default::default()
    };
    AppContext::with_store(config, Store::open_in_memory().expect("in-memory store"))
}

/// Create a job through the HTTP-facing handler so branch and worktree
/// derivation run exactly as they do in production.
pub fn create_job_via_api(ctx: &AppContext, body: serde_json::Value) -> codexd::Job {
    let (status, value) =
        codexd::server::handlers::jobs::create(ctx, &body.to_string()).expect("create job");
    assert_eq!(status, 201, "unexpected status: {}", value);
    serde_json::from_value(value.get("job").cloned().expect("job payload")).expect("job json")
}
