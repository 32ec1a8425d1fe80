//! Control-plane tests: handler behaviour, branch derivation, worktree
//! endpoints, and one real HTTP round trip including the event stream.

mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use codexd::server::{HttpServer, handlers};
use codexd::store::Store;
use codexd::{
    AppContext, Config, CreateJobInput, Event, Job, JobSpec, JobStatus, OrchestratorError,
    PushMode,
};

use common::{create_job_via_api, test_context};

fn job_from(value: &serde_json::Value) -> Job {
    serde_json::from_value(value.get("job").cloned().expect("job payload")).expect("job json")
}

#[test]
fn create_derives_branch_and_worktree_path() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let job = create_job_via_api(
        &ctx,
        serde_json::json!({
            "repo_url": "https://example.com/org/app.git",
            "prompt": "Add a Login Page!",
        }),
    );

    assert!(job.branch_name.starts_with("codex/add-a-login-page-"));
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.base_ref, "origin/main");
    assert_eq!(job.worker_type, "codex");
    let worktree = job.worktree_path.expect("worktree path derived");
    assert!(worktree.starts_with(base.path().to_str().unwrap()));
}

#[test]
fn create_prefers_feature_branch_and_sanitises() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let job = create_job_via_api(
        &ctx,
        serde_json::json!({
            "repo_url": "/tmp/repo",
            "prompt": "work",
            "feature_id": "auth rework v2",
        }),
    );
    assert_eq!(job.branch_name, "feature/auth-rework-v2");

    // Unsanitisable feature ids fall back to the generated branch.
    let job = create_job_via_api(
        &ctx,
        serde_json::json!({
            "repo_url": "/tmp/repo",
            "prompt": "work",
            "feature_id": "///",
        }),
    );
    assert!(job.branch_name.starts_with("codex/work-"));
}

#[test]
fn create_validates_input() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let err = handlers::jobs::create(&ctx, r#"{"repo_url":"","prompt":"x"}"#).unwrap_err();
    assert_eq!(err.http_status(), 400);

    let err = handlers::jobs::create(&ctx, r#"{"repo_url":"/tmp/r"}"#).unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    let err = handlers::jobs::create(
        &ctx,
        r#"{"repo_url":"/tmp/r","prompt":"x","push_mode":"sometimes"}"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("push_mode"));

    let err = handlers::jobs::create(&ctx, "not json").unwrap_err();
    assert_eq!(err.http_status(), 400);
}

#[test]
fn cycle_and_terminated_dependencies_are_rejected() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let a = create_job_via_api(
        &ctx,
        serde_json::json!({ "repo_url": "/tmp/r", "prompt": "a", "branch_name": "f/a" }),
    );
    let body = serde_json::json!({
        "repo_url": "/tmp/r",
        "prompt": "b",
        "branch_name": "f/b",
        "depends_on": [a.id],
    });
    let b = create_job_via_api(&ctx, body);

    // Unknown dependency
    let err = handlers::jobs::create(
        &ctx,
        &serde_json::json!({
            "repo_url": "/tmp/r", "prompt": "c", "depends_on": ["ghost"],
        })
        .to_string(),
    )
    .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    // Depending on a cancelled job
    handlers::jobs::cancel(&ctx, &b.id).unwrap();
    let err = handlers::jobs::create(
        &ctx,
        &serde_json::json!({
            "repo_url": "/tmp/r", "prompt": "c", "depends_on": [b.id],
        })
        .to_string(),
    )
    .unwrap_err();
    assert!(matches!(err, OrchestratorError::DependencyTerminated(_)));
}

#[test]
fn cancel_cascades_through_handlers() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let a = create_job_via_api(
        &ctx,
        serde_json::json!({ "repo_url": "/tmp/r", "prompt": "a", "branch_name": "f/a" }),
    );
    let b = create_job_via_api(
        &ctx,
        serde_json::json!({
            "repo_url": "/tmp/r", "prompt": "b", "branch_name": "f/b", "depends_on": [a.id],
        }),
    );
    let c = create_job_via_api(
        &ctx,
        serde_json::json!({
            "repo_url": "/tmp/r", "prompt": "c", "branch_name": "f/c", "depends_on": [b.id],
        }),
    );

    let (status, _) = handlers::jobs::cancel(&ctx, &a.id).unwrap();
    assert_eq!(status, 200);

    for id in [&b.id, &c.id] {
        let job = ctx.store.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.result_summary.unwrap().cancelled_by.is_some());
    }

    // Cancelling a running job is refused.
    let d = create_job_via_api(
        &ctx,
        serde_json::json!({ "repo_url": "/tmp/r", "prompt": "d", "branch_name": "f/d" }),
    );
    ctx.store
        .update_status(&d.id, JobStatus::Running, None, None, None)
        .unwrap();
    let err = handlers::jobs::cancel(&ctx, &d.id).unwrap_err();
    assert!(matches!(err, OrchestratorError::ProtectedState(_)));
}

#[test]
fn claim_endpoint_hands_out_each_job_once() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let (status, value) = handlers::jobs::claim(&ctx, "worker_type=codex").unwrap();
    assert_eq!(status, 404, "empty queue: {}", value);

    let job = create_job_via_api(
        &ctx,
        serde_json::json!({ "repo_url": "/tmp/r", "prompt": "a", "branch_name": "f/a" }),
    );

    let (status, value) = handlers::jobs::claim(&ctx, "worker_type=codex").unwrap();
    assert_eq!(status, 200);
    assert_eq!(job_from(&value).id, job.id);

    let (status, _) = handlers::jobs::claim(&ctx, "worker_type=codex").unwrap();
    assert_eq!(status, 404);
}

#[test]
fn complete_applies_optimistic_preconditions() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let job = create_job_via_api(
        &ctx,
        serde_json::json!({ "repo_url": "/tmp/r", "prompt": "a", "branch_name": "f/a" }),
    );

    // Claiming moved it to running elsewhere; a stale reporter loses.
    let err = handlers::jobs::complete(
        &ctx,
        &job.id,
        r#"{"status":"done","expected_status":["running"]}"#,
    )
    .unwrap_err();
    assert!(matches!(err, OrchestratorError::StaleState { .. }));

    handlers::jobs::claim(&ctx, "worker_type=codex").unwrap();
    let (status, value) = handlers::jobs::complete(
        &ctx,
        &job.id,
        r#"{"status":"done","expected_status":["running"],"session_id":"s-1",
           "result_summary":{"commit_hash":"abc123","pushed":true}}"#,
    )
    .unwrap();
    assert_eq!(status, 200);
    let done = job_from(&value);
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.session_id.as_deref(), Some("s-1"));
    assert_eq!(
        done.result_summary.unwrap().commit_hash.as_deref(),
        Some("abc123")
    );

    // Pending is not a completion status.
    let err = handlers::jobs::complete(&ctx, &job.id, r#"{"status":"pending"}"#).unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
}

#[test]
fn log_endpoints_round_trip_in_order() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let job = create_job_via_api(
        &ctx,
        serde_json::json!({ "repo_url": "/tmp/r", "prompt": "a", "branch_name": "f/a" }),
    );

    handlers::jobs::append_log(&ctx, &job.id, r#"{"stream":"stdout","text":"one"}"#).unwrap();
    handlers::jobs::append_log(&ctx, &job.id, r#"{"stream":"stderr","text":"two"}"#).unwrap();

    let (status, value) = handlers::jobs::logs(&ctx, &job.id).unwrap();
    assert_eq!(status, 200);
    let logs = value.get("logs").unwrap().as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["text"], "one");
    assert_eq!(logs[1]["stream"], "stderr");

    let err = handlers::jobs::logs(&ctx, "ghost").unwrap_err();
    assert_eq!(err.http_status(), 404);

    let err =
        handlers::jobs::append_log(&ctx, &job.id, r#"{"stream":"bogus","text":"x"}"#).unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));
}

#[test]
fn delete_job_removes_unreferenced_worktree_dir() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let worktree = base.path().join("stale-checkout");
    std::fs::create_dir_all(&worktree).unwrap();
    std::fs::write(worktree.join("f.txt"), "x").unwrap();

    let job = ctx
        .store
        .create_job(CreateJobInput {
            repo_url: "/tmp/r".to_string(),
            base_ref: "HEAD".to_string(),
            branch_name: "f/a".to_string(),
            worktree_path: Some(worktree.display().to_string()),
            worker_type: "codex".to_string(),
            feature_id: None,
            feature_part: None,
            push_mode: PushMode::Always,
            use_worktree: true,
            spec: JobSpec {
                prompt: "x".to_string(),
                ..Default::default()
            },
            depends_on: Vec::new(),
            session_id: None,
            resume_requested: false,
        })
        .unwrap();

    let (status, value) = handlers::jobs::delete(&ctx, &job.id).unwrap();
    assert_eq!(status, 200);
    assert_eq!(value["worktree_removed"], true);
    assert!(!worktree.exists());

    let err = handlers::jobs::delete(&ctx, &job.id).unwrap_err();
    assert_eq!(err.http_status(), 404);
}

#[test]
fn worktree_cleanup_spares_referenced_directories() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let referenced = base.path().join("job-checkout");
    let orphan = base.path().join("orphan-checkout");
    std::fs::create_dir_all(&referenced).unwrap();
    std::fs::create_dir_all(&orphan).unwrap();

    ctx.store
        .create_job(CreateJobInput {
            repo_url: "/tmp/r".to_string(),
            base_ref: "HEAD".to_string(),
            branch_name: "f/a".to_string(),
            worktree_path: Some(referenced.display().to_string()),
            worker_type: "codex".to_string(),
            feature_id: None,
            feature_part: None,
            push_mode: PushMode::Always,
            use_worktree: true,
            spec: JobSpec {
                prompt: "x".to_string(),
                ..Default::default()
            },
            depends_on: Vec::new(),
            session_id: None,
            resume_requested: false,
        })
        .unwrap();

    let (status, value) = handlers::worktrees::cleanup(&ctx).unwrap();
    assert_eq!(status, 200);

    let removed = value["removed"].as_array().unwrap();
    assert_eq!(removed.len(), 1);
    assert!(removed[0].as_str().unwrap().contains("orphan-checkout"));
    assert!(!orphan.exists());
    assert!(referenced.exists());

    let skipped = value["skipped"].as_array().unwrap();
    assert!(
        skipped
            .iter()
            .any(|s| s["path"].as_str().unwrap().contains("job-checkout"))
    );
}

#[test]
fn worktree_list_and_single_delete_respect_state() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());

    let orphan = base.path().join("orphan-checkout");
    std::fs::create_dir_all(&orphan).unwrap();

    let (_, value) = handlers::worktrees::list(&ctx).unwrap();
    let entries = value["worktrees"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["state"], "orphaned");

    let (status, _) =
        handlers::worktrees::delete(&ctx, orphan.to_str().unwrap()).unwrap();
    assert_eq!(status, 200);
    assert!(!orphan.exists());

    let err = handlers::worktrees::delete(&ctx, orphan.to_str().unwrap()).unwrap_err();
    assert_eq!(err.http_status(), 404);
}

#[test]
fn events_fire_only_after_the_store_reflects_the_change() {
    let base = TempDir::new().unwrap();
    let ctx = test_context(base.path());
    let (_id, rx) = ctx.bus.subscribe();

    let job = create_job_via_api(
        &ctx,
        serde_json::json!({ "repo_url": "/tmp/r", "prompt": "a", "branch_name": "f/a" }),
    );

    match rx.try_recv().expect("job_created event") {
        Event::JobCreated(created) => {
            // By the time the event is observable the row is readable.
            let stored = ctx.store.get_job(&created.id).unwrap();
            assert_eq!(stored.id, job.id);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn http_server_serves_health_and_event_stream() {
    let base = TempDir::new().unwrap();
    let config = Config {
        worktree_base_dir: base.path().to_path_buf(),
        db_path: base.path().join("orchestrator.sqlite"),
        port: 0,
        ..Default::default()
    };
    let ctx = Arc::new(AppContext::with_store(
        config,
        Store::open_in_memory().unwrap(),
    ));
    let server = HttpServer::start(Arc::clone(&ctx)).unwrap();
    let addr = server.addr().expect("bound address");

    // Plain request/response round trip.
    let mut stream = TcpStream::connect(addr).unwrap();
    write!(
        stream,
        "GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
    )
    .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains("\"status\":\"ok\""));

    // Unknown route.
    let mut stream = TcpStream::connect(addr).unwrap();
    write!(
        stream,
        "GET /nope HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
    )
    .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 404"), "{}", response);

    // Event stream: comment frame first, then bus events as SSE frames.
    // HTTP/1.0 keeps the body identity-encoded, so the raw reads below see
    // the frames verbatim.
    let mut stream = TcpStream::connect(addr).unwrap();
    write!(stream, "GET /events HTTP/1.0\r\nHost: localhost\r\n\r\n").unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut collected = String::new();
    let mut buf = [0u8; 4096];
    for _ in 0..50 {
        let n = stream.read(&mut buf).expect("stream read");
        collected.push_str(&String::from_utf8_lossy(&buf[..n]));
        if collected.contains(": connected") {
            break;
        }
    }
    assert!(collected.contains(": connected"), "{}", collected);

    ctx.bus.emit(Event::WorktreeChanged);
    for _ in 0..50 {
        if collected.contains("event: worktree_changed") {
            break;
        }
        let n = stream.read(&mut buf).expect("stream read");
        collected.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    assert!(collected.contains("event: worktree_changed"), "{}", collected);

    drop(stream);
    server.shutdown();
}

#[test]
fn concurrent_claims_never_hand_out_the_same_job() {
    let base = TempDir::new().unwrap();
    let ctx = Arc::new(test_context(base.path()));

    for i in 0..8 {
        create_job_via_api(
            &ctx,
            serde_json::json!({
                "repo_url": "/tmp/r",
                "prompt": "work",
                "branch_name": format!("f/{}", i),
            }),
        );
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let ctx = Arc::clone(&ctx);
        handles.push(std::thread::spawn(move || {
            let mut mine = Vec::new();
            while let Some(job) = ctx.store.claim_oldest("codex").unwrap() {
                mine.push(job.id);
            }
            mine
        }));
    }

    let mut all: Vec<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort();
    let before = all.len();
    all.dedup();
    assert_eq!(before, 8, "every job claimed");
    assert_eq!(all.len(), 8, "no job claimed twice");
}
