use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use codexd::agent::{AgentRunner, CodexRunner};
use codexd::cleanup::{CleanupOptions, cleanup_jobs, cleanup_repo_caches, cleanup_worktrees};
use codexd::server::HttpServer;
use codexd::worker::WorkerPool;
use codexd::{AppContext, Config, JobStatus, OrchestratorError};

#[derive(Parser)]
#[command(name = "codexd")]
#[command(about = "Job orchestrator for long-running code-generation agent runs")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator (default)
    Serve,

    /// Administrative bulk cleanup
    Cleanup {
        #[command(subcommand)]
        target: CleanupTarget,
    },
}

#[derive(Subcommand)]
enum CleanupTarget {
    /// Delete terminal jobs
    Jobs {
        /// Restrict to these statuses (default: done, failed, cancelled)
        #[arg(long = "status")]
        statuses: Vec<String>,
        /// Only jobs created more than N days ago
        #[arg(long)]
        max_age_days: Option<i64>,
        /// Enumerate without deleting
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Delete managed worktrees no job references
    Worktrees {
        #[arg(long)]
        dry_run: bool,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Delete cached clones no job's repo_url maps to
    Repos {
        #[arg(long)]
        dry_run: bool,
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        // stdout stays clean for machine consumers
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Cleanup { target }) => run_cleanup(config, target),
    }
}

async fn serve(config: Config) -> Result<()> {
    std::fs::create_dir_all(&config.worktree_base_dir)?;
    info!(
        "starting codexd: db={}, worktrees={}, workers={}",
        config.db_path.display(),
        config.worktree_base_dir.display(),
        config.worker_concurrency
    );

    let ctx = Arc::new(AppContext::new(config)?);
    let runner: Arc<dyn AgentRunner> = Arc::new(CodexRunner::new(
        ctx.config.codex_cli_path.clone(),
        ctx.config.reasoning_effort.clone(),
    ));

    let pool = WorkerPool::start(Arc::clone(&ctx), runner);
    let server = HttpServer::start(Arc::clone(&ctx))?;

    shutdown_signal().await;
    info!("shutdown requested, draining in-flight jobs");
    pool.stop();
    pool.join().await;
    server.shutdown();
    info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn run_cleanup(config: Config, target: CleanupTarget) -> Result<()> {
    let ctx = AppContext::new(config)?;

    match target {
        CleanupTarget::Jobs {
            statuses,
            max_age_days,
            dry_run,
            yes,
        } => {
            let parsed: Option<Vec<JobStatus>> = if statuses.is_empty() {
                None
            } else {
                Some(
                    statuses
                        .iter()
                        .map(|s| {
                            JobStatus::parse(s).ok_or_else(|| {
                                OrchestratorError::Validation(format!("invalid status {:?}", s))
                            })
                        })
                        .collect::<Result<_, _>>()?,
                )
            };
            cleanup_jobs(
                &ctx,
                parsed.as_deref(),
                max_age_days,
                CleanupOptions {
                    dry_run,
                    assume_yes: yes,
                },
            )?;
        }
        CleanupTarget::Worktrees { dry_run, yes } => {
            cleanup_worktrees(
                &ctx,
                CleanupOptions {
                    dry_run,
                    assume_yes: yes,
                },
            )?;
        }
        CleanupTarget::Repos { dry_run, yes } => {
            cleanup_repo_caches(
                &ctx,
                CleanupOptions {
                    dry_run,
                    assume_yes: yes,
                },
            )?;
        }
    }
    Ok(())
}
