//! The polling loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{error, info};

use super::handle::handle_job;
use crate::agent::AgentRunner;
use crate::app::AppContext;
use crate::domain::Event;

/// Fixed-size pool of workers. Shutdown is cooperative: `stop` lets each
/// worker finish its in-flight job before the loop exits.
pub struct WorkerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(ctx: Arc<AppContext>, runner: Arc<dyn AgentRunner>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handles = (0..ctx.config.worker_concurrency.max(1))
            .map(|index| {
                let ctx = Arc::clone(&ctx);
                let runner = Arc::clone(&runner);
                let stop = Arc::clone(&stop);
                tokio::spawn(worker_loop(index, ctx, runner, stop))
            })
            .collect();
        Self { stop, handles }
    }

    /// Request shutdown; running jobs are finished, not interrupted.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    index: usize,
    ctx: Arc<AppContext>,
    runner: Arc<dyn AgentRunner>,
    stop: Arc<AtomicBool>,
) {
    let worker_type = ctx.config.worker_type.clone();
    let poll = ctx.config.worker_poll_interval;
    info!("worker {} polling for {:?} jobs", index, worker_type);

    while !stop.load(Ordering::SeqCst) {
        match ctx.store.claim_oldest(&worker_type) {
            Ok(Some(job)) => {
                // The claim committed before anyone hears about it.
                ctx.bus.emit(Event::JobUpdated(job.clone()));
                if let Err(e) = handle_job(&ctx, runner.as_ref(), job).await {
                    // Failing to *report* completion is fatal for this
                    // iteration; the job stays visible as running and a
                    // retry of the final write happens on the next claim.
                    error!("worker {}: {}", index, e);
                    tokio::time::sleep(poll).await;
                }
            }
            Ok(None) => tokio::time::sleep(poll).await,
            Err(e) => {
                error!("worker {}: claim failed: {}", index, e);
                tokio::time::sleep(poll).await;
            }
        }
    }
    info!("worker {} stopped", index);
}
