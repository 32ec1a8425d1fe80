//! Worker pool: N tasks polling the scheduler and driving claimed jobs
//! through their lifecycle.

mod handle;
mod pool;

pub use handle::{handle_job, render_prompt};
pub use pool::WorkerPool;
