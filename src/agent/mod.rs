//! Agent CLI adapters.

mod codex;
mod runner;
mod session;

pub use codex::CodexRunner;
pub use runner::{AgentInvocation, AgentRunner, ExecResult, LogChunk};
pub use session::{extract_session_id, find_rollout_session};
