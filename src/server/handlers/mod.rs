//! Request handlers, one module per resource.

pub mod events;
pub mod jobs;
pub mod misc;
pub mod worktrees;
