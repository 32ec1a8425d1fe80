//! Core domain types for codexd

mod branch;
mod event;
mod job;
mod summary;
mod worktree;

pub use branch::{
    BRANCH_PREFIX, branch_hash, derive_branch_name, feature_branch_name, repo_hash,
    sanitize_ref_component, slugify, worktree_dir_name,
};
pub use event::{Event, LogStream};
pub use job::{CreateJobInput, Job, JobFilter, JobLogEntry, JobSpec, JobStatus, PushMode};
pub use summary::{CodexOutcome, Continuation, ResultSummary, TestOutcome};
pub use worktree::{WorktreeEntry, WorktreeJobRef, WorktreeState};
