use serde::Serialize;
use std::path::PathBuf;

/// Derived state of one worktree directory.
///
/// Not a stored row: computed from git's worktree list, the managed base
/// directory on disk, and the job rows that reference the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeState {
    /// Managed, no job references it: safe to delete
    Orphaned,
    /// Referenced by at least one job, none protected
    InUse,
    /// Referenced by a running/awaiting_input job
    Protected,
    /// Git reports the worktree as locked
    Locked,
    /// Outside the managed base directory
    Unmanaged,
}

/// Minimal view of a job referencing a worktree.
#[derive(Debug, Clone, Serialize)]
pub struct WorktreeJobRef {
    pub id: String,
    pub status: super::JobStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub locked: bool,
    pub prunable: bool,
    /// Inside the orchestrator's managed base directory
    pub managed: bool,
    pub state: WorktreeState,
    /// Why the entry cannot be deleted right now (empty when deletable)
    pub blocked_reasons: Vec<String>,
    pub jobs: Vec<WorktreeJobRef>,
}

impl WorktreeEntry {
    pub fn deletable(&self) -> bool {
        self.state == WorktreeState::Orphaned
    }
}
