//! Error taxonomy shared by the store, the workers and the HTTP layer.

use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Malformed client input: empty required field, invalid enum value, etc.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Lookup by id missed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Deletion or continuation attempted on a running/awaiting_input job.
    #[error("job {0} is in a protected state")]
    ProtectedState(String),

    /// A dependency of the new job has already failed or been cancelled.
    #[error("dependency {0} is failed or cancelled")]
    DependencyTerminated(String),

    /// The new dependency edges would close a cycle.
    #[error("circular dependency involving job {0}")]
    CircularDependency(String),

    /// Optimistic status update precondition unmet.
    #[error("job {id} is no longer in {expected:?}")]
    StaleState { id: String, expected: Vec<String> },

    /// Another surviving job depends on the one being deleted.
    #[error("job {0} has dependents")]
    DependentExists(String),

    /// The agent subprocess exited non-zero or timed out.
    #[error("agent execution failed: {message}")]
    ExecFailure { message: String, timed_out: bool },

    /// A git invocation exited non-zero.
    #[error("git {command} failed: {stderr}")]
    GitFailure { command: String, stderr: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// HTTP status code this error translates to at the control plane.
    /// Everything not client-attributable is a 500.
    pub fn http_status(&self) -> u16 {
        match self {
            OrchestratorError::Validation(_)
            | OrchestratorError::ProtectedState(_)
            | OrchestratorError::DependencyTerminated(_)
            | OrchestratorError::CircularDependency(_)
            | OrchestratorError::StaleState { .. }
            | OrchestratorError::DependentExists(_) => 400,
            OrchestratorError::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// Machine-readable error code for JSON envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation_error",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::ProtectedState(_) => "protected_state",
            OrchestratorError::DependencyTerminated(_) => "dependency_terminated",
            OrchestratorError::CircularDependency(_) => "circular_dependency",
            OrchestratorError::StaleState { .. } => "stale_state",
            OrchestratorError::DependentExists(_) => "dependent_exists",
            OrchestratorError::ExecFailure { .. } => "exec_failure",
            OrchestratorError::GitFailure { .. } => "git_failure",
            OrchestratorError::Io { .. } => "io_failure",
            OrchestratorError::Storage(_) => "storage_error",
            OrchestratorError::Serialization(_) => "serialization_error",
            OrchestratorError::Other(_) => "internal_error",
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OrchestratorError::Io {
            path: path.into(),
            source,
        }
    }
}
