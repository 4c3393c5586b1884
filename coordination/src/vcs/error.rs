//! Version-control error types
//!
//! Every git invocation maps its failure into [`GitError`]. Callers can ask
//! [`GitError::is_retryable`] instead of matching on stderr text themselves.

use thiserror::Error;

/// Result type alias for git operations
pub type GitResult<T> = Result<T, GitError>;

/// Errors that can occur while driving git
#[derive(Error, Debug, Clone)]
pub enum GitError {
    /// The `git` binary could not be spawned at all
    #[error("Failed to execute git {operation}: {message}")]
    Spawn { operation: String, message: String },

    /// Git ran and exited non-zero
    #[error("Git operation failed: {operation} - {message}")]
    Command { operation: String, message: String },

    /// Git command exceeded its time budget
    #[error("Git operation timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// There were no staged changes to commit
    #[error("Nothing to commit in {path}")]
    NothingToCommit { path: String },
}

impl GitError {
    /// Create a command failure
    pub fn command(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a spawn failure
    pub fn spawn(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Spawn {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable (transient failure)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Command { message, .. } => {
                let lower = message.to_lowercase();
                // Lock file conflicts
                lower.contains("index.lock")
                    || lower.contains("could not lock")
                    || lower.contains("another git process")
                    // Network hiccups
                    || lower.contains("timed out")
                    || lower.contains("connection reset")
                    || lower.contains("could not resolve host")
                    || lower.contains("early eof")
            }
            Self::Timeout { .. } => true,
            Self::Spawn { .. } | Self::NothingToCommit { .. } => false,
        }
    }

    /// The git sub-command that failed
    pub fn operation(&self) -> &str {
        match self {
            Self::Spawn { operation, .. }
            | Self::Command { operation, .. }
            | Self::Timeout { operation, .. } => operation,
            Self::NothingToCommit { .. } => "commit",
        }
    }
}
