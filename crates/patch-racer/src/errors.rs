//! Error taxonomy for jobs and attempts.
//!
//! Two layers, never mixed: a [`JobError`] ends the whole job, an
//! [`AttemptError`] ends one strategy's attempt and is only ever collected by
//! the race coordinator. Callers ask [`JobError::scope`] /
//! [`AttemptError::scope`] instead of matching variants.
//!
//! | Error                          | Scope   | Retried |
//! |--------------------------------|---------|---------|
//! | SourceUnavailable              | Job     | no      |
//! | PlanningFailed                 | Job     | no      |
//! | RaceFailed                     | Job     | no      |
//! | PublishFailed                  | Job     | no      |
//! | WorkspaceAllocation            | Attempt | no      |
//! | Generation                     | Attempt | no      |
//! | ValidationFailed               | Attempt | no      |
//! | Timeout / Cancelled / Crashed  | Attempt | no      |

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Whether an error terminates the job or only the attempt that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    Job,
    Attempt,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job => write!(f, "job"),
            Self::Attempt => write!(f, "attempt"),
        }
    }
}

/// Failure from the content generator, or from writing what it produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The model endpoint could not be reached or returned an error.
    #[error("generator transport failure: {0}")]
    Transport(String),

    /// The model answered, but not in a shape we accept.
    #[error("malformed generator response: {0}")]
    Malformed(String),

    /// Writing or reading the target file failed.
    #[error("file i/o failure: {0}")]
    Io(String),
}

/// Why a single strategy's attempt did not succeed.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    /// The attempt's workspace could not be cloned from the seed.
    #[error("workspace allocation failed: {0}")]
    WorkspaceAllocation(String),

    /// One target file could not be produced; the attempt stops there.
    #[error("generation failed for {path}: {source}")]
    Generation {
        path: String,
        #[source]
        source: GenerationError,
    },

    /// Every file was written but the validation predicate rejected the tree.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The race deadline elapsed while this attempt was still running.
    #[error("race deadline elapsed before the attempt finished")]
    Timeout,

    /// Another attempt won, or the job was torn down.
    #[error("attempt cancelled")]
    Cancelled,

    /// The attempt task panicked or was aborted before reporting.
    #[error("attempt crashed: {0}")]
    Crashed(String),
}

impl AttemptError {
    pub fn scope(&self) -> ErrorScope {
        ErrorScope::Attempt
    }

    /// Short machine-friendly label for reports and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkspaceAllocation(_) => "workspace_allocation",
            Self::Generation { .. } => "generation",
            Self::ValidationFailed(_) => "validation_failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Crashed(_) => "crashed",
        }
    }
}

/// One strategy's failure inside an aggregate race failure.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub strategy: String,
    pub error: AttemptError,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

/// Stage of the publish sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStage {
    Fork,
    Branch,
    Commit,
    Push,
    PullRequest,
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fork => write!(f, "fork"),
            Self::Branch => write!(f, "branch"),
            Self::Commit => write!(f, "commit"),
            Self::Push => write!(f, "push"),
            Self::PullRequest => write!(f, "pull_request"),
        }
    }
}

/// Terminal job failure. Every variant is fatal; nothing here is retried.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("source repository unavailable: {0}")]
    SourceUnavailable(String),

    #[error("planning failed: {0}")]
    PlanningFailed(String),

    #[error("{}", race_failed_message(*timed_out, failures))]
    RaceFailed {
        timed_out: bool,
        failures: Vec<AttemptFailure>,
    },

    #[error("publish failed at {stage}: {message}")]
    PublishFailed { stage: PublishStage, message: String },
}

impl JobError {
    pub fn scope(&self) -> ErrorScope {
        ErrorScope::Job
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::PlanningFailed(_) => "planning_failed",
            Self::RaceFailed { .. } => "race_failed",
            Self::PublishFailed { .. } => "publish_failed",
        }
    }

    /// Per-attempt details, empty unless the race itself failed.
    pub fn attempt_failures(&self) -> &[AttemptFailure] {
        match self {
            Self::RaceFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

fn race_failed_message(timed_out: bool, failures: &[AttemptFailure]) -> String {
    let detail = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    if timed_out {
        format!("race timed out without a winner ({detail})")
    } else {
        format!("all {} attempts failed ({detail})", failures.len())
    }
}
