//! Agent Executor: one strategy's attempt inside one workspace.
//!
//! ```text
//! Pending → Applying → Validating → Succeeded
//!              │            │
//!              └────────────┴──────→ Failed
//! ```
//!
//! Cancellation is cooperative: the token is checked on every transition and
//! between files, so an abandoned attempt finishes the step it is in and then
//! stops. The executor never deletes its workspace; release belongs to the
//! race coordinator.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use coordination::{sandbox_path, Verifier, VerifierConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{AttemptError, GenerationError};
use crate::generator::{ContentGenerator, FileRequest};
use crate::plan::Plan;
use crate::strategy::Strategy;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Pending,
    Applying,
    Validating,
    Succeeded,
    Failed,
}

/// Success predicate over a mutated workspace.
#[async_trait]
pub trait Validator: Send + Sync {
    /// `Err` carries a human-readable reason.
    async fn validate(&self, root: &Path) -> Result<(), String>;
}

/// Runs the configured gate commands in the workspace.
pub struct GateValidator {
    config: VerifierConfig,
}

impl GateValidator {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Validator for GateValidator {
    async fn validate(&self, root: &Path) -> Result<(), String> {
        let report = Verifier::new(root, self.config.clone()).run_pipeline().await;
        debug!(
            passed = report.gates_passed,
            total = report.gates_total,
            duration_ms = report.duration_ms,
            "validation gates finished"
        );
        if report.all_green {
            Ok(())
        } else {
            Err(report
                .failure_summary()
                .unwrap_or_else(|| "validation gates failed".to_string()))
        }
    }
}

/// What a successful attempt did to its workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub files_created: usize,
    pub files_modified: usize,
}

pub struct AgentExecutor {
    generator: Arc<dyn ContentGenerator>,
    validator: Arc<dyn Validator>,
}

impl AgentExecutor {
    pub fn new(generator: Arc<dyn ContentGenerator>, validator: Arc<dyn Validator>) -> Self {
        Self {
            generator,
            validator,
        }
    }

    /// Apply `plan` with `strategy` inside `workspace`, then validate.
    pub async fn run(
        &self,
        workspace: &Workspace,
        plan: &Plan,
        strategy: &Strategy,
        cancel: &CancellationToken,
    ) -> Result<ApplySummary, AttemptError> {
        let mut state = ExecutorState::Pending;

        let result = async {
            advance(&mut state, ExecutorState::Applying, cancel, strategy)?;
            let summary = self.apply(workspace, plan, strategy, cancel).await?;

            advance(&mut state, ExecutorState::Validating, cancel, strategy)?;
            self.validator
                .validate(workspace.root())
                .await
                .map_err(AttemptError::ValidationFailed)?;

            advance(&mut state, ExecutorState::Succeeded, cancel, strategy)?;
            Ok::<_, AttemptError>(summary)
        }
        .await;

        if let Err(e) = &result {
            debug!(strategy = %strategy.name, from = ?state, "attempt failed: {e}");
        }
        result
    }

    async fn apply(
        &self,
        workspace: &Workspace,
        plan: &Plan,
        strategy: &Strategy,
        cancel: &CancellationToken,
    ) -> Result<ApplySummary, AttemptError> {
        let mut summary = ApplySummary::default();

        for target in plan.targets() {
            if cancel.is_cancelled() {
                return Err(AttemptError::Cancelled);
            }
            let file_err = |source: GenerationError| AttemptError::Generation {
                path: target.display().to_string(),
                source,
            };
            let io_err = |e: io::Error| file_err(GenerationError::Io(e.to_string()));

            let dest = sandbox_path(workspace.root(), target)
                .map_err(|e| file_err(GenerationError::Io(e.to_string())))?;

            let existing = match tokio::fs::read_to_string(&dest).await {
                Ok(content) => Some(content),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(io_err(e)),
            };
            if existing.is_none() {
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
                }
            }

            let content = self
                .generator
                .generate_file(FileRequest {
                    path: target,
                    existing: existing.as_deref(),
                    task: plan.task(),
                    strategy,
                })
                .await
                .map_err(file_err)?;

            tokio::fs::write(&dest, content).await.map_err(io_err)?;
            if existing.is_some() {
                summary.files_modified += 1;
            } else {
                summary.files_created += 1;
            }
            debug!(strategy = %strategy.name, path = %target.display(), "file written");
        }

        Ok(summary)
    }
}

fn advance(
    state: &mut ExecutorState,
    next: ExecutorState,
    cancel: &CancellationToken,
    strategy: &Strategy,
) -> Result<(), AttemptError> {
    if cancel.is_cancelled() {
        *state = ExecutorState::Failed;
        return Err(AttemptError::Cancelled);
    }
    debug!(strategy = %strategy.name, from = ?*state, to = ?next, "executor transition");
    *state = next;
    Ok(())
}
