//! Verifier Report: Structured output from the verification pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a single verification gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    /// Gate passed successfully
    Passed,
    /// Gate failed with errors
    Failed,
    /// Gate was skipped (previous gate failed and pipeline is fail-fast)
    Skipped,
}

impl GateOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "PASS"),
            Self::Failed => write!(f, "FAIL"),
            Self::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Result of a single verification gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    /// Gate name (e.g. "build", "test")
    pub gate: String,
    /// Whether the gate passed, failed, or was skipped
    pub outcome: GateOutcome,
    /// Duration of this gate
    pub duration_ms: u64,
    /// Exit code from the command
    pub exit_code: Option<i32>,
    /// Combined stderr/stdout tail, truncated (failures only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_excerpt: Option<String>,
}

impl GateResult {
    pub fn skipped(gate: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            outcome: GateOutcome::Skipped,
            duration_ms: 0,
            exit_code: None,
            output_excerpt: None,
        }
    }
}

/// Complete verifier report for one workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierReport {
    /// Workspace root the gates ran in
    pub working_dir: String,
    /// When the pipeline started
    pub started_at: DateTime<Utc>,
    /// Per-gate results in execution order
    pub gates: Vec<GateResult>,
    /// Gates that passed
    pub gates_passed: usize,
    /// Gates that were configured
    pub gates_total: usize,
    /// True when no configured gate failed
    pub all_green: bool,
    /// Wall-clock duration of the whole pipeline
    pub duration_ms: u64,
}

impl VerifierReport {
    pub fn new(working_dir: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            started_at: Utc::now(),
            gates: Vec::new(),
            gates_passed: 0,
            gates_total: 0,
            all_green: true,
            duration_ms: 0,
        }
    }

    pub fn add_gate(&mut self, result: GateResult) {
        self.gates_total += 1;
        match result.outcome {
            GateOutcome::Passed => self.gates_passed += 1,
            GateOutcome::Failed => self.all_green = false,
            GateOutcome::Skipped => {}
        }
        self.gates.push(result);
    }

    pub fn finalize(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
    }

    /// The first failing gate, if any
    pub fn first_failure(&self) -> Option<&GateResult> {
        self.gates
            .iter()
            .find(|g| g.outcome == GateOutcome::Failed)
    }

    /// One-line description of why the report is red
    pub fn failure_summary(&self) -> Option<String> {
        let failed = self.first_failure()?;
        let code = failed
            .exit_code
            .map(|c| format!("exit {c}"))
            .unwrap_or_else(|| "no exit code".to_string());
        let excerpt = failed
            .output_excerpt
            .as_deref()
            .and_then(|e| e.lines().rev().find(|l| !l.trim().is_empty()))
            .unwrap_or("");
        Some(format!("gate '{}' failed ({code}): {}", failed.gate, excerpt.trim()))
    }
}
