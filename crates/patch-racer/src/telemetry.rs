//! Structured job telemetry.
//!
//! One [`JobSummary`] per finished job, appended as a single JSON line to the
//! configured telemetry file. Failures to write are logged and ignored.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Wall-clock time spent in one job phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub duration_ms: u64,
}

/// One attempt as recorded in telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub strategy: String,
    /// `succeeded`, `failed`, `abandoned` or `running` (never observed).
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Complete record of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub repository: String,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// `done` or `failed`.
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub phases: Vec<PhaseTiming>,
    pub attempts: Vec<AttemptRecord>,
    pub prompt_version: String,
}

/// Append `summary` to the JSONL file at `path`, creating it if needed.
pub fn append_telemetry(summary: &JobSummary, path: &Path) {
    let json = match serde_json::to_string(summary) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize job telemetry: {e}");
            return;
        }
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Failed to create telemetry directory: {e}");
            return;
        }
    }

    use std::io::Write;
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{json}") {
                warn!("Failed to append telemetry: {e}");
            } else {
                info!(path = %path.display(), "Appended job telemetry");
            }
        }
        Err(e) => warn!("Failed to open telemetry file: {e}"),
    }
}
