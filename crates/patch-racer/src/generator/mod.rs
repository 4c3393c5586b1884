//! Content generator seam.
//!
//! The engine never looks at prompts or models; it only calls the four
//! operations of [`ContentGenerator`] and trusts nothing that comes back.
//! Raw model text is parsed here, at a strict boundary:
//! - plan payloads must contain a JSON array of paths
//! - file payloads may carry one surrounding code fence and must be non-empty

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::errors::GenerationError;
use crate::strategy::Strategy;

pub mod rig_backend;

pub use rig_backend::RigGenerator;

/// One file-generation call.
#[derive(Debug, Clone, Copy)]
pub struct FileRequest<'a> {
    /// Workspace-relative target path.
    pub path: &'a Path,
    /// Current content, `None` when the file does not exist yet.
    pub existing: Option<&'a str>,
    pub task: &'a str,
    pub strategy: &'a Strategy,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Condense a repository digest into a short brief.
    async fn summarize(&self, digest: &str) -> Result<String, GenerationError>;

    /// Raw target paths for `task`. Validation happens in the plan store.
    async fn plan(&self, summary: &str, task: &str) -> Result<Vec<String>, GenerationError>;

    /// Complete new content for one file.
    async fn generate_file(&self, request: FileRequest<'_>) -> Result<String, GenerationError>;

    /// Optional rewrite of the task before planning. Identity by default.
    async fn enhance_task(&self, task: &str) -> Result<String, GenerationError> {
        Ok(task.to_string())
    }
}

static FENCED_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A\s*```[^\n]*\n(.*?)\n?```\s*\z").expect("FENCED_BODY regex should compile")
});

/// Pull the outermost JSON array out of a model response, tolerating
/// markdown fences and surrounding prose.
pub fn extract_json_array(raw: &str) -> &str {
    let stripped = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match (stripped.find('['), stripped.rfind(']')) {
        (Some(start), Some(end)) if start < end => &stripped[start..=end],
        _ => stripped,
    }
}

/// Parse a plan payload into raw path strings.
///
/// Accepts `["a", "b"]` or an array of objects carrying a `file_path` (or
/// `path`) string.
pub fn parse_plan_response(raw: &str) -> Result<Vec<String>, GenerationError> {
    let json = extract_json_array(raw);
    let items: Vec<serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| GenerationError::Malformed(format!("plan is not a JSON array: {e}")))?;

    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::String(path) => Ok(path),
            serde_json::Value::Object(ref map) => map
                .get("file_path")
                .or_else(|| map.get("path"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    GenerationError::Malformed(format!("plan entry has no path: {item}"))
                }),
            other => Err(GenerationError::Malformed(format!(
                "plan entry is not a path: {other}"
            ))),
        })
        .collect()
}

/// Parse a file payload: strip one surrounding code fence, reject empty
/// content.
pub fn parse_file_response(raw: &str) -> Result<String, GenerationError> {
    let body = match FENCED_BODY.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => {
            let mut body = inner.as_str().to_string();
            body.push('\n');
            body
        }
        None => raw.to_string(),
    };

    if body.trim().is_empty() {
        return Err(GenerationError::Malformed("empty file content".to_string()));
    }
    Ok(body)
}
