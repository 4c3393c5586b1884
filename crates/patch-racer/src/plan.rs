//! Plan Store: the one immutable change plan shared by every attempt.
//!
//! Built once per job from the seed workspace: digest the repository, ask the
//! generator for a summary, then for the target files. Whatever comes back is
//! normalized and validated here; a plan that escapes the repository or names
//! nothing is a `PlanningFailed`, never a partial plan.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use coordination::{normalize_relative, FileWalker};
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::JobError;
use crate::generator::ContentGenerator;
use crate::workspace::Workspace;

/// Files listed in the digest handed to `summarize`.
const DIGEST_FILE_LIMIT: usize = 300;
/// README characters included in the digest.
const DIGEST_README_CHARS: usize = 4_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    targets: BTreeSet<PathBuf>,
    task: String,
}

impl Plan {
    /// Validate raw generator paths into a plan.
    ///
    /// Paths are normalized (`./` dropped, backslashes unified, duplicates
    /// collapsed). Any absolute, `..`-bearing or `.git/` path rejects the
    /// whole plan, as does an empty result.
    pub fn new<I, S>(task: impl Into<String>, raw_targets: I) -> Result<Self, JobError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut targets = BTreeSet::new();
        for raw in raw_targets {
            let path = normalize_relative(raw.as_ref())
                .map_err(|e| JobError::PlanningFailed(format!("invalid target: {e}")))?;
            targets.insert(path);
        }
        if targets.is_empty() {
            return Err(JobError::PlanningFailed(
                "generator returned no target files".to_string(),
            ));
        }
        Ok(Self {
            targets,
            task: task.into(),
        })
    }

    pub fn targets(&self) -> impl Iterator<Item = &Path> {
        self.targets.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn task(&self) -> &str {
        &self.task
    }
}

/// File listing plus README excerpt for the summarizer.
pub fn repository_digest(root: &Path) -> String {
    let walker = FileWalker::new(root);
    let files = walker.source_files(DIGEST_FILE_LIMIT);

    let mut digest = String::from("## Files\n");
    for file in &files {
        digest.push_str(&file.display().to_string());
        digest.push('\n');
    }
    if files.len() == DIGEST_FILE_LIMIT {
        digest.push_str("(listing truncated)\n");
    }
    if let Some(readme) = walker.readme_excerpt(DIGEST_README_CHARS) {
        digest.push_str("\n## README\n");
        digest.push_str(&readme);
        digest.push('\n');
    }
    digest
}

/// One summarize + plan pass over the seed workspace.
pub async fn build_plan(
    seed: &Workspace,
    task: &str,
    generator: &dyn ContentGenerator,
) -> Result<Arc<Plan>, JobError> {
    let root = seed.root().to_path_buf();
    let digest = tokio::task::spawn_blocking(move || repository_digest(&root))
        .await
        .map_err(|e| JobError::PlanningFailed(format!("digest task failed: {e}")))?;

    let summary = generator
        .summarize(&digest)
        .await
        .map_err(|e| JobError::PlanningFailed(format!("summarize: {e}")))?;

    let raw = generator
        .plan(&summary, task)
        .await
        .map_err(|e| JobError::PlanningFailed(format!("plan: {e}")))?;

    let plan = Plan::new(task, &raw).inspect_err(|e| warn!(raw = ?raw, "rejected plan: {e}"))?;
    info!(targets = plan.len(), "plan built");
    Ok(Arc::new(plan))
}
