//! Workspace Manager: isolated, disk-backed working copies for one job.
//!
//! Every workspace lives in its own directory under the configured base,
//! named `<job-id>-<role>-<uuid>` and created with an exclusive `create_dir`,
//! so two allocations can never alias. Attempt workspaces are deep copies of
//! the seed (including `.git`), taken with `coordination::copy_tree`.

use std::io;
use std::path::{Path, PathBuf};

use coordination::{copy_tree, GitError, GitManager};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{AttemptError, JobError};
use crate::source::{Credential, RepoRef, SourceFetcher};

/// Role of a workspace within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkspaceKind {
    /// Pristine checkout that attempts are cloned from. Never mutated.
    Seed,
    /// Exclusively owned by one agent attempt.
    Attempt,
}

impl WorkspaceKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Attempt => "attempt",
        }
    }
}

/// Handle to one allocated workspace.
///
/// Cloning the handle does not duplicate the directory; it only lets the
/// coordinator keep a reference for cleanup while an executor works in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    id: Uuid,
    kind: WorkspaceKind,
    root: PathBuf,
    baseline: String,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> WorkspaceKind {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Commit the workspace was allocated at.
    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn git(&self) -> GitManager {
        GitManager::new(&self.root)
    }
}

/// Allocates, reverts and releases the workspaces of a single job.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
    job_id: Uuid,
}

impl WorkspaceManager {
    pub fn new(base_dir: impl Into<PathBuf>, job_id: Uuid) -> Self {
        Self {
            base_dir: base_dir.into(),
            job_id,
        }
    }

    /// Reserve a fresh, empty directory.
    fn allocate_dir(&self, kind: WorkspaceKind) -> io::Result<(Uuid, PathBuf)> {
        std::fs::create_dir_all(&self.base_dir)?;
        let id = Uuid::new_v4();
        let root = self
            .base_dir
            .join(format!("{}-{}-{}", self.job_id, kind.as_str(), id));
        // Exclusive: fails with AlreadyExists instead of reusing a directory.
        std::fs::create_dir(&root)?;
        Ok((id, root))
    }

    /// Fetch a clean checkout of `repo` into a new seed workspace.
    pub async fn acquire_seed(
        &self,
        fetcher: &dyn SourceFetcher,
        repo: &RepoRef,
        credential: Option<&Credential>,
    ) -> Result<Workspace, JobError> {
        let (id, root) = self
            .allocate_dir(WorkspaceKind::Seed)
            .map_err(|e| JobError::SourceUnavailable(format!("allocating seed workspace: {e}")))?;

        if let Err(e) = fetcher.fetch(repo, credential, &root).await {
            remove_tree(&root).await;
            return Err(JobError::SourceUnavailable(e.to_string()));
        }

        let baseline = match GitManager::new(&root).head_commit().await {
            Ok(commit) => commit,
            Err(e) => {
                remove_tree(&root).await;
                return Err(JobError::SourceUnavailable(format!(
                    "checkout has no resolvable HEAD: {e}"
                )));
            }
        };

        info!(job = %self.job_id, repo = %repo, path = %root.display(), "seed workspace ready");
        Ok(Workspace {
            id,
            kind: WorkspaceKind::Seed,
            root,
            baseline,
        })
    }

    /// Deep-copy the seed into a new attempt workspace.
    ///
    /// Failure here is fatal only to the attempt that asked for it.
    pub async fn clone_for_attempt(&self, seed: &Workspace) -> Result<Workspace, AttemptError> {
        let (id, root) = self
            .allocate_dir(WorkspaceKind::Attempt)
            .map_err(|e| AttemptError::WorkspaceAllocation(e.to_string()))?;

        let src = seed.root.clone();
        let dest = root.clone();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dest))
            .await
            .map_err(|e| io::Error::other(e.to_string()))
            .and_then(|r| r);

        let stats = match copied {
            Ok(stats) => stats,
            Err(e) => {
                remove_tree(&root).await;
                return Err(AttemptError::WorkspaceAllocation(format!(
                    "copying seed: {e}"
                )));
            }
        };

        let baseline = match GitManager::new(&root).head_commit().await {
            Ok(commit) => commit,
            Err(e) => {
                remove_tree(&root).await;
                return Err(AttemptError::WorkspaceAllocation(format!(
                    "copied tree is not a usable checkout: {e}"
                )));
            }
        };

        debug!(
            job = %self.job_id,
            workspace = %id,
            files = stats.files,
            bytes = stats.bytes,
            "attempt workspace cloned"
        );
        Ok(Workspace {
            id,
            kind: WorkspaceKind::Attempt,
            root,
            baseline,
        })
    }

    /// Restore tracked files to the allocation baseline and drop untracked
    /// files.
    pub async fn revert(&self, workspace: &Workspace) -> Result<(), GitError> {
        let git = workspace.git();
        git.reset_hard(&workspace.baseline).await?;
        git.clean_untracked().await
    }

    /// Delete the workspace directory. Idempotent and infallible: a missing
    /// directory is success, anything else is logged and swallowed.
    pub async fn release(&self, workspace: &Workspace) {
        remove_tree(&workspace.root).await;
        debug!(job = %self.job_id, workspace = %workspace.id, "workspace released");
    }
}

async fn remove_tree(root: &Path) {
    match tokio::fs::remove_dir_all(root).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %root.display(), "failed to remove workspace: {e}"),
    }
}
