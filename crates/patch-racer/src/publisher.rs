//! Publisher: turn the winning workspace into a pull request.
//!
//! Branch, stage, commit, push to `origin`, open the pull request. With
//! forking enabled the repository is forked first, the branch goes to the
//! fork and the pull request is opened from `<fork-owner>:<branch>`. Any
//! failed step is a `PublishFailed` naming the stage; the race is never
//! re-run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use coordination::{CommitIdentity, GitError, GitManager};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{JobError, PublishStage};
use crate::executor::ApplySummary;
use crate::hosting::{HostingClient, PullRequestRef, PullRequestSpec};
use crate::source::{authenticated_url, Credential, RepoRef};
use crate::workspace::Workspace;

/// Characters of the task kept in the pull request title.
const TITLE_TASK_CHARS: usize = 50;
const REMOTE: &str = "origin";
const FORK_REMOTE: &str = "fork";
/// A fresh fork can take a few seconds before it accepts pushes.
const FORK_PUSH_ATTEMPTS: u32 = 4;
const FORK_PUSH_BASE_DELAY: Duration = Duration::from_secs(2);

/// Inputs for one publish.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub workspace: &'a Workspace,
    pub repo: &'a RepoRef,
    pub credential: Option<&'a Credential>,
    pub job_id: Uuid,
    pub task: &'a str,
    pub strategy: &'a str,
    pub summary: Option<ApplySummary>,
}

pub struct Publisher {
    hosting: Arc<dyn HostingClient>,
    base_branch: String,
    branch_prefix: String,
    identity: CommitIdentity,
    fork: bool,
}

impl Publisher {
    pub fn new(
        hosting: Arc<dyn HostingClient>,
        base_branch: impl Into<String>,
        branch_prefix: impl Into<String>,
        identity: CommitIdentity,
    ) -> Self {
        Self {
            hosting,
            base_branch: base_branch.into(),
            branch_prefix: branch_prefix.into(),
            identity,
            fork: false,
        }
    }

    /// Publish through a fork instead of pushing to the upstream repository.
    pub fn with_fork(mut self, fork: bool) -> Self {
        self.fork = fork;
        self
    }

    /// `<prefix>/<strategy>-<job-short-id>-<yyyymmddHHMMSS>`
    pub fn branch_name(&self, strategy: &str, job_id: Uuid, now: DateTime<Utc>) -> String {
        let short_id: String = job_id.simple().to_string().chars().take(8).collect();
        format!(
            "{}/{}-{}-{}",
            self.branch_prefix.trim_end_matches('/'),
            sanitize_ref_part(strategy),
            short_id,
            now.format("%Y%m%d%H%M%S")
        )
    }

    pub async fn publish(&self, request: PublishRequest<'_>) -> Result<PullRequestRef, JobError> {
        let git = request.workspace.git();
        let branch = self.branch_name(request.strategy, request.job_id, Utc::now());
        let title = pr_title(request.task);

        let fork = if self.fork {
            let fork = self
                .hosting
                .fork_repository(request.repo, request.credential)
                .await
                .map_err(|e| JobError::PublishFailed {
                    stage: PublishStage::Fork,
                    message: e.to_string(),
                })?;
            info!(upstream = %request.repo, fork = %fork, "repository forked");
            Some(fork)
        } else {
            None
        };

        git.create_branch(&branch)
            .await
            .map_err(|e| failed(PublishStage::Branch, e))?;

        git.stage_all()
            .await
            .map_err(|e| failed(PublishStage::Commit, e))?;
        let commit = git
            .commit(&commit_message(&title, request.task, request.strategy), &self.identity)
            .await
            .map_err(|e| match e {
                GitError::NothingToCommit { .. } => JobError::PublishFailed {
                    stage: PublishStage::Commit,
                    message: "winning attempt left no changes to commit".to_string(),
                },
                other => failed(PublishStage::Commit, other),
            })?;

        let head = match &fork {
            Some(fork) => {
                let url = request
                    .credential
                    .and_then(|c| authenticated_url(fork.clone_url(), c))
                    .unwrap_or_else(|| fork.clone_url().to_string());
                git.add_remote(FORK_REMOTE, &url)
                    .await
                    .map_err(|e| failed(PublishStage::Push, e))?;
                push_to_fork(&git, &branch)
                    .await
                    .map_err(|e| failed(PublishStage::Push, e))?;
                format!("{}:{branch}", fork.owner())
            }
            None => {
                git.push(REMOTE, &branch)
                    .await
                    .map_err(|e| failed(PublishStage::Push, e))?;
                branch.clone()
            }
        };
        info!(branch = %branch, commit = %commit, "branch pushed");

        let body = pr_body(request.task, request.strategy, request.summary);
        let pr = self
            .hosting
            .open_pull_request(
                PullRequestSpec {
                    repo: request.repo,
                    head: &head,
                    base: &self.base_branch,
                    title: &title,
                    body: &body,
                },
                request.credential,
            )
            .await
            .map_err(|e| JobError::PublishFailed {
                stage: PublishStage::PullRequest,
                message: e.to_string(),
            })?;

        info!(number = pr.number, url = %pr.url, "pull request opened");
        Ok(pr)
    }
}

/// Push `branch` to the fork remote, waiting out a fork that is still being
/// created.
async fn push_to_fork(git: &GitManager, branch: &str) -> Result<(), GitError> {
    let mut attempt = 0;
    loop {
        match git.push(FORK_REMOTE, branch).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt + 1 < FORK_PUSH_ATTEMPTS => {
                let delay = FORK_PUSH_BASE_DELAY * 2u32.pow(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "push to fork failed: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn failed(stage: PublishStage, error: GitError) -> JobError {
    JobError::PublishFailed {
        stage,
        message: error.to_string(),
    }
}

/// `AI Agent: <first 50 chars of the task, on one line>`
pub fn pr_title(task: &str) -> String {
    let one_line = task.split_whitespace().collect::<Vec<_>>().join(" ");
    let head: String = one_line.chars().take(TITLE_TASK_CHARS).collect();
    format!("AI Agent: {}", head.trim_end())
}

pub fn pr_body(task: &str, strategy: &str, summary: Option<ApplySummary>) -> String {
    let quoted = task
        .lines()
        .map(|l| format!("> {l}"))
        .collect::<Vec<_>>()
        .join("\n");
    let mut body = format!("## Task\n\n{quoted}\n\n**Winning strategy:** `{strategy}`\n");
    if let Some(s) = summary {
        body.push_str(&format!(
            "**Files:** {} created, {} modified\n",
            s.files_created, s.files_modified
        ));
    }
    body
}

fn commit_message(title: &str, task: &str, strategy: &str) -> String {
    format!("{title}\n\n{task}\n\nStrategy: {strategy}\n")
}

/// Reduce `raw` to characters git accepts in a ref component.
fn sanitize_ref_part(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "strategy".to_string()
    } else {
        cleaned.to_string()
    }
}
