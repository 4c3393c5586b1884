//! Shared fixtures: local git remotes and hand-written fakes for every seam.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coordination::{GitError, GitManager};
use patch_racer::hosting::{HostingError, PullRequestSpec};
use patch_racer::{
    ContentGenerator, Credential, FileRequest, GenerationError, HostingClient, JobOrchestrator,
    PullRequestRef, RacerConfig, RepoRef, SourceFetcher, Strategy, Validator,
};

pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@test.com"])
        .args(["-c", "init.defaultBranch=main"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git runs");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Bare repository at `<root>/origin.git` holding one commit on `main`
/// with `README.md` and `src/lib.rs`.
pub fn init_origin(root: &Path) -> PathBuf {
    let origin = root.join("origin.git");
    let work = root.join("scratch");
    std::fs::create_dir_all(&origin).unwrap();
    std::fs::create_dir_all(work.join("src")).unwrap();

    git(&origin, &["init", "-q", "--bare"]);
    git(&work, &["init", "-q"]);
    std::fs::write(work.join("README.md"), "# widgets\n").unwrap();
    std::fs::write(work.join("src/lib.rs"), "pub fn one() -> u32 { 1 }\n").unwrap();
    git(&work, &["add", "."]);
    git(&work, &["commit", "-q", "-m", "init"]);
    git(&work, &["remote", "add", "origin", origin.to_str().unwrap()]);
    git(&work, &["push", "-q", "origin", "HEAD:main"]);
    origin
}

/// Clones a local bare repository instead of the network remote.
pub struct LocalFetcher {
    pub origin: PathBuf,
}

#[async_trait]
impl SourceFetcher for LocalFetcher {
    async fn fetch(
        &self,
        _repo: &RepoRef,
        _credential: Option<&Credential>,
        dest: &Path,
    ) -> Result<(), GitError> {
        GitManager::clone_repo(&self.origin.display().to_string(), dest).await?;
        Ok(())
    }
}

/// Clones fine, but leaves `origin` pointing nowhere so the push fails.
pub struct DeadRemoteFetcher {
    pub origin: PathBuf,
}

#[async_trait]
impl SourceFetcher for DeadRemoteFetcher {
    async fn fetch(
        &self,
        _repo: &RepoRef,
        _credential: Option<&Credential>,
        dest: &Path,
    ) -> Result<(), GitError> {
        let git = GitManager::clone_repo(&self.origin.display().to_string(), dest).await?;
        let dead = self.origin.with_file_name("no-such-remote.git");
        git.set_remote_url("origin", &dead.display().to_string(), false)
            .await
    }
}

/// How one strategy behaves when asked for a file.
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    pub delay: Duration,
    /// Fail with a transport error on this path.
    pub fail_on: Option<String>,
}

/// Plans a fixed target list; generates `<strategy>: <path>` per file.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub targets: Vec<String>,
    pub behaviours: HashMap<String, Behaviour>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    pub fn new(targets: &[&str]) -> Self {
        Self {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with(mut self, strategy: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(strategy.to_string(), behaviour);
        self
    }

    pub fn calls_for(&self, strategy: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == strategy)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn summarize(&self, digest: &str) -> Result<String, GenerationError> {
        Ok(digest.lines().take(5).collect::<Vec<_>>().join("\n"))
    }

    async fn plan(&self, _summary: &str, _task: &str) -> Result<Vec<String>, GenerationError> {
        Ok(self.targets.clone())
    }

    async fn generate_file(&self, req: FileRequest<'_>) -> Result<String, GenerationError> {
        let strategy = req.strategy.name.clone();
        let path = req.path.display().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((strategy.clone(), path.clone()));

        let behaviour = self.behaviours.get(&strategy).cloned().unwrap_or_default();
        tokio::time::sleep(behaviour.delay).await;
        if behaviour.fail_on.as_deref() == Some(path.as_str()) {
            return Err(GenerationError::Transport("connection reset by peer".into()));
        }
        Ok(format!("{strategy}: {path}\n"))
    }
}

pub struct AcceptAll;

#[async_trait]
impl Validator for AcceptAll {
    async fn validate(&self, _root: &Path) -> Result<(), String> {
        Ok(())
    }
}

pub struct RejectAll;

#[async_trait]
impl Validator for RejectAll {
    async fn validate(&self, _root: &Path) -> Result<(), String> {
        Err("gate 'test' failed (exit 101): test result: FAILED".into())
    }
}

#[derive(Debug, Clone)]
pub struct OpenedPr {
    pub repo: String,
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// Records pull requests and hands out sequential numbers. Forks resolve to
/// `fork_into` when set and are refused otherwise.
#[derive(Default)]
pub struct RecordingHosting {
    pub opened: Mutex<Vec<OpenedPr>>,
    pub fork_into: Option<RepoRef>,
    pub forked: Mutex<Vec<String>>,
}

impl RecordingHosting {
    pub fn forking_into(fork: RepoRef) -> Self {
        Self {
            fork_into: Some(fork),
            ..Self::default()
        }
    }
}

#[async_trait]
impl HostingClient for RecordingHosting {
    async fn open_pull_request(
        &self,
        spec: PullRequestSpec<'_>,
        _credential: Option<&Credential>,
    ) -> Result<PullRequestRef, HostingError> {
        let mut opened = self.opened.lock().unwrap();
        opened.push(OpenedPr {
            repo: spec.repo.slug(),
            head: spec.head.to_string(),
            base: spec.base.to_string(),
            title: spec.title.to_string(),
            body: spec.body.to_string(),
        });
        let number = opened.len() as u64;
        Ok(PullRequestRef {
            number,
            url: format!("https://github.com/{}/pull/{number}", spec.repo.slug()),
        })
    }

    async fn fork_repository(
        &self,
        repo: &RepoRef,
        _credential: Option<&Credential>,
    ) -> Result<RepoRef, HostingError> {
        self.forked.lock().unwrap().push(repo.slug());
        self.fork_into.clone().ok_or_else(|| HostingError::Api {
            status: 403,
            message: "Resource not accessible by integration".into(),
        })
    }
}

pub fn strategies(names: &[&str]) -> Vec<Strategy> {
    names
        .iter()
        .map(|n| Strategy::new(*n, 0.3, ""))
        .collect()
}

pub fn config(workspace_base: &Path, names: &[&str]) -> RacerConfig {
    RacerConfig {
        workspace_base: workspace_base.to_path_buf(),
        strategies: strategies(names),
        race_timeout_secs: 30,
        cancel_grace_secs: 1,
        gates: Vec::new(),
        enhance_task: false,
        telemetry_path: None,
        base_branch: "main".into(),
        branch_prefix: "ai-agent".into(),
        ..RacerConfig::default()
    }
}

pub fn orchestrator(
    config: RacerConfig,
    fetcher: impl SourceFetcher + 'static,
    generator: Arc<ScriptedGenerator>,
    validator: impl Validator + 'static,
    hosting: Arc<RecordingHosting>,
) -> Arc<JobOrchestrator> {
    Arc::new(JobOrchestrator::new(
        config,
        Arc::new(fetcher),
        generator,
        Arc::new(validator),
        hosting,
    ))
}

/// Entries left under a workspace base directory.
pub fn leftovers(base: &Path) -> Vec<String> {
    match std::fs::read_dir(base) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}
