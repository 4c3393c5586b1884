//! Job Orchestrator: one change request from submission to terminal outcome.
//!
//! ```text
//! Cloning ──► Planning ──► Racing ──► Publishing ──► Done
//!    │            │           │            │
//!    └────────────┴───────────┴────────────┴──────► Failed
//! ```
//!
//! Phases run strictly in order; only the race fans out. Every workspace the
//! job allocated is released before the terminal phase is published, whatever
//! the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use coordination::VerifierConfig;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::RacerConfig;
use crate::errors::JobError;
use crate::executor::{AgentExecutor, GateValidator, Validator};
use crate::generator::{ContentGenerator, RigGenerator};
use crate::hosting::{GitHubClient, HostingClient, PullRequestRef};
use crate::plan::build_plan;
use crate::prompts::PROMPT_VERSION;
use crate::publisher::{PublishRequest, Publisher};
use crate::race::{AgentAttempt, RaceConfig, RaceCoordinator, RaceProgress, RaceResult, RaceWin};
use crate::source::{Credential, GitSource, RepoRef, SourceFetcher};
use crate::telemetry::{append_telemetry, AttemptRecord, JobSummary, PhaseTiming};
use crate::workspace::{Workspace, WorkspaceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Cloning,
    Planning,
    Racing,
    Publishing,
    Done,
    Failed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloning => "cloning",
            Self::Planning => "planning",
            Self::Racing => "racing",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted change request.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub repo: RepoRef,
    pub task: String,
    pub credential: Option<Credential>,
}

impl JobRequest {
    pub fn new(repo: RepoRef, task: impl Into<String>, credential: Option<Credential>) -> Self {
        Self {
            repo,
            task: task.into(),
            credential,
        }
    }
}

/// Point-in-time view of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub race: RaceProgress,
}

/// Terminal record of a job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: Uuid,
    pub repo: RepoRef,
    pub task: String,
    pub result: Result<PullRequestRef, JobError>,
    /// Empty when the job never reached the race.
    pub attempts: Vec<AgentAttempt>,
    pub winner: Option<String>,
    pub phases: Vec<(JobPhase, Duration)>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl JobReport {
    pub fn phase(&self) -> JobPhase {
        if self.result.is_ok() {
            JobPhase::Done
        } else {
            JobPhase::Failed
        }
    }

    pub fn pull_request(&self) -> Option<&PullRequestRef> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.result.as_ref().err()
    }

    pub fn summary(&self) -> JobSummary {
        let attempts = self
            .attempts
            .iter()
            .map(|a| AttemptRecord {
                strategy: a.strategy.clone(),
                status: a.status.as_str().to_string(),
                elapsed_ms: a.elapsed.map(|d| d.as_millis() as u64),
                error_kind: a.error.as_ref().map(|e| e.kind().to_string()),
                error: a.error.as_ref().map(ToString::to_string),
            })
            .collect();

        JobSummary {
            job_id: self.id.to_string(),
            repository: self.repo.slug(),
            task: self.task.clone(),
            started_at: self.started_at,
            duration_ms: self.duration.as_millis() as u64,
            outcome: self.phase().as_str().to_string(),
            pull_request: self.pull_request().map(|pr| pr.url.clone()),
            winner: self.winner.clone(),
            error_kind: self.error().map(|e| e.kind().to_string()),
            error: self.error().map(ToString::to_string),
            phases: self
                .phases
                .iter()
                .map(|(phase, elapsed)| PhaseTiming {
                    phase: phase.as_str().to_string(),
                    duration_ms: elapsed.as_millis() as u64,
                })
                .collect(),
            attempts,
            prompt_version: PROMPT_VERSION.to_string(),
        }
    }
}

/// Caller's view of a submitted job.
pub struct JobHandle {
    id: Uuid,
    phase: watch::Receiver<JobPhase>,
    progress: watch::Receiver<RaceProgress>,
    task: JoinHandle<JobReport>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            phase: *self.phase.borrow(),
            race: *self.progress.borrow(),
        }
    }

    /// Phase changes, for callers that want to follow along.
    pub fn phases(&self) -> watch::Receiver<JobPhase> {
        self.phase.clone()
    }

    pub fn progress(&self) -> watch::Receiver<RaceProgress> {
        self.progress.clone()
    }

    pub async fn wait(self) -> Result<JobReport, JoinError> {
        self.task.await
    }
}

/// Mutable bookkeeping for one job: phase clock and everything that must be
/// cleaned up.
struct JobRun {
    phase_tx: watch::Sender<JobPhase>,
    current: JobPhase,
    entered: Instant,
    timings: Vec<(JobPhase, Duration)>,
    seed: Option<Workspace>,
    winner: Option<Workspace>,
    teardown: Option<JoinHandle<()>>,
    attempts: Vec<AgentAttempt>,
    winner_strategy: Option<String>,
}

impl JobRun {
    fn new(phase_tx: watch::Sender<JobPhase>) -> Self {
        phase_tx.send_replace(JobPhase::Cloning);
        Self {
            phase_tx,
            current: JobPhase::Cloning,
            entered: Instant::now(),
            timings: Vec::new(),
            seed: None,
            winner: None,
            teardown: None,
            attempts: Vec::new(),
            winner_strategy: None,
        }
    }

    fn enter(&mut self, phase: JobPhase) {
        self.timings.push((self.current, self.entered.elapsed()));
        self.current = phase;
        self.entered = Instant::now();
        self.phase_tx.send_replace(phase);
        info!(phase = %phase, "job phase");
    }

    /// Release every workspace this job still holds. Never fails.
    async fn cleanup(&mut self, manager: &WorkspaceManager) {
        if let Some(teardown) = self.teardown.take() {
            if let Err(e) = teardown.await {
                warn!("attempt teardown task failed: {e}");
            }
        }
        if let Some(winner) = self.winner.take() {
            manager.release(&winner).await;
        }
        if let Some(seed) = self.seed.take() {
            manager.release(&seed).await;
        }
    }
}

pub struct JobOrchestrator {
    config: RacerConfig,
    fetcher: Arc<dyn SourceFetcher>,
    generator: Arc<dyn ContentGenerator>,
    validator: Arc<dyn Validator>,
    hosting: Arc<dyn HostingClient>,
}

impl JobOrchestrator {
    pub fn new(
        config: RacerConfig,
        fetcher: Arc<dyn SourceFetcher>,
        generator: Arc<dyn ContentGenerator>,
        validator: Arc<dyn Validator>,
        hosting: Arc<dyn HostingClient>,
    ) -> Self {
        Self {
            config,
            fetcher,
            generator,
            validator,
            hosting,
        }
    }

    /// Production wiring: git clone, rig generator, gate validator, GitHub.
    pub fn from_config(config: RacerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let generator =
            RigGenerator::from_config(&config.generator).context("building content generator")?;
        let fetcher = GitSource::new(Duration::from_secs(config.clone_timeout_secs));
        let validator = GateValidator::new(VerifierConfig {
            gate_timeout_secs: config.gate_timeout_secs,
            comprehensive: config.comprehensive_gates,
            ..VerifierConfig::with_gates(config.gates.clone())
        });
        let hosting = GitHubClient::new(config.hosting_api.clone());

        Ok(Self::new(
            config,
            Arc::new(fetcher),
            Arc::new(generator),
            Arc::new(validator),
            Arc::new(hosting),
        ))
    }

    pub fn config(&self) -> &RacerConfig {
        &self.config
    }

    /// Start a job in the background.
    pub fn submit(self: &Arc<Self>, request: JobRequest) -> JobHandle {
        let id = Uuid::new_v4();
        let (phase_tx, phase) = watch::channel(JobPhase::Cloning);
        let (progress_tx, progress) = watch::channel(RaceProgress {
            total: self.config.strategies.len(),
            ..RaceProgress::default()
        });

        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.execute(id, request, phase_tx, progress_tx).await });

        JobHandle {
            id,
            phase,
            progress,
            task,
        }
    }

    /// Run a job to completion on the current task.
    pub async fn run(&self, request: JobRequest) -> JobReport {
        let (phase_tx, _) = watch::channel(JobPhase::Cloning);
        let (progress_tx, _) = watch::channel(RaceProgress::default());
        self.execute(Uuid::new_v4(), request, phase_tx, progress_tx)
            .await
    }

    async fn execute(
        &self,
        id: Uuid,
        request: JobRequest,
        phase_tx: watch::Sender<JobPhase>,
        progress_tx: watch::Sender<RaceProgress>,
    ) -> JobReport {
        let span = info_span!("job", job = %id, repo = %request.repo);
        async move {
            let started_at = Utc::now();
            let clock = Instant::now();
            let manager = Arc::new(WorkspaceManager::new(&self.config.workspace_base, id));
            let mut run = JobRun::new(phase_tx);

            let result = self
                .drive(id, &request, &manager, &mut run, progress_tx)
                .await;
            run.cleanup(&manager).await;

            match &result {
                Ok(pr) => {
                    run.enter(JobPhase::Done);
                    info!(url = %pr.url, "job done");
                }
                Err(e) => {
                    run.enter(JobPhase::Failed);
                    warn!(kind = e.kind(), "job failed: {e}");
                }
            }

            let report = JobReport {
                id,
                repo: request.repo,
                task: request.task,
                result,
                attempts: std::mem::take(&mut run.attempts),
                winner: run.winner_strategy.take(),
                phases: std::mem::take(&mut run.timings),
                started_at,
                duration: clock.elapsed(),
            };
            if let Some(path) = &self.config.telemetry_path {
                append_telemetry(&report.summary(), path);
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        id: Uuid,
        request: &JobRequest,
        manager: &Arc<WorkspaceManager>,
        run: &mut JobRun,
        progress_tx: watch::Sender<RaceProgress>,
    ) -> Result<PullRequestRef, JobError> {
        let seed = manager
            .acquire_seed(
                self.fetcher.as_ref(),
                &request.repo,
                request.credential.as_ref(),
            )
            .await?;
        run.seed = Some(seed.clone());

        run.enter(JobPhase::Planning);
        let task = self.prepare_task(&request.task).await;
        let plan = build_plan(&seed, &task, self.generator.as_ref()).await?;

        run.enter(JobPhase::Racing);
        let executor = Arc::new(AgentExecutor::new(
            self.generator.clone(),
            self.validator.clone(),
        ));
        let coordinator = RaceCoordinator::new(
            manager.clone(),
            executor,
            RaceConfig {
                timeout: self.config.race_timeout(),
                cancel_grace: self.config.cancel_grace(),
            },
        )
        .with_progress(progress_tx);

        let RaceWin {
            winner,
            workspace,
            attempts,
            teardown,
        } = match coordinator.race(&seed, plan, &self.config.strategies).await {
            RaceResult::Won(win) => win,
            RaceResult::Failed(failure) => {
                run.attempts = failure.attempts;
                return Err(JobError::RaceFailed {
                    timed_out: failure.timed_out,
                    failures: failure.failures,
                });
            }
        };
        let strategy = attempts[winner].strategy.clone();
        let summary = attempts[winner].summary;
        run.winner = Some(workspace.clone());
        run.teardown = Some(teardown);
        run.attempts = attempts;
        run.winner_strategy = Some(strategy.clone());

        run.enter(JobPhase::Publishing);
        let publisher = Publisher::new(
            self.hosting.clone(),
            &self.config.base_branch,
            &self.config.branch_prefix,
            self.config.commit_identity(),
        )
        .with_fork(self.config.fork);
        publisher
            .publish(PublishRequest {
                workspace: &workspace,
                repo: &request.repo,
                credential: request.credential.as_ref(),
                job_id: id,
                task: &request.task,
                strategy: &strategy,
                summary,
            })
            .await
    }

    /// Optional rewrite of the task. Falls back to the original on any
    /// failure.
    async fn prepare_task(&self, task: &str) -> String {
        if !self.config.enhance_task {
            return task.to_string();
        }
        match self.generator.enhance_task(task).await {
            Ok(enhanced) if !enhanced.trim().is_empty() => {
                debug!(chars = enhanced.len(), "task enhanced");
                enhanced
            }
            Ok(_) => {
                warn!("task enhancement returned nothing; using the original task");
                task.to_string()
            }
            Err(e) => {
                warn!("task enhancement failed, using the original task: {e}");
                task.to_string()
            }
        }
    }
}
