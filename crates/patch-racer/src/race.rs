//! Race Coordinator: JoinSet fan-out, first success wins.
//!
//! ```text
//! seed ──clone──► ws_0 ──► executor(strategy_0) ─┐
//!      ──clone──► ws_1 ──► executor(strategy_1) ─┼─► join_next_with_id ──► RaceResult
//!      ──clone──► ws_n ──► executor(strategy_n) ─┘
//! ```
//!
//! ## Winner selection
//!
//! Each attempt task classifies its own completion against a shared
//! [`DecisionLatch`]. The first task to succeed claims the latch with a
//! compare-exchange and trips the race-wide cancellation token; every other
//! attempt still in flight becomes `Abandoned`. Selection is by completion
//! order, never by quality.
//!
//! ## Timeout
//!
//! When the deadline elapses the coordinator tries to close the latch. If that
//! succeeds no winner can appear any more: running attempts are marked
//! `Failed(Timeout)`, cancelled, drained for the grace period and aborted. If
//! the close loses to a claim, the winner already exists and the coordinator
//! waits for it to arrive.
//!
//! ## Teardown
//!
//! Failed and abandoned workspaces are released as they are observed. After a
//! win, the attempts still in flight are drained on a background task so the
//! caller can start publishing immediately; that task releases their
//! workspaces and is handed back in [`RaceWin::teardown`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{AttemptError, AttemptFailure};
use crate::executor::{AgentExecutor, ApplySummary};
use crate::plan::Plan;
use crate::strategy::Strategy;
use crate::workspace::{Workspace, WorkspaceManager};

const UNDECIDED: usize = 0;
const CLOSED: usize = usize::MAX;
/// Stand-in deadline when the configured timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Set-exactly-once record of the race outcome.
///
/// Holds `0` while undecided, `winner + 1` once claimed, `usize::MAX` once
/// closed by the deadline.
#[derive(Debug, Default)]
pub struct DecisionLatch(AtomicUsize);

impl DecisionLatch {
    pub fn new() -> Self {
        Self(AtomicUsize::new(UNDECIDED))
    }

    /// Claim victory for `attempt`. Only the first claim on an open latch
    /// succeeds.
    pub fn try_claim(&self, attempt: usize) -> bool {
        self.0
            .compare_exchange(UNDECIDED, attempt + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Close an undecided latch. Returns the winner if a claim got there
    /// first.
    pub fn close(&self) -> Option<usize> {
        match self
            .0
            .compare_exchange(UNDECIDED, CLOSED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) | Err(CLOSED) => None,
            Err(claimed) => Some(claimed - 1),
        }
    }

    pub fn winner(&self) -> Option<usize> {
        match self.0.load(Ordering::Acquire) {
            UNDECIDED | CLOSED => None,
            claimed => Some(claimed - 1),
        }
    }

    pub fn is_decided(&self) -> bool {
        self.0.load(Ordering::Acquire) != UNDECIDED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
    Abandoned,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

/// One strategy's attempt and how it ended.
#[derive(Debug, Clone)]
pub struct AgentAttempt {
    pub strategy: String,
    /// `None` when no workspace could be allocated.
    pub workspace: Option<Workspace>,
    pub status: AttemptStatus,
    pub error: Option<AttemptError>,
    pub elapsed: Option<Duration>,
    pub summary: Option<ApplySummary>,
}

impl AgentAttempt {
    fn new(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            workspace: None,
            status: AttemptStatus::Running,
            error: None,
            elapsed: None,
            summary: None,
        }
    }

    fn fail(&mut self, error: AttemptError) {
        self.status = AttemptStatus::Failed;
        self.error = Some(error);
    }
}

/// Live race counters, published on every status change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RaceProgress {
    pub total: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
}

impl RaceProgress {
    fn from_attempts(total: usize, attempts: &[AgentAttempt]) -> Self {
        let count = |status: AttemptStatus| attempts.iter().filter(|a| a.status == status).count();
        Self {
            total,
            running: count(AttemptStatus::Running),
            succeeded: count(AttemptStatus::Succeeded),
            failed: count(AttemptStatus::Failed),
            abandoned: count(AttemptStatus::Abandoned),
        }
    }

    /// Attempts that have reached a terminal status.
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.abandoned
    }
}

pub struct RaceWin {
    /// Index into `attempts`.
    pub winner: usize,
    /// Winning workspace, still on disk. The caller releases it.
    pub workspace: Workspace,
    pub attempts: Vec<AgentAttempt>,
    /// Background drain of the abandoned attempts.
    pub teardown: JoinHandle<()>,
}

impl RaceWin {
    pub fn winning_attempt(&self) -> &AgentAttempt {
        &self.attempts[self.winner]
    }

    pub fn strategy(&self) -> &str {
        &self.attempts[self.winner].strategy
    }
}

#[derive(Debug, Clone)]
pub struct RaceFailure {
    pub attempts: Vec<AgentAttempt>,
    /// One entry per strategy, in strategy order.
    pub failures: Vec<AttemptFailure>,
    pub timed_out: bool,
}

pub enum RaceResult {
    Won(RaceWin),
    Failed(RaceFailure),
}

#[derive(Debug, Clone, Copy)]
pub struct RaceConfig {
    /// No winner by this deadline fails the race.
    pub timeout: Duration,
    /// Time abandoned attempts get to stop before being aborted.
    pub cancel_grace: Duration,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            cancel_grace: Duration::from_secs(10),
        }
    }
}

/// How an attempt task ended, decided by the task itself.
enum Completion {
    Won(ApplySummary, Workspace),
    Failed(AttemptError),
    Abandoned,
}

type TaskOutput = (usize, Completion, Duration);

pub struct RaceCoordinator {
    workspaces: Arc<WorkspaceManager>,
    executor: Arc<AgentExecutor>,
    config: RaceConfig,
    progress: watch::Sender<RaceProgress>,
}

impl RaceCoordinator {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        executor: Arc<AgentExecutor>,
        config: RaceConfig,
    ) -> Self {
        let (progress, _) = watch::channel(RaceProgress::default());
        Self {
            workspaces,
            executor,
            config,
            progress,
        }
    }

    /// Publish progress on `tx` instead of the internal channel.
    pub fn with_progress(mut self, tx: watch::Sender<RaceProgress>) -> Self {
        self.progress = tx;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RaceProgress> {
        self.progress.subscribe()
    }

    pub async fn race(
        &self,
        seed: &Workspace,
        plan: Arc<Plan>,
        strategies: &[Strategy],
    ) -> RaceResult {
        let total = strategies.len();
        let started = tokio::time::Instant::now();
        let deadline = started
            .checked_add(self.config.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let latch = Arc::new(DecisionLatch::new());
        let race_token = CancellationToken::new();
        let mut set: JoinSet<TaskOutput> = JoinSet::new();
        let mut task_index: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut attempts: Vec<AgentAttempt> = Vec::with_capacity(total);

        info!(strategies = total, targets = plan.len(), "race starting");

        for (idx, strategy) in strategies.iter().enumerate() {
            let mut attempt = AgentAttempt::new(&strategy.name);

            if latch.is_decided() {
                attempt.status = AttemptStatus::Abandoned;
                attempt.error = Some(AttemptError::Cancelled);
                attempts.push(attempt);
                self.publish(total, &attempts);
                continue;
            }

            match self.workspaces.clone_for_attempt(seed).await {
                Ok(workspace) => {
                    attempt.workspace = Some(workspace.clone());
                    let handle = set.spawn(run_attempt(
                        idx,
                        workspace,
                        plan.clone(),
                        strategy.clone(),
                        self.executor.clone(),
                        latch.clone(),
                        race_token.clone(),
                    ));
                    task_index.insert(handle.id(), idx);
                }
                Err(e) => {
                    warn!(strategy = %strategy.name, "attempt not started: {e}");
                    attempt.fail(e);
                }
            }
            attempts.push(attempt);
            self.publish(total, &attempts);
        }

        let mut winner: Option<(usize, Workspace)> = None;
        let mut timed_out = false;
        let mut deadline_armed = true;

        while winner.is_none() {
            let joined = if deadline_armed {
                match tokio::time::timeout_at(deadline, set.join_next_with_id()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        if latch.close().is_none() {
                            timed_out = true;
                            break;
                        }
                        // A claim beat the deadline; its completion is in flight.
                        deadline_armed = false;
                        continue;
                    }
                }
            } else {
                set.join_next_with_id().await
            };

            let Some(joined) = joined else { break };
            let (idx, completion, elapsed) = match joined {
                Ok((_, output)) => output,
                Err(join_err) => match self.crashed(&task_index, join_err) {
                    Some(output) => output,
                    None => continue,
                },
            };

            let attempt = &mut attempts[idx];
            attempt.elapsed = Some(elapsed);
            match completion {
                Completion::Won(summary, workspace) => {
                    attempt.status = AttemptStatus::Succeeded;
                    attempt.summary = Some(summary);
                    winner = Some((idx, workspace));
                    info!(
                        strategy = %attempt.strategy,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "attempt won the race"
                    );
                }
                Completion::Failed(error) => {
                    warn!(strategy = %attempt.strategy, "attempt failed: {error}");
                    attempt.fail(error);
                    self.release_attempt(attempt).await;
                }
                Completion::Abandoned => {
                    attempt.status = AttemptStatus::Abandoned;
                    attempt.error = Some(AttemptError::Cancelled);
                    self.release_attempt(attempt).await;
                }
            }
            self.publish(total, &attempts);
        }

        // Anything still marked Running is in the JoinSet.
        race_token.cancel();

        match winner {
            Some((winner, workspace)) => {
                let mut in_flight = Vec::new();
                for attempt in attempts.iter_mut().filter(|a| a.status == AttemptStatus::Running) {
                    attempt.status = AttemptStatus::Abandoned;
                    attempt.error = Some(AttemptError::Cancelled);
                    in_flight.extend(attempt.workspace.clone());
                }
                self.publish(total, &attempts);
                debug!(abandoned = in_flight.len(), "draining abandoned attempts in background");

                let teardown = tokio::spawn(drain_and_release(
                    set,
                    in_flight,
                    self.workspaces.clone(),
                    self.config.cancel_grace,
                ));
                RaceResult::Won(RaceWin {
                    winner,
                    workspace,
                    attempts,
                    teardown,
                })
            }
            None => {
                let mut in_flight = Vec::new();
                for attempt in attempts.iter_mut().filter(|a| a.status == AttemptStatus::Running) {
                    attempt.fail(AttemptError::Timeout);
                    in_flight.extend(attempt.workspace.clone());
                }
                self.publish(total, &attempts);
                if timed_out {
                    warn!(
                        timeout_secs = self.config.timeout.as_secs(),
                        still_running = in_flight.len(),
                        "race deadline elapsed without a winner"
                    );
                }

                drain_and_release(set, in_flight, self.workspaces.clone(), self.config.cancel_grace)
                    .await;

                let failures = attempts
                    .iter()
                    .map(|a| AttemptFailure {
                        strategy: a.strategy.clone(),
                        error: a.error.clone().unwrap_or(AttemptError::Cancelled),
                    })
                    .collect();

                RaceResult::Failed(RaceFailure {
                    attempts,
                    failures,
                    timed_out,
                })
            }
        }
    }

    /// Map a panicked task back to its attempt.
    fn crashed(
        &self,
        task_index: &HashMap<tokio::task::Id, usize>,
        join_err: JoinError,
    ) -> Option<TaskOutput> {
        let idx = *task_index.get(&join_err.id())?;
        let reason = if join_err.is_panic() {
            "attempt task panicked".to_string()
        } else {
            join_err.to_string()
        };
        Some((idx, Completion::Failed(AttemptError::Crashed(reason)), Duration::ZERO))
    }

    async fn release_attempt(&self, attempt: &AgentAttempt) {
        if let Some(workspace) = &attempt.workspace {
            self.workspaces.release(workspace).await;
        }
    }

    fn publish(&self, total: usize, attempts: &[AgentAttempt]) {
        self.progress
            .send_replace(RaceProgress::from_attempts(total, attempts));
    }
}

/// Body of one attempt task. The task decides its own completion so the
/// latch claim happens at the moment of success, not when the coordinator
/// gets around to observing it.
async fn run_attempt(
    idx: usize,
    workspace: Workspace,
    plan: Arc<Plan>,
    strategy: Strategy,
    executor: Arc<AgentExecutor>,
    latch: Arc<DecisionLatch>,
    race_token: CancellationToken,
) -> TaskOutput {
    let started = Instant::now();
    let token = race_token.child_token();
    let result = executor.run(&workspace, &plan, &strategy, &token).await;

    let completion = match result {
        Ok(summary) if latch.try_claim(idx) => {
            race_token.cancel();
            Completion::Won(summary, workspace)
        }
        Ok(_) => Completion::Abandoned,
        Err(_) if latch.is_decided() => Completion::Abandoned,
        Err(e) => Completion::Failed(e),
    };
    (idx, completion, started.elapsed())
}

/// Let cancelled attempts finish within `grace`, abort the rest, then delete
/// their workspaces.
async fn drain_and_release(
    mut set: JoinSet<TaskOutput>,
    workspaces: Vec<Workspace>,
    manager: Arc<WorkspaceManager>,
    grace: Duration,
) {
    let drained = tokio::time::timeout(grace, async {
        while set.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(remaining = set.len(), "aborting attempts that ignored cancellation");
        set.abort_all();
        while set.join_next().await.is_some() {}
    }

    for workspace in &workspaces {
        manager.release(workspace).await;
    }
}
