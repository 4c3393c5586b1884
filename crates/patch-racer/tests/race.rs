//! Race coordinator and workspace manager driven directly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use patch_racer::race::{RaceConfig, RaceWin};
use patch_racer::{
    AgentExecutor, AttemptError, AttemptStatus, Plan, RaceCoordinator, RaceResult, RepoRef,
    Workspace, WorkspaceManager,
};
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

struct Harness {
    _tmp: TempDir,
    manager: Arc<WorkspaceManager>,
    seed: Workspace,
    ws_base: std::path::PathBuf,
}

async fn harness() -> Harness {
    let tmp = tempdir().unwrap();
    let origin = init_origin(tmp.path());
    let ws_base = tmp.path().join("ws");
    let manager = Arc::new(WorkspaceManager::new(&ws_base, Uuid::new_v4()));
    let seed = manager
        .acquire_seed(
            &LocalFetcher { origin },
            &RepoRef::parse("octo/widgets").unwrap(),
            None,
        )
        .await
        .unwrap();
    Harness {
        _tmp: tmp,
        manager,
        seed,
        ws_base,
    }
}

fn coordinator(h: &Harness, generator: ScriptedGenerator) -> RaceCoordinator {
    coordinator_with_timeout(h, generator, Duration::from_secs(30))
}

fn coordinator_with_timeout(
    h: &Harness,
    generator: ScriptedGenerator,
    timeout: Duration,
) -> RaceCoordinator {
    let executor = Arc::new(AgentExecutor::new(Arc::new(generator), Arc::new(AcceptAll)));
    RaceCoordinator::new(
        h.manager.clone(),
        executor,
        RaceConfig {
            timeout,
            cancel_grace: Duration::from_millis(200),
        },
    )
}

fn won(result: RaceResult) -> RaceWin {
    match result {
        RaceResult::Won(win) => win,
        RaceResult::Failed(f) => panic!("race failed: {:?}", f.failures),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abandoned_count_excludes_winner_and_earlier_failures() {
    let h = harness().await;
    let generator = ScriptedGenerator::new(&["a.txt"])
        .with(
            "broken",
            Behaviour {
                delay: Duration::ZERO,
                fail_on: Some("a.txt".into()),
            },
        )
        .with(
            "quick",
            Behaviour {
                delay: Duration::from_millis(500),
                fail_on: None,
            },
        )
        .with(
            "sluggish",
            Behaviour {
                delay: Duration::from_secs(10),
                fail_on: None,
            },
        );
    let coordinator = coordinator(&h, generator);
    let progress = coordinator.subscribe();
    let plan = Arc::new(Plan::new("add a.txt", ["a.txt"]).unwrap());

    let win = won(
        coordinator
            .race(&h.seed, plan, &strategies(&["broken", "quick", "sluggish"]))
            .await,
    );

    assert_eq!(win.strategy(), "quick");
    let count = |s: AttemptStatus| win.attempts.iter().filter(|a| a.status == s).count();
    assert_eq!(count(AttemptStatus::Succeeded), 1);
    assert_eq!(count(AttemptStatus::Failed), 1);
    // total - winner - failed before the win
    assert_eq!(count(AttemptStatus::Abandoned), 3 - 1 - 1);
    assert!(matches!(
        win.attempts[0].error,
        Some(AttemptError::Generation { .. })
    ));

    let snapshot = *progress.borrow();
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.running, 0);
    assert_eq!(snapshot.abandoned, 1);

    // The winning workspace survives teardown; everything else is gone.
    let winner_root = win.workspace.root().to_path_buf();
    win.teardown.await.unwrap();
    assert_eq!(
        std::fs::read_to_string(winner_root.join("a.txt")).unwrap(),
        "quick: a.txt\n"
    );
    let mut left = leftovers(&h.ws_base);
    left.sort();
    assert_eq!(left.len(), 2, "{left:?}");

    h.manager.release(&win.workspace).await;
    h.manager.release(&h.seed).await;
    assert!(leftovers(&h.ws_base).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_successes_name_exactly_one_winner() {
    let h = harness().await;
    let coordinator = coordinator(&h, ScriptedGenerator::new(&["a.txt", "b.txt"]));
    let plan = Arc::new(Plan::new("t", ["a.txt", "b.txt"]).unwrap());

    let win = won(
        coordinator
            .race(&h.seed, plan, &strategies(&["s1", "s2", "s3", "s4"]))
            .await,
    );

    let succeeded = win
        .attempts
        .iter()
        .filter(|a| a.status == AttemptStatus::Succeeded)
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(win.winning_attempt().status, AttemptStatus::Succeeded);
    assert!(win
        .attempts
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != win.winner)
        .all(|(_, a)| a.status == AttemptStatus::Abandoned));
    win.teardown.await.unwrap();
}

#[tokio::test]
async fn unbounded_timeout_still_races() {
    let h = harness().await;
    let coordinator =
        coordinator_with_timeout(&h, ScriptedGenerator::new(&["a.txt"]), Duration::MAX);
    let plan = Arc::new(Plan::new("add a.txt", ["a.txt"]).unwrap());

    let win = won(coordinator.race(&h.seed, plan, &strategies(&["only"])).await);

    assert_eq!(win.strategy(), "only");
    win.teardown.await.unwrap();
}

#[tokio::test]
async fn mutations_never_leak_between_workspaces() {
    let h = harness().await;
    let first = h.manager.clone_for_attempt(&h.seed).await.unwrap();
    let second = h.manager.clone_for_attempt(&h.seed).await.unwrap();
    let original = std::fs::read(h.seed.root().join("src/lib.rs")).unwrap();

    std::fs::write(first.root().join("src/lib.rs"), "pub fn one() -> u32 { 2 }\n").unwrap();
    std::fs::write(first.root().join("new.txt"), "only here\n").unwrap();

    assert_eq!(
        std::fs::read(second.root().join("src/lib.rs")).unwrap(),
        original
    );
    assert_eq!(
        std::fs::read(h.seed.root().join("src/lib.rs")).unwrap(),
        original
    );
    assert!(!second.root().join("new.txt").exists());
    assert!(!h.seed.root().join("new.txt").exists());
    assert_ne!(first.root(), second.root());
}

#[tokio::test]
async fn revert_restores_the_clone_baseline() {
    let h = harness().await;
    let ws = h.manager.clone_for_attempt(&h.seed).await.unwrap();
    std::fs::write(ws.root().join("src/lib.rs"), "broken").unwrap();
    std::fs::write(ws.root().join("stray.txt"), "x").unwrap();

    h.manager.revert(&ws).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(ws.root().join("src/lib.rs")).unwrap(),
        "pub fn one() -> u32 { 1 }\n"
    );
    assert!(!ws.root().join("stray.txt").exists());
}

#[tokio::test]
async fn release_is_idempotent_and_tolerates_missing_paths() {
    let h = harness().await;
    let ws = h.manager.clone_for_attempt(&h.seed).await.unwrap();
    let other = h.manager.clone_for_attempt(&h.seed).await.unwrap();

    h.manager.release(&ws).await;
    h.manager.release(&ws).await;
    assert!(!ws.root().exists());

    std::fs::remove_dir_all(other.root()).unwrap();
    h.manager.release(&other).await;
    assert!(!other.root().exists());

    // Concurrent releases of the same workspace.
    let third = h.manager.clone_for_attempt(&h.seed).await.unwrap();
    tokio::join!(h.manager.release(&third), h.manager.release(&third));
    assert!(!third.root().exists());
}
