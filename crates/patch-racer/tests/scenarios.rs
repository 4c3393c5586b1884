//! End-to-end jobs against local bare repositories with fake generator,
//! validator and hosting.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use patch_racer::{
    AttemptError, AttemptStatus, GenerationError, JobError, JobPhase, JobRequest, PublishStage,
    RepoRef,
};
use tempfile::tempdir;

fn request(task: &str) -> JobRequest {
    JobRequest::new(RepoRef::parse("octo/widgets").unwrap(), task, None)
}

fn slow(secs: u64) -> Behaviour {
    Behaviour {
        delay: Duration::from_secs(secs),
        fail_on: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_success_is_published_and_the_straggler_abandoned() {
    let tmp = tempdir().unwrap();
    let origin = init_origin(tmp.path());
    let ws_base = tmp.path().join("ws");
    let generator = Arc::new(ScriptedGenerator::new(&["a.txt"]).with("slow", slow(3)));
    let hosting = Arc::new(RecordingHosting::default());
    let orch = orchestrator(
        config(&ws_base, &["fast", "slow"]),
        LocalFetcher {
            origin: origin.clone(),
        },
        generator.clone(),
        AcceptAll,
        hosting.clone(),
    );

    let handle = orch.submit(request("Add a.txt describing the widget"));
    let report = handle.wait().await.unwrap();

    let pr = report.pull_request().expect("job should be done");
    assert_eq!(pr.number, 1);
    assert_eq!(report.phase(), JobPhase::Done);
    assert_eq!(report.winner.as_deref(), Some("fast"));

    let status: Vec<_> = report
        .attempts
        .iter()
        .map(|a| (a.strategy.as_str(), a.status))
        .collect();
    assert_eq!(
        status,
        vec![
            ("fast", AttemptStatus::Succeeded),
            ("slow", AttemptStatus::Abandoned)
        ]
    );

    let opened = hosting.opened.lock().unwrap().clone();
    assert_eq!(opened.len(), 1);
    assert!(opened[0].head.starts_with("ai-agent/fast-"), "{}", opened[0].head);
    assert_eq!(opened[0].base, "main");
    assert_eq!(opened[0].title, "AI Agent: Add a.txt describing the widget");
    assert!(opened[0].body.contains("`fast`"));

    // The pushed branch carries the winner's content.
    let pushed = git(&origin, &["show", &format!("{}:a.txt", opened[0].head)]);
    assert_eq!(pushed, "fast: a.txt");

    assert!(leftovers(&ws_base).is_empty(), "{:?}", leftovers(&ws_base));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generation_failure_mid_plan_fails_the_whole_attempt() {
    let tmp = tempdir().unwrap();
    let origin = init_origin(tmp.path());
    let ws_base = tmp.path().join("ws");
    let generator = Arc::new(ScriptedGenerator::new(&["b.txt", "a.txt"]).with(
        "only",
        Behaviour {
            delay: Duration::ZERO,
            fail_on: Some("b.txt".into()),
        },
    ));
    let hosting = Arc::new(RecordingHosting::default());
    let orch = orchestrator(
        config(&ws_base, &["only"]),
        LocalFetcher { origin },
        generator.clone(),
        AcceptAll,
        hosting.clone(),
    );

    let report = orch.run(request("add two files")).await;

    // Plan order is sorted, so a.txt was written before b.txt failed.
    assert_eq!(generator.calls_for("only"), vec!["a.txt", "b.txt"]);
    let failures = report.error().unwrap().attempt_failures().to_vec();
    assert_eq!(failures.len(), 1);
    match &failures[0].error {
        AttemptError::Generation { path, source } => {
            assert_eq!(path, "b.txt");
            assert!(matches!(source, GenerationError::Transport(_)));
        }
        other => panic!("unexpected attempt error: {other:?}"),
    }
    assert_eq!(report.attempts[0].status, AttemptStatus::Failed);
    assert!(hosting.opened.lock().unwrap().is_empty());
    assert!(leftovers(&ws_base).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_strategy_failing_validation_fails_the_job() {
    let tmp = tempdir().unwrap();
    let origin = init_origin(tmp.path());
    let ws_base = tmp.path().join("ws");
    let hosting = Arc::new(RecordingHosting::default());
    let orch = orchestrator(
        config(&ws_base, &["conservative", "balanced", "creative"]),
        LocalFetcher {
            origin: origin.clone(),
        },
        Arc::new(ScriptedGenerator::new(&["src/health.rs"])),
        RejectAll,
        hosting.clone(),
    );

    let report = orch.run(request("add a health module")).await;

    match report.error() {
        Some(JobError::RaceFailed {
            timed_out,
            failures,
        }) => {
            assert!(!timed_out);
            assert_eq!(failures.len(), 3);
            assert!(failures
                .iter()
                .all(|f| matches!(f.error, AttemptError::ValidationFailed(_))));
            let names: BTreeSet<_> = failures.iter().map(|f| f.strategy.as_str()).collect();
            assert_eq!(names, BTreeSet::from(["balanced", "conservative", "creative"]));
        }
        other => panic!("expected RaceFailed, got {other:?}"),
    }
    assert_eq!(report.phase(), JobPhase::Failed);
    assert!(hosting.opened.lock().unwrap().is_empty());
    assert!(!git(&origin, &["branch", "--list"]).contains("ai-agent"));
    assert!(leftovers(&ws_base).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn push_failure_after_a_win_is_a_publish_failure() {
    let tmp = tempdir().unwrap();
    let origin = init_origin(tmp.path());
    let ws_base = tmp.path().join("ws");
    let hosting = Arc::new(RecordingHosting::default());
    let orch = orchestrator(
        config(&ws_base, &["balanced"]),
        DeadRemoteFetcher { origin },
        Arc::new(ScriptedGenerator::new(&["a.txt"])),
        AcceptAll,
        hosting.clone(),
    );

    let report = orch.run(request("add a.txt")).await;

    assert!(
        matches!(
            report.error(),
            Some(JobError::PublishFailed {
                stage: PublishStage::Push,
                ..
            })
        ),
        "{:?}",
        report.result
    );
    // The attempt itself succeeded.
    assert_eq!(report.winner.as_deref(), Some("balanced"));
    assert_eq!(report.attempts[0].status, AttemptStatus::Succeeded);
    assert!(hosting.opened.lock().unwrap().is_empty());
    assert!(leftovers(&ws_base).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn race_deadline_fails_running_attempts_with_timeout() {
    let tmp = tempdir().unwrap();
    let origin = init_origin(tmp.path());
    let ws_base = tmp.path().join("ws");
    let mut cfg = config(&ws_base, &["slow"]);
    cfg.race_timeout_secs = 1;
    let orch = orchestrator(
        cfg,
        LocalFetcher { origin },
        Arc::new(ScriptedGenerator::new(&["a.txt"]).with("slow", slow(30))),
        AcceptAll,
        Arc::new(RecordingHosting::default()),
    );

    let report = orch.run(request("add a.txt")).await;

    match report.error() {
        Some(JobError::RaceFailed {
            timed_out,
            failures,
        }) => {
            assert!(*timed_out);
            assert!(matches!(failures[0].error, AttemptError::Timeout));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(leftovers(&ws_base).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_reports_race_progress_after_completion() {
    let tmp = tempdir().unwrap();
    let origin = init_origin(tmp.path());
    let ws_base = tmp.path().join("ws");
    let orch = orchestrator(
        config(&ws_base, &["a", "b", "c"]),
        LocalFetcher { origin },
        Arc::new(ScriptedGenerator::new(&["a.txt"])),
        RejectAll,
        Arc::new(RecordingHosting::default()),
    );

    let handle = orch.submit(request("add a.txt"));
    let mut phases = handle.phases();
    let progress = handle.progress();
    let report = handle.wait().await.unwrap();

    assert_eq!(*phases.borrow_and_update(), JobPhase::Failed);
    let race = *progress.borrow();
    assert_eq!(race.total, 3);
    assert_eq!(race.failed, 3);
    assert_eq!(race.finished(), 3);

    let phases: Vec<_> = report.phases.iter().map(|(p, _)| *p).collect();
    assert_eq!(
        phases,
        vec![JobPhase::Cloning, JobPhase::Planning, JobPhase::Racing]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn telemetry_line_is_written_per_job() {
    let tmp = tempdir().unwrap();
    let origin = init_origin(tmp.path());
    let ws_base = tmp.path().join("ws");
    let telemetry = tmp.path().join("logs/telemetry.jsonl");
    let mut cfg = config(&ws_base, &["balanced"]);
    cfg.telemetry_path = Some(telemetry.clone());
    let orch = orchestrator(
        cfg,
        LocalFetcher { origin },
        Arc::new(ScriptedGenerator::new(&["a.txt"])),
        AcceptAll,
        Arc::new(RecordingHosting::default()),
    );

    let report = orch.run(request("add a.txt")).await;
    assert!(report.pull_request().is_some());

    let text = std::fs::read_to_string(&telemetry).unwrap();
    let summary: patch_racer::telemetry::JobSummary = serde_json::from_str(text.trim()).unwrap();
    assert_eq!(summary.outcome, "done");
    assert_eq!(summary.winner.as_deref(), Some("balanced"));
    assert_eq!(summary.attempts.len(), 1);
    assert_eq!(summary.attempts[0].status, "succeeded");
    assert_eq!(summary.phases.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fork_publishing_pushes_to_the_fork_and_opens_a_cross_repo_pr() {
    let tmp = tempdir().unwrap();
    let origin = init_origin(tmp.path());
    let fork_path = tmp.path().join("fork.git");
    git(
        tmp.path(),
        &["clone", "-q", "--bare", origin.to_str().unwrap(), "fork.git"],
    );
    let ws_base = tmp.path().join("ws");
    let mut cfg = config(&ws_base, &["balanced"]);
    cfg.fork = true;
    let hosting = Arc::new(RecordingHosting::forking_into(RepoRef::new(
        "forker",
        "widgets",
        fork_path.display().to_string(),
    )));
    let orch = orchestrator(
        cfg,
        LocalFetcher {
            origin: origin.clone(),
        },
        Arc::new(ScriptedGenerator::new(&["a.txt"])),
        AcceptAll,
        hosting.clone(),
    );

    let report = orch.run(request("add a.txt")).await;
    assert!(report.pull_request().is_some(), "{:?}", report.result);

    assert_eq!(*hosting.forked.lock().unwrap(), vec!["octo/widgets"]);
    let opened = hosting.opened.lock().unwrap().clone();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].repo, "octo/widgets");
    let branch = opened[0]
        .head
        .strip_prefix("forker:")
        .unwrap_or_else(|| panic!("head should name the fork owner: {}", opened[0].head));

    assert_eq!(
        git(&fork_path, &["show", &format!("{branch}:a.txt")]),
        "balanced: a.txt"
    );
    assert_eq!(git(&origin, &["branch", "--list", branch]), "");
    assert!(leftovers(&ws_base).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_fork_fails_before_anything_is_pushed() {
    let tmp = tempdir().unwrap();
    let origin = init_origin(tmp.path());
    let ws_base = tmp.path().join("ws");
    let mut cfg = config(&ws_base, &["balanced"]);
    cfg.fork = true;
    let hosting = Arc::new(RecordingHosting::default());
    let orch = orchestrator(
        cfg,
        LocalFetcher {
            origin: origin.clone(),
        },
        Arc::new(ScriptedGenerator::new(&["a.txt"])),
        AcceptAll,
        hosting.clone(),
    );

    let report = orch.run(request("add a.txt")).await;

    assert!(
        matches!(
            report.error(),
            Some(JobError::PublishFailed {
                stage: PublishStage::Fork,
                ..
            })
        ),
        "{:?}",
        report.result
    );
    assert_eq!(hosting.forked.lock().unwrap().len(), 1);
    assert!(hosting.opened.lock().unwrap().is_empty());
    assert_eq!(git(&origin, &["branch", "--list", "ai-agent/*"]), "");
    assert!(leftovers(&ws_base).is_empty());
}
