//! Orchestrator behaviour over scripted backends.

mod common;

use std::time::Duration;

use common::{register, single, Counters, Script};
use storebench_backends::Phase;
use storebench_harness::{
    BackendRegistry, BenchmarkError, Command, RecordingSink, ResultKind, RunState, Task,
    WorkerEvent,
};

fn kinds(events: &[WorkerEvent]) -> Vec<Option<ResultKind>> {
    events.iter().map(WorkerEvent::kind).collect()
}

#[tokio::test]
async fn test_launch_reports_phases_in_order() {
    let (mut orchestrator, counters) = single("mock", Script::default());
    let sink = RecordingSink::new();

    orchestrator.launch("mock", &*sink).await.unwrap();

    let events = sink.events();
    assert_eq!(
        kinds(&events),
        vec![
            Some(ResultKind::FillTime),
            Some(ResultKind::SearchTime),
            Some(ResultKind::UpdateTime)
        ]
    );
    assert!(events.iter().all(|e| e.database() == "mock" && !e.is_failure()));
    assert_eq!(counters.releases(), 1);
    assert_eq!(orchestrator.state("mock"), RunState::Done);
    assert!(orchestrator.live_backends().is_empty());
}

#[tokio::test]
async fn test_failed_phase_stops_run_and_releases() {
    let (mut orchestrator, counters) = single(
        "mock",
        Script {
            fail_at: Some(Phase::Search),
            ..Script::default()
        },
    );
    let sink = RecordingSink::new();

    let err = orchestrator.launch("mock", &*sink).await.unwrap_err();
    assert!(matches!(err, BenchmarkError::Query { phase: Phase::Search, .. }));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind(), Some(ResultKind::FillTime));
    match &events[1] {
        WorkerEvent::PhaseFailed {
            phase,
            database,
            error,
            timed_out,
        } => {
            assert_eq!(*phase, Phase::Search);
            assert_eq!(database, "mock");
            assert!(error.contains("scripted search failure"));
            assert!(!timed_out);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(counters.releases(), 1);
    assert_eq!(
        orchestrator.state("mock"),
        RunState::Failed {
            phase: Phase::Search
        }
    );
}

#[tokio::test]
async fn test_setup_failure_reports_and_releases() {
    let (mut orchestrator, counters) = single(
        "mock",
        Script {
            fail_at: Some(Phase::Setup),
            ..Script::default()
        },
    );
    let sink = RecordingSink::new();

    let err = orchestrator.launch("mock", &*sink).await.unwrap_err();
    assert!(matches!(err, BenchmarkError::Setup { .. }));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        WorkerEvent::PhaseFailed { phase: Phase::Setup, .. }
    ));
    assert_eq!(counters.releases(), 1);
}

#[tokio::test]
async fn test_hung_phase_times_out() {
    let counters = Counters::default();
    let mut registry = BackendRegistry::new();
    register(
        &mut registry,
        "slow",
        Script {
            hang_at: Some(Phase::Load),
            ..Script::default()
        },
        &counters,
    );
    let mut orchestrator = common::orchestrator(registry, Duration::from_millis(100));
    let sink = RecordingSink::new();

    let err = orchestrator.launch("slow", &*sink).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.phase(), Some(Phase::Load));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        WorkerEvent::PhaseFailed {
            phase: Phase::Load,
            timed_out: true,
            ..
        }
    ));
    assert_eq!(counters.releases(), 1);
}

#[tokio::test]
async fn test_unknown_backend_is_reported() {
    let (mut orchestrator, _) = single("mock", Script::default());
    let sink = RecordingSink::new();

    let err = orchestrator
        .handle(&Command::launch("indexeddb"), &*sink)
        .await
        .unwrap_err();
    assert!(matches!(err, BenchmarkError::UnknownBackend(_)));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].database(), "indexeddb");
    assert!(events[0].is_failure());
}

#[tokio::test]
async fn test_release_of_unknown_backend_is_rejected() {
    let (mut orchestrator, counters) = single("mock", Script::default());
    let sink = RecordingSink::new();

    let err = orchestrator
        .handle(&Command::new(Task::Release, "indexeddb"), &*sink)
        .await
        .unwrap_err();

    assert!(matches!(err, BenchmarkError::UnknownBackend(ref name) if name == "indexeddb"));
    assert!(sink.events().is_empty());
    assert_eq!(counters.releases(), 0);
    assert!(orchestrator.live_backends().is_empty());
}

#[tokio::test]
async fn test_individual_tasks_share_live_adapter() {
    let (mut orchestrator, counters) = single("mock", Script::default());
    let sink = RecordingSink::new();

    for task in [Task::SetUp, Task::Execute, Task::SearchInDatabase] {
        orchestrator
            .handle(&Command::new(task, "mock"), &*sink)
            .await
            .unwrap();
    }

    assert_eq!(counters.created(), 1);
    assert_eq!(orchestrator.live_backends(), vec!["mock"]);
    assert_eq!(orchestrator.state("mock"), RunState::Searching);
    assert_eq!(
        kinds(&sink.events()),
        vec![Some(ResultKind::FillTime), Some(ResultKind::SearchTime)]
    );

    orchestrator
        .handle(&Command::new(Task::Release, "mock"), &*sink)
        .await
        .unwrap();
    assert!(orchestrator.live_backends().is_empty());
    assert_eq!(counters.releases(), 1);
    assert_eq!(orchestrator.state("mock"), RunState::Idle);
}

#[tokio::test]
async fn test_launch_replaces_live_adapter() {
    let (mut orchestrator, counters) = single("mock", Script::default());
    let sink = RecordingSink::new();

    orchestrator
        .handle(&Command::new(Task::SetUp, "mock"), &*sink)
        .await
        .unwrap();
    orchestrator.launch("mock", &*sink).await.unwrap();

    assert_eq!(counters.created(), 2);
    assert_eq!(counters.releases(), 2);
    assert!(orchestrator.live_backends().is_empty());
}

#[tokio::test]
async fn test_cancelled_session_fails_fast() {
    let (mut orchestrator, counters) = single("mock", Script::default());
    let sink = RecordingSink::new();

    orchestrator.session_token().cancel();
    let err = orchestrator.launch("mock", &*sink).await.unwrap_err();

    assert!(matches!(
        err,
        BenchmarkError::Cancelled {
            phase: Phase::Setup,
            ..
        }
    ));
    assert_eq!(sink.events().len(), 1);
    assert_eq!(counters.releases(), 1);
}
