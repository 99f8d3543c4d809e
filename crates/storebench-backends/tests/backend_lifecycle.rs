//! Lifecycle tests run against every backend compiled into the crate.
//!
//! DuckDB only joins with `cargo test -p storebench-backends --features duckdb`.

use storebench_backends::kv::KvBackend;
use storebench_backends::sqlite::{SqliteActorBackend, SqliteBackend};
use storebench_backends::{Backend, BackendConfig, Phase, PhaseContext, Workload, TABLES};
use std::time::Duration;

use tempfile::TempDir;

const NEEDLE: &str = "XYZZY123";

fn workload() -> Workload {
    let mut workload = Workload::new(NEEDLE);
    workload.replacement = "REPLACED".to_string();
    workload
}

fn all_backends(dir: &TempDir, workload: Workload) -> Vec<Box<dyn Backend>> {
    let config = BackendConfig::new(dir.path(), workload);
    #[allow(unused_mut)]
    let mut backends: Vec<Box<dyn Backend>> = vec![
        Box::new(KvBackend::new(config.clone())),
        Box::new(SqliteActorBackend::new(config.clone())),
        Box::new(SqliteBackend::wal(config.clone())),
        Box::new(SqliteBackend::journal(config.clone())),
    ];
    #[cfg(feature = "duckdb")]
    backends.push(Box::new(storebench_backends::duck::DuckDbBackend::new(config)));
    backends
}

fn ctx(phase: Phase) -> PhaseContext {
    PhaseContext::unbounded(phase)
}

#[tokio::test]
async fn test_set_up_twice_keeps_table_set() {
    let dir = tempfile::tempdir().unwrap();
    for mut backend in all_backends(&dir, workload()) {
        backend.set_up(&ctx(Phase::Setup)).await.unwrap();
        let first = backend.table_names().await.unwrap();
        backend.set_up(&ctx(Phase::Setup)).await.unwrap();
        let second = backend.table_names().await.unwrap();

        assert_eq!(first, second, "{}", backend.name());
        assert_eq!(first, TABLES, "{}", backend.name());
        backend.release().await.unwrap();
    }
}

#[tokio::test]
async fn test_set_up_clears_previous_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut small = workload();
    small.section_count = 20;
    for mut backend in all_backends(&dir, small) {
        backend.set_up(&ctx(Phase::Setup)).await.unwrap();
        backend.execute(&ctx(Phase::Load)).await.unwrap();
        assert_eq!(backend.probe(NEEDLE).await.unwrap().total, 20);

        backend.set_up(&ctx(Phase::Setup)).await.unwrap();
        assert_eq!(backend.probe(NEEDLE).await.unwrap().total, 0, "{}", backend.name());
        backend.release().await.unwrap();
    }
}

#[tokio::test]
async fn test_search_finds_planted_needle() {
    let dir = tempfile::tempdir().unwrap();
    for mut backend in all_backends(&dir, workload()) {
        backend.set_up(&ctx(Phase::Setup)).await.unwrap();

        let load = backend.execute(&ctx(Phase::Load)).await.unwrap();
        assert_eq!(load.rows, 300, "{}", backend.name());
        assert!(load.elapsed.as_f64() >= 0.0);

        let search = backend.search_in_database(&ctx(Phase::Search)).await.unwrap();
        assert_eq!(search.rows, 3, "{}", backend.name());

        backend.release().await.unwrap();
    }
}

#[tokio::test]
async fn test_update_touches_about_ninety_percent() {
    let dir = tempfile::tempdir().unwrap();
    for mut backend in all_backends(&dir, workload()) {
        backend.set_up(&ctx(Phase::Setup)).await.unwrap();
        backend.execute(&ctx(Phase::Load)).await.unwrap();

        let update = backend
            .update_ninety_percent(&ctx(Phase::Update))
            .await
            .unwrap();
        let probe = backend.probe("REPLACED").await.unwrap();

        assert_eq!(probe.total, 300);
        assert_eq!(probe.matching, update.rows, "{}", backend.name());
        assert!(
            (250..=300).contains(&probe.matching),
            "{} updated {}",
            backend.name(),
            probe.matching
        );
        backend.release().await.unwrap();
    }
}

#[tokio::test]
async fn test_cancelled_load_reports_cancel() {
    let dir = tempfile::tempdir().unwrap();
    for mut backend in all_backends(&dir, workload()) {
        backend.set_up(&ctx(Phase::Setup)).await.unwrap();

        let cancelled = ctx(Phase::Load);
        cancelled.cancel.cancel();
        let err = backend.execute(&cancelled).await.unwrap_err();
        assert!(err.is_cancelled(), "{}: {err}", backend.name());

        backend.release().await.unwrap();
    }
}

#[tokio::test]
async fn test_release_without_set_up() {
    let dir = tempfile::tempdir().unwrap();
    for mut backend in all_backends(&dir, workload()) {
        backend.release().await.unwrap();
        backend.release().await.unwrap();
    }
}

#[tokio::test]
async fn test_cancel_stops_running_sqlite_update() {
    let dir = tempfile::tempdir().unwrap();
    let mut large = workload();
    large.section_count = 5_000;
    let config = BackendConfig::new(dir.path(), large);
    let backends: Vec<Box<dyn Backend>> = vec![
        Box::new(SqliteActorBackend::new(config.clone())),
        Box::new(SqliteBackend::wal(config.clone())),
        Box::new(SqliteBackend::journal(config)),
    ];

    for mut backend in backends {
        backend.set_up(&ctx(Phase::Setup)).await.unwrap();
        backend.execute(&ctx(Phase::Load)).await.unwrap();

        let update = ctx(Phase::Update);
        let token = update.cancel.clone();
        let (result, ()) = tokio::join!(backend.update_ninety_percent(&update), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            token.cancel();
        });

        let err = result.unwrap_err();
        assert!(err.is_cancelled(), "{}: {err}", backend.name());
        let probe = backend.probe("REPLACED").await.unwrap();
        assert_eq!(probe.total, 5_000);
        assert_eq!(probe.matching, 0, "{}", backend.name());
        backend.release().await.unwrap();
    }
}
