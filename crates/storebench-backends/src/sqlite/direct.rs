//! SQLite connection shared behind a mutex, driven from tokio's blocking pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;

use super::SqliteProfile;
use crate::{
    generate_dataset, reset_location, Backend, BackendConfig, BackendError, BackendResult,
    ElapsedMs, PhaseContext, PhaseOutcome, SectionProbe,
};

pub struct SqliteBackend {
    profile: SqliteProfile,
    config: BackendConfig,
    conn: Option<Arc<Mutex<Connection>>>,
}

impl SqliteBackend {
    pub fn new(profile: SqliteProfile, config: BackendConfig) -> Self {
        Self {
            profile,
            config,
            conn: None,
        }
    }

    /// Write-ahead log; the location is cleared on every set-up.
    pub fn wal(config: BackendConfig) -> Self {
        Self::new(super::WAL, config)
    }

    /// In-memory rollback journal with full sync, so each commit is one
    /// atomic batch write.
    pub fn journal(config: BackendConfig) -> Self {
        Self::new(super::JOURNAL, config)
    }

    pub fn profile(&self) -> &SqliteProfile {
        &self.profile
    }

    fn location(&self) -> PathBuf {
        self.config.location(self.profile.key)
    }

    fn connection(&self) -> BackendResult<Arc<Mutex<Connection>>> {
        self.conn
            .clone()
            .ok_or_else(|| BackendError::NotSetUp(self.profile.key.to_string()))
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        self.profile.key
    }

    async fn set_up(&mut self, ctx: &PhaseContext) -> BackendResult<()> {
        self.release().await?;
        ctx.checkpoint()?;

        let location = self.location();
        let profile = self.profile;
        let conn = tokio::task::spawn_blocking(move || -> BackendResult<Connection> {
            reset_location(&location)?;
            let conn = super::open(&location, &profile)?;
            super::apply_schema(&conn)?;
            Ok(conn)
        })
        .await??;

        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    async fn execute(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let conn = self.connection()?;
        let dataset = generate_dataset(self.profile.key, &self.config.workload);
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || -> BackendResult<PhaseOutcome> {
            let mut conn = conn.lock();
            let started = Instant::now();
            let rows = super::load(&mut conn, &dataset, &ctx)?;
            Ok(PhaseOutcome::new(ElapsedMs::since(started), rows))
        })
        .await?
    }

    async fn search_in_database(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let conn = self.connection()?;
        let needle = self.config.workload.needle.clone();
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || -> BackendResult<PhaseOutcome> {
            let conn = conn.lock();
            let started = Instant::now();
            let matches = super::search(&conn, &needle, &ctx)?;
            Ok(PhaseOutcome::new(
                ElapsedMs::since(started),
                matches.len() as u64,
            ))
        })
        .await?
    }

    async fn update_ninety_percent(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let conn = self.connection()?;
        let workload = self.config.workload.clone();
        let sampling = self.profile.sampling;
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || -> BackendResult<PhaseOutcome> {
            let conn = conn.lock();
            let started = Instant::now();
            let rows = super::update(&conn, &workload, sampling, &ctx)?;
            Ok(PhaseOutcome::new(ElapsedMs::since(started), rows))
        })
        .await?
    }

    async fn table_names(&mut self) -> BackendResult<Vec<String>> {
        let conn = self.connection()?;
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            super::table_names(&conn)
        })
        .await?
    }

    async fn probe(&mut self, value: &str) -> BackendResult<SectionProbe> {
        let conn = self.connection()?;
        let value = value.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            super::probe(&conn, &value)
        })
        .await?
    }

    async fn release(&mut self) -> BackendResult<()> {
        if self.conn.take().is_some() {
            tracing::debug!(backend = self.profile.key, "released sqlite connection");
        }
        Ok(())
    }
}
