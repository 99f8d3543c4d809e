//! SQLite hosted on a private driver thread.
//!
//! The connection never leaves its thread. Callers ship closures over a
//! channel and await the reply on a oneshot. Dropping the job sender ends the
//! thread, which closes the connection.

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Instant;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::SqliteProfile;
use crate::{
    generate_dataset, reset_location, Backend, BackendConfig, BackendError, BackendResult,
    ElapsedMs, PhaseContext, PhaseOutcome, SectionProbe,
};

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

struct Driver {
    jobs: mpsc::Sender<Job>,
    thread: JoinHandle<()>,
}

impl Driver {
    async fn start(location: PathBuf, profile: SqliteProfile) -> BackendResult<Self> {
        let (jobs, inbox) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = oneshot::channel::<BackendResult<()>>();

        let thread = std::thread::Builder::new()
            .name(format!("{}-driver", profile.key))
            .spawn(move || {
                let opened = reset_location(&location)
                    .map_err(BackendError::from)
                    .and_then(|()| super::open(&location, &profile))
                    .and_then(|conn| super::apply_schema(&conn).map(|()| conn));
                let mut conn = match opened {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                for job in inbox {
                    job(&mut conn);
                }
                tracing::debug!(backend = profile.key, "driver thread exiting");
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self { jobs, thread }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => Err(BackendError::Driver(
                "driver thread exited during start".to_string(),
            )),
        }
    }

    /// Run `f` on the driver thread and wait for its result.
    async fn call<T, F>(&self, f: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> BackendResult<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn: &mut Connection| {
            let _ = reply_tx.send(f(conn));
        });
        self.jobs
            .send(job)
            .map_err(|_| BackendError::Driver("job queue closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| BackendError::Driver("driver dropped the reply".to_string()))?
    }

    async fn stop(self) -> BackendResult<()> {
        let Driver { jobs, thread } = self;
        drop(jobs);
        tokio::task::spawn_blocking(move || thread.join())
            .await?
            .map_err(|_| BackendError::Driver("driver thread panicked".to_string()))
    }
}

pub struct SqliteActorBackend {
    profile: SqliteProfile,
    config: BackendConfig,
    driver: Option<Driver>,
}

impl SqliteActorBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            profile: super::ACTOR,
            config,
            driver: None,
        }
    }

    fn driver(&self) -> BackendResult<&Driver> {
        self.driver
            .as_ref()
            .ok_or_else(|| BackendError::NotSetUp(self.profile.key.to_string()))
    }
}

#[async_trait]
impl Backend for SqliteActorBackend {
    fn name(&self) -> &str {
        self.profile.key
    }

    async fn set_up(&mut self, ctx: &PhaseContext) -> BackendResult<()> {
        self.release().await?;
        ctx.checkpoint()?;

        let location = self.config.location(self.profile.key);
        self.driver = Some(Driver::start(location, self.profile).await?);
        Ok(())
    }

    async fn execute(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let dataset = generate_dataset(self.profile.key, &self.config.workload);
        let ctx = ctx.clone();
        self.driver()?
            .call(move |conn| {
                let started = Instant::now();
                let rows = super::load(conn, &dataset, &ctx)?;
                Ok(PhaseOutcome::new(ElapsedMs::since(started), rows))
            })
            .await
    }

    async fn search_in_database(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let needle = self.config.workload.needle.clone();
        let ctx = ctx.clone();
        self.driver()?
            .call(move |conn| {
                let started = Instant::now();
                let matches = super::search(conn, &needle, &ctx)?;
                Ok(PhaseOutcome::new(
                    ElapsedMs::since(started),
                    matches.len() as u64,
                ))
            })
            .await
    }

    async fn update_ninety_percent(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let workload = self.config.workload.clone();
        let sampling = self.profile.sampling;
        let ctx = ctx.clone();
        self.driver()?
            .call(move |conn| {
                let started = Instant::now();
                let rows = super::update(conn, &workload, sampling, &ctx)?;
                Ok(PhaseOutcome::new(ElapsedMs::since(started), rows))
            })
            .await
    }

    async fn table_names(&mut self) -> BackendResult<Vec<String>> {
        self.driver()?.call(|conn| super::table_names(conn)).await
    }

    async fn probe(&mut self, value: &str) -> BackendResult<SectionProbe> {
        let value = value.to_string();
        self.driver()?
            .call(move |conn| super::probe(conn, &value))
            .await
    }

    async fn release(&mut self) -> BackendResult<()> {
        if let Some(driver) = self.driver.take() {
            driver.stop().await?;
            tracing::debug!(backend = self.profile.key, "released driver thread");
        }
        Ok(())
    }
}
