//! Storebench Backend Adapters
//!
//! Every storage engine under test implements [`Backend`], one lifecycle for
//! all of them:
//!
//! ```text
//!   set_up ──► execute (load) ──► search_in_database ──► update_ninety_percent
//!                                                                   │
//!   release ◄───────────────────────────────────────────────────────┘
//! ```
//!
//! | key              | engine                                               |
//! |------------------|------------------------------------------------------|
//! | `redb`           | redb key-value store, bincode records                |
//! | `sqlite-actor`   | SQLite owned by a private driver thread              |
//! | `sqlite-wal`     | SQLite, write-ahead log                              |
//! | `sqlite-journal` | SQLite, in-memory rollback journal, full sync        |
//! | `duckdb`         | DuckDB columnar engine (`duckdb` feature)            |
//!
//! Each backend owns its schema text and dialect. Blocking engine work runs
//! on tokio's blocking pool and checks its [`PhaseContext`] between batches.

pub mod context;
#[cfg(feature = "duckdb")]
pub mod duck;
pub mod error;
pub mod kv;
pub mod sqlite;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storebench_datagen::{DataGenerator, Dataset, DEFAULT_SECTION_COUNT};

pub use context::{CancelToken, Phase, PhaseContext};
pub use error::{BackendError, BackendResult};

/// Tables every backend creates, sorted.
pub const TABLES: [&str; 6] = [
    "attachments",
    "section_spans",
    "section_supports",
    "sections",
    "spans",
    "supports",
];

pub const DEFAULT_UPDATE_FRACTION: f64 = 0.9;

// ============================================================================
// Phase results
// ============================================================================

/// Wall-clock milliseconds, fractional.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElapsedMs(pub f64);

impl ElapsedMs {
    pub fn since(started: Instant) -> Self {
        Self::from(started.elapsed())
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }
}

impl From<Duration> for ElapsedMs {
    fn from(duration: Duration) -> Self {
        ElapsedMs(duration.as_secs_f64() * 1000.0)
    }
}

/// Outcome of a timed phase. `rows` counts Sections inserted, matched or
/// updated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub elapsed: ElapsedMs,
    pub rows: u64,
}

impl PhaseOutcome {
    pub fn new(elapsed: ElapsedMs, rows: u64) -> Self {
        Self { elapsed, rows }
    }
}

/// Untimed verification counts over the `sections` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionProbe {
    pub total: u64,
    pub matching: u64,
}

// ============================================================================
// Configuration
// ============================================================================

/// What each load, search and update does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub section_count: usize,
    pub needle: String,
    pub replacement: String,
    pub update_fraction: f64,
    /// Fixes generated data when set; entropy otherwise.
    pub seed: Option<u64>,
}

impl Workload {
    /// Default workload searching for `needle` and writing it back on update.
    pub fn new(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self {
            section_count: DEFAULT_SECTION_COUNT,
            replacement: needle.clone(),
            needle,
            update_fraction: DEFAULT_UPDATE_FRACTION,
            seed: None,
        }
    }

    /// Rows touched by a client-side slice update over `total` rows.
    pub fn update_limit(&self, total: u64) -> u64 {
        (total as f64 * self.update_fraction).floor() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub data_dir: PathBuf,
    pub workload: Workload,
}

impl BackendConfig {
    pub fn new(data_dir: impl Into<PathBuf>, workload: Workload) -> Self {
        Self {
            data_dir: data_dir.into(),
            workload,
        }
    }

    /// Private storage location of one backend.
    pub fn location(&self, key: &str) -> PathBuf {
        self.data_dir.join(key)
    }
}

// ============================================================================
// Backend trait
// ============================================================================

/// Lifecycle shared by every storage engine.
#[async_trait]
pub trait Backend: Send {
    /// Registry key, also the storage directory name.
    fn name(&self) -> &str;

    /// Release any open handle, clear the storage location and create the
    /// schema. Safe to call repeatedly.
    async fn set_up(&mut self, ctx: &PhaseContext) -> BackendResult<()>;

    /// Generate and insert one dataset. Only the insert is timed.
    async fn execute(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome>;

    /// Materialize every Section whose search string contains the needle.
    async fn search_in_database(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome>;

    /// Overwrite the search string of roughly `update_fraction` of Sections.
    async fn update_ninety_percent(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome>;

    async fn table_names(&mut self) -> BackendResult<Vec<String>>;

    async fn probe(&mut self, value: &str) -> BackendResult<SectionProbe>;

    /// Close the engine handle. Idempotent.
    async fn release(&mut self) -> BackendResult<()>;
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Remove and recreate a storage location.
pub fn reset_location(location: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(location) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(location)
}

/// Generate the dataset for one load. Runs before the timer starts.
pub fn generate_dataset(backend: &str, workload: &Workload) -> Dataset {
    let dataset =
        DataGenerator::with_seed(workload.seed).generate(workload.section_count, &workload.needle);
    tracing::debug!(
        backend,
        sections = dataset.len(),
        supports = dataset.support_count(),
        spans = dataset.span_count(),
        payload_bytes = dataset.approx_payload_bytes(),
        "generated dataset"
    );
    dataset
}
