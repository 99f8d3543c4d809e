//! DuckDB columnar backend (cargo feature `duckdb`).
//!
//! Bulk loads go through DuckDB's appender, one table at a time inside a
//! single transaction. The schema declares primary keys only. Updates sample
//! rows engine-side with `random()`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use duckdb::{params, Connection};
use parking_lot::Mutex;
use storebench_datagen::Dataset;

use crate::{
    generate_dataset, reset_location, Backend, BackendConfig, BackendError, BackendResult,
    ElapsedMs, PhaseContext, PhaseOutcome, SectionProbe, Workload,
};

pub const KEY: &str = "duckdb";

const FILE_NAME: &str = "storebench.duckdb";
const CHECKPOINT_EVERY: usize = 64;

const SCHEMA: &str = r#"
CREATE TABLE attachments (
    attachment_id VARCHAR PRIMARY KEY,
    kind VARCHAR NOT NULL,
    label VARCHAR NOT NULL,
    slot BIGINT NOT NULL,
    offset_m BIGINT NOT NULL,
    easting BIGINT NOT NULL,
    northing BIGINT NOT NULL,
    set_ref VARCHAR NOT NULL,
    insulator_ref VARCHAR NOT NULL,
    energized BOOLEAN NOT NULL,
    load_kg BIGINT NOT NULL,
    tension_pct BIGINT NOT NULL
);
CREATE TABLE sections (
    section_id VARCHAR PRIMARY KEY,
    surveyed_on VARCHAR NOT NULL,
    external_ref VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    kind VARCHAR NOT NULL,
    circuit_code VARCHAR NOT NULL,
    line_code VARCHAR NOT NULL,
    phase_count BIGINT NOT NULL,
    conductor_count BIGINT NOT NULL,
    ground_wire_count BIGINT NOT NULL,
    search_string VARCHAR NOT NULL
);
CREATE TABLE spans (
    span_id VARCHAR PRIMARY KEY,
    surveyed_on VARCHAR NOT NULL,
    order_key BIGINT NOT NULL,
    number BIGINT NOT NULL,
    from_ref VARCHAR NOT NULL,
    to_ref VARCHAR NOT NULL,
    conductor_count BIGINT NOT NULL,
    crew VARCHAR NOT NULL,
    length_m BIGINT NOT NULL,
    bearing_deg BIGINT NOT NULL
);
CREATE TABLE supports (
    support_id VARCHAR PRIMARY KEY,
    attachment_id VARCHAR NOT NULL,
    section_id VARCHAR NOT NULL,
    model_file VARCHAR NOT NULL,
    azimuth_deg BIGINT NOT NULL,
    offset_m BIGINT NOT NULL,
    easting BIGINT NOT NULL,
    northing BIGINT NOT NULL,
    name VARCHAR NOT NULL,
    suspension BOOLEAN NOT NULL,
    elevation_offset BIGINT NOT NULL,
    circuit_count BIGINT NOT NULL,
    height_m BIGINT NOT NULL
);
CREATE TABLE section_spans (
    section_id VARCHAR NOT NULL,
    span_id VARCHAR NOT NULL,
    PRIMARY KEY (section_id, span_id)
);
CREATE TABLE section_supports (
    section_id VARCHAR NOT NULL,
    support_id VARCHAR NOT NULL,
    PRIMARY KEY (section_id, support_id)
);
"#;

pub struct DuckDbBackend {
    config: BackendConfig,
    conn: Option<Arc<Mutex<Connection>>>,
}

impl DuckDbBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config, conn: None }
    }

    fn location(&self) -> PathBuf {
        self.config.location(KEY)
    }

    fn connection(&self) -> BackendResult<Arc<Mutex<Connection>>> {
        self.conn
            .clone()
            .ok_or_else(|| BackendError::NotSetUp(KEY.to_string()))
    }
}

fn tick(i: usize, ctx: &PhaseContext) -> BackendResult<()> {
    if i % CHECKPOINT_EVERY == 0 {
        ctx.checkpoint()?;
    }
    Ok(())
}

fn load(conn: &mut Connection, dataset: &Dataset, ctx: &PhaseContext) -> BackendResult<u64> {
    let tx = conn.transaction()?;
    {
        let mut appender = tx.appender("attachments")?;
        for (i, support) in dataset.all_supports().enumerate() {
            tick(i, ctx)?;
            let a = &support.attachment;
            appender.append_row(params![
                a.attachment_id,
                a.kind,
                a.label,
                a.position,
                a.offset,
                a.easting,
                a.northing,
                a.set_ref,
                a.insulator_ref,
                a.energized,
                a.load_kg,
                a.tension_pct,
            ])?;
        }
        appender.flush()?;
    }
    {
        let mut appender = tx.appender("sections")?;
        for (i, s) in dataset.sections.iter().enumerate() {
            tick(i, ctx)?;
            appender.append_row(params![
                s.section_id,
                s.surveyed_on,
                s.external_ref,
                s.name,
                s.kind,
                s.circuit_code,
                s.line_code,
                s.phase_count,
                s.conductor_count,
                s.ground_wire_count,
                s.search_string,
            ])?;
        }
        appender.flush()?;
    }
    {
        let mut appender = tx.appender("spans")?;
        for (i, s) in dataset.all_spans().enumerate() {
            tick(i, ctx)?;
            appender.append_row(params![
                s.span_id,
                s.surveyed_on,
                s.order_key,
                s.number,
                s.from_ref,
                s.to_ref,
                s.conductor_count,
                s.crew,
                s.length_m,
                s.bearing_deg,
            ])?;
        }
        appender.flush()?;
    }
    {
        let mut appender = tx.appender("supports")?;
        for (i, s) in dataset.all_supports().enumerate() {
            tick(i, ctx)?;
            appender.append_row(params![
                s.support_id,
                s.attachment_id,
                s.section_id,
                s.model_file,
                s.azimuth_deg,
                s.offset,
                s.easting,
                s.northing,
                s.name,
                s.suspension,
                s.elevation_offset,
                s.circuit_count,
                s.height_m,
            ])?;
        }
        appender.flush()?;
    }
    {
        let mut spans = tx.appender("section_spans")?;
        for (i, section) in dataset.sections.iter().enumerate() {
            tick(i, ctx)?;
            for span_id in &section.span_ids {
                spans.append_row(params![section.section_id, span_id])?;
            }
        }
        spans.flush()?;
    }
    {
        let mut supports = tx.appender("section_supports")?;
        for (i, section) in dataset.sections.iter().enumerate() {
            tick(i, ctx)?;
            for support_id in &section.support_ids {
                supports.append_row(params![section.section_id, support_id])?;
            }
        }
        supports.flush()?;
    }
    tx.commit()?;
    Ok(dataset.len() as u64)
}

fn search(conn: &Connection, needle: &str, ctx: &PhaseContext) -> BackendResult<u64> {
    let mut stmt = conn.prepare(
        "SELECT section_id, name, search_string FROM sections WHERE strpos(search_string, ?) > 0",
    )?;
    let rows = stmt.query_map(params![needle], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut matches = Vec::new();
    for (i, row) in rows.enumerate() {
        tick(i, ctx)?;
        matches.push(row?);
    }
    Ok(matches.len() as u64)
}

fn update(conn: &Connection, workload: &Workload, ctx: &PhaseContext) -> BackendResult<u64> {
    ctx.checkpoint()?;
    let changed = conn.execute(
        "UPDATE sections SET search_string = ? WHERE random() < ?",
        params![workload.replacement, workload.update_fraction],
    )?;
    Ok(changed as u64)
}

#[async_trait]
impl Backend for DuckDbBackend {
    fn name(&self) -> &str {
        KEY
    }

    async fn set_up(&mut self, ctx: &PhaseContext) -> BackendResult<()> {
        self.release().await?;
        ctx.checkpoint()?;

        let location = self.location();
        let conn = tokio::task::spawn_blocking(move || -> BackendResult<Connection> {
            reset_location(&location)?;
            let conn = Connection::open(location.join(FILE_NAME))?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await??;

        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    async fn execute(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let conn = self.connection()?;
        let dataset = generate_dataset(KEY, &self.config.workload);
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || -> BackendResult<PhaseOutcome> {
            let mut conn = conn.lock();
            let started = Instant::now();
            let rows = load(&mut conn, &dataset, &ctx)?;
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
            let rows = search(&conn, &needle, &ctx)?;
            Ok(PhaseOutcome::new(ElapsedMs::since(started), rows))
        })
        .await?
    }

    async fn update_ninety_percent(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let conn = self.connection()?;
        let workload = self.config.workload.clone();
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || -> BackendResult<PhaseOutcome> {
            let conn = conn.lock();
            let started = Instant::now();
            let rows = update(&conn, &workload, &ctx)?;
            Ok(PhaseOutcome::new(ElapsedMs::since(started), rows))
        })
        .await?
    }

    async fn table_names(&mut self) -> BackendResult<Vec<String>> {
        let conn = self.connection()?;
        tokio::task::spawn_blocking(move || -> BackendResult<Vec<String>> {
            let conn = conn.lock();
            let mut stmt = conn.prepare(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'main' ORDER BY table_name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await?
    }

    async fn probe(&mut self, value: &str) -> BackendResult<SectionProbe> {
        let conn = self.connection()?;
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> BackendResult<SectionProbe> {
            let conn = conn.lock();
            let (total, matching): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COUNT(*) FILTER (WHERE search_string = ?) FROM sections",
                params![value],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(SectionProbe {
                total: total.max(0) as u64,
                matching: matching.max(0) as u64,
            })
        })
        .await?
    }

    async fn release(&mut self) -> BackendResult<()> {
        if self.conn.take().is_some() {
            tracing::debug!(backend = KEY, "released duckdb connection");
        }
        Ok(())
    }
}
