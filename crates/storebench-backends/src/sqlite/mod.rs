//! SQLite backends.
//!
//! Three registry entries share one schema and one set of statements; they
//! differ in journal configuration, update sampling, and in how the
//! connection is hosted:
//!
//! - [`direct`]: the connection lives behind a mutex and work runs on tokio's
//!   blocking pool (`sqlite-wal`, `sqlite-journal`).
//! - [`actor`]: the connection is owned by a private driver thread that
//!   receives jobs over a channel (`sqlite-actor`).

pub mod actor;
pub mod direct;

use std::path::Path;

use rusqlite::{params, Connection};
use storebench_datagen::Dataset;

use crate::{BackendError, BackendResult, PhaseContext, SectionProbe, Workload};

pub use actor::SqliteActorBackend;
pub use direct::SqliteBackend;

const FILE_NAME: &str = "storebench.sqlite3";

/// How `update_ninety_percent` picks rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSampling {
    /// First `floor(n * fraction)` sections in key order.
    ClientSlice,
    /// Each section independently with probability `fraction`.
    EngineRandom,
}

/// Engine settings for one SQLite registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqliteProfile {
    pub key: &'static str,
    pub journal_mode: &'static str,
    pub synchronous: &'static str,
    pub sampling: UpdateSampling,
}

pub const ACTOR: SqliteProfile = SqliteProfile {
    key: "sqlite-actor",
    journal_mode: "DELETE",
    synchronous: "NORMAL",
    sampling: UpdateSampling::ClientSlice,
};

pub const WAL: SqliteProfile = SqliteProfile {
    key: "sqlite-wal",
    journal_mode: "WAL",
    synchronous: "NORMAL",
    sampling: UpdateSampling::EngineRandom,
};

pub const JOURNAL: SqliteProfile = SqliteProfile {
    key: "sqlite-journal",
    journal_mode: "MEMORY",
    synchronous: "FULL",
    sampling: UpdateSampling::EngineRandom,
};

pub const SCHEMA: &str = r#"
CREATE TABLE attachments (
    attachment_id   TEXT PRIMARY KEY,
    kind            TEXT NOT NULL,
    label           TEXT NOT NULL,
    slot            INTEGER NOT NULL,
    offset_m        INTEGER NOT NULL,
    easting         INTEGER NOT NULL,
    northing        INTEGER NOT NULL,
    set_ref         TEXT NOT NULL,
    insulator_ref   TEXT NOT NULL,
    energized       INTEGER NOT NULL,
    load_kg         INTEGER NOT NULL,
    tension_pct     INTEGER NOT NULL
);

CREATE TABLE sections (
    section_id        TEXT PRIMARY KEY,
    surveyed_on       TEXT NOT NULL,
    external_ref      TEXT NOT NULL,
    name              TEXT NOT NULL,
    kind              TEXT NOT NULL,
    circuit_code      TEXT NOT NULL,
    line_code         TEXT NOT NULL,
    phase_count       INTEGER NOT NULL,
    conductor_count   INTEGER NOT NULL,
    ground_wire_count INTEGER NOT NULL,
    search_string     TEXT NOT NULL
);

CREATE TABLE spans (
    span_id         TEXT PRIMARY KEY,
    surveyed_on     TEXT NOT NULL,
    order_key       INTEGER NOT NULL,
    number          INTEGER NOT NULL,
    from_ref        TEXT NOT NULL,
    to_ref          TEXT NOT NULL,
    conductor_count INTEGER NOT NULL,
    crew            TEXT NOT NULL,
    length_m        INTEGER NOT NULL,
    bearing_deg     INTEGER NOT NULL
);

CREATE TABLE supports (
    support_id       TEXT PRIMARY KEY,
    attachment_id    TEXT NOT NULL REFERENCES attachments(attachment_id),
    section_id       TEXT NOT NULL REFERENCES sections(section_id),
    model_file       TEXT NOT NULL,
    azimuth_deg      INTEGER NOT NULL,
    offset_m         INTEGER NOT NULL,
    easting          INTEGER NOT NULL,
    northing         INTEGER NOT NULL,
    name             TEXT NOT NULL,
    suspension       INTEGER NOT NULL,
    elevation_offset INTEGER NOT NULL,
    circuit_count    INTEGER NOT NULL,
    height_m         INTEGER NOT NULL
);

CREATE TABLE section_spans (
    section_id TEXT NOT NULL REFERENCES sections(section_id),
    span_id    TEXT NOT NULL REFERENCES spans(span_id),
    PRIMARY KEY (section_id, span_id)
);

CREATE TABLE section_supports (
    section_id TEXT NOT NULL REFERENCES sections(section_id),
    support_id TEXT NOT NULL REFERENCES supports(support_id),
    PRIMARY KEY (section_id, support_id)
);
"#;

const INSERT_ATTACHMENT: &str = "INSERT INTO attachments (attachment_id, kind, label, slot, \
     offset_m, easting, northing, set_ref, insulator_ref, energized, load_kg, tension_pct) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const INSERT_SECTION: &str = "INSERT INTO sections (section_id, surveyed_on, external_ref, \
     name, kind, circuit_code, line_code, phase_count, conductor_count, ground_wire_count, \
     search_string) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

const INSERT_SPAN: &str = "INSERT INTO spans (span_id, surveyed_on, order_key, number, \
     from_ref, to_ref, conductor_count, crew, length_m, bearing_deg) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

const INSERT_SUPPORT: &str = "INSERT INTO supports (support_id, attachment_id, section_id, \
     model_file, azimuth_deg, offset_m, easting, northing, name, suspension, elevation_offset, \
     circuit_count, height_m) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const INSERT_SECTION_SPAN: &str =
    "INSERT INTO section_spans (section_id, span_id) VALUES (?1, ?2)";

const INSERT_SECTION_SUPPORT: &str =
    "INSERT INTO section_supports (section_id, support_id) VALUES (?1, ?2)";

/// Engine-side sampling keeps the low 20 bits of `random()`.
const RANDOM_MASK: i64 = (1 << 20) - 1;

/// VM instructions between cancel and deadline checks inside a statement.
const PROGRESS_OPS: i32 = 100;

/// A section row materialized by the search phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRow {
    pub section_id: String,
    pub name: String,
    pub search_string: String,
}

/// Open the database file inside `location` with the profile's pragmas.
pub fn open(location: &Path, profile: &SqliteProfile) -> BackendResult<Connection> {
    let conn = Connection::open(location.join(FILE_NAME))?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", profile.journal_mode, |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", profile.synchronous)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    tracing::debug!(backend = profile.key, journal_mode = %mode, "opened sqlite database");
    Ok(conn)
}

pub fn apply_schema(conn: &Connection) -> BackendResult<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Interrupt the running statement once `ctx` is cancelled or past its
/// deadline. SQLite rolls back whatever the statement had changed.
fn watch(conn: &Connection, ctx: &PhaseContext) {
    let ctx = ctx.clone();
    conn.progress_handler(PROGRESS_OPS, Some(move || ctx.checkpoint().is_err()));
}

fn unwatch(conn: &Connection) {
    conn.progress_handler(0, None::<fn() -> bool>);
}

/// Remove the watch and report an interrupted statement as the cancellation
/// or deadline that caused it.
fn settle<T>(conn: &Connection, ctx: &PhaseContext, result: BackendResult<T>) -> BackendResult<T> {
    unwatch(conn);
    if matches!(result, Err(BackendError::Sqlite(_))) {
        ctx.checkpoint()?;
    }
    result
}

/// Insert a dataset inside one transaction, one batch per section. Returns
/// the number of sections inserted.
pub fn load(conn: &mut Connection, dataset: &Dataset, ctx: &PhaseContext) -> BackendResult<u64> {
    watch(conn, ctx);
    let result = insert_all(conn, dataset, ctx);
    settle(conn, ctx, result)
}

fn insert_all(conn: &mut Connection, dataset: &Dataset, ctx: &PhaseContext) -> BackendResult<u64> {
    let tx = conn.transaction()?;
    {
        let mut attachment = tx.prepare_cached(INSERT_ATTACHMENT)?;
        let mut section_stmt = tx.prepare_cached(INSERT_SECTION)?;
        let mut span_stmt = tx.prepare_cached(INSERT_SPAN)?;
        let mut support_stmt = tx.prepare_cached(INSERT_SUPPORT)?;
        let mut section_span = tx.prepare_cached(INSERT_SECTION_SPAN)?;
        let mut section_support = tx.prepare_cached(INSERT_SECTION_SUPPORT)?;

        for (section, supports, spans) in dataset.groups() {
            ctx.checkpoint()?;

            for support in supports {
                let a = &support.attachment;
                attachment.execute(params![
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

            section_stmt.execute(params![
                section.section_id,
                section.surveyed_on,
                section.external_ref,
                section.name,
                section.kind,
                section.circuit_code,
                section.line_code,
                section.phase_count,
                section.conductor_count,
                section.ground_wire_count,
                section.search_string,
            ])?;

            for span in spans {
                span_stmt.execute(params![
                    span.span_id,
                    span.surveyed_on,
                    span.order_key,
                    span.number,
                    span.from_ref,
                    span.to_ref,
                    span.conductor_count,
                    span.crew,
                    span.length_m,
                    span.bearing_deg,
                ])?;
            }

            for support in supports {
                support_stmt.execute(params![
                    support.support_id,
                    support.attachment_id,
                    support.section_id,
                    support.model_file,
                    support.azimuth_deg,
                    support.offset,
                    support.easting,
                    support.northing,
                    support.name,
                    support.suspension,
                    support.elevation_offset,
                    support.circuit_count,
                    support.height_m,
                ])?;
            }

            for span_id in &section.span_ids {
                section_span.execute(params![section.section_id, span_id])?;
            }
            for support_id in &section.support_ids {
                section_support.execute(params![section.section_id, support_id])?;
            }
        }
    }
    tx.commit()?;
    Ok(dataset.len() as u64)
}

/// Materialize every section whose search string contains `needle`.
pub fn search(conn: &Connection, needle: &str, ctx: &PhaseContext) -> BackendResult<Vec<SectionRow>> {
    watch(conn, ctx);
    let result = scan(conn, needle, ctx);
    settle(conn, ctx, result)
}

fn scan(conn: &Connection, needle: &str, ctx: &PhaseContext) -> BackendResult<Vec<SectionRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT section_id, name, search_string FROM sections WHERE instr(search_string, ?1) > 0",
    )?;
    let rows = stmt.query_map(params![needle], |row| {
        Ok(SectionRow {
            section_id: row.get(0)?,
            name: row.get(1)?,
            search_string: row.get(2)?,
        })
    })?;

    let mut matches = Vec::new();
    for row in rows {
        ctx.checkpoint()?;
        matches.push(row?);
    }
    Ok(matches)
}

/// Overwrite `search_string` on a sample of sections. Returns rows changed.
pub fn update(
    conn: &Connection,
    workload: &Workload,
    sampling: UpdateSampling,
    ctx: &PhaseContext,
) -> BackendResult<u64> {
    ctx.checkpoint()?;
    watch(conn, ctx);
    let result = overwrite(conn, workload, sampling);
    settle(conn, ctx, result)
}

fn overwrite(conn: &Connection, workload: &Workload, sampling: UpdateSampling) -> BackendResult<u64> {
    let changed = match sampling {
        UpdateSampling::ClientSlice => {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM sections", [], |row| row.get(0))?;
            let limit = workload.update_limit(total.max(0) as u64) as i64;
            conn.execute(
                "UPDATE sections SET search_string = ?1 WHERE section_id IN \
                 (SELECT section_id FROM sections ORDER BY section_id LIMIT ?2)",
                params![workload.replacement, limit],
            )?
        }
        UpdateSampling::EngineRandom => {
            let threshold = (workload.update_fraction * (RANDOM_MASK + 1) as f64).round() as i64;
            conn.execute(
                "UPDATE sections SET search_string = ?1 WHERE (random() & ?2) < ?3",
                params![workload.replacement, RANDOM_MASK, threshold],
            )?
        }
    };
    Ok(changed as u64)
}

pub fn probe(conn: &Connection, value: &str) -> BackendResult<SectionProbe> {
    let (total, matching): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(search_string = ?1), 0) FROM sections",
        params![value],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(SectionProbe {
        total: total.max(0) as u64,
        matching: matching.max(0) as u64,
    })
}

pub fn table_names(conn: &Connection) -> BackendResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Current journal mode, lowercased by SQLite.
pub fn journal_mode(conn: &Connection) -> BackendResult<String> {
    let mode = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Phase;
    use storebench_datagen::DataGenerator;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", true).unwrap();
        apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_schema_tables() {
        let conn = memory_db();
        assert_eq!(table_names(&conn).unwrap(), crate::TABLES);
    }

    #[test]
    fn test_load_respects_foreign_keys() {
        let mut conn = memory_db();
        let dataset = DataGenerator::seeded(4).generate(12, "needle");
        let ctx = PhaseContext::unbounded(Phase::Load);

        assert_eq!(load(&mut conn, &dataset, &ctx).unwrap(), 12);

        let supports: i64 = conn
            .query_row("SELECT COUNT(*) FROM section_supports", [], |r| r.get(0))
            .unwrap();
        assert_eq!(supports as usize, dataset.support_count());
    }

    #[test]
    fn test_cancelled_load_rolls_back() {
        let mut conn = memory_db();
        let dataset = DataGenerator::seeded(4).generate(5, "needle");
        let ctx = PhaseContext::unbounded(Phase::Load);
        ctx.cancel.cancel();

        assert!(load(&mut conn, &dataset, &ctx).is_err());
        assert_eq!(probe(&conn, "needle").unwrap(), SectionProbe::default());
    }

    #[test]
    fn test_search_treats_needle_literally() {
        let mut conn = memory_db();
        let dataset = DataGenerator::seeded(8).generate(150, "50%_off");
        load(&mut conn, &dataset, &PhaseContext::unbounded(Phase::Load)).unwrap();

        let hits = search(&conn, "50%_off", &PhaseContext::unbounded(Phase::Search)).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|row| row.search_string == "50%_off"));
    }

    #[test]
    fn test_client_slice_update_is_exact() {
        let mut conn = memory_db();
        let dataset = DataGenerator::seeded(6).generate(40, "n");
        load(&mut conn, &dataset, &PhaseContext::unbounded(Phase::Load)).unwrap();

        let mut workload = Workload::new("n");
        workload.replacement = "replaced".to_string();
        let ctx = PhaseContext::unbounded(Phase::Update);
        assert_eq!(update(&conn, &workload, UpdateSampling::ClientSlice, &ctx).unwrap(), 36);
        assert_eq!(probe(&conn, "replaced").unwrap().matching, 36);
    }

    #[test]
    fn test_engine_random_update_full_fraction() {
        let mut conn = memory_db();
        let dataset = DataGenerator::seeded(6).generate(40, "n");
        load(&mut conn, &dataset, &PhaseContext::unbounded(Phase::Load)).unwrap();

        let mut workload = Workload::new("n");
        workload.replacement = "all".to_string();
        workload.update_fraction = 1.0;
        let ctx = PhaseContext::unbounded(Phase::Update);
        assert_eq!(update(&conn, &workload, UpdateSampling::EngineRandom, &ctx).unwrap(), 40);
    }

    #[test]
    fn test_interrupted_update_changes_nothing() {
        let mut conn = memory_db();
        let dataset = DataGenerator::seeded(6).generate(300, "n");
        load(&mut conn, &dataset, &PhaseContext::unbounded(Phase::Load)).unwrap();

        let mut workload = Workload::new("n");
        workload.replacement = "replaced".to_string();
        workload.update_fraction = 1.0;
        let ctx = PhaseContext::unbounded(Phase::Update);
        ctx.cancel.cancel();

        // Bypass the up-front checkpoint so the statement itself is stopped.
        watch(&conn, &ctx);
        let result = overwrite(&conn, &workload, UpdateSampling::EngineRandom);
        let err = settle(&conn, &ctx, result).unwrap_err();

        assert!(err.is_cancelled(), "{err}");
        assert_eq!(probe(&conn, "replaced").unwrap().matching, 0);
    }

    #[test]
    fn test_interrupted_search_reports_cancel() {
        let mut conn = memory_db();
        let dataset = DataGenerator::seeded(9).generate(300, "n");
        load(&mut conn, &dataset, &PhaseContext::unbounded(Phase::Load)).unwrap();

        let ctx = PhaseContext::unbounded(Phase::Search);
        ctx.cancel.cancel();
        let err = search(&conn, "n", &ctx).unwrap_err();
        assert!(err.is_cancelled(), "{err}");

        // The watch is gone once the phase returns.
        assert_eq!(probe(&conn, "n").unwrap().matching, 3);
    }
}
