//! redb key-value backend.
//!
//! Records are stored bincode-encoded under their identifier, one table per
//! entity. Section membership lives in two multimap tables keyed by section
//! id. Updates slice the first `update_fraction` of sections in key order.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use redb::{
    Database, MultimapTableDefinition, MultimapTableHandle, ReadableTable, Table,
    TableDefinition, TableHandle,
};
use serde::Serialize;
use storebench_datagen::Section;

use crate::{
    generate_dataset, reset_location, Backend, BackendConfig, BackendError, BackendResult,
    ElapsedMs, PhaseContext, PhaseOutcome, SectionProbe,
};

pub const KEY: &str = "redb";

const FILE_NAME: &str = "storebench.redb";
const CHECKPOINT_EVERY: usize = 64;

const ATTACHMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("attachments");
const SECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sections");
const SPANS: TableDefinition<&str, &[u8]> = TableDefinition::new("spans");
const SUPPORTS: TableDefinition<&str, &[u8]> = TableDefinition::new("supports");
const SECTION_SPANS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("section_spans");
const SECTION_SUPPORTS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("section_supports");

pub struct KvBackend {
    config: BackendConfig,
    db: Option<Arc<Database>>,
}

impl KvBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config, db: None }
    }

    fn database(&self) -> BackendResult<Arc<Database>> {
        self.db
            .clone()
            .ok_or_else(|| BackendError::NotSetUp(KEY.to_string()))
    }
}

fn put_all<'r, T, I>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    rows: I,
    ctx: &PhaseContext,
) -> BackendResult<()>
where
    T: Serialize + 'r,
    I: IntoIterator<Item = (&'r str, &'r T)>,
{
    for (i, (key, record)) in rows.into_iter().enumerate() {
        if i % CHECKPOINT_EVERY == 0 {
            ctx.checkpoint()?;
        }
        let bytes = bincode::serialize(record)?;
        table.insert(key, bytes.as_slice())?;
    }
    Ok(())
}

#[async_trait]
impl Backend for KvBackend {
    fn name(&self) -> &str {
        KEY
    }

    async fn set_up(&mut self, ctx: &PhaseContext) -> BackendResult<()> {
        self.release().await?;
        ctx.checkpoint()?;

        let location = self.config.location(KEY);
        let db = tokio::task::spawn_blocking(move || -> BackendResult<Database> {
            reset_location(&location)?;
            let db = Database::create(location.join(FILE_NAME))?;
            let txn = db.begin_write()?;
            txn.open_table(ATTACHMENTS)?;
            txn.open_table(SECTIONS)?;
            txn.open_table(SPANS)?;
            txn.open_table(SUPPORTS)?;
            txn.open_multimap_table(SECTION_SPANS)?;
            txn.open_multimap_table(SECTION_SUPPORTS)?;
            txn.commit()?;
            Ok(db)
        })
        .await??;

        self.db = Some(Arc::new(db));
        Ok(())
    }

    async fn execute(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let db = self.database()?;
        let dataset = generate_dataset(KEY, &self.config.workload);
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || -> BackendResult<PhaseOutcome> {
            let started = Instant::now();
            let txn = db.begin_write()?;
            {
                let mut attachments = txn.open_table(ATTACHMENTS)?;
                put_all(
                    &mut attachments,
                    dataset
                        .all_supports()
                        .map(|s| (s.attachment_id.as_str(), &s.attachment)),
                    &ctx,
                )?;

                let mut sections = txn.open_table(SECTIONS)?;
                put_all(
                    &mut sections,
                    dataset.sections.iter().map(|s| (s.section_id.as_str(), s)),
                    &ctx,
                )?;

                let mut spans = txn.open_table(SPANS)?;
                put_all(
                    &mut spans,
                    dataset.all_spans().map(|s| (s.span_id.as_str(), s)),
                    &ctx,
                )?;

                let mut supports = txn.open_table(SUPPORTS)?;
                put_all(
                    &mut supports,
                    dataset.all_supports().map(|s| (s.support_id.as_str(), s)),
                    &ctx,
                )?;

                ctx.checkpoint()?;
                let mut section_spans = txn.open_multimap_table(SECTION_SPANS)?;
                let mut section_supports = txn.open_multimap_table(SECTION_SUPPORTS)?;
                for section in &dataset.sections {
                    for span_id in &section.span_ids {
                        section_spans.insert(section.section_id.as_str(), span_id.as_str())?;
                    }
                    for support_id in &section.support_ids {
                        section_supports
                            .insert(section.section_id.as_str(), support_id.as_str())?;
                    }
                }
            }
            txn.commit()?;

            Ok(PhaseOutcome::new(
                ElapsedMs::since(started),
                dataset.len() as u64,
            ))
        })
        .await?
    }

    async fn search_in_database(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let db = self.database()?;
        let needle = self.config.workload.needle.clone();
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || -> BackendResult<PhaseOutcome> {
            let started = Instant::now();
            let txn = db.begin_read()?;
            let table = txn.open_table(SECTIONS)?;

            let mut matches: Vec<Section> = Vec::new();
            for (i, entry) in table.iter()?.enumerate() {
                if i % CHECKPOINT_EVERY == 0 {
                    ctx.checkpoint()?;
                }
                let (_, value) = entry?;
                let section: Section = bincode::deserialize(value.value())?;
                if section.search_string.contains(needle.as_str()) {
                    matches.push(section);
                }
            }

            Ok(PhaseOutcome::new(
                ElapsedMs::since(started),
                matches.len() as u64,
            ))
        })
        .await?
    }

    async fn update_ninety_percent(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        let db = self.database()?;
        let workload = self.config.workload.clone();
        let ctx = ctx.clone();

        tokio::task::spawn_blocking(move || -> BackendResult<PhaseOutcome> {
            let started = Instant::now();
            let txn = db.begin_write()?;
            let updated = {
                let mut table = txn.open_table(SECTIONS)?;

                let mut keys = Vec::new();
                for entry in table.iter()? {
                    let (key, _) = entry?;
                    keys.push(key.value().to_string());
                }

                let limit = workload.update_limit(keys.len() as u64) as usize;
                for (i, key) in keys.iter().take(limit).enumerate() {
                    if i % CHECKPOINT_EVERY == 0 {
                        ctx.checkpoint()?;
                    }
                    let current = table
                        .get(key.as_str())?
                        .map(|value| bincode::deserialize::<Section>(value.value()))
                        .transpose()?;
                    if let Some(mut section) = current {
                        section.search_string = workload.replacement.clone();
                        let bytes = bincode::serialize(&section)?;
                        table.insert(key.as_str(), bytes.as_slice())?;
                    }
                }
                limit
            };
            txn.commit()?;

            Ok(PhaseOutcome::new(ElapsedMs::since(started), updated as u64))
        })
        .await?
    }

    async fn table_names(&mut self) -> BackendResult<Vec<String>> {
        let db = self.database()?;
        tokio::task::spawn_blocking(move || -> BackendResult<Vec<String>> {
            let txn = db.begin_read()?;
            let mut names: Vec<String> = txn
                .list_tables()?
                .map(|table| table.name().to_string())
                .collect();
            names.extend(
                txn.list_multimap_tables()?
                    .map(|table| table.name().to_string()),
            );
            names.sort();
            Ok(names)
        })
        .await?
    }

    async fn probe(&mut self, value: &str) -> BackendResult<SectionProbe> {
        let db = self.database()?;
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> BackendResult<SectionProbe> {
            let txn = db.begin_read()?;
            let table = txn.open_table(SECTIONS)?;
            let mut probe = SectionProbe::default();
            for entry in table.iter()? {
                let (_, bytes) = entry?;
                let section: Section = bincode::deserialize(bytes.value())?;
                probe.total += 1;
                if section.search_string == value {
                    probe.matching += 1;
                }
            }
            Ok(probe)
        })
        .await?
    }

    async fn release(&mut self) -> BackendResult<()> {
        if self.db.take().is_some() {
            tracing::debug!(backend = KEY, "released database handle");
        }
        Ok(())
    }
}
