//! Scripted backend used to drive the orchestrator without real storage.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use storebench_backends::{
    Backend, BackendConfig, BackendError, BackendResult, ElapsedMs, Phase, PhaseContext,
    PhaseOutcome, SectionProbe, Workload,
};
use storebench_harness::{BackendRegistry, Orchestrator};

#[derive(Clone, Default)]
pub struct Counters {
    pub created: Arc<AtomicUsize>,
    pub set_ups: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

impl Counters {
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Default)]
pub struct Script {
    pub fail_at: Option<Phase>,
    pub hang_at: Option<Phase>,
}

pub struct ScriptedBackend {
    name: String,
    script: Script,
    counters: Counters,
}

impl ScriptedBackend {
    async fn step(&self, phase: Phase, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        ctx.checkpoint()?;
        if self.script.hang_at == Some(phase) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.script.fail_at == Some(phase) {
            return Err(BackendError::Driver(format!("scripted {phase} failure")));
        }
        Ok(PhaseOutcome::new(ElapsedMs(1.0), 3))
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_up(&mut self, ctx: &PhaseContext) -> BackendResult<()> {
        self.counters.set_ups.fetch_add(1, Ordering::SeqCst);
        self.step(Phase::Setup, ctx).await.map(|_| ())
    }

    async fn execute(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        self.step(Phase::Load, ctx).await
    }

    async fn search_in_database(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        self.step(Phase::Search, ctx).await
    }

    async fn update_ninety_percent(&mut self, ctx: &PhaseContext) -> BackendResult<PhaseOutcome> {
        self.step(Phase::Update, ctx).await
    }

    async fn table_names(&mut self) -> BackendResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn probe(&mut self, _value: &str) -> BackendResult<SectionProbe> {
        Ok(SectionProbe::default())
    }

    async fn release(&mut self) -> BackendResult<()> {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn register(registry: &mut BackendRegistry, name: &str, script: Script, counters: &Counters) {
    let owned = name.to_string();
    let counters = counters.clone();
    registry.register(name, move |_config| {
        counters.created.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedBackend {
            name: owned.clone(),
            script,
            counters: counters.clone(),
        })
    });
}

pub fn orchestrator(registry: BackendRegistry, timeout: Duration) -> Orchestrator {
    let config = BackendConfig::new("/nonexistent/storebench", Workload::new("needle"));
    Orchestrator::new(registry, config, timeout)
}

pub fn single(name: &str, script: Script) -> (Orchestrator, Counters) {
    let counters = Counters::default();
    let mut registry = BackendRegistry::new();
    register(&mut registry, name, script, &counters);
    (orchestrator(registry, Duration::from_secs(5)), counters)
}
