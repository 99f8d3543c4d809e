//! Benchmark orchestrator.
//!
//! Runs backend phases strictly in sequence, times them, reports each one to
//! an [`EventSink`] as soon as it finishes, and guarantees that every adapter
//! acquired by `launch` is released again.
//!
//! ```text
//!   Idle ─► SettingUp ─► Loading ─► Searching ─► Updating ─► Done
//!     │         │           │           │            │
//!     └─────────┴───────────┴─────┬─────┴────────────┘
//!                                 ▼
//!                          Failed { phase }
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use storebench_backends::{
    Backend, BackendConfig, CancelToken, ElapsedMs, Phase, PhaseContext, PhaseOutcome,
};
use tracing::{debug, info, warn};

use crate::error::BenchmarkError;
use crate::protocol::{Command, EventSink, ResultKind, Task, WorkerEvent};
use crate::registry::BackendRegistry;

/// Lifecycle phases of one `launch`, in order.
pub const LIFECYCLE: [Phase; 4] = [Phase::Setup, Phase::Load, Phase::Search, Phase::Update];

/// Per-backend progress. Running states name the phase most recently entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    SettingUp,
    Loading,
    Searching,
    Updating,
    Done,
    Failed {
        phase: Phase,
    },
}

impl RunState {
    pub fn running(phase: Phase) -> Self {
        match phase {
            Phase::Setup => RunState::SettingUp,
            Phase::Load => RunState::Loading,
            Phase::Search => RunState::Searching,
            Phase::Update => RunState::Updating,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed { .. })
    }
}

pub struct Orchestrator {
    registry: BackendRegistry,
    config: BackendConfig,
    phase_timeout: Duration,
    session: CancelToken,
    /// Adapters driven by individual tasks, kept until released.
    live: HashMap<String, Box<dyn Backend>>,
    states: HashMap<String, RunState>,
}

impl Orchestrator {
    pub fn new(registry: BackendRegistry, config: BackendConfig, phase_timeout: Duration) -> Self {
        Self {
            registry,
            config,
            phase_timeout,
            session: CancelToken::new(),
            live: HashMap::new(),
            states: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Token cancelling every current and future phase of this session.
    pub fn session_token(&self) -> CancelToken {
        self.session.clone()
    }

    pub fn state(&self, backend: &str) -> RunState {
        self.states.get(backend).copied().unwrap_or_default()
    }

    pub fn live_backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.live.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch one command. Phase failures have already been posted to
    /// `sink` when this returns an error.
    pub async fn handle(&mut self, command: &Command, sink: &dyn EventSink) -> Result<(), BenchmarkError> {
        let name = command.backend.as_str();
        debug!(backend = name, task = ?command.task, "handling command");

        let result = match command.task {
            Task::Launch => self.launch(name, sink).await,
            Task::SetUp => self.run_task(name, Phase::Setup, sink).await.map(|_| ()),
            Task::Execute => self.run_task(name, Phase::Load, sink).await.map(|_| ()),
            Task::SearchInDatabase => self.run_task(name, Phase::Search, sink).await.map(|_| ()),
            Task::UpdateNinetyPercent => self.run_task(name, Phase::Update, sink).await.map(|_| ()),
            Task::Release => self.release(name).await,
        };

        if let Err(err @ BenchmarkError::UnknownBackend(_)) = &result {
            if let Some(phase) = command.task.phase() {
                sink.post(WorkerEvent::failed(name, phase, err));
            }
        }
        result
    }

    /// Full lifecycle on a fresh adapter: set up, load, search, update, then
    /// release whatever happened.
    pub async fn launch(&mut self, name: &str, sink: &dyn EventSink) -> Result<(), BenchmarkError> {
        let mut backend = self.registry.create(name, self.config.clone())?;
        // A live adapter for the same name would share its storage location.
        self.release(name).await?;
        info!(backend = name, "launch started");
        let started = Instant::now();

        let mut outcome = Ok(());
        for phase in LIFECYCLE {
            if let Err(err) = self.run_tracked(name, backend.as_mut(), phase, sink).await {
                outcome = Err(err);
                break;
            }
        }

        if let Err(err) = backend.release().await {
            warn!(backend = name, error = %err, "release after launch failed");
        }
        if outcome.is_ok() {
            self.states.insert(name.to_string(), RunState::Done);
        }

        info!(
            backend = name,
            ok = outcome.is_ok(),
            total_ms = ElapsedMs::since(started).as_f64(),
            "launch finished"
        );
        outcome
    }

    /// Run one phase on the live adapter for `name`, creating it if needed.
    pub async fn run_task(
        &mut self,
        name: &str,
        phase: Phase,
        sink: &dyn EventSink,
    ) -> Result<PhaseOutcome, BenchmarkError> {
        let mut backend = match self.live.remove(name) {
            Some(backend) => backend,
            None => self.registry.create(name, self.config.clone())?,
        };
        let result = self.run_tracked(name, backend.as_mut(), phase, sink).await;
        self.live.insert(name.to_string(), backend);
        if result.is_ok() && phase == Phase::Update {
            self.states.insert(name.to_string(), RunState::Done);
        }
        result
    }

    /// Release the live adapter for `name`, if any.
    pub async fn release(&mut self, name: &str) -> Result<(), BenchmarkError> {
        if !self.registry.contains(name) {
            return Err(BenchmarkError::UnknownBackend(name.to_string()));
        }
        if let Some(mut backend) = self.live.remove(name) {
            backend
                .release()
                .await
                .map_err(|err| BenchmarkError::from_backend(name, Phase::Setup, err))?;
            debug!(backend = name, "released live adapter");
        }
        self.states.insert(name.to_string(), RunState::Idle);
        Ok(())
    }

    /// Release every live adapter. Called on worker shutdown.
    pub async fn release_all(&mut self) {
        for (name, mut backend) in self.live.drain() {
            if let Err(err) = backend.release().await {
                warn!(backend = %name, error = %err, "release on shutdown failed");
            }
            self.states.insert(name, RunState::Idle);
        }
    }

    /// Run a phase, keep the state machine current and report the outcome.
    async fn run_tracked(
        &mut self,
        name: &str,
        backend: &mut dyn Backend,
        phase: Phase,
        sink: &dyn EventSink,
    ) -> Result<PhaseOutcome, BenchmarkError> {
        self.states.insert(name.to_string(), RunState::running(phase));

        match self.run_phase(name, backend, phase).await {
            Ok(outcome) => {
                match ResultKind::from_phase(phase) {
                    Some(kind) => sink.post(WorkerEvent::result(kind, outcome.elapsed, name)),
                    None => debug!(
                        backend = name,
                        elapsed_ms = outcome.elapsed.as_f64(),
                        "setup is not reported"
                    ),
                }
                Ok(outcome)
            }
            Err(err) => {
                warn!(backend = name, %phase, error = %err, "phase failed");
                self.states
                    .insert(name.to_string(), RunState::Failed { phase });
                sink.post(WorkerEvent::failed(name, phase, &err));
                Err(err)
            }
        }
    }

    /// Run a phase under its own deadline and cancel token.
    async fn run_phase(
        &self,
        name: &str,
        backend: &mut dyn Backend,
        phase: Phase,
    ) -> Result<PhaseOutcome, BenchmarkError> {
        let token = self.session.child();
        let ctx = PhaseContext::new(phase, self.phase_timeout, token.clone());
        info!(backend = name, %phase, "phase started");

        let started = Instant::now();
        let work = async {
            match phase {
                Phase::Setup => backend
                    .set_up(&ctx)
                    .await
                    .map(|()| PhaseOutcome::new(ElapsedMs::since(started), 0)),
                Phase::Load => backend.execute(&ctx).await,
                Phase::Search => backend.search_in_database(&ctx).await,
                Phase::Update => backend.update_ninety_percent(&ctx).await,
            }
        };

        match tokio::time::timeout(self.phase_timeout, work).await {
            Ok(Ok(outcome)) => {
                info!(
                    backend = name,
                    %phase,
                    elapsed_ms = outcome.elapsed.as_f64(),
                    rows = outcome.rows,
                    "phase finished"
                );
                Ok(outcome)
            }
            Ok(Err(err)) => Err(BenchmarkError::from_backend(name, phase, err)),
            Err(_) => {
                // Stops blocking work that is still checkpointing.
                token.cancel();
                Err(BenchmarkError::Timeout {
                    backend: name.to_string(),
                    phase,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_states_follow_lifecycle() {
        let states: Vec<RunState> = LIFECYCLE.iter().map(|p| RunState::running(*p)).collect();
        assert_eq!(
            states,
            vec![
                RunState::SettingUp,
                RunState::Loading,
                RunState::Searching,
                RunState::Updating
            ]
        );
        assert!(RunState::Done.is_terminal());
        assert!(RunState::Failed { phase: Phase::Load }.is_terminal());
        assert!(!RunState::Loading.is_terminal());
    }
}
