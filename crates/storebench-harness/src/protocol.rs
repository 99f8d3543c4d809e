//! Worker protocol: JSON envelopes between host and worker.
//!
//! Host → worker:
//! `{"task": "launch", "type": "redb"}`
//!
//! Worker → host, one per finished phase:
//! `{"type": "fillTime", "totalTime": 12.5, "database": "redb"}`
//!
//! or, when a phase fails:
//! `{"type": "phaseFailed", "phase": "load", "database": "redb", "error": "...", "timedOut": false}`

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use storebench_backends::{ElapsedMs, Phase};
use tokio::sync::mpsc;

use crate::error::{BenchmarkError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Task {
    SetUp,
    Execute,
    SearchInDatabase,
    UpdateNinetyPercent,
    /// Full lifecycle on a fresh adapter.
    Launch,
    Release,
}

impl Task {
    /// Phase a task runs, if it runs exactly one. `launch` starts with setup.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Task::SetUp | Task::Launch => Some(Phase::Setup),
            Task::Execute => Some(Phase::Load),
            Task::SearchInDatabase => Some(Phase::Search),
            Task::UpdateNinetyPercent => Some(Phase::Update),
            Task::Release => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub task: Task,
    /// Registry key of the target backend.
    #[serde(rename = "type")]
    pub backend: String,
}

impl Command {
    pub fn new(task: Task, backend: impl Into<String>) -> Self {
        Self {
            task,
            backend: backend.into(),
        }
    }

    pub fn launch(backend: impl Into<String>) -> Self {
        Self::new(Task::Launch, backend)
    }

    pub fn from_json(line: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Result rows reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultKind {
    FillTime,
    SearchTime,
    UpdateTime,
}

impl ResultKind {
    pub const ALL: [ResultKind; 3] = [
        ResultKind::FillTime,
        ResultKind::SearchTime,
        ResultKind::UpdateTime,
    ];

    /// Setup is not reported as a result.
    pub fn from_phase(phase: Phase) -> Option<Self> {
        match phase {
            Phase::Setup => None,
            Phase::Load => Some(ResultKind::FillTime),
            Phase::Search => Some(ResultKind::SearchTime),
            Phase::Update => Some(ResultKind::UpdateTime),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::FillTime => "fillTime",
            ResultKind::SearchTime => "searchTime",
            ResultKind::UpdateTime => "updateTime",
        }
    }

    /// Row label for a run inserting `section_count` sections.
    pub fn label(&self, section_count: usize) -> String {
        match self {
            ResultKind::FillTime => format!("insert {section_count} in db"),
            ResultKind::SearchTime => "search string in db".to_string(),
            ResultKind::UpdateTime => "update 90% of the rows".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerEvent {
    #[serde(rename = "fillTime")]
    FillTime {
        #[serde(rename = "totalTime")]
        total_time: ElapsedMs,
        database: String,
    },
    #[serde(rename = "searchTime")]
    SearchTime {
        #[serde(rename = "totalTime")]
        total_time: ElapsedMs,
        database: String,
    },
    #[serde(rename = "updateTime")]
    UpdateTime {
        #[serde(rename = "totalTime")]
        total_time: ElapsedMs,
        database: String,
    },
    #[serde(rename = "phaseFailed")]
    PhaseFailed {
        phase: Phase,
        database: String,
        error: String,
        #[serde(rename = "timedOut")]
        timed_out: bool,
    },
}

impl WorkerEvent {
    pub fn result(kind: ResultKind, total_time: ElapsedMs, database: impl Into<String>) -> Self {
        let database = database.into();
        match kind {
            ResultKind::FillTime => WorkerEvent::FillTime {
                total_time,
                database,
            },
            ResultKind::SearchTime => WorkerEvent::SearchTime {
                total_time,
                database,
            },
            ResultKind::UpdateTime => WorkerEvent::UpdateTime {
                total_time,
                database,
            },
        }
    }

    pub fn failed(database: impl Into<String>, phase: Phase, err: &BenchmarkError) -> Self {
        WorkerEvent::PhaseFailed {
            phase,
            database: database.into(),
            error: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }

    /// Result row this event belongs to; `None` for setup failures.
    pub fn kind(&self) -> Option<ResultKind> {
        match self {
            WorkerEvent::FillTime { .. } => Some(ResultKind::FillTime),
            WorkerEvent::SearchTime { .. } => Some(ResultKind::SearchTime),
            WorkerEvent::UpdateTime { .. } => Some(ResultKind::UpdateTime),
            WorkerEvent::PhaseFailed { phase, .. } => ResultKind::from_phase(*phase),
        }
    }

    pub fn database(&self) -> &str {
        match self {
            WorkerEvent::FillTime { database, .. }
            | WorkerEvent::SearchTime { database, .. }
            | WorkerEvent::UpdateTime { database, .. }
            | WorkerEvent::PhaseFailed { database, .. } => database,
        }
    }

    pub fn total_time(&self) -> Option<ElapsedMs> {
        match self {
            WorkerEvent::FillTime { total_time, .. }
            | WorkerEvent::SearchTime { total_time, .. }
            | WorkerEvent::UpdateTime { total_time, .. } => Some(*total_time),
            WorkerEvent::PhaseFailed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, WorkerEvent::PhaseFailed { .. })
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(line: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

// ============================================================================
// Event sinks
// ============================================================================

/// Destination for worker events. Posting never blocks.
pub trait EventSink: Send + Sync {
    fn post(&self, event: WorkerEvent);
}

/// Forwards events to the host over an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn post(&self, event: WorkerEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            tracing::warn!(?event, "host went away, dropping event");
        }
    }
}

/// Sink and receiver pair for a host that reads events off a channel.
pub fn event_channel() -> (ChannelSink, mpsc::UnboundedReceiver<WorkerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink::new(tx), rx)
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<WorkerEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<WorkerEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn post(&self, event: WorkerEvent) {
        self.events.lock().push(event);
    }
}
