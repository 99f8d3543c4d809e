//! Storebench Harness
//!
//! Drives storage backends through the benchmark lifecycle on a dedicated
//! worker and collects the timings:
//!
//! ```text
//!   host ──Command──► WorkerHandle ──FIFO──► worker thread
//!                                              │
//!                                              ▼
//!                                         Orchestrator ──► Backend (by name)
//!                                              │
//!   ResultRegistry ◄──WorkerEvent── EventSink ◄┘
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod transport;

pub use config::{ensure_persistent_storage, HarnessConfig};
pub use error::{BenchmarkError, ConfigError, TransportError};
pub use orchestrator::{Orchestrator, RunState, LIFECYCLE};
pub use protocol::{
    event_channel, ChannelSink, Command, EventSink, RecordingSink, ResultKind, Task, WorkerEvent,
};
pub use registry::{BackendFactory, BackendRegistry};
pub use report::{Cell, ReportRow, ResultRegistry};
pub use transport::{serve_lines, Worker, WorkerHandle};

/// Orchestrator over every default backend, configured from `config`.
pub fn orchestrator_from_config(config: &HarnessConfig) -> Orchestrator {
    Orchestrator::new(
        BackendRegistry::with_defaults(),
        config.backend_config(),
        config.phase_timeout(),
    )
}
