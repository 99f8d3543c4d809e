use std::path::PathBuf;

use storebench_backends::{BackendError, Phase};

#[derive(Debug, thiserror::Error)]
pub enum BenchmarkError {
    #[error("{backend}: setup failed: {source}")]
    Setup {
        backend: String,
        #[source]
        source: BackendError,
    },
    #[error("{backend}: load failed: {source}")]
    Load {
        backend: String,
        #[source]
        source: BackendError,
    },
    #[error("{backend}: {phase} query failed: {source}")]
    Query {
        backend: String,
        phase: Phase,
        #[source]
        source: BackendError,
    },
    #[error("{backend}: {phase} phase timed out")]
    Timeout { backend: String, phase: Phase },
    #[error("{backend}: {phase} phase cancelled")]
    Cancelled { backend: String, phase: Phase },
    #[error("unknown backend `{0}`")]
    UnknownBackend(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BenchmarkError {
    /// Classify a backend failure by the phase it happened in.
    pub fn from_backend(backend: &str, phase: Phase, err: BackendError) -> Self {
        let backend = backend.to_string();
        if err.is_deadline() {
            return BenchmarkError::Timeout { backend, phase };
        }
        if err.is_cancelled() {
            return BenchmarkError::Cancelled { backend, phase };
        }
        match phase {
            Phase::Setup => BenchmarkError::Setup {
                backend,
                source: err,
            },
            Phase::Load => BenchmarkError::Load {
                backend,
                source: err,
            },
            Phase::Search | Phase::Update => BenchmarkError::Query {
                backend,
                phase,
                source: err,
            },
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            BenchmarkError::Setup { .. } => Some(Phase::Setup),
            BenchmarkError::Load { .. } => Some(Phase::Load),
            BenchmarkError::Query { phase, .. }
            | BenchmarkError::Timeout { phase, .. }
            | BenchmarkError::Cancelled { phase, .. } => Some(*phase),
            BenchmarkError::UnknownBackend(_) | BenchmarkError::Transport(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BenchmarkError::Timeout { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to start worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to build worker runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("worker channel disconnected")]
    Disconnected,
    #[error("worker thread panicked")]
    WorkerPanicked,
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("storage at {path} is not writable: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_by_phase() {
        let err = BenchmarkError::from_backend(
            "redb",
            Phase::Search,
            BackendError::NotSetUp("redb".into()),
        );
        assert!(matches!(err, BenchmarkError::Query { phase: Phase::Search, .. }));
        assert_eq!(err.phase(), Some(Phase::Search));

        let err = BenchmarkError::from_backend(
            "redb",
            Phase::Load,
            BackendError::DeadlineExceeded(Phase::Load),
        );
        assert!(err.is_timeout());

        let err = BenchmarkError::from_backend(
            "redb",
            Phase::Setup,
            BackendError::Cancelled(Phase::Setup),
        );
        assert!(matches!(err, BenchmarkError::Cancelled { .. }));
    }

    #[test]
    fn test_message_names_backend() {
        let err = BenchmarkError::from_backend(
            "sqlite-wal",
            Phase::Load,
            BackendError::Driver("gone".into()),
        );
        assert_eq!(
            err.to_string(),
            "sqlite-wal: load failed: driver thread unavailable: gone"
        );
    }
}
