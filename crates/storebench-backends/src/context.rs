//! Phase context: which phase is running, until when, and whether it has
//! been cancelled.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

/// Lifecycle phase of a backend run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Load,
    Search,
    Update,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Load => "load",
            Phase::Search => "search",
            Phase::Update => "update",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag.
///
/// A child token observes its own flag and every ancestor's, so cancelling a
/// session token stops every phase derived from it while cancelling a phase
/// token leaves the session alone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.flag));
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.ancestors.iter().any(|f| f.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub phase: Phase,
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

impl PhaseContext {
    pub fn new(phase: Phase, timeout: Duration, cancel: CancelToken) -> Self {
        Self {
            phase,
            deadline: Instant::now().checked_add(timeout),
            cancel,
        }
    }

    /// Context with no deadline and a fresh token; used by direct callers
    /// and tests.
    pub fn unbounded(phase: Phase) -> Self {
        Self {
            phase,
            deadline: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Called between batches of work; fails once the phase is cancelled or
    /// past its deadline.
    pub fn checkpoint(&self) -> BackendResult<()> {
        if self.cancel.is_cancelled() {
            return Err(BackendError::Cancelled(self.phase));
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(BackendError::DeadlineExceeded(self.phase))
            }
            _ => Ok(()),
        }
    }
}
