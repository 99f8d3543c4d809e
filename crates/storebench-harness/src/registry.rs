//! Backend registry: maps a backend name to a factory producing a fresh
//! adapter.

use std::sync::Arc;

use storebench_backends::kv::{self, KvBackend};
use storebench_backends::sqlite::{self, SqliteActorBackend, SqliteBackend};
use storebench_backends::{Backend, BackendConfig};

use crate::error::BenchmarkError;

pub type BackendFactory = Arc<dyn Fn(BackendConfig) -> Box<dyn Backend> + Send + Sync>;

/// Registered backends in registration order.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    entries: Vec<(String, BackendFactory)>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every backend compiled into this build.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(kv::KEY, |config| Box::new(KvBackend::new(config)));
        registry.register(sqlite::ACTOR.key, |config| {
            Box::new(SqliteActorBackend::new(config))
        });
        registry.register(sqlite::WAL.key, |config| Box::new(SqliteBackend::wal(config)));
        registry.register(sqlite::JOURNAL.key, |config| {
            Box::new(SqliteBackend::journal(config))
        });
        #[cfg(feature = "duckdb")]
        registry.register(storebench_backends::duck::KEY, |config| {
            Box::new(storebench_backends::duck::DuckDbBackend::new(config))
        });
        registry
    }

    /// Add a backend, replacing any factory already registered under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(BackendConfig) -> Box<dyn Backend> + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: BackendFactory = Arc::new(factory);
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = factory,
            None => self.entries.push((name, factory)),
        }
        self
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(key, _)| key.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn create(&self, name: &str, config: BackendConfig) -> Result<Box<dyn Backend>, BenchmarkError> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, factory)| factory(config))
            .ok_or_else(|| BenchmarkError::UnknownBackend(name.to_string()))
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
