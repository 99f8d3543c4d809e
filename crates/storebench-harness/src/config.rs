//! Harness configuration, loaded from JSON with every field defaulted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use storebench_backends::{BackendConfig, Workload, DEFAULT_UPDATE_FRACTION};
use storebench_datagen::{random_string, DEFAULT_SECTION_COUNT, SEARCH_STRING_LEN};

use crate::error::ConfigError;

pub const DEFAULT_DATA_DIR: &str = "./storebench-data";
pub const DEFAULT_PHASE_TIMEOUT_SECS: u64 = 120;

const PROBE_FILE: &str = ".storebench-probe";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub data_dir: PathBuf,
    pub section_count: usize,
    /// Search target. A random 500-character string when unset.
    pub needle: Option<String>,
    /// Written by the update phase. Defaults to the needle.
    pub replacement: Option<String>,
    pub update_fraction: f64,
    pub phase_timeout_secs: u64,
    pub seed: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            section_count: DEFAULT_SECTION_COUNT,
            needle: None,
            replacement: None,
            update_fraction: DEFAULT_UPDATE_FRACTION,
            phase_timeout_secs: DEFAULT_PHASE_TIMEOUT_SECS,
            seed: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.phase_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "phase_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !(self.update_fraction > 0.0 && self.update_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "update_fraction must be in (0, 1], got {}",
                self.update_fraction
            )));
        }
        if matches!(self.needle.as_deref(), Some("")) {
            return Err(ConfigError::Invalid("needle must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }

    /// Resolve the workload for one run, drawing the needle if none is set.
    /// With a seed the drawn needle is reproducible.
    pub fn workload(&self) -> Workload {
        let needle = match &self.needle {
            Some(needle) => needle.clone(),
            None => {
                let mut rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                random_string(&mut rng, SEARCH_STRING_LEN)
            }
        };
        Workload {
            section_count: self.section_count,
            replacement: self.replacement.clone().unwrap_or_else(|| needle.clone()),
            needle,
            update_fraction: self.update_fraction,
            seed: self.seed,
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(self.data_dir.clone(), self.workload())
    }
}

/// Create `dir` and check that it accepts writes.
pub fn ensure_persistent_storage(dir: &Path) -> Result<(), ConfigError> {
    let unavailable = |source| ConfigError::StorageUnavailable {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(unavailable)?;
    let probe = dir.join(PROBE_FILE);
    std::fs::write(&probe, b"ok").map_err(unavailable)?;
    std::fs::remove_file(&probe).map_err(unavailable)?;
    tracing::debug!(path = %dir.display(), "storage is writable");
    Ok(())
}
