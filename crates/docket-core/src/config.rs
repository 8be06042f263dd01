//! Engine configuration.
//!
//! Layers, last wins:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `DOCKET_`-prefixed environment variables, `__` between sections
//!    (`DOCKET_BATCH__THROTTLE_MS=250`)

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::search::BatchSettings;

pub const ENV_PREFIX: &str = "DOCKET_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `tracing` filter directive used when `RUST_LOG` is not set.
    pub log_filter: String,
    pub worker: WorkerConfig,
    pub batch: BatchSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            worker: WorkerConfig::default(),
            batch: BatchSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 60,
            shutdown_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl EngineConfig {
    /// The layered figment, before extraction.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load defaults, then `file` (which must exist when given), then the
    /// environment.
    pub fn load(file: Option<&Path>) -> Result<Self, EngineError> {
        if let Some(path) = file
            && !path.is_file()
        {
            return Err(EngineError::Config(format!("config file not found: {}", path.display())));
        }
        Self::from_figment(Self::figment(file))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, EngineError> {
        let config: EngineConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.worker.poll_timeout_secs == 0 {
            return Err(EngineError::Config("worker.poll_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }
}
