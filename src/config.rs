// src/config.rs

//! TOML configuration for the supervisor.
//!
//! ```toml
//! no_output_timeout_ms = 3600000
//! max_log_size = 32768
//! poll_interval_ms = 100
//! transcript_path = "/var/log/deps/INSTALLATION.log"
//! ```
//!
//! Every key is optional.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::supervisor::{
    CommandSpec, DEFAULT_MAX_LOG_SIZE, DEFAULT_NO_OUTPUT_TIMEOUT, DEFAULT_POLL_INTERVAL,
};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    pub no_output_timeout_ms: u64,
    pub max_log_size: usize,
    pub poll_interval_ms: u64,
    /// Append every captured line to this file while commands run.
    pub transcript_path: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            no_output_timeout_ms: DEFAULT_NO_OUTPUT_TIMEOUT.as_millis() as u64,
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            transcript_path: None,
        }
    }
}

impl SupervisorConfig {
    /// Reads, parses and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: SupervisorConfig = toml::from_str(&content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.no_output_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "no_output_timeout_ms must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms > self.no_output_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms ({}) cannot be greater than no_output_timeout_ms ({})",
                self.poll_interval_ms, self.no_output_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn no_output_timeout(&self) -> Duration {
        Duration::from_millis(self.no_output_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Copies the configured limits onto `spec`.
    pub fn apply(&self, spec: CommandSpec) -> CommandSpec {
        spec.with_no_output_timeout(self.no_output_timeout())
            .with_max_log_size(self.max_log_size)
    }
}
