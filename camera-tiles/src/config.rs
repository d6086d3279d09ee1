/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Path of a YAML config file, read by [`PipelineConfig::from_env_or_default`].
pub const CONFIG_PATH_ENV: &str = "CAMERA_PIPELINE_CONFIG";
/// Overrides `decode_workers` when no config file is given.
pub const DECODE_WORKERS_ENV: &str = "CAMERA_PIPELINE_DECODE_WORKERS";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of decode threads. 1 gives a single serial worker.
    pub decode_workers: usize,
    /// A visible source with no rendered frame for this long is stalled.
    pub stall_timeout_ms: u64,
    /// Stall detection stays off this long after a source registers.
    pub startup_grace_ms: u64,
    /// How often the run loop publishes diagnostics.
    pub diagnostics_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decode_workers: 2,
            stall_timeout_ms: 10_000,
            startup_grace_ms: 5_000,
            diagnostics_interval_ms: 1_000,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| PipelineError::ConfigIo {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_default() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // A config file wins over individual variables
        if let Some(path) = lookup(CONFIG_PATH_ENV) {
            return Self::from_file(&path);
        }

        let mut config = Self::default();
        if let Some(raw) = lookup(DECODE_WORKERS_ENV) {
            config.decode_workers = raw.trim().parse().map_err(|_| {
                PipelineError::InvalidConfig(format!("{DECODE_WORKERS_ENV}={raw:?} is not a number"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.decode_workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "decode_workers must be at least 1".to_string(),
            ));
        }
        if self.diagnostics_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "diagnostics_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn diagnostics_interval(&self) -> Duration {
        Duration::from_millis(self.diagnostics_interval_ms)
    }
}
