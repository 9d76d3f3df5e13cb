//! Link configuration with JSON file loading.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ecc::EccConfig;
use crate::pairing::MAX_SESSION_TTL;

pub const CONFIG_FILE_NAME: &str = "beamlink.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Session lifetime in milliseconds; hard-capped at 5000.
    #[serde(default = "default_session_ttl_ms")]
    pub session_ttl_ms: u64,
    /// Temporal coupling window between the two channels.
    #[serde(default = "default_coupling_tolerance_ms")]
    pub coupling_tolerance_ms: u64,
    /// Require both channel payloads to decrypt under the session key.
    #[serde(default)]
    pub require_crypto_binding: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
    #[serde(default)]
    pub ecc: EccConfig,
}

fn default_session_ttl_ms() -> u64 { 5000 }
fn default_coupling_tolerance_ms() -> u64 { 1000 }
fn default_failure_threshold() -> u32 { 3 }
fn default_recovery_threshold() -> u32 { 3 }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            session_ttl_ms: default_session_ttl_ms(),
            coupling_tolerance_ms: default_coupling_tolerance_ms(),
            require_crypto_binding: false,
            failure_threshold: default_failure_threshold(),
            recovery_threshold: default_recovery_threshold(),
            ecc: EccConfig::default(),
        }
    }
}

impl LinkConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms).min(MAX_SESSION_TTL)
    }

    pub fn coupling_tolerance(&self) -> Duration {
        Duration::from_millis(self.coupling_tolerance_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_ttl_ms == 0 {
            return Err(ConfigError::Invalid("session_ttl_ms must be positive"));
        }
        if Duration::from_millis(self.session_ttl_ms) > MAX_SESSION_TTL {
            return Err(ConfigError::Invalid("session_ttl_ms exceeds the 5 s cap"));
        }
        if self.coupling_tolerance_ms == 0 {
            return Err(ConfigError::Invalid("coupling_tolerance_ms must be positive"));
        }
        if self.failure_threshold == 0 || self.recovery_threshold == 0 {
            return Err(ConfigError::Invalid("fallback thresholds must be positive"));
        }
        if self.ecc.data_shards == 0 {
            return Err(ConfigError::Invalid("ecc.data_shards must be positive"));
        }
        if self.ecc.min_parity == 0 || self.ecc.min_parity > self.ecc.max_parity {
            return Err(ConfigError::Invalid("ecc parity bounds are inverted"));
        }
        if self.ecc.data_shards + self.ecc.max_parity > 255 {
            return Err(ConfigError::Invalid("ecc shard total exceeds 255"));
        }
        if !(self.ecc.smoothing > 0.0 && self.ecc.smoothing <= 1.0) {
            return Err(ConfigError::Invalid("ecc.smoothing must be in (0, 1]"));
        }
        Ok(())
    }
}

pub fn read_config(path: &Path) -> Result<LinkConfig, ConfigError> {
    let data = fs::read(path)?;
    let config: LinkConfig = serde_json::from_slice(&data)?;
    config.validate()?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &LinkConfig) -> Result<(), ConfigError> {
    let data = serde_json::to_vec_pretty(config)?;
    fs::write(path, data)?;
    Ok(())
}
