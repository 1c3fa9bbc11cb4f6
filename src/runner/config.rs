use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::script::DEFAULT_SCRIPT_TIMEOUT;

pub const MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONFIG_FILE_NAME: &str = "runner.json";

/// Settings of one collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    pub stop_on_failure: bool,
    pub delay_ms: u64,
    #[serde(rename = "requestTimeoutMs", with = "millis")]
    pub request_timeout: Duration,
    #[serde(rename = "scriptTimeoutMs", with = "millis")]
    pub script_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stop_on_failure: false,
            delay_ms: 0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("delayMs must be between 0 and {MAX_DELAY_MS}, got {0}")]
    DelayOutOfRange(u64),
    #[error("requestTimeout must be greater than zero")]
    ZeroRequestTimeout,
    #[error("scriptTimeout must be greater than zero")]
    ZeroScriptTimeout,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delay_ms > MAX_DELAY_MS {
            return Err(ConfigError::DelayOutOfRange(self.delay_ms));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        if self.script_timeout.is_zero() {
            return Err(ConfigError::ZeroScriptTimeout);
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone)]
pub struct LoadedRunConfig {
    pub config: RunConfig,
    pub path: PathBuf,
}

/// Reads `runner.json` from `target` (a directory or the file itself).
/// Returns `Ok(None)` when no file exists.
pub fn load_run_config(target: &Path) -> Result<Option<LoadedRunConfig>> {
    let file_path = if target.is_dir() {
        target.join(CONFIG_FILE_NAME)
    } else {
        target.to_path_buf()
    };

    if !file_path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&file_path)
        .with_context(|| format!("reading run config {}", file_path.display()))?;
    let config: RunConfig = serde_json::from_str(&contents)
        .with_context(|| format!("parsing run config {}", file_path.display()))?;

    Ok(Some(LoadedRunConfig {
        config,
        path: file_path,
    }))
}
