use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::env::EnvChange;

use super::error::ScriptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
            ConsoleLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub message: String,
}

/// Outcome of one `test(name, fn)` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl AssertionResult {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            expected: None,
            actual: None,
            message: String::new(),
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            expected: None,
            actual: None,
            message: message.into(),
        }
    }
}

/// Everything one script invocation produced, including partial output of a
/// failed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptResult {
    pub success: bool,
    #[serde(rename = "durationMs", with = "duration_ms")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ScriptError>,
    #[serde(rename = "consoleOutput", default)]
    pub console_output: Vec<ConsoleEntry>,
    #[serde(default)]
    pub assertions: Vec<AssertionResult>,
    #[serde(rename = "envChanges", default)]
    pub env_changes: Vec<EnvChange>,
    #[serde(rename = "globalChanges", default)]
    pub global_changes: Vec<EnvChange>,
    #[serde(rename = "requestModified", default)]
    pub request_modified: bool,
}

impl ScriptResult {
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn passed_assertions(&self) -> usize {
        self.assertions.iter().filter(|a| a.passed).count()
    }

    pub fn failed_assertions(&self) -> usize {
        self.assertions.iter().filter(|a| !a.passed).count()
    }

    pub fn has_failed_assertions(&self) -> bool {
        self.assertions.iter().any(|a| !a.passed)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}

/// Append-only list shared between a sandbox and the executor that owns it.
#[derive(Debug)]
pub(crate) struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Recorder<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn push(&self, item: T) {
        self.lock().push(item);
    }

    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.lock().clone()
    }
}
