//! Configuration type definitions for the sandbox
//!
//! Every section is optional; an empty YAML document yields the defaults
//! (settle flush mode, 1500 ms window, implicit return on, `info` logging).

use serde::{Deserialize, Serialize};

use crate::errors::SandboxError;
use crate::executors::FlushMode;

/// Longest flush window accepted by validation.
pub const MAX_FLUSH_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandpitConfig {
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushConfig {
    #[serde(default)]
    pub mode: FlushMode,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Try the source as a single expression first so a bare final value is shown.
    #[serde(default = "default_true")]
    pub implicit_return: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_window_ms() -> u64 {
    1500
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            mode: FlushMode::default(),
            window_ms: default_window_ms(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            implicit_return: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Result<log::LevelFilter, SandboxError> {
        self.level.parse::<log::LevelFilter>().map_err(|_| {
            SandboxError::Config(format!("Unknown log level '{}'", self.level))
        })
    }
}

impl SandpitConfig {
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.flush.window_ms > MAX_FLUSH_WINDOW_MS {
            return Err(SandboxError::Config(format!(
                "Flush window of {} ms exceeds the maximum of {} ms",
                self.flush.window_ms, MAX_FLUSH_WINDOW_MS
            )));
        }

        self.logging.level_filter()?;

        Ok(())
    }
}
