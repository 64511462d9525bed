//! Configuration loader for YAML files and environment overrides
//!
//! Values from the file are overridden by `SANDPIT_FLUSH_MODE`,
//! `SANDPIT_FLUSH_WINDOW_MS` and `SANDPIT_LOG_LEVEL` when those are set.

use std::env;
use std::path::Path;

use tokio::fs;

use crate::config::types::SandpitConfig;
use crate::errors::SandboxError;
use crate::executors::FlushMode;

pub const ENV_FLUSH_MODE: &str = "SANDPIT_FLUSH_MODE";
pub const ENV_FLUSH_WINDOW_MS: &str = "SANDPIT_FLUSH_WINDOW_MS";
pub const ENV_LOG_LEVEL: &str = "SANDPIT_LOG_LEVEL";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<SandpitConfig, SandboxError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            SandboxError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<SandpitConfig, SandboxError> {
        let mut config: SandpitConfig = if content.trim().is_empty() {
            SandpitConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                SandboxError::Config(format!("Failed to parse YAML config: {}", e))
            })?
        };

        Self::resolve_environment(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    /// Defaults plus environment overrides, for when no file is present
    pub fn from_env() -> Result<SandpitConfig, SandboxError> {
        let mut config = SandpitConfig::default();
        Self::resolve_environment(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_environment(config: &mut SandpitConfig) -> Result<(), SandboxError> {
        if let Ok(mode) = env::var(ENV_FLUSH_MODE) {
            config.flush.mode = parse_flush_mode(&mode)?;
        }

        if let Ok(window) = env::var(ENV_FLUSH_WINDOW_MS) {
            config.flush.window_ms = window.trim().parse().map_err(|_| {
                SandboxError::Config(format!(
                    "{} must be a number of milliseconds, got '{}'",
                    ENV_FLUSH_WINDOW_MS, window
                ))
            })?;
        }

        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            config.logging.level = level;
        }

        Ok(())
    }
}

pub fn parse_flush_mode(value: &str) -> Result<FlushMode, SandboxError> {
    match value.trim().to_lowercase().as_str() {
        "settle" => Ok(FlushMode::Settle),
        "fixed" => Ok(FlushMode::Fixed),
        other => Err(SandboxError::Config(format!(
            "Unknown flush mode '{}', expected 'settle' or 'fixed'",
            other
        ))),
    }
}
