//! Configuration module for the sandbox
//!
//! Supports YAML configuration files with environment overrides, and
//! converts the result into the settings a `Coordinator` runs with.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::SandboxError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<SandpitConfig, SandboxError> {
    ConfigLoader::from_file(path).await
}

/// Validate a configuration
pub fn validate_config(config: &SandpitConfig) -> Result<(), SandboxError> {
    config.validate()
}
