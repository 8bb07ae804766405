//! Pipeline configuration.
//!
//! Configuration is read from a TOML file and may be overridden with
//! environment variables of the form `FAULTROUTE__<SECTION>__<KEY>`, e.g.
//! `FAULTROUTE__MANAGER__REPEAT_THRESHOLD=3`. Every key has a default, so an
//! empty file (or no file at all) yields a working configuration.

use std::path::Path;

use ::config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ClassifierConfig;
use crate::logging::{LoggerConfig, LoggingConfig};
use crate::manager::ManagerConfig;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "FAULTROUTE";

/// Errors that can occur when loading pipeline configuration.
#[derive(Debug, Error)]
pub enum PipelineConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ConfigError),

    /// The configuration file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// The configuration could not be rendered as TOML.
    #[error("failed to render configuration: {0}")]
    RenderError(#[from] toml::ser::Error),

    /// The configuration parsed but its values are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidValue(String),
}

/// Root configuration for an error pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub classifier: ClassifierConfig,
    pub manager: ManagerConfig,
    /// Structured error records.
    pub logger: LoggerConfig,
    /// Process diagnostics (`tracing` subscriber).
    pub diagnostics: LoggingConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, the path is not valid
    /// UTF-8, the merged configuration cannot be deserialized, or its values
    /// are inconsistent.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PipelineConfigError> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| PipelineConfigError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(PipelineConfigError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::new(path_str, FileFormat::Toml))
            .add_source(env_source())
            .build()?;
        config.try_deserialize::<Self>()?.validate()
    }

    /// Load from `path` when given, otherwise from defaults plus environment.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, PipelineConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config = Config::builder().add_source(env_source()).build()?;
                config.try_deserialize::<Self>()?.validate()
            }
        }
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml_str(source: &str) -> Result<Self, PipelineConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;
        config.try_deserialize::<Self>()?.validate()
    }

    /// Rejects settings that deserialize but cannot work together.
    pub fn validate(self) -> Result<Self, PipelineConfigError> {
        self.manager
            .validate()
            .map_err(PipelineConfigError::InvalidValue)?;
        Ok(self)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, PipelineConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
