//! Startup errors
//!
//! Only these leave the process. Everything that goes wrong after startup
//! is absorbed by the orchestration loop and logged.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or incomplete configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Device name must not be empty")]
    EmptyDeviceName,
    #[error("Content root not found: {0}")]
    ContentRootMissing(PathBuf),
    #[error("Entry document not found: {0}")]
    EntryDocumentMissing(PathBuf),
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Fatal errors raised before the control loop starts
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Port {0} is already bound by another process")]
    PortInUse(u16),
    #[error("Server backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}

impl StartupError {
    /// Whether this is a configuration problem rather than a resource problem
    pub fn is_config(&self) -> bool {
        matches!(self, StartupError::Config(_))
    }
}
