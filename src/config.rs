//! Configuration management for castkeeper
//!
//! Read once at startup from `~/.config/castkeeper/config.toml` (or an
//! explicit `--config` path), then overridden by CLI flags. There is no
//! reconfiguration at runtime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Advertised name of the target display
    pub device_name: String,
    /// Directory served as the castable page
    pub content_root: PathBuf,
    /// Document that must exist under `content_root`
    pub entry_document: String,
    /// Host port the content server binds
    pub port: u16,
    /// Delay between control cycles
    pub poll_interval_secs: u64,
    /// Budget for one device scan
    pub scan_timeout_secs: u64,
    /// Budget for one server health probe
    pub probe_timeout_secs: u64,
    /// Budget for the cast command
    pub cast_timeout_secs: u64,
    /// Budget for one cast status query
    pub status_timeout_secs: u64,
    /// Pause between the cast command returning and the first status query
    pub cast_confirm_delay_ms: u64,
    /// Consecutive cast failures after which failures are logged as errors
    pub retry_escalation_threshold: u32,
    /// How long teardown waits for the port to be released
    pub port_release_timeout_secs: u64,
    /// Host put into the cast URL; detected from the LAN interface when unset
    pub advertise_host: Option<String>,
    /// Container name of the content server
    pub container_name: String,
    /// Container image of the content server
    pub server_image: String,
    pub catt_path: String,
    pub nmap_path: String,
    pub docker_path: String,
    /// Append-only log file, in addition to stdout
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: "nest-hub".to_string(),
            content_root: PathBuf::from("/opt/smart-display/src"),
            entry_document: "index.html".to_string(),
            port: 5500,
            poll_interval_secs: 10,
            scan_timeout_secs: 60,
            probe_timeout_secs: 5,
            cast_timeout_secs: 30,
            status_timeout_secs: 15,
            cast_confirm_delay_ms: 2000,
            retry_escalation_threshold: 5,
            port_release_timeout_secs: 10,
            advertise_host: None,
            container_name: "smart-display-server".to_string(),
            server_image: "httpd:alpine".to_string(),
            catt_path: "catt".to_string(),
            nmap_path: "nmap".to_string(),
            docker_path: "docker".to_string(),
            log_file: None,
        }
    }
}

impl Config {
    /// Default config file path (~/.config/castkeeper/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("castkeeper").join("config.toml"))
    }

    /// Load config.
    ///
    /// An explicit path must exist. The default path is optional and falls
    /// back to built-in defaults when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.to_path_buf()));
                }
                Self::load_from(path)
            }
            None => match Self::path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load config from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check everything that can be checked without touching the network.
    ///
    /// On success `content_root` is replaced by its canonical absolute path,
    /// which container volume mounts require.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.device_name.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceName);
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        for (field, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("scan_timeout_secs", self.scan_timeout_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("cast_timeout_secs", self.cast_timeout_secs),
            ("status_timeout_secs", self.status_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.entry_document.trim().is_empty() || self.entry_document.contains("..") {
            return Err(ConfigError::Invalid {
                field: "entry_document",
                reason: format!("'{}' is not a plain relative path", self.entry_document),
            });
        }

        if !self.content_root.is_dir() {
            return Err(ConfigError::ContentRootMissing(self.content_root.clone()));
        }
        let entry = self.entry_path();
        if !entry.is_file() {
            return Err(ConfigError::EntryDocumentMissing(entry));
        }
        self.content_root = self
            .content_root
            .canonicalize()
            .map_err(|_| ConfigError::ContentRootMissing(self.content_root.clone()))?;
        Ok(())
    }

    /// Full path of the entry document
    pub fn entry_path(&self) -> PathBuf {
        self.content_root.join(self.entry_document.trim_start_matches('/'))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn cast_timeout(&self) -> Duration {
        Duration::from_secs(self.cast_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn cast_confirm_delay(&self) -> Duration {
        Duration::from_millis(self.cast_confirm_delay_ms)
    }

    pub fn port_release_timeout(&self) -> Duration {
        Duration::from_secs(self.port_release_timeout_secs)
    }
}
