//! CLI - Command Line Interface for castkeeper
//!
//! # Examples
//!
//! ```bash
//! # Run the daemon (default)
//! castkeeper
//! castkeeper run --device "Nest Hub" --content-root /opt/smart-display/src
//!
//! # One-shot checks
//! castkeeper locate --json
//! castkeeper check
//! ```

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::config::Config;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes (semantic for service managers and scripts)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid configuration
    ConfigError = 2,
    /// Port or backend unavailable
    ResourceError = 3,
    /// Device not found
    DeviceNotFound = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// castkeeper - keep a web page cast to a smart display
///
/// Run without a subcommand to start the daemon.
#[derive(Parser, Debug)]
#[command(
    name = "castkeeper",
    version,
    about = "Keeps a local web page cast to a smart display",
    long_about = "Discovers the target display on the LAN, serves the content \
                  root over HTTP, casts it, and recovers from failures \
                  without operator action.",
    after_help = "EXAMPLES:\n\
                  castkeeper                                  Run the daemon\n\
                  castkeeper -d \"Nest Hub\" -p 5500            Override device and port\n\
                  castkeeper locate --json                    Find the display once\n\
                  castkeeper check                            Validate config and exit"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    /// Subcommand to run (omit to run the daemon)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Flags that override config file values
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Target device name
    #[arg(long, short = 'd', global = true)]
    pub device: Option<String>,

    /// Directory to serve
    #[arg(long, global = true)]
    pub content_root: Option<PathBuf>,

    /// Content server port
    #[arg(long, short = 'p', global = true)]
    pub port: Option<u16>,

    /// Seconds between control cycles
    #[arg(long, global = true)]
    pub poll_interval: Option<u64>,

    /// Seconds allowed for one device scan
    #[arg(long, global = true)]
    pub scan_timeout: Option<u64>,

    /// Append logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl Overrides {
    /// Apply CLI flags on top of file configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.device_name = device.clone();
        }
        if let Some(root) = &self.content_root {
            config.content_root = root.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }
        if let Some(secs) = self.scan_timeout {
            config.scan_timeout_secs = secs;
        }
        if let Some(path) = &self.log_file {
            config.log_file = Some(path.clone());
        }
    }
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the supervisory loop (default)
    Run,

    /// Scan for the target device once and print it
    #[command(visible_alias = "l")]
    Locate,

    /// Validate configuration and startup resources, then exit
    Check,
}

// =============================================================================
// Output Helpers
// =============================================================================

/// JSON envelope for one-shot commands
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonError>,
}

#[derive(Debug, Serialize)]
pub struct JsonError {
    pub code: i32,
    pub message: String,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl JsonOutput<()> {
    pub fn error_msg(msg: &str, code: ExitCode) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(JsonError {
                code: code.into(),
                message: msg.to_string(),
            }),
        }
    }
}

/// Output handler for one-shot commands
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print info message (suppressed in quiet and JSON mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
