//! Log sink setup
//!
//! Timestamped, levelled records go to stdout and, when a log file is
//! configured, are also appended to that file.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::error::StartupError;

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init(log_file: Option<&Path>, verbose: bool) -> Result<(), StartupError> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StartupError::Logging(format!("{}: {}", parent.display(), e)))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| StartupError::Logging(format!("{}: {}", path.display(), e)))?;
            builder
                .with_ansi(false)
                .with_writer(std::io::stdout.and(Mutex::new(file)))
                .try_init()
        }
        None => builder.with_writer(std::io::stdout).try_init(),
    };

    result.map_err(|e| StartupError::Logging(e.to_string()))
}
