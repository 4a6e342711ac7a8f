//! castkeeper - keeps a web page on a smart display
//!
//! Finds the display on the LAN, serves a local directory over HTTP, casts
//! the page, and recovers from every failure on its own.
//!
//! # Modules
//!
//! - `models` - Device, server, session and composite state types
//! - `discovery` - Device locator and its discovery sources
//! - `stream` - Content server supervisor and cast session controller
//! - `orchestrator` - The supervisory control loop
//! - `config` / `error` / `logging` - Ambient plumbing

pub mod cli;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod process;
pub mod stream;

// Re-export commonly used types
pub use models::{
    CastSession, ContentServerHandle, DeviceRecord, OrchestrationState, Reachability,
    ServerState, SessionState, TargetDevice,
};

pub use config::Config;
pub use discovery::{DeviceDiscovery, DeviceLocator};
pub use error::{ConfigError, StartupError};
pub use orchestrator::{ContentEndpoint, Orchestrator};
pub use stream::{CastClient, CastSessionController, ContentServerSupervisor, ServerBackend};
