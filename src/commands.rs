//! CLI Command Handlers
//!
//! Each handler takes the validated config and Output, returns ExitCode.

use serde::Serialize;
use tracing::{error, info};

use crate::cli::{ExitCode, Output};
use crate::config::Config;
use crate::discovery::DeviceLocator;
use crate::error::StartupError;
use crate::orchestrator::{self, Orchestrator};
use crate::stream::{
    CastSessionController, CattClient, ContentServerSupervisor, DockerServer, ServerBackend,
};

/// The production wiring: catt + nmap discovery, Docker httpd, catt casting
pub type DaemonOrchestrator = Orchestrator<DockerServer, CattClient>;

/// Build the orchestrator from configuration
pub fn build(config: &Config) -> DaemonOrchestrator {
    let locator = DeviceLocator::with_defaults(config.catt_path.clone(), config.nmap_path.clone());
    let server = ContentServerSupervisor::new(
        DockerServer::with_path(
            config.docker_path.clone(),
            config.container_name.clone(),
            config.server_image.clone(),
        ),
        config.entry_document.clone(),
        config.probe_timeout(),
        config.port_release_timeout(),
    );
    let cast = CastSessionController::new(
        CattClient::with_path(config.catt_path.clone())
            .with_timeouts(config.cast_timeout(), config.status_timeout()),
        config.cast_confirm_delay(),
        config.retry_escalation_threshold,
    );
    Orchestrator::new(config.clone(), locator, server, cast)
}

/// Exit code for a fatal startup error
pub fn startup_exit_code(err: &StartupError) -> ExitCode {
    match err {
        StartupError::Config(_) | StartupError::Logging(_) => ExitCode::ConfigError,
        StartupError::PortInUse(_) | StartupError::BackendUnavailable(_) => ExitCode::ResourceError,
    }
}

// =============================================================================
// Run Command
// =============================================================================

pub async fn run_cmd(config: Config) -> ExitCode {
    let mut orchestrator = build(&config);

    if let Err(e) = orchestrator.preflight().await {
        error!(error = %e, "startup failed");
        return startup_exit_code(&e);
    }

    let shutdown = orchestrator::shutdown_channel();
    orchestrator.run(shutdown).await;
    info!("castkeeper stopped");
    ExitCode::Success
}

// =============================================================================
// Locate Command
// =============================================================================

#[derive(Serialize)]
struct Located {
    name: String,
    address: String,
    reachability: crate::models::Reachability,
}

pub async fn locate_cmd(config: &Config, output: &Output) -> ExitCode {
    output.info(format!("Scanning for {}...", config.device_name));

    let locator = DeviceLocator::with_defaults(config.catt_path.clone(), config.nmap_path.clone());
    match locator.locate(&config.device_name, config.scan_timeout()).await {
        Some(device) => {
            let located = Located {
                name: device.name.clone(),
                address: device.address.map(|a| a.to_string()).unwrap_or_default(),
                reachability: device.reachability,
            };
            if let Err(e) = output.print(&located) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
            ExitCode::Success
        }
        None => output.error(
            format!("Device '{}' not found", config.device_name),
            ExitCode::DeviceNotFound,
        ),
    }
}

// =============================================================================
// Check Command
// =============================================================================

#[derive(Serialize)]
struct CheckOk {
    status: &'static str,
    device_name: String,
    content_root: String,
    port: u16,
}

/// Config is validated by the caller. Only the backend itself is probed:
/// stale-instance cleanup and the port check would disturb a running daemon.
pub async fn check_cmd(config: &Config, output: &Output) -> ExitCode {
    let orchestrator = build(config);
    if let Err(e) = orchestrator.server().backend().preflight().await {
        let err = StartupError::BackendUnavailable(e.to_string());
        return output.error(err.to_string(), startup_exit_code(&err));
    }

    let ok = CheckOk {
        status: "ok",
        device_name: config.device_name.clone(),
        content_root: config.content_root.display().to_string(),
        port: config.port,
    };
    if let Err(e) = output.print(&ok) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }
    ExitCode::Success
}
