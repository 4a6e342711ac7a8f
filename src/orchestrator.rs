//! Orchestration loop
//!
//! One cycle per poll interval. Each cycle performs the work of the current
//! state and picks the next one:
//!
//! ```text
//! DISCOVERING --found--> SERVER_STARTING --device+server ok--> CASTING
//!      ^                      |  device lost                     |  ok        fail
//!      |<---------------------+                                  v            |
//!      |                                                       STEADY         |
//!      |                                                         | any probe  |
//!      |                                                         v   fails    |
//!      +------------------------ RECOVERING <--------------------+------------+
//! ```
//!
//! At most one mutating action (server start/stop, cast/stop) runs per
//! cycle; the read-only probes (scan, server health, cast status) run
//! concurrently.

use std::net::IpAddr;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::discovery::DeviceLocator;
use crate::error::StartupError;
use crate::models::{OrchestrationState, ServerState, SessionState, TargetDevice};
use crate::stream::cast::{CastClient, CastSessionController};
use crate::stream::server::{check_content_root, ContentServerSupervisor, ServerBackend};

/// Failed health probes tolerated while a fresh server comes up
const STARTUP_PROBE_LIMIT: u32 = 3;

/// Where the display fetches the page from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEndpoint {
    /// Fixed host; this machine's LAN address when `None`
    pub host: Option<String>,
    pub port: u16,
}

impl ContentEndpoint {
    pub fn new(host: Option<String>, port: u16) -> Self {
        Self { host, port }
    }

    /// Cast URL, resolved now. `None` when the LAN address is unknown.
    pub fn url(&self) -> Option<String> {
        let host = match &self.host {
            Some(host) => host.clone(),
            None => match local_ip_address::local_ip() {
                Ok(IpAddr::V6(v6)) => format!("[{}]", v6),
                Ok(ip) => ip.to_string(),
                Err(e) => {
                    warn!(error = %e, "could not determine local address");
                    return None;
                }
            },
        };
        Some(format!("http://{}:{}/", host, self.port))
    }
}

/// Why the loop is recovering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RecoveryCause {
    device_lost: bool,
    server_failed: bool,
}

/// The supervisory control loop and all state it owns
pub struct Orchestrator<B, C> {
    config: Config,
    endpoint: ContentEndpoint,
    locator: DeviceLocator,
    server: ContentServerSupervisor<B>,
    cast: CastSessionController<C>,
    state: OrchestrationState,
    device: Option<TargetDevice>,
    cause: RecoveryCause,
    startup_probe_failures: u32,
    cycles: u64,
}

impl<B: ServerBackend, C: CastClient> Orchestrator<B, C> {
    pub fn new(
        config: Config,
        locator: DeviceLocator,
        server: ContentServerSupervisor<B>,
        cast: CastSessionController<C>,
    ) -> Self {
        let endpoint = ContentEndpoint::new(config.advertise_host.clone(), config.port);
        Self {
            config,
            endpoint,
            locator,
            server,
            cast,
            state: OrchestrationState::Discovering,
            device: None,
            cause: RecoveryCause::default(),
            startup_probe_failures: 0,
            cycles: 0,
        }
    }

    pub fn state(&self) -> OrchestrationState {
        self.state
    }

    pub fn device(&self) -> Option<&TargetDevice> {
        self.device.as_ref()
    }

    pub fn server_state(&self) -> ServerState {
        self.server.state()
    }

    pub fn session_state(&self) -> SessionState {
        self.cast.session_state()
    }

    pub fn retry_count(&self) -> u32 {
        self.cast.retry_count()
    }

    pub fn server(&self) -> &ContentServerSupervisor<B> {
        &self.server
    }

    pub fn cast(&self) -> &CastSessionController<C> {
        &self.cast
    }

    /// Number of completed cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Startup checks. Any error here is fatal.
    pub async fn preflight(&self) -> Result<(), StartupError> {
        check_content_root(&self.config.content_root, &self.config.entry_document)?;
        self.server.preflight(self.config.port).await
    }

    /// Run until `shutdown` flips to `true` (or its sender goes away), then
    /// tear everything down.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            device = %self.config.device_name,
            port = self.config.port,
            interval = ?self.config.poll_interval(),
            "orchestration loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("shutdown requested, aborting cycle");
                    break;
                }
                _ = self.tick() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        self.shutdown().await;
    }

    /// Stop the cast and the server, releasing the port
    pub async fn shutdown(&mut self) {
        info!("tearing down");
        self.cast.stop().await;
        self.server.stop().await;
        if let Err(e) = self.server.backend().cleanup_stale().await {
            error!(error = %e, "final server cleanup failed");
        }
        self.device = None;
        info!("shutdown complete");
    }

    /// Run one cycle and return the resulting state
    pub async fn tick(&mut self) -> OrchestrationState {
        let next = match self.state {
            OrchestrationState::Discovering => self.discover().await,
            OrchestrationState::ServerStarting => self.start_server().await,
            OrchestrationState::Casting => self.start_cast().await,
            OrchestrationState::Steady => self.monitor().await,
            OrchestrationState::Recovering => self.recover().await,
        };
        self.cycles += 1;
        self.transition(next);
        self.state
    }

    fn transition(&mut self, next: OrchestrationState) {
        if next != self.state {
            info!(from = %self.state, to = %next, cycle = self.cycles, "state transition");
            self.state = next;
        }
    }

    async fn locate(&self) -> Option<TargetDevice> {
        self.locator
            .locate(&self.config.device_name, self.config.scan_timeout())
            .await
    }

    async fn discover(&mut self) -> OrchestrationState {
        match self.locate().await {
            Some(device) => {
                self.device = Some(device);
                OrchestrationState::ServerStarting
            }
            None => {
                info!(device = %self.config.device_name, "device not found, will rescan");
                OrchestrationState::Discovering
            }
        }
    }

    async fn start_server(&mut self) -> OrchestrationState {
        if let Err(e) = self
            .server
            .ensure_running(&self.config.content_root, self.config.port)
            .await
        {
            warn!(error = %e, "content server not started");
        }

        let (device, healthy) = tokio::join!(self.locate(), self.server.health_check());

        let Some(device) = device else {
            warn!(device = %self.config.device_name, "device lost while starting server");
            self.drop_device();
            self.server.stop().await;
            self.startup_probe_failures = 0;
            return OrchestrationState::Discovering;
        };
        self.device = Some(device);

        if healthy {
            self.startup_probe_failures = 0;
            return OrchestrationState::Casting;
        }

        self.startup_probe_failures += 1;
        if self.startup_probe_failures >= STARTUP_PROBE_LIMIT {
            warn!(
                failures = self.startup_probe_failures,
                "content server never became healthy, replacing it"
            );
            self.server.mark_crashed();
            self.startup_probe_failures = 0;
        }
        OrchestrationState::ServerStarting
    }

    async fn start_cast(&mut self) -> OrchestrationState {
        let device = match &self.device {
            Some(device) if device.is_reachable() => device.clone(),
            _ => {
                self.cause.device_lost = true;
                return OrchestrationState::Recovering;
            }
        };
        if self.server.state() != ServerState::Running {
            self.cause.server_failed = true;
            return OrchestrationState::Recovering;
        }

        let Some(url) = self.endpoint.url() else {
            return OrchestrationState::Recovering;
        };

        match self.cast.cast(&device, &url).await {
            Ok(session) => {
                debug!(session = %session.id, "cast confirmed");
                OrchestrationState::Steady
            }
            Err(e) => {
                debug!(error = %e, "cast attempt failed");
                OrchestrationState::Recovering
            }
        }
    }

    async fn monitor(&mut self) -> OrchestrationState {
        let (device, healthy, alive) = tokio::join!(
            self.locate(),
            self.server.health_check(),
            self.cast.is_alive()
        );

        let current = self.device.as_ref().and_then(|d| d.address);
        let device_ok = match &device {
            Some(found) if found.address == current => true,
            Some(found) => {
                warn!(
                    old = ?current,
                    new = ?found.address,
                    "device address changed"
                );
                false
            }
            None => {
                warn!(device = %self.config.device_name, "device lost");
                false
            }
        };

        if device_ok && healthy && alive {
            self.device = device;
            debug!("all healthy");
            return OrchestrationState::Steady;
        }

        if alive {
            self.cast.invalidate();
        } else {
            self.cast.mark_lost();
        }
        if !healthy {
            self.server.mark_crashed();
            self.cause.server_failed = true;
        }
        if !device_ok {
            self.drop_device();
            self.cause.device_lost = true;
        }
        OrchestrationState::Recovering
    }

    async fn recover(&mut self) -> OrchestrationState {
        let cause = std::mem::take(&mut self.cause);
        info!(
            device_lost = cause.device_lost,
            server_failed = cause.server_failed,
            retries = self.cast.retry_count(),
            "recovering"
        );

        self.cast.stop().await;
        if cause.device_lost || cause.server_failed || self.server.state() != ServerState::Running {
            self.server.stop().await;
        }

        // Reachability must be re-verified after any failure
        self.drop_device();
        OrchestrationState::Discovering
    }

    fn drop_device(&mut self) {
        if let Some(device) = self.device.as_mut() {
            device.mark_lost();
        }
        self.device = None;
        self.cast.invalidate();
    }
}

/// Resolve on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("shutdown signal received");
}

/// Spawn the signal listener; the receiver flips to `true` on shutdown
pub fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
        // Keep the sender alive so receivers see `true` rather than closed
        tx.closed().await;
    });
    rx
}
