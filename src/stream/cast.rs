//! Cast session control via catt CLI
//!
//! Tells the display to load our page and keeps asking whether it still
//! shows it. A successful cast command only means the device accepted the
//! request; liveness is always confirmed by polling.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::models::{CastSession, ReceiverInfo, SessionState, TargetDevice};
use crate::process;

/// Something that can put a URL on a cast device
#[async_trait]
pub trait CastClient: Send + Sync {
    /// Ask the device to render `url`
    async fn cast_site(&self, address: IpAddr, url: &str) -> Result<()>;

    /// Whether the device is currently showing `url`
    async fn is_playing(&self, address: IpAddr, url: &str) -> Result<bool>;

    /// Stop whatever the device is casting
    async fn stop(&self, address: IpAddr) -> Result<()>;
}

/// Cast client backed by the catt CLI
pub struct CattClient {
    catt_path: String,
    cast_timeout: Duration,
    status_timeout: Duration,
}

impl CattClient {
    pub fn new() -> Self {
        Self::with_path("catt")
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            catt_path: path.into(),
            cast_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeouts(mut self, cast_timeout: Duration, status_timeout: Duration) -> Self {
        self.cast_timeout = cast_timeout;
        self.status_timeout = status_timeout;
        self
    }

    /// Arguments for `catt -d <ip> <action> [extra]`
    pub fn args(address: IpAddr, action: &str, extra: Option<&str>) -> Vec<String> {
        let mut args = vec!["-d".to_string(), address.to_string(), action.to_string()];
        if let Some(extra) = extra {
            args.push(extra.to_string());
        }
        args
    }
}

impl Default for CattClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CastClient for CattClient {
    async fn cast_site(&self, address: IpAddr, url: &str) -> Result<()> {
        let stdout = process::run_ok(
            &self.catt_path,
            Self::args(address, "cast_site", Some(url)),
            self.cast_timeout,
        )
        .await?;
        debug!(output = %stdout.trim(), "catt cast_site");
        Ok(())
    }

    async fn is_playing(&self, address: IpAddr, url: &str) -> Result<bool> {
        let stdout = process::run_ok(
            &self.catt_path,
            Self::args(address, "info", None),
            self.status_timeout,
        )
        .await?;
        let info = ReceiverInfo::parse_catt_info(&stdout);
        debug!(?info, "catt info");
        Ok(info.is_showing(url))
    }

    async fn stop(&self, address: IpAddr) -> Result<()> {
        process::run_ok(&self.catt_path, Self::args(address, "stop", None), self.status_timeout)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Session controller
// =============================================================================

/// Owns the one cast session of this instance
pub struct CastSessionController<C> {
    client: C,
    confirm_delay: Duration,
    escalation_threshold: u32,
    session: Option<CastSession>,
    retry_count: u32,
}

impl<C: CastClient> CastSessionController<C> {
    pub fn new(client: C, confirm_delay: Duration, escalation_threshold: u32) -> Self {
        Self {
            client,
            confirm_delay,
            escalation_threshold,
            session: None,
            retry_count: 0,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn session(&self) -> Option<&CastSession> {
        self.session.as_ref()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.as_ref().map_or(SessionState::None, |s| s.state)
    }

    /// Consecutive failures since the last confirmed cast
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Cast `url` to `device` and confirm the session came up.
    ///
    /// Always creates a fresh session. The retry count resets only when the
    /// new session is confirmed ACTIVE.
    pub async fn cast(&mut self, device: &TargetDevice, url: &str) -> Result<CastSession> {
        let address = device
            .address
            .filter(|_| device.is_reachable())
            .ok_or_else(|| anyhow!("device {} is not reachable", device.name))?;

        let mut session = CastSession::new(device.name.clone(), address, url);
        session.state = SessionState::Requested;
        session.retry_count = self.retry_count;
        info!(session = %session.id, device = %device, url, "casting");
        self.session = Some(session);

        if let Err(e) = self.client.cast_site(address, url).await {
            self.record_failure(&format!("cast command failed: {}", e));
            return Err(e);
        }

        if !self.confirm_delay.is_zero() {
            tokio::time::sleep(self.confirm_delay).await;
        }

        match self.client.is_playing(address, url).await {
            Ok(true) => {
                self.retry_count = 0;
                let session = self.session.as_mut().ok_or_else(|| anyhow!("session vanished"))?;
                session.state = SessionState::Active;
                session.retry_count = 0;
                info!(session = %session.id, "cast session active");
                Ok(session.clone())
            }
            Ok(false) => {
                self.record_failure("device accepted the cast but is not showing the page");
                bail!("cast not confirmed by device")
            }
            Err(e) => {
                self.record_failure(&format!("cast confirmation failed: {}", e));
                Err(e)
            }
        }
    }

    /// Poll whether the ACTIVE session is still on screen. Read-only.
    pub async fn is_alive(&self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        if session.state != SessionState::Active {
            return false;
        }
        match self.client.is_playing(session.device_address, &session.url).await {
            Ok(alive) => {
                if !alive {
                    warn!(session = %session.id, "device no longer shows our page");
                }
                alive
            }
            Err(e) => {
                warn!(session = %session.id, error = %e, "cast status query failed");
                false
            }
        }
    }

    /// The session went from ACTIVE to unresponsive
    pub fn mark_lost(&mut self) {
        if self.session_state() == SessionState::Active {
            self.record_failure("cast session lost");
        }
    }

    /// A precondition broke (device or server). Not counted as a retry.
    pub fn invalidate(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if session.state != SessionState::Failed {
                debug!(session = %session.id, "cast session invalidated");
                session.state = SessionState::Failed;
            }
        }
    }

    /// Stop the device's cast and drop the session. Best effort.
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if session.state == SessionState::None {
            return;
        }
        match self.client.stop(session.device_address).await {
            Ok(()) => info!(session = %session.id, "cast session stopped"),
            Err(e) => warn!(session = %session.id, error = %e, "failed to stop cast session"),
        }
    }

    fn record_failure(&mut self, reason: &str) {
        self.retry_count = self.retry_count.saturating_add(1);
        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Failed;
            session.retry_count = self.retry_count;
        }
        if self.retry_count >= self.escalation_threshold {
            error!(retries = self.retry_count, reason, "cast keeps failing");
        } else {
            warn!(retries = self.retry_count, reason, "cast failed");
        }
    }
}
