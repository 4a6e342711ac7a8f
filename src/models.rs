//! Core data models for castkeeper
//!
//! Device records, server handles, cast sessions and the composite
//! orchestration state. Everything here is rebuilt from a clean slate on
//! every process start.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::SystemTime;
use uuid::Uuid;

/// Default Chromecast control port
pub const DEFAULT_CAST_PORT: u16 = 8009;

// =============================================================================
// Device Models
// =============================================================================

/// One reply from a discovery source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Advertised name (friendly name or reverse-DNS hostname)
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub model: Option<String>,
}

impl DeviceRecord {
    /// Whether this record advertises the wanted device name.
    ///
    /// Comparison is case-insensitive with spaces and underscores treated as
    /// hyphens. A hostname matches on its first label, so `nest-hub.lan`
    /// matches `Nest Hub`.
    pub fn matches(&self, wanted: &str) -> bool {
        let wanted = normalize_name(wanted);
        if wanted.is_empty() {
            return false;
        }
        let name = normalize_name(&self.name);
        if name == wanted {
            return true;
        }
        name.split('.').next().is_some_and(|label| label == wanted)
    }

    /// Parse devices from `catt scan` output.
    ///
    /// catt 0.13+ prints `IP - Name - Model`, older releases print
    /// `Name - IP`. Anything else is skipped.
    pub fn parse_catt_scan(output: &str) -> Vec<DeviceRecord> {
        let mut devices = Vec::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("Scanning") || line.contains("No devices") {
                continue;
            }

            let parts: Vec<&str> = line.splitn(3, " - ").map(str::trim).collect();
            if parts.len() < 2 {
                continue;
            }

            let (address, name, model) = if let Ok(addr) = parts[0].parse::<IpAddr>() {
                (addr, parts[1], parts.get(2).copied())
            } else if let Ok(addr) = parts[parts.len() - 1].parse::<IpAddr>() {
                (addr, parts[0], None)
            } else {
                continue;
            };

            if name.is_empty() {
                continue;
            }

            devices.push(DeviceRecord {
                name: name.to_string(),
                address,
                port: DEFAULT_CAST_PORT,
                model: model.filter(|m| !m.is_empty()).map(str::to_string),
            });
        }

        devices
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{} ({}) - {}", self.name, model, self.address),
            None => write!(f, "{} - {}", self.name, self.address),
        }
    }
}

/// Lowercase, trim, and fold spaces/underscores into hyphens
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '-' } else { c })
        .collect()
}

/// Reachability of the target device as of the last scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Reachability {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// The single device this instance keeps content on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDevice {
    pub name: String,
    pub address: Option<IpAddr>,
    pub last_seen: Option<SystemTime>,
    pub reachability: Reachability,
}

impl TargetDevice {
    /// A device that has not been scanned for yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            last_seen: None,
            reachability: Reachability::Unknown,
        }
    }

    /// Record a successful sighting
    pub fn mark_seen(&mut self, address: IpAddr) {
        self.address = Some(address);
        self.last_seen = Some(SystemTime::now());
        self.reachability = Reachability::Reachable;
    }

    /// Record a failed sighting. The stale address is dropped.
    pub fn mark_lost(&mut self) {
        self.address = None;
        self.reachability = Reachability::Unreachable;
    }

    pub fn is_reachable(&self) -> bool {
        self.reachability == Reachability::Reachable && self.address.is_some()
    }
}

impl fmt::Display for TargetDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(addr) => write!(f, "{} @ {}", self.name, addr),
            None => write!(f, "{} (unresolved)", self.name),
        }
    }
}

// =============================================================================
// Content Server Models
// =============================================================================

/// Lifecycle of the content server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Crashed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Stopped => "STOPPED",
            ServerState::Starting => "STARTING",
            ServerState::Running => "RUNNING",
            ServerState::Crashed => "CRASHED",
        };
        f.write_str(s)
    }
}

/// The running (or last started) content server instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentServerHandle {
    /// Backend identity (container name, pid, ...)
    pub instance: String,
    pub port: u16,
    pub content_root: PathBuf,
    pub state: ServerState,
}

// =============================================================================
// Cast Session Models
// =============================================================================

/// State of a cast session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    #[default]
    None,
    Requested,
    Active,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::None => "NONE",
            SessionState::Requested => "REQUESTED",
            SessionState::Active => "ACTIVE",
            SessionState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Association between the target device and the URL it should render.
///
/// Sessions are never re-pointed: a new device address or URL gets a new
/// session with a fresh id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastSession {
    pub id: Uuid,
    /// Device name, used for lookup only
    pub device_name: String,
    pub device_address: IpAddr,
    pub url: String,
    pub state: SessionState,
    pub retry_count: u32,
}

impl CastSession {
    pub fn new(device_name: impl Into<String>, device_address: IpAddr, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_name: device_name.into(),
            device_address,
            url: url.into(),
            state: SessionState::None,
            retry_count: 0,
        }
    }
}

/// Parsed `catt info` output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverInfo {
    pub display_name: Option<String>,
    pub app_id: Option<String>,
    pub status_text: Option<String>,
    pub content_id: Option<String>,
}

/// App id of the DashCast web receiver used by `catt cast_site`
pub const DASHCAST_APP_ID: &str = "84912283";

impl ReceiverInfo {
    /// Parse `key: value` lines from `catt info`
    pub fn parse_catt_info(output: &str) -> Self {
        let mut info = ReceiverInfo::default();

        for line in output.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() || value == "None" {
                continue;
            }
            match key.trim().to_lowercase().as_str() {
                "display_name" => info.display_name = Some(value.to_string()),
                "app_id" => info.app_id = Some(value.to_string()),
                "status_text" => info.status_text = Some(value.to_string()),
                "content_id" => info.content_id = Some(value.to_string()),
                _ => {}
            }
        }

        info
    }

    /// Whether the web receiver is the foreground app
    pub fn is_web_receiver(&self) -> bool {
        self.app_id.as_deref() == Some(DASHCAST_APP_ID)
            || self
                .display_name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case("DashCast"))
    }

    /// Whether the receiver is showing `url`.
    ///
    /// DashCast does not always report the page it loaded; when no content id
    /// is present the running receiver is taken as ours.
    pub fn is_showing(&self, url: &str) -> bool {
        if !self.is_web_receiver() {
            return false;
        }
        match &self.content_id {
            Some(content) => content.trim_end_matches('/') == url.trim_end_matches('/'),
            None => true,
        }
    }
}

// =============================================================================
// Orchestration State
// =============================================================================

/// Composite state exposed by the orchestration loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationState {
    #[default]
    Discovering,
    ServerStarting,
    Casting,
    Steady,
    Recovering,
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrchestrationState::Discovering => "DISCOVERING",
            OrchestrationState::ServerStarting => "SERVER_STARTING",
            OrchestrationState::Casting => "CASTING",
            OrchestrationState::Steady => "STEADY",
            OrchestrationState::Recovering => "RECOVERING",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Tests
// =============================================================================
