//! Address-range sweep via `nmap`
//!
//! Sweeps this host's /24 for open cast ports (8008/8009). The advertised
//! name of a host is its reverse-DNS name from the scan report. Google
//! hosts without one are asked for their friendly name over the cast
//! setup API; anything still unnamed cannot match a device name and is
//! skipped.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::DeviceDiscovery;
use crate::models::{DeviceRecord, DEFAULT_CAST_PORT};
use crate::process;

const CAST_PORTS: &str = "8008,8009";

/// Port of the cast setup API
const SETUP_PORT: u16 = 8008;

/// Budget for one friendly-name lookup
const NAME_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// nmap based sweep of the local /24
pub struct NmapSweep {
    nmap_path: String,
    client: reqwest::Client,
}

impl NmapSweep {
    pub fn new() -> Self {
        Self::with_path("nmap")
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            nmap_path: path.into(),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for NmapSweep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDiscovery for NmapSweep {
    fn name(&self) -> &str {
        "nmap-sweep"
    }

    async fn discover(&self, _device_name: &str, timeout: Duration) -> anyhow::Result<Vec<DeviceRecord>> {
        let local = local_ip_address::local_ip().context("could not determine local address")?;
        let Some(range) = sweep_range(local) else {
            bail!("no IPv4 range to sweep from {}", local);
        };

        let stdout = process::run_ok(
            &self.nmap_path,
            ["-Pn", "-p", CAST_PORTS, "--open", range.as_str()],
            timeout,
        )
        .await?;

        let mut devices = Vec::new();
        for host in parse_nmap_report(&stdout) {
            if let Some(name) = host.hostname.clone() {
                devices.push(host.into_record(name));
                continue;
            }
            if !host.is_google() {
                debug!(address = %host.address, vendor = ?host.vendor, "cast port open but no name, skipped");
                continue;
            }
            let base = format!("http://{}:{}", host.address, SETUP_PORT);
            match fetch_friendly_name(&self.client, &base, NAME_LOOKUP_TIMEOUT).await {
                Some(name) => {
                    debug!(address = %host.address, name = %name, "named Google cast host");
                    devices.push(host.into_record(name));
                }
                None => debug!(address = %host.address, "Google cast host did not report a name, skipped"),
            }
        }
        Ok(devices)
    }
}

/// `a.b.c.1-254` for an IPv4 address, `None` otherwise
pub fn sweep_range(local: IpAddr) -> Option<String> {
    match local {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => {
            let [a, b, c, _] = v4.octets();
            Some(format!("{}.{}.{}.1-254", a, b, c))
        }
        _ => None,
    }
}

/// Ask a cast device for its friendly name (`/setup/eureka_info`)
pub async fn fetch_friendly_name(
    client: &reqwest::Client,
    base_url: &str,
    timeout: Duration,
) -> Option<String> {
    let url = format!("{}/setup/eureka_info?params=name", base_url.trim_end_matches('/'));
    let resp = match client.get(&url).timeout(timeout).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            debug!(url = %url, status = %resp.status(), "name lookup rejected");
            return None;
        }
        Err(e) => {
            debug!(url = %url, error = %e, "name lookup failed");
            return None;
        }
    };
    let body = resp.text().await.ok()?;
    parse_eureka_name(&body)
}

/// `name` field of an `eureka_info` reply
pub fn parse_eureka_name(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("name")?
        .as_str()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

fn report_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Nmap scan report for (?:(\S+) \(([0-9.]+)\)|([0-9.]+))$").expect("valid regex")
    })
}

/// A host with an open cast port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmapHost {
    /// Reverse-DNS name, when the report has one
    pub hostname: Option<String>,
    pub address: Ipv4Addr,
    pub port: u16,
    /// MAC vendor tag
    pub vendor: Option<String>,
}

impl NmapHost {
    pub fn is_google(&self) -> bool {
        self.vendor
            .as_deref()
            .is_some_and(|v| v.to_lowercase().contains("google"))
    }

    fn into_record(self, name: String) -> DeviceRecord {
        DeviceRecord {
            name,
            address: IpAddr::V4(self.address),
            port: self.port,
            model: self.vendor,
        }
    }
}

/// Host being assembled while walking the report
struct PendingHost {
    hostname: Option<String>,
    address: Ipv4Addr,
    cast_port: Option<u16>,
    vendor: Option<String>,
}

impl PendingHost {
    fn finish(self) -> Option<NmapHost> {
        let Some(port) = self.cast_port else {
            debug!(address = %self.address, "no open cast port");
            return None;
        };
        Some(NmapHost {
            hostname: self.hostname,
            address: self.address,
            port,
            vendor: self.vendor,
        })
    }
}

/// Parse `nmap` normal output into hosts with an open cast port
pub fn parse_nmap_report(output: &str) -> Vec<NmapHost> {
    let mut hosts = Vec::new();
    let mut current: Option<PendingHost> = None;

    for line in output.lines() {
        let line = line.trim();

        if line.starts_with("Nmap scan report for") {
            if let Some(host) = current.take().and_then(PendingHost::finish) {
                hosts.push(host);
            }
            current = report_line().captures(line).and_then(|caps| {
                let (hostname, addr) = match (caps.get(1), caps.get(2), caps.get(3)) {
                    (Some(h), Some(a), _) => (Some(h.as_str().to_string()), a.as_str()),
                    (_, _, Some(a)) => (None, a.as_str()),
                    _ => return None,
                };
                let address = addr.parse::<Ipv4Addr>().ok()?;
                Some(PendingHost {
                    hostname,
                    address,
                    cast_port: None,
                    vendor: None,
                })
            });
            if current.is_none() {
                debug!(line, "unparseable nmap report line");
            }
            continue;
        }

        let Some(host) = current.as_mut() else {
            continue;
        };

        if let Some(rest) = line.strip_prefix("MAC Address:") {
            host.vendor = rest
                .split_once('(')
                .map(|(_, v)| v.trim_end_matches(')').trim().to_string())
                .filter(|v| !v.is_empty() && v != "Unknown");
        } else if let Some((port, state)) = line.split_once("/tcp") {
            if state.trim_start().starts_with("open") {
                if let Ok(port) = port.trim().parse::<u16>() {
                    if port == DEFAULT_CAST_PORT || port == SETUP_PORT {
                        host.cast_port = Some(host.cast_port.unwrap_or(port).max(port));
                    }
                }
            }
        }
    }

    if let Some(host) = current.and_then(PendingHost::finish) {
        hosts.push(host);
    }

    hosts
}
