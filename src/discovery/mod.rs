//! Device location
//!
//! - CattScan: mDNS service discovery via `catt scan`
//! - NmapSweep: /24 address-range probe for open cast ports via `nmap`
//!
//! The locator asks each source in turn and never remembers an address
//! beyond the call that found it.

pub mod catt;
pub mod nmap;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::models::{DeviceRecord, TargetDevice};

pub use catt::CattScan;
pub use nmap::NmapSweep;

/// A network discovery source
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Return every device record seen within `timeout`.
    ///
    /// Records need not match `device_name`; the locator filters.
    async fn discover(&self, device_name: &str, timeout: Duration) -> anyhow::Result<Vec<DeviceRecord>>;
}

/// Finds the target device on the LAN
pub struct DeviceLocator {
    sources: Vec<Box<dyn DeviceDiscovery>>,
}

impl DeviceLocator {
    pub fn new(sources: Vec<Box<dyn DeviceDiscovery>>) -> Self {
        Self { sources }
    }

    /// Broadcast discovery first, then the address sweep
    pub fn with_defaults(catt_path: impl Into<String>, nmap_path: impl Into<String>) -> Self {
        Self::new(vec![
            Box::new(CattScan::with_path(catt_path)),
            Box::new(NmapSweep::with_path(nmap_path)),
        ])
    }

    /// Locate `device_name` within `timeout`.
    ///
    /// `None` means not found, which is an expected outcome. Source errors
    /// and source timeouts count as "no match".
    pub async fn locate(&self, device_name: &str, timeout: Duration) -> Option<TargetDevice> {
        let deadline = Instant::now() + timeout;

        for source in &self.sources {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(source = source.name(), "scan budget exhausted");
                break;
            }

            let records =
                match tokio::time::timeout(remaining, source.discover(device_name, remaining)).await {
                    Ok(Ok(records)) => records,
                    Ok(Err(e)) => {
                        warn!(source = source.name(), error = %e, "discovery source failed");
                        continue;
                    }
                    Err(_) => {
                        warn!(source = source.name(), "discovery source timed out");
                        continue;
                    }
                };

            let mut matches = records.into_iter().filter(|r| r.matches(device_name));
            if let Some(found) = matches.next() {
                let others: Vec<String> = matches.map(|r| r.address.to_string()).collect();
                if !others.is_empty() {
                    warn!(
                        device = device_name,
                        chosen = %found.address,
                        ignored = ?others,
                        "several devices advertise the same name"
                    );
                }
                info!(source = source.name(), device = %found, "device located");
                let mut device = TargetDevice::new(device_name);
                device.mark_seen(found.address);
                return Some(device);
            }
            debug!(source = source.name(), device = device_name, "no matching device");
        }

        None
    }
}
