//! mDNS discovery via `catt scan`

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::DeviceDiscovery;
use crate::models::DeviceRecord;
use crate::process;

/// Cast device broadcast discovery through the catt CLI
pub struct CattScan {
    catt_path: String,
}

impl CattScan {
    pub fn new() -> Self {
        Self::with_path("catt")
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            catt_path: path.into(),
        }
    }
}

impl Default for CattScan {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDiscovery for CattScan {
    fn name(&self) -> &str {
        "catt-scan"
    }

    async fn discover(&self, _device_name: &str, timeout: Duration) -> anyhow::Result<Vec<DeviceRecord>> {
        let output = process::run(&self.catt_path, ["scan"], timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(stdout = %stdout.trim(), stderr = %stderr.trim(), "catt scan");

        // catt sometimes reports devices on stderr
        let mut devices = DeviceRecord::parse_catt_scan(&stdout);
        devices.extend(DeviceRecord::parse_catt_scan(&stderr));
        Ok(devices)
    }
}
