//! In-memory collaborators for the integration tests
//!
//! Each fake is a cheap clone around shared state so a test can keep a
//! handle while the orchestrator owns the other copy.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use castkeeper::config::Config;
use castkeeper::discovery::{DeviceDiscovery, DeviceLocator};
use castkeeper::models::DeviceRecord;
use castkeeper::orchestrator::Orchestrator;
use castkeeper::stream::{CastClient, CastSessionController, ContentServerSupervisor, ServerBackend};

pub const DEVICE_NAME: &str = "Nest Hub";
pub const DEVICE_IP: &str = "192.168.1.36";
pub const PORT: u16 = 5500;
pub const HOST: &str = "192.168.1.10";

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub fn record(name: &str, addr: &str) -> DeviceRecord {
    DeviceRecord {
        name: name.to_string(),
        address: ip(addr),
        port: 8009,
        model: None,
    }
}

// =============================================================================
// Network
// =============================================================================

#[derive(Default)]
struct NetworkState {
    /// Device currently visible, if any
    device: Option<DeviceRecord>,
    /// Noise returned alongside the device
    noise: Vec<DeviceRecord>,
    /// One-shot answers that take precedence over `device`
    script: VecDeque<Option<DeviceRecord>>,
    /// Fail every scan with an error
    failing: bool,
    /// Delay before answering
    delay: Duration,
    scans: usize,
    last_found: bool,
}

/// A LAN with at most one interesting device on it
#[derive(Clone, Default)]
pub struct FakeNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&self, name: &str, addr: &str) {
        self.state.lock().unwrap().device = Some(record(name, addr));
    }

    pub fn hide(&self) {
        self.state.lock().unwrap().device = None;
    }

    pub fn add_noise(&self, rec: DeviceRecord) {
        self.state.lock().unwrap().noise.push(rec);
    }

    pub fn script(&self, answers: impl IntoIterator<Item = bool>) {
        let mut state = self.state.lock().unwrap();
        for found in answers {
            state
                .script
                .push_back(found.then(|| record(DEVICE_NAME, DEVICE_IP)));
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn scans(&self) -> usize {
        self.state.lock().unwrap().scans
    }

    /// Whether the most recent scan returned the target
    pub fn last_found(&self) -> bool {
        self.state.lock().unwrap().last_found
    }

    pub fn locator(&self) -> DeviceLocator {
        DeviceLocator::new(vec![Box::new(self.clone())])
    }
}

#[async_trait]
impl DeviceDiscovery for FakeNetwork {
    fn name(&self) -> &str {
        "fake-network"
    }

    async fn discover(&self, device_name: &str, _timeout: Duration) -> Result<Vec<DeviceRecord>> {
        let delay = self.state.lock().unwrap().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.scans += 1;
        if state.failing {
            state.last_found = false;
            bail!("malformed discovery reply");
        }
        let device = match state.script.pop_front() {
            Some(answer) => answer,
            None => state.device.clone(),
        };
        let mut records = state.noise.clone();
        records.extend(device);
        state.last_found = records.iter().any(|r| r.matches(device_name));
        Ok(records)
    }
}

// =============================================================================
// Server backend
// =============================================================================

#[derive(Default)]
struct BackendState {
    /// Ports currently bound by our instances
    bound: HashSet<u16>,
    /// Ports bound by somebody else
    foreign: HashSet<u16>,
    instances: HashMap<String, u16>,
    next_id: usize,
    starts: usize,
    stops: usize,
    cleanups: usize,
    max_bound: usize,
    /// Entry document answers
    answering: bool,
    /// Process dies right after start
    dies: bool,
    fail_start: bool,
    /// Start binds the port and then never returns
    hang_start: bool,
    fail_stop: bool,
    /// Delay before the liveness query answers
    status_delay: Duration,
    preflight_error: Option<String>,
    /// Port release polls before the port reads as free
    release_lag: usize,
    last_probe: bool,
    events: Vec<String>,
}

/// A server backend that binds ports in a table instead of a kernel
#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        let backend = Self {
            state: Arc::new(Mutex::new(BackendState::default())),
        };
        backend.set_answering(true);
        backend
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_answering(&self, answering: bool) {
        self.state.lock().unwrap().answering = answering;
    }

    pub fn set_dies(&self, dies: bool) {
        self.state.lock().unwrap().dies = dies;
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    pub fn set_hang_start(&self, hang: bool) {
        self.state.lock().unwrap().hang_start = hang;
    }

    pub fn set_status_delay(&self, delay: Duration) {
        self.state.lock().unwrap().status_delay = delay;
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.state.lock().unwrap().fail_stop = fail;
    }

    pub fn set_preflight_error(&self, msg: &str) {
        self.state.lock().unwrap().preflight_error = Some(msg.to_string());
    }

    pub fn set_release_lag(&self, polls: usize) {
        self.state.lock().unwrap().release_lag = polls;
    }

    pub fn occupy(&self, port: u16) {
        self.state.lock().unwrap().foreign.insert(port);
    }

    /// Simulate the process dying underneath the supervisor
    pub fn kill_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.instances.clear();
        state.bound.clear();
    }

    pub fn bound_ports(&self) -> usize {
        self.state.lock().unwrap().bound.len()
    }

    pub fn max_bound(&self) -> usize {
        self.state.lock().unwrap().max_bound
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    pub fn cleanups(&self) -> usize {
        self.state.lock().unwrap().cleanups
    }

    pub fn last_probe(&self) -> bool {
        self.state.lock().unwrap().last_probe
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl ServerBackend for FakeBackend {
    async fn preflight(&self) -> Result<()> {
        match &self.state.lock().unwrap().preflight_error {
            Some(msg) => bail!("{}", msg),
            None => Ok(()),
        }
    }

    async fn cleanup_stale(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.cleanups += 1;
        state.instances.clear();
        state.bound.clear();
        state.events.push("cleanup".to_string());
        Ok(())
    }

    async fn start(&self, _content_root: &Path, port: u16) -> Result<String> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            if state.fail_start {
                bail!("container failed to start");
            }
            if state.bound.contains(&port) || state.foreign.contains(&port) {
                bail!("port {} already allocated", port);
            }
            if state.hang_start {
                state.bound.insert(port);
                state.max_bound = state.max_bound.max(state.bound.len());
                state.events.push("start pending".to_string());
            }
            state.hang_start
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.starts += 1;
        let id = format!("server-{}", state.next_id);
        state.bound.insert(port);
        state.max_bound = state.max_bound.max(state.bound.len());
        if !state.dies {
            state.instances.insert(id.clone(), port);
        } else {
            state.bound.remove(&port);
        }
        state.events.push(format!("start {}", id));
        Ok(id)
    }

    async fn stop(&self, instance: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        state.events.push(format!("stop {}", instance));
        if state.fail_stop {
            bail!("container refused to stop");
        }
        if let Some(port) = state.instances.remove(instance) {
            state.bound.remove(&port);
        }
        Ok(())
    }

    async fn is_running(&self, instance: &str) -> Result<bool> {
        let delay = self.state.lock().unwrap().status_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state.lock().unwrap().instances.contains_key(instance))
    }

    async fn fetch_entry(&self, port: u16, _entry_document: &str, _timeout: Duration) -> bool {
        let mut state = self.state.lock().unwrap();
        let ok = state.answering && state.bound.contains(&port);
        state.last_probe = ok;
        ok
    }

    async fn port_released(&self, port: u16) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.release_lag > 0 {
            state.release_lag -= 1;
            return false;
        }
        !state.bound.contains(&port) && !state.foreign.contains(&port)
    }
}

// =============================================================================
// Cast client
// =============================================================================

#[derive(Default)]
struct CastState {
    /// Device accepts cast commands
    accepts: bool,
    /// Device shows what it was told to show
    renders: bool,
    /// What the device is showing
    showing: Option<(IpAddr, String)>,
    /// One-shot answers for `is_playing`, ahead of the real state
    alive_script: VecDeque<bool>,
    /// Status queries fail with an error
    status_failing: bool,
    /// Stop commands fail with an error
    stop_failing: bool,
    casts: Vec<(IpAddr, String)>,
    stops: usize,
    status_queries: usize,
}

/// A cast device that remembers what it was told
#[derive(Clone)]
pub struct FakeCast {
    state: Arc<Mutex<CastState>>,
}

impl Default for FakeCast {
    fn default() -> Self {
        let cast = Self {
            state: Arc::new(Mutex::new(CastState::default())),
        };
        cast.set_accepts(true);
        cast.set_renders(true);
        cast
    }
}

impl FakeCast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_accepts(&self, accepts: bool) {
        self.state.lock().unwrap().accepts = accepts;
    }

    pub fn set_renders(&self, renders: bool) {
        self.state.lock().unwrap().renders = renders;
    }

    /// The user switched the display to something else
    pub fn drop_stream(&self) {
        self.state.lock().unwrap().showing = None;
    }

    pub fn set_status_failing(&self, failing: bool) {
        self.state.lock().unwrap().status_failing = failing;
    }

    pub fn set_stop_failing(&self, failing: bool) {
        self.state.lock().unwrap().stop_failing = failing;
    }

    pub fn script_alive(&self, answers: impl IntoIterator<Item = bool>) {
        self.state.lock().unwrap().alive_script.extend(answers);
    }

    pub fn casts(&self) -> Vec<(IpAddr, String)> {
        self.state.lock().unwrap().casts.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    pub fn status_queries(&self) -> usize {
        self.state.lock().unwrap().status_queries
    }
}

#[async_trait]
impl CastClient for FakeCast {
    async fn cast_site(&self, address: IpAddr, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.casts.push((address, url.to_string()));
        if !state.accepts {
            bail!("device busy");
        }
        if state.renders {
            state.showing = Some((address, url.to_string()));
        }
        Ok(())
    }

    async fn is_playing(&self, address: IpAddr, url: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.status_queries += 1;
        if state.status_failing {
            bail!("malformed status reply");
        }
        if let Some(answer) = state.alive_script.pop_front() {
            return Ok(answer);
        }
        Ok(state.showing.as_ref() == Some(&(address, url.to_string())))
    }

    async fn stop(&self, _address: IpAddr) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        if state.stop_failing {
            bail!("device did not answer stop");
        }
        state.showing = None;
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Content root with an entry document
pub fn content_root() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>clock</html>").unwrap();
    dir
}

pub fn test_config(root: &Path) -> Config {
    Config {
        device_name: DEVICE_NAME.to_string(),
        content_root: root.to_path_buf(),
        port: PORT,
        poll_interval_secs: 0,
        scan_timeout_secs: 2,
        cast_confirm_delay_ms: 0,
        port_release_timeout_secs: 1,
        advertise_host: Some(HOST.to_string()),
        ..Config::default()
    }
}

pub fn cast_url() -> String {
    format!("http://{}:{}/", HOST, PORT)
}

pub struct Harness {
    pub orchestrator: Orchestrator<FakeBackend, FakeCast>,
    pub network: FakeNetwork,
    pub backend: FakeBackend,
    pub cast: FakeCast,
    pub root: tempfile::TempDir,
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

/// Harness with a tweaked config
pub fn harness_with(tweak: impl FnOnce(&mut Config)) -> Harness {
    let root = content_root();
    let mut config = test_config(root.path());
    tweak(&mut config);
    let network = FakeNetwork::new();
    let backend = FakeBackend::new();
    let cast = FakeCast::new();

    let server = ContentServerSupervisor::new(
        backend.clone(),
        config.entry_document.clone(),
        config.probe_timeout(),
        config.port_release_timeout(),
    );
    let controller = CastSessionController::new(
        cast.clone(),
        config.cast_confirm_delay(),
        config.retry_escalation_threshold,
    );
    let orchestrator = Orchestrator::new(config, network.locator(), server, controller);

    Harness {
        orchestrator,
        network,
        backend,
        cast,
        root,
    }
}
