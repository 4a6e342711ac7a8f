//! Content server supervision
//!
//! Starts, probes and replaces the HTTP server that serves the content
//! root. The default backend runs `httpd` in a Docker container.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, StartupError};
use crate::models::{ContentServerHandle, ServerState};
use crate::process;

/// Something that can run a static file server
#[async_trait]
pub trait ServerBackend: Send + Sync {
    /// Check the backend itself is usable (e.g. the Docker daemon is up)
    async fn preflight(&self) -> Result<()>;

    /// Remove any instance left behind by a previous run
    async fn cleanup_stale(&self) -> Result<()>;

    /// Start serving `content_root` on `port`; returns the instance identity
    async fn start(&self, content_root: &Path, port: u16) -> Result<String>;

    /// Stop and remove an instance
    async fn stop(&self, instance: &str) -> Result<()>;

    /// Whether the instance process is alive
    async fn is_running(&self, instance: &str) -> Result<bool>;

    /// GET the entry document; `true` on a 2xx answer
    async fn fetch_entry(&self, port: u16, entry_document: &str, timeout: Duration) -> bool;

    /// Whether nothing is listening on `port` any more
    async fn port_released(&self, port: u16) -> bool;
}

/// GET `url`, `true` on a 2xx answer
pub async fn probe_url(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    match client.get(url).timeout(timeout).send().await {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            debug!(url, status = %resp.status(), "health probe rejected");
            false
        }
        Err(e) => {
            debug!(url, error = %e, "health probe failed");
            false
        }
    }
}

/// Try to bind `port` on all interfaces
pub async fn port_is_free(port: u16) -> bool {
    tokio::net::TcpListener::bind(("0.0.0.0", port)).await.is_ok()
}

// =============================================================================
// Docker backend
// =============================================================================

/// httpd in a named Docker container
pub struct DockerServer {
    docker_path: String,
    container_name: String,
    image: String,
    command_timeout: Duration,
    client: reqwest::Client,
}

impl DockerServer {
    pub fn new(container_name: impl Into<String>, image: impl Into<String>) -> Self {
        Self::with_path("docker", container_name, image)
    }

    pub fn with_path(
        docker_path: impl Into<String>,
        container_name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            docker_path: docker_path.into(),
            container_name: container_name.into(),
            image: image.into(),
            command_timeout: Duration::from_secs(60),
            client: reqwest::Client::new(),
        }
    }

    /// Arguments for `docker run`
    pub fn run_args(&self, content_root: &Path, port: u16) -> Vec<String> {
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.container_name.clone(),
            "-p".to_string(),
            format!("{}:80", port),
            "-v".to_string(),
            format!("{}:/usr/local/apache2/htdocs/:ro", content_root.display()),
            self.image.clone(),
        ]
    }
}

#[async_trait]
impl ServerBackend for DockerServer {
    async fn preflight(&self) -> Result<()> {
        process::run_ok(&self.docker_path, ["info"], self.command_timeout).await?;
        Ok(())
    }

    async fn cleanup_stale(&self) -> Result<()> {
        // Exit status is non-zero when there is nothing to remove
        let output = process::run(
            &self.docker_path,
            ["rm", "-f", self.container_name.as_str()],
            self.command_timeout,
        )
        .await?;
        debug!(status = ?output.status, "removed stale container");
        Ok(())
    }

    async fn start(&self, content_root: &Path, port: u16) -> Result<String> {
        let stdout = process::run_ok(
            &self.docker_path,
            self.run_args(content_root, port),
            self.command_timeout,
        )
        .await?;
        debug!(container = %stdout.trim(), "docker run");
        Ok(self.container_name.clone())
    }

    async fn stop(&self, instance: &str) -> Result<()> {
        process::run_ok(&self.docker_path, ["rm", "-f", instance], self.command_timeout).await?;
        Ok(())
    }

    async fn is_running(&self, instance: &str) -> Result<bool> {
        let filter = format!("name=^{}$", instance);
        let stdout = process::run_ok(
            &self.docker_path,
            ["ps", "--filter", filter.as_str(), "--format", "{{.Names}}"],
            self.command_timeout,
        )
        .await?;
        Ok(stdout.lines().any(|l| l.trim() == instance))
    }

    async fn fetch_entry(&self, port: u16, entry_document: &str, timeout: Duration) -> bool {
        let url = format!(
            "http://127.0.0.1:{}/{}",
            port,
            entry_document.trim_start_matches('/')
        );
        probe_url(&self.client, &url, timeout).await
    }

    async fn port_released(&self, port: u16) -> bool {
        port_is_free(port).await
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Owns the one content server instance for a port
pub struct ContentServerSupervisor<B> {
    backend: B,
    entry_document: String,
    probe_timeout: Duration,
    release_timeout: Duration,
    handle: Option<ContentServerHandle>,
}

impl<B: ServerBackend> ContentServerSupervisor<B> {
    pub fn new(
        backend: B,
        entry_document: impl Into<String>,
        probe_timeout: Duration,
        release_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            entry_document: entry_document.into(),
            probe_timeout,
            release_timeout,
            handle: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn handle(&self) -> Option<&ContentServerHandle> {
        self.handle.as_ref()
    }

    pub fn state(&self) -> ServerState {
        self.handle.as_ref().map_or(ServerState::Stopped, |h| h.state)
    }

    /// Startup checks: backend usable, no stale instance of ours, port free
    pub async fn preflight(&self, port: u16) -> Result<(), StartupError> {
        self.backend
            .preflight()
            .await
            .map_err(|e| StartupError::BackendUnavailable(e.to_string()))?;
        if let Err(e) = self.backend.cleanup_stale().await {
            warn!(error = %e, "stale instance cleanup failed");
        }
        if !self.backend.port_released(port).await {
            return Err(StartupError::PortInUse(port));
        }
        Ok(())
    }

    /// Make sure a server is serving `content_root` on `port`.
    ///
    /// A RUNNING instance is returned untouched. Anything else is torn
    /// down completely before a replacement is started.
    pub async fn ensure_running(
        &mut self,
        content_root: &Path,
        port: u16,
    ) -> Result<ContentServerHandle> {
        check_content_root(content_root, &self.entry_document)?;

        if let Some(handle) = &self.handle {
            if handle.state == ServerState::Running
                && handle.port == port
                && handle.content_root == content_root
            {
                return Ok(handle.clone());
            }
        }

        if self.handle.is_some() {
            self.stop().await;
        }

        self.handle = Some(ContentServerHandle {
            instance: String::new(),
            port,
            content_root: content_root.to_path_buf(),
            state: ServerState::Starting,
        });

        match self.backend.start(content_root, port).await {
            Ok(instance) => {
                info!(instance = %instance, port, root = %content_root.display(), "content server started");
                let handle = ContentServerHandle {
                    instance,
                    port,
                    content_root: content_root.to_path_buf(),
                    state: ServerState::Running,
                };
                self.handle = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                error!(port, error = %e, "content server failed to start");
                // A half-started instance may still hold the port
                if let Err(stop_err) = self.backend.cleanup_stale().await {
                    error!(error = %stop_err, "cleanup after failed start failed");
                }
                self.handle = None;
                Err(e)
            }
        }
    }

    /// Probe the instance: alive AND answering the entry document, each
    /// half bounded by the probe timeout.
    ///
    /// Read-only; use [`mark_crashed`](Self::mark_crashed) to act on a
    /// failed probe.
    pub async fn health_check(&self) -> bool {
        let Some(handle) = &self.handle else {
            return false;
        };
        if handle.state != ServerState::Running {
            return false;
        }

        let (alive, answering) = tokio::join!(
            tokio::time::timeout(self.probe_timeout, self.backend.is_running(&handle.instance)),
            self.backend
                .fetch_entry(handle.port, &self.entry_document, self.probe_timeout)
        );

        match alive {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                warn!(instance = %handle.instance, "content server process is gone");
                return false;
            }
            Ok(Err(e)) => {
                error!(instance = %handle.instance, error = %e, "content server liveness check failed");
                return false;
            }
            Err(_) => {
                warn!(instance = %handle.instance, timeout = ?self.probe_timeout, "content server liveness check timed out");
                return false;
            }
        }
        if !answering {
            warn!(instance = %handle.instance, port = handle.port, "content server not answering");
        }
        answering
    }

    /// Record a failed health check
    pub fn mark_crashed(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.state = ServerState::Crashed;
        }
    }

    /// Tear the instance down and wait for its port to be released.
    ///
    /// Failures are logged; the handle is dropped regardless.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if handle.instance.is_empty() {
            // Start was interrupted; the instance can only be removed by name
            debug!(port = handle.port, "removing partially started content server");
            if let Err(e) = self.backend.cleanup_stale().await {
                error!(error = %e, "cleanup of partially started server failed");
            }
        } else if let Err(e) = self.backend.stop(&handle.instance).await {
            error!(instance = %handle.instance, error = %e, "content server did not stop cleanly");
            if let Err(e) = self.backend.cleanup_stale().await {
                error!(error = %e, "forced cleanup failed");
            }
        }

        let deadline = tokio::time::Instant::now() + self.release_timeout;
        loop {
            if self.backend.port_released(handle.port).await {
                info!(port = handle.port, "content server stopped, port released");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                error!(port = handle.port, "port still bound after teardown");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Content root must be a directory holding the entry document
pub fn check_content_root(content_root: &Path, entry_document: &str) -> Result<(), ConfigError> {
    if !content_root.is_dir() {
        return Err(ConfigError::ContentRootMissing(content_root.to_path_buf()));
    }
    let entry: PathBuf = content_root.join(entry_document.trim_start_matches('/'));
    if !entry.is_file() {
        return Err(ConfigError::EntryDocumentMissing(entry));
    }
    Ok(())
}
