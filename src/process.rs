//! Subprocess helpers for the external tools (catt, nmap, docker)

use std::ffi::OsStr;
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::process::Command;
use tracing::debug;

/// Run `program args…` to completion with a deadline.
///
/// The child is killed if the deadline passes or the returned future is
/// dropped, so cancelling a caller never leaves the tool running.
pub async fn run<I, S>(program: &str, args: I, timeout: Duration) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, ?cmd, "spawning");

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            anyhow!("{} not found. {}", program, install_hint(program))
        } else {
            anyhow!("Failed to start {}: {}", program, e)
        }
    })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => bail!("{} timed out after {:?}", program, timeout),
    }
}

/// Run and require a zero exit status; returns stdout
pub async fn run_ok<I, S>(program: &str, args: I, timeout: Duration) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run(program, args, timeout).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} exited with {}: {}",
            program,
            output.status.code().map_or("signal".to_string(), |c| c.to_string()),
            stderr.trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn install_hint(program: &str) -> &'static str {
    let name = program.rsplit('/').next().unwrap_or(program);
    match name {
        "catt" => "Install with: pip install catt",
        "nmap" => "Install with: apt install nmap",
        "docker" => "Install Docker and make sure the daemon is running",
        _ => "Is it installed and on PATH?",
    }
}
