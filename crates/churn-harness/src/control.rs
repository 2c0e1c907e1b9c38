//! Boundary to the proxy under test: launching it, waiting for its control
//! socket, and issuing control commands through the control executable.

use crate::engine::outcome::Outcome;
use crate::error::HarnessError;
use churn_common::ProxyConfig;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Synchronous command surface of the proxy: one invocation per command,
/// positional string arguments, e.g. `["listen", "start", "5555"]`.
pub trait ControlPlane: Send + Sync + 'static {
    fn run(&self, args: Vec<String>) -> BoxFuture<'_, Result<(), HarnessError>>;
}

pub struct ProxyControl {
    executable: String,
    control_path: String,
}

impl ProxyControl {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            executable: config.control_executable.clone(),
            control_path: config.control_path.clone(),
        }
    }
}

impl ControlPlane for ProxyControl {
    fn run(&self, args: Vec<String>) -> BoxFuture<'_, Result<(), HarnessError>> {
        async move {
            info!(command = ?args, "Execute command");
            let output = Command::new(&self.executable)
                .arg(&self.control_path)
                .args(&args)
                .output()
                .await
                .map_err(|e| HarnessError::Control {
                    command: args.clone(),
                    reason: e.to_string(),
                })?;

            for line in String::from_utf8_lossy(&output.stdout).lines() {
                info!(command = ?args, stream = "stdout", "{}", line);
            }
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                info!(command = ?args, stream = "stderr", "{}", line);
            }
            // The proxy reports bad commands on its output; the run carries on.
            if !output.status.success() {
                warn!(command = ?args, status = %output.status, "Control command exited unsuccessfully");
            }
            Ok(())
        }
        .boxed()
    }
}

/// The proxy child process, if the harness launched one.
pub struct ProxyProcess {
    config: ProxyConfig,
    outcome: Outcome,
    shutdown: CancellationToken,
    waiter: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyProcess {
    pub fn new(config: ProxyConfig, outcome: Outcome) -> Self {
        Self {
            config,
            outcome,
            shutdown: CancellationToken::new(),
            waiter: Mutex::new(None),
        }
    }

    /// Spawns the proxy and forwards its output to the log. Any exit of the
    /// child before `stop` fails the run. Does nothing for an external proxy.
    pub fn start(&self) -> Result<(), HarnessError> {
        if self.config.is_external() {
            info!("Proxy managed externally, not spawning");
            return Ok(());
        }

        let mut child = Command::new(&self.config.executable)
            .arg("--cleanupIntervalMs")
            .arg(self.config.cleanup_interval_ms.to_string())
            .arg("--controlSocket")
            .arg(&self.config.control_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        info!(executable = %self.config.executable, pid = ?child.id(), "Proxy started");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr"));
        }

        let outcome = self.outcome.clone();
        let shutdown = self.shutdown.clone();
        let waiter = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let status = status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|e| e.to_string());
                    info!(status = %status, "Proxy process exited");
                    outcome.fail(HarnessError::ProxyExited(status));
                }
                _ = shutdown.cancelled() => {
                    let _ = child.kill().await;
                }
            }
        });
        *self.waiter.lock().unwrap_or_else(|e| e.into_inner()) = Some(waiter);
        Ok(())
    }

    /// Kills the child, if any, without reporting it as a failure.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let waiter = self.waiter.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(waiter) = waiter {
            let _ = waiter.await;
        }
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, stream: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(stream = stream, "{}", line);
    }
}

/// Completion predicate for proxy start-up: true once the control socket path
/// exists. Each miss uses one of `startup_poll_tries`; running out fails the
/// run.
pub fn proxy_up(config: &ProxyConfig, outcome: Outcome) -> impl FnMut() -> bool + Send + 'static {
    let external = config.is_external();
    let control_path = config.control_path.clone();
    let max_tries = config.startup_poll_tries;
    let mut tries = 0u32;

    move || {
        if external || Path::new(&control_path).exists() {
            return true;
        }
        tries += 1;
        if tries > max_tries {
            outcome.fail(HarnessError::ProxyStartupTimeout { tries: max_tries });
        }
        false
    }
}
