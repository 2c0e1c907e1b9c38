use crate::control::ControlPlane;
use crate::engine::outcome::Outcome;
use crate::error::HarnessError;
use crate::parser::statsd::is_paused_connection_gauge;
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info};

const MAX_DATAGRAM: usize = 65_536;

/// Checks that the proxy's telemetry reaches a local UDP socket.
pub struct StatsProbe {
    host: String,
    port: u16,
    timeout: Duration,
    control: Arc<dyn ControlPlane>,
    outcome: Outcome,
    received: Arc<AtomicBool>,
}

impl StatsProbe {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        timeout: Duration,
        control: Arc<dyn ControlPlane>,
        outcome: Outcome,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            control,
            outcome,
            received: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Binds the listening socket, asks the proxy to send stats to it, and
    /// arms the timeout. Failures are reported through the run outcome.
    pub async fn start(&self) {
        info!("Starting to send stats");
        let deadline = Instant::now() + self.timeout;

        let socket = match UdpSocket::bind(("0.0.0.0", self.port)).await {
            Ok(socket) => socket,
            Err(e) => {
                self.outcome.fail(HarnessError::StatsListen(e));
                return;
            }
        };
        let port = match socket.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                self.outcome.fail(HarnessError::StatsListen(e));
                return;
            }
        };

        let received = Arc::clone(&self.received);
        let outcome = self.outcome.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            match tokio::time::timeout_at(deadline, wait_for_gauge(&socket)).await {
                Ok(Ok(())) => {
                    info!(port = port, "Received stats");
                    received.store(true, Ordering::SeqCst);
                }
                Ok(Err(e)) => outcome.fail(HarnessError::StatsListen(e)),
                Err(_) => outcome.fail(HarnessError::StatsTimeout(timeout)),
            }
        });

        let command = vec![
            "stat".to_string(),
            "send".to_string(),
            self.host.clone(),
            port.to_string(),
        ];
        if let Err(e) = self.control.run(command).await {
            self.outcome.fail(e);
        }
    }

    pub fn received(&self) -> bool {
        self.received.load(Ordering::SeqCst)
    }
}

async fn wait_for_gauge(socket: &UdpSocket) -> std::io::Result<()> {
    let mut buf = BytesMut::zeroed(MAX_DATAGRAM);
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let datagram = String::from_utf8_lossy(&buf[..n]);
        if is_paused_connection_gauge(&datagram) {
            return Ok(());
        }
        debug!(from = %from, "Ignoring stats datagram");
    }
}
