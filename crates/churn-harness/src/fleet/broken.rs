//! Connections torn down from both ends.
//!
//! The serving side binds raw TCP listeners standing in for backends; every
//! accepted socket is dropped after a random delay, modelling a peer that
//! resets mid-session. The client side opens connections through the proxy
//! to routes that resolve to those listeners and closes each one locally
//! after its own random delay, whether or not it ever connected.

use super::{random_kill_delay, DoomedObserver};
use crate::client::{ChannelSetup, ClientConnection, MessageClient};
use crate::engine::outcome::Outcome;
use crate::metrics;
use churn_common::EndpointSpec;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct BrokenClient<T> {
    kill_after: Duration,
    _connection: Arc<T>,
    observer: Arc<DoomedObserver>,
}

impl<T> BrokenClient<T> {
    pub fn connects(&self) -> usize {
        self.observer.connects()
    }
}

pub struct BrokenSet<C: MessageClient> {
    client: Arc<C>,
    listen_ports: Vec<u16>,
    specs: Vec<EndpointSpec>,
    max_kill_delay_ms: u64,
    outcome: Outcome,
    clients: Mutex<Vec<BrokenClient<C::Connection>>>,
}

impl<C: MessageClient> BrokenSet<C> {
    pub fn new(
        client: Arc<C>,
        listen_ports: Vec<u16>,
        specs: Vec<EndpointSpec>,
        max_kill_delay_ms: u64,
        outcome: Outcome,
    ) -> Self {
        Self {
            client,
            listen_ports,
            specs,
            max_kill_delay_ms,
            outcome,
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Binds every listen port and starts severing accepted sockets. Returns
    /// the bound addresses.
    pub async fn start_serving(&self) -> std::io::Result<Vec<SocketAddr>> {
        let mut bound = Vec::with_capacity(self.listen_ports.len());
        for port in &self.listen_ports {
            let listener = TcpListener::bind(("0.0.0.0", *port)).await?;
            let addr = listener.local_addr()?;
            info!(port = addr.port(), "Severing server bound");
            tokio::spawn(serve(listener, self.max_kill_delay_ms));
            bound.push(addr);
        }
        Ok(bound)
    }

    pub fn start(&self) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        for spec in &self.specs {
            for _ in 0..spec.count {
                let id = clients.len();
                let kill_after = random_kill_delay(self.max_kill_delay_ms);
                let observer = Arc::new(DoomedObserver::new("broken", id, self.outcome.clone()));
                let connection = Arc::new(self.client.connect(
                    &spec.uri,
                    ChannelSetup::none(),
                    observer.clone(),
                ));

                let doomed = Arc::clone(&connection);
                tokio::spawn(async move {
                    tokio::time::sleep(kill_after).await;
                    debug!(
                        connection_id = id,
                        after_ms = kill_after.as_millis() as u64,
                        "Kill the connection early"
                    );
                    doomed.close();
                    metrics::LOCAL_KILLS.inc();
                });

                clients.push(BrokenClient {
                    kill_after,
                    _connection: connection,
                    observer,
                });
            }
        }
        info!(count = clients.len(), "Broken connections started");
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Longest drawn kill delay; every client is closed by then.
    pub fn max_drawn_kill_delay(&self) -> Option<Duration> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.iter().map(|c| c.kill_after).max()
    }

    pub fn connect_count(&self) -> usize {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.iter().map(BrokenClient::connects).sum()
    }
}

async fn serve(listener: TcpListener, max_kill_delay_ms: u64) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let delay = random_kill_delay(max_kill_delay_ms);
                tokio::spawn(sever_after(socket, peer, delay));
            }
            Err(e) => {
                // Back off on EMFILE and similar
                warn!(error = %e, "Accept failed on severing server");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn sever_after(socket: TcpStream, peer: SocketAddr, delay: Duration) {
    let local = socket
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    debug!(peer = %peer, local = %local, "Client connected");

    tokio::time::sleep(delay).await;
    info!(
        peer = %peer,
        local = %local,
        after_ms = delay.as_millis() as u64,
        "Close early"
    );
    drop(socket);
    metrics::PEER_SEVERED.inc();
}
