#![allow(dead_code)]

use churn_harness::client::{
    ChannelSetup, ClientConnection, ClientError, ConnectionObserver, Deliverable, MessageClient,
};
use churn_harness::control::ControlPlane;
use churn_harness::HarnessError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::time::Instant;

type Queues = Arc<Mutex<HashMap<String, Vec<Arc<dyn Deliverable>>>>>;

/// In-memory broker. Connections to URIs containing a refused fragment fail
/// immediately; all others connect immediately. Publishing delivers
/// synchronously to every consumer registered on the queue.
#[derive(Default)]
pub struct FakeClient {
    refuse: Vec<String>,
    reject_publishes: AtomicBool,
    queues: Queues,
    opened: Mutex<Vec<Arc<FakeState>>>,
}

pub struct FakeState {
    pub uri: String,
    pub opened_at: Instant,
    closed_at: Mutex<Option<Instant>>,
    observer: Arc<dyn ConnectionObserver>,
}

impl FakeState {
    pub fn closed_at(&self) -> Option<Instant> {
        *self.closed_at.lock().unwrap()
    }

    /// Simulates the broker dropping this connection.
    pub fn drop_link(&self, reason: &str) {
        self.observer.on_disconnect(reason);
    }
}

impl FakeClient {
    pub fn refusing(fragments: &[&str]) -> Self {
        Self {
            refuse: fragments.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn reject_publishes(&self) {
        self.reject_publishes.store(true, Ordering::SeqCst);
    }

    pub fn opened(&self) -> Vec<Arc<FakeState>> {
        self.opened.lock().unwrap().clone()
    }
}

pub struct FakeConnection {
    state: Arc<FakeState>,
    queues: Queues,
    reject: bool,
}

impl MessageClient for FakeClient {
    type Connection = FakeConnection;

    fn connect(
        &self,
        uri: &str,
        setup: ChannelSetup,
        observer: Arc<dyn ConnectionObserver>,
    ) -> FakeConnection {
        let state = Arc::new(FakeState {
            uri: uri.to_string(),
            opened_at: Instant::now(),
            closed_at: Mutex::new(None),
            observer: Arc::clone(&observer),
        });
        self.opened.lock().unwrap().push(Arc::clone(&state));

        if self.refuse.iter().any(|f| uri.contains(f.as_str())) {
            observer.on_disconnect("ACCESS_REFUSED");
        } else {
            if let (Some(queue), Some(sink)) = (setup.queue, setup.consumer) {
                self.queues
                    .lock()
                    .unwrap()
                    .entry(queue)
                    .or_default()
                    .push(sink);
            }
            observer.on_connect();
        }

        FakeConnection {
            state,
            queues: Arc::clone(&self.queues),
            reject: self.reject_publishes.load(Ordering::SeqCst),
        }
    }
}

impl ClientConnection for FakeConnection {
    fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send {
        let result = if self.state.closed_at().is_some() {
            Err(ClientError::Closed)
        } else if self.reject {
            Err(ClientError::Nacked)
        } else {
            let sinks = self
                .queues
                .lock()
                .unwrap()
                .get(queue)
                .cloned()
                .unwrap_or_default();
            for sink in sinks {
                sink.on_message(&payload);
            }
            Ok(())
        };
        async move { result }
    }

    fn close(&self) {
        let mut closed_at = self.state.closed_at.lock().unwrap();
        if closed_at.is_none() {
            *closed_at = Some(Instant::now());
        }
    }
}

pub const PAUSED_GAUGE: &str = "amqpprox.pausedConnectionCount,rmqEndpointType=overall:0|g";

/// Control plane double. Records every command; answers `stat send <host>
/// <port>` by sending the configured datagrams to that port on loopback.
pub struct FakeControl {
    datagrams: Vec<&'static str>,
    commands: Mutex<Vec<Vec<String>>>,
}

impl FakeControl {
    pub fn new(datagrams: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            datagrams,
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }
}

impl ControlPlane for FakeControl {
    fn run(&self, args: Vec<String>) -> BoxFuture<'_, Result<(), HarnessError>> {
        self.commands.lock().unwrap().push(args.clone());
        async move {
            if args.len() == 4 && args[0] == "stat" && args[1] == "send" {
                let socket = UdpSocket::bind("127.0.0.1:0").await?;
                let target = format!("127.0.0.1:{}", args[3]);
                for datagram in &self.datagrams {
                    socket.send_to(datagram.as_bytes(), target.as_str()).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }
}
