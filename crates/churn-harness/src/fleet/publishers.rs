use super::{DisconnectPolicy, SteadyObserver};
use crate::client::{ChannelSetup, ClientConnection, MessageClient};
use crate::engine::outcome::Outcome;
use crate::engine::verifier::Verifier;
use crate::metrics;
use crate::parser::envelope::Envelope;
use churn_common::EndpointSpec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_SEND_INTERVAL_MS: u64 = 1000;

pub struct Publisher<T> {
    id: u64,
    queue: String,
    send_interval: Duration,
    connection: T,
    observer: Arc<SteadyObserver>,
    last_sent_index: AtomicU64,
}

impl<T> Publisher<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.observer.is_connected()
    }

    pub fn last_sent_index(&self) -> u64 {
        self.last_sent_index.load(Ordering::SeqCst)
    }
}

/// Steady publishers, `count` per endpoint spec, each sending an endless
/// sequence of indexed envelopes to its queue.
pub struct PublisherSet<C: MessageClient> {
    client: Arc<C>,
    specs: Vec<EndpointSpec>,
    startup_time: u64,
    policy: Arc<DisconnectPolicy>,
    outcome: Outcome,
    shutdown: CancellationToken,
    publishers: Mutex<Vec<Arc<Publisher<C::Connection>>>>,
}

impl<C: MessageClient> PublisherSet<C> {
    pub fn new(
        client: Arc<C>,
        specs: Vec<EndpointSpec>,
        startup_time: u64,
        policy: Arc<DisconnectPolicy>,
        outcome: Outcome,
    ) -> Self {
        Self {
            client,
            specs,
            startup_time,
            policy,
            outcome,
            shutdown: CancellationToken::new(),
            publishers: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self) {
        let mut publishers = self.publishers.lock().unwrap_or_else(|e| e.into_inner());
        let mut next_id = publishers.len() as u64;

        for spec in &self.specs {
            let Some(queue) = spec.queue_name.clone() else {
                warn!(uri = %spec.uri, "Publisher spec without a queue name, skipping");
                continue;
            };
            let send_interval =
                Duration::from_millis(spec.send_interval_ms.unwrap_or(DEFAULT_SEND_INTERVAL_MS));

            for _ in 0..spec.count {
                let id = next_id;
                next_id += 1;

                let observer = Arc::new(SteadyObserver::new(
                    "publisher",
                    id as usize,
                    Arc::clone(&self.policy),
                    self.outcome.clone(),
                ));
                let connection = self.client.connect(
                    &spec.uri,
                    ChannelSetup::publish_to(queue.clone()),
                    observer.clone(),
                );

                let publisher = Arc::new(Publisher {
                    id,
                    queue: queue.clone(),
                    send_interval,
                    connection,
                    observer,
                    last_sent_index: AtomicU64::new(0),
                });
                tokio::spawn(send_loop(
                    Arc::clone(&publisher),
                    self.startup_time,
                    self.shutdown.child_token(),
                ));
                publishers.push(publisher);
            }
        }
        info!(count = publishers.len(), "Publishers started");
    }

    /// True once every publisher has connected at least once.
    pub fn started(&self) -> bool {
        let publishers = self.publishers.lock().unwrap_or_else(|e| e.into_inner());
        match publishers.iter().find(|p| !p.is_connected()) {
            Some(p) => {
                info!(publisher_id = p.id, "Publisher not connected");
                false
            }
            None => true,
        }
    }

    pub fn get(&self, id: u64) -> Option<Arc<Publisher<C::Connection>>> {
        let publishers = self.publishers.lock().unwrap_or_else(|e| e.into_inner());
        publishers.iter().find(|p| p.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.publishers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn print_stats(&self, verifier: &Verifier) {
        let publishers = self.publishers.lock().unwrap_or_else(|e| e.into_inner());
        for p in publishers.iter() {
            info!(
                publisher_id = p.id,
                messages_sent = p.last_sent_index(),
                messages_received = verifier.last_received(p.id),
                "Publisher stats"
            );
        }
    }

    /// Stops every send loop at its next await point. Connections stay open.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

async fn send_loop<T: ClientConnection>(
    publisher: Arc<Publisher<T>>,
    startup_time: u64,
    shutdown: CancellationToken,
) {
    loop {
        let index = publisher.last_sent_index.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = match Envelope::new(index, publisher.id, startup_time).to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(publisher_id = publisher.id, error = %e, "Failed to encode envelope");
                return;
            }
        };

        let sent = tokio::select! {
            _ = shutdown.cancelled() => return,
            res = publisher.connection.publish(&publisher.queue, payload) => res,
        };
        if let Err(e) = sent {
            // Loop halts; the connection stays open.
            warn!(
                publisher_id = publisher.id,
                message_index = index,
                error = %e,
                "Message was rejected"
            );
            return;
        }
        metrics::MESSAGES_PUBLISHED.inc();

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(publisher.send_interval) => {}
        }
    }
}
