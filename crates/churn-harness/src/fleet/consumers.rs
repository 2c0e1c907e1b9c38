use super::{DisconnectPolicy, SteadyObserver};
use crate::client::{ChannelSetup, Deliverable, MessageClient};
use crate::engine::outcome::Outcome;
use crate::engine::verifier::Verifier;
use crate::error::HarnessError;
use crate::parser::envelope::Envelope;
use churn_common::EndpointSpec;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Feeds consumed envelopes to the verifier. Verification failures fail the
/// run but never stop the delivery from being acknowledged.
pub struct EnvelopeSink {
    consumer_id: usize,
    verifier: Arc<Verifier>,
    outcome: Outcome,
}

impl EnvelopeSink {
    pub fn new(consumer_id: usize, verifier: Arc<Verifier>, outcome: Outcome) -> Self {
        Self {
            consumer_id,
            verifier,
            outcome,
        }
    }
}

impl Deliverable for EnvelopeSink {
    fn on_message(&self, payload: &[u8]) {
        let envelope = match Envelope::from_json(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.outcome.fail(HarnessError::MalformedEnvelope {
                    consumer_id: self.consumer_id,
                    reason: e.to_string(),
                });
                return;
            }
        };

        if let Err(e) = self.verifier.verify(&envelope) {
            warn!(consumer_id = self.consumer_id, envelope = ?envelope, "Receiver got message out of order");
            self.outcome.fail(e);
        }
    }
}

pub struct Consumer<T> {
    id: usize,
    queue: String,
    _connection: T,
    observer: Arc<SteadyObserver>,
}

impl<T> Consumer<T> {
    pub fn is_connected(&self) -> bool {
        self.observer.is_connected()
    }
}

/// One consumer per endpoint spec, each draining its queue into the shared
/// verifier.
pub struct ConsumerSet<C: MessageClient> {
    client: Arc<C>,
    specs: Vec<EndpointSpec>,
    verifier: Arc<Verifier>,
    prefetch: u16,
    policy: Arc<DisconnectPolicy>,
    outcome: Outcome,
    consumers: Mutex<Vec<Consumer<C::Connection>>>,
}

impl<C: MessageClient> ConsumerSet<C> {
    pub fn new(
        client: Arc<C>,
        specs: Vec<EndpointSpec>,
        verifier: Arc<Verifier>,
        prefetch: u16,
        policy: Arc<DisconnectPolicy>,
        outcome: Outcome,
    ) -> Self {
        Self {
            client,
            specs,
            verifier,
            prefetch,
            policy,
            outcome,
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self) {
        let mut consumers = self.consumers.lock().unwrap_or_else(|e| e.into_inner());

        for spec in &self.specs {
            let Some(queue) = spec.queue_name.clone() else {
                warn!(uri = %spec.uri, "Consumer spec without a queue name, skipping");
                continue;
            };
            let id = consumers.len();

            let observer = Arc::new(SteadyObserver::new(
                "consumer",
                id,
                Arc::clone(&self.policy),
                self.outcome.clone(),
            ));
            let sink = Arc::new(EnvelopeSink::new(
                id,
                Arc::clone(&self.verifier),
                self.outcome.clone(),
            ));
            let connection = self.client.connect(
                &spec.uri,
                ChannelSetup::consume_from(queue.clone(), self.prefetch, sink),
                observer.clone(),
            );

            info!(consumer_id = id, queue = %queue, "Listening for messages");
            consumers.push(Consumer {
                id,
                queue,
                _connection: connection,
                observer,
            });
        }
    }

    /// True once every consumer has connected at least once.
    pub fn started(&self) -> bool {
        let consumers = self.consumers.lock().unwrap_or_else(|e| e.into_inner());
        match consumers.iter().find(|c| !c.is_connected()) {
            Some(c) => {
                info!(consumer_id = c.id, queue = %c.queue, "Consumer not connected");
                false
            }
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.consumers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
