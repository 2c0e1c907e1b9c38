use super::DoomedObserver;
use crate::client::{ChannelSetup, MessageClient};
use crate::engine::outcome::Outcome;
use churn_common::EndpointSpec;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Connections aimed at routes that must never resolve (unknown vhost or a
/// farm with no reachable backend). Fire and forget: the only observable
/// effect is a failure if one of them connects.
pub struct FailingSet<C: MessageClient> {
    client: Arc<C>,
    specs: Vec<EndpointSpec>,
    outcome: Outcome,
    connections: Mutex<Vec<(Arc<DoomedObserver>, C::Connection)>>,
}

impl<C: MessageClient> FailingSet<C> {
    pub fn new(client: Arc<C>, specs: Vec<EndpointSpec>, outcome: Outcome) -> Self {
        Self {
            client,
            specs,
            outcome,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self) {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());

        for spec in &self.specs {
            for _ in 0..spec.count {
                let id = connections.len();
                let observer = Arc::new(DoomedObserver::new("failing", id, self.outcome.clone()));
                let connection =
                    self.client
                        .connect(&spec.uri, ChannelSetup::none(), observer.clone());
                connections.push((observer, connection));
            }
        }
        info!(count = connections.len(), "Failing connections started");
    }

    pub fn len(&self) -> usize {
        self.connections.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total connect notifications seen across the population.
    pub fn connect_count(&self) -> usize {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections.iter().map(|(o, _)| o.connects()).sum()
    }

    /// Number of clients that have been told they are disconnected at least once.
    pub fn disconnected_count(&self) -> usize {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections
            .iter()
            .filter(|(o, _)| o.disconnects() > 0)
            .count()
    }
}
