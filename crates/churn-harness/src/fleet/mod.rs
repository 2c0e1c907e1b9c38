pub mod broken;
pub mod consumers;
pub mod failing;
pub mod publishers;

use crate::client::ConnectionObserver;
use crate::engine::outcome::Outcome;
use crate::error::HarnessError;
use crate::metrics;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Run-wide switch deciding whether stable clients may lose their connection.
#[derive(Debug, Default)]
pub struct DisconnectPolicy {
    tolerate: AtomicBool,
}

impl DisconnectPolicy {
    pub fn new(tolerate: bool) -> Self {
        Self {
            tolerate: AtomicBool::new(tolerate),
        }
    }

    pub fn expecting_disconnects(&self) -> bool {
        self.tolerate.load(Ordering::SeqCst)
    }

    pub fn set_expecting_disconnects(&self, tolerate: bool) {
        self.tolerate.store(tolerate, Ordering::SeqCst);
    }
}

/// Observer for clients that must stay up: publishers and consumers.
///
/// `connected` latches on the first connect and is never cleared, so a
/// client that drops and reconnects still counts as started.
pub struct SteadyObserver {
    population: &'static str,
    id: usize,
    connected: AtomicBool,
    policy: Arc<DisconnectPolicy>,
    outcome: Outcome,
}

impl SteadyObserver {
    pub fn new(
        population: &'static str,
        id: usize,
        policy: Arc<DisconnectPolicy>,
        outcome: Outcome,
    ) -> Self {
        Self {
            population,
            id,
            connected: AtomicBool::new(false),
            policy,
            outcome,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl ConnectionObserver for SteadyObserver {
    fn on_connect(&self) {
        info!(population = self.population, id = self.id, "Connected");
        metrics::CONNECTS.with_label_values(&[self.population]).inc();
        self.connected.store(true, Ordering::SeqCst);
    }

    fn on_disconnect(&self, reason: &str) {
        warn!(population = self.population, id = self.id, reason = %reason, "Disconnected");
        metrics::DISCONNECTS.with_label_values(&[self.population]).inc();
        if !self.policy.expecting_disconnects() {
            self.outcome.fail(HarnessError::UnexpectedDisconnect {
                population: self.population,
                id: self.id,
                reason: reason.to_string(),
            });
        }
    }
}

/// Observer for connections that must never be established. A connect is a
/// test failure; disconnects are the expected outcome and only counted.
pub struct DoomedObserver {
    population: &'static str,
    id: usize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    outcome: Outcome,
}

impl DoomedObserver {
    pub fn new(population: &'static str, id: usize, outcome: Outcome) -> Self {
        Self {
            population,
            id,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            outcome,
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl ConnectionObserver for DoomedObserver {
    fn on_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
        metrics::CONNECTS.with_label_values(&[self.population]).inc();
        self.outcome.fail(HarnessError::UnexpectedConnect {
            population: self.population,
            id: self.id,
        });
    }

    fn on_disconnect(&self, reason: &str) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        metrics::DISCONNECTS.with_label_values(&[self.population]).inc();
        debug!(population = self.population, id = self.id, reason = %reason, "Expected disconnect");
    }
}

/// Uniformly random delay in `[1, max_ms]` milliseconds.
pub fn random_kill_delay(max_ms: u64) -> Duration {
    let ms = rand::thread_rng().gen_range(1..=max_ms.max(1));
    Duration::from_millis(ms)
}
