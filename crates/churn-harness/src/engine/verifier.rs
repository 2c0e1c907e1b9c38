use crate::error::HarnessError;
use crate::metrics;
use crate::parser::envelope::Envelope;
use dashmap::DashMap;
use tracing::{debug, info};

/// How a single delivered envelope was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Index was exactly one past the last accepted index.
    Accepted,
    /// Index repeated the last accepted index; state unchanged.
    Duplicate,
    /// Envelope belongs to another run; state unchanged.
    Stale,
}

/// Per-publisher ordering check for delivered messages.
///
/// Delivery must be strictly in order, with at most a repeat of the last
/// accepted index (redelivery of an unacknowledged message). Any gap or
/// regression is an integrity error and leaves the state untouched.
pub struct Verifier {
    startup_time: u64,
    last_received: DashMap<u64, u64>,
}

impl Verifier {
    pub fn new(startup_time: u64) -> Self {
        Self {
            startup_time,
            last_received: DashMap::new(),
        }
    }

    pub fn verify(&self, envelope: &Envelope) -> Result<Observation, HarnessError> {
        if envelope.startup_time != self.startup_time {
            debug!(
                publisher_id = envelope.publisher_id,
                startup_time = envelope.startup_time,
                "Dropping envelope from another run"
            );
            metrics::STALE_DISCARDED.inc();
            return Ok(Observation::Stale);
        }

        // The entry guard serializes classification per publisher.
        let mut last = self.last_received.entry(envelope.publisher_id).or_insert(0);
        let expected = *last + 1;

        if envelope.message_index == expected {
            *last = envelope.message_index;
            metrics::MESSAGES_ACCEPTED.inc();
            Ok(Observation::Accepted)
        } else if envelope.message_index == *last && *last > 0 {
            info!(
                publisher_id = envelope.publisher_id,
                message_index = envelope.message_index,
                expected_index = expected,
                "OK receiver duplicated message"
            );
            metrics::DUPLICATES_TOLERATED.inc();
            Ok(Observation::Duplicate)
        } else {
            Err(HarnessError::OutOfOrder {
                publisher_id: envelope.publisher_id,
                expected,
                received: envelope.message_index,
            })
        }
    }

    /// Last accepted index for `publisher_id`, 0 if nothing was seen yet.
    pub fn last_received(&self, publisher_id: u64) -> u64 {
        self.last_received
            .get(&publisher_id)
            .map(|entry| *entry)
            .unwrap_or(0)
    }
}
