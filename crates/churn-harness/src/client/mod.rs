//! Message client abstraction used by every population.
//!
//! A `MessageClient` opens logical connections that manage themselves in the
//! background: they connect, run their channel setup, report lifecycle changes
//! to a `ConnectionObserver`, and reconnect after failures until closed.
//! Populations only ever see this interface, so the AMQP transport can be
//! swapped for an in-memory double in tests.

pub mod amqp;

use std::future::Future;
use std::sync::Arc;

/// Lifecycle notifications for one logical connection.
pub trait ConnectionObserver: Send + Sync + 'static {
    fn on_connect(&self);
    fn on_disconnect(&self, reason: &str);
}

/// Receiver of consumed messages. The transport acknowledges each delivery
/// once `on_message` returns, whatever the receiver decided about it.
pub trait Deliverable: Send + Sync + 'static {
    fn on_message(&self, payload: &[u8]);
}

/// What to establish on the connection's channel after every (re)connect.
#[derive(Clone, Default)]
pub struct ChannelSetup {
    /// Durable queue declared idempotently.
    pub queue: Option<String>,
    /// Unacknowledged-message limit applied before consuming.
    pub prefetch: Option<u16>,
    pub consumer: Option<Arc<dyn Deliverable>>,
}

impl ChannelSetup {
    /// Connection only, no channel work.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn publish_to(queue: impl Into<String>) -> Self {
        Self {
            queue: Some(queue.into()),
            ..Self::default()
        }
    }

    pub fn consume_from(
        queue: impl Into<String>,
        prefetch: u16,
        consumer: Arc<dyn Deliverable>,
    ) -> Self {
        Self {
            queue: Some(queue.into()),
            prefetch: Some(prefetch),
            consumer: Some(consumer),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection closed")]
    Closed,

    #[error("message rejected by broker")]
    Nacked,

    #[error("transport error: {0}")]
    Transport(String),
}

pub trait ClientConnection: Send + Sync + 'static {
    /// Publish to `queue`. Waits for an established channel and resolves once
    /// the broker has confirmed the message.
    fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Stop the connection. Closing an already-closed connection is a no-op.
    fn close(&self);
}

pub trait MessageClient: Send + Sync + 'static {
    type Connection: ClientConnection;

    /// Start a managed connection to `uri`. Returns immediately; progress is
    /// reported through `observer`.
    fn connect(
        &self,
        uri: &str,
        setup: ChannelSetup,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self::Connection;
}
