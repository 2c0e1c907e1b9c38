//! `MessageClient` backed by lapin.
//!
//! Each logical connection is a supervisor task that owns the lapin
//! connection. The current channel is published through a watch channel so
//! that publishes wait across reconnects instead of failing.

use super::{
    ChannelSetup, ClientConnection, ClientError, ConnectionObserver, Deliverable, MessageClient,
};
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PERSISTENT: u8 = 2;

pub struct AmqpClient {
    reconnect_delay: Duration,
}

impl AmqpClient {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self { reconnect_delay }
    }
}

impl MessageClient for AmqpClient {
    type Connection = AmqpConnection;

    fn connect(
        &self,
        uri: &str,
        setup: ChannelSetup,
        observer: Arc<dyn ConnectionObserver>,
    ) -> AmqpConnection {
        let (channel_tx, channel_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            uri: uri.to_string(),
            setup,
            observer,
            channel_tx,
            cancel: cancel.clone(),
            reconnect_delay: self.reconnect_delay,
        };
        tokio::spawn(supervisor.run());

        AmqpConnection { channel_rx, cancel }
    }
}

pub struct AmqpConnection {
    channel_rx: watch::Receiver<Option<Channel>>,
    cancel: CancellationToken,
}

impl ClientConnection for AmqpConnection {
    fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send {
        let mut channel_rx = self.channel_rx.clone();
        let queue = queue.to_string();

        async move {
            let channel = {
                let current = channel_rx
                    .wait_for(Option::is_some)
                    .await
                    .map_err(|_| ClientError::Closed)?;
                current.clone()
            };
            let channel = channel.ok_or(ClientError::Closed)?;

            let properties = BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(PERSISTENT);
            let confirmation = channel
                .basic_publish(
                    "",
                    &queue,
                    BasicPublishOptions::default(),
                    &payload,
                    properties,
                )
                .await
                .map_err(transport)?
                .await
                .map_err(transport)?;

            if confirmation.is_nack() {
                return Err(ClientError::Nacked);
            }
            Ok(())
        }
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

fn transport(err: lapin::Error) -> ClientError {
    ClientError::Transport(err.to_string())
}

fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

struct Session {
    channel: Channel,
    failures: mpsc::UnboundedReceiver<String>,
    consumer_task: Option<JoinHandle<()>>,
}

struct Supervisor {
    uri: String,
    setup: ChannelSetup,
    observer: Arc<dyn ConnectionObserver>,
    channel_tx: watch::Sender<Option<Channel>>,
    cancel: CancellationToken,
    reconnect_delay: Duration,
}

impl Supervisor {
    async fn run(self) {
        loop {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                res = Connection::connect(&self.uri, connection_properties()) => res,
            };

            match connected {
                Ok(connection) => {
                    if self.serve(&connection).await.is_none() {
                        return;
                    }
                }
                Err(e) => self.observer.on_disconnect(&e.to_string()),
            }

            debug!(uri = %self.uri, delay_ms = self.reconnect_delay.as_millis() as u64, "Reconnecting");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    /// Runs one established connection until it fails or the handle is
    /// closed. Returns `None` when closed locally.
    async fn serve(&self, connection: &Connection) -> Option<()> {
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => None,
            res = self.open_session(connection) => Some(res),
        };

        let reason = match opened {
            None => None,
            Some(Err(e)) => Some(e.to_string()),
            Some(Ok(mut session)) => {
                self.observer.on_connect();
                self.channel_tx.send_replace(Some(session.channel.clone()));

                let reason = tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    reason = session.failures.recv() => Some(
                        reason.unwrap_or_else(|| "connection dropped".to_string()),
                    ),
                };

                self.channel_tx.send_replace(None);
                if let Some(task) = session.consumer_task {
                    task.abort();
                }
                reason
            }
        };

        let _ = connection.close(200, "Closing").await;
        let reason = reason?;
        self.observer.on_disconnect(&reason);
        Some(())
    }

    async fn open_session(&self, connection: &Connection) -> Result<Session, lapin::Error> {
        let (failure_tx, failures) = mpsc::unbounded_channel();

        let on_error = failure_tx.clone();
        connection.on_error(move |err| {
            let _ = on_error.send(err.to_string());
        });

        let channel = self.setup_channel(connection).await?;

        let consumer_task = match (&self.setup.queue, &self.setup.consumer) {
            (Some(queue), Some(sink)) => {
                let consumer = channel
                    .basic_consume(
                        queue,
                        "",
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
                Some(tokio::spawn(consume(consumer, Arc::clone(sink), failure_tx)))
            }
            _ => None,
        };

        Ok(Session {
            channel,
            failures,
            consumer_task,
        })
    }

    async fn setup_channel(&self, connection: &Connection) -> Result<Channel, lapin::Error> {
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        if let Some(queue) = &self.setup.queue {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }
        if let Some(prefetch) = self.setup.prefetch {
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await?;
        }
        Ok(channel)
    }
}

async fn consume(
    mut consumer: Consumer,
    sink: Arc<dyn Deliverable>,
    failures: mpsc::UnboundedSender<String>,
) {
    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => {
                sink.on_message(&delivery.data);
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    warn!(error = %e, "Failed to acknowledge delivery");
                    let _ = failures.send(format!("ack failed: {}", e));
                    return;
                }
            }
            Err(e) => {
                let _ = failures.send(e.to_string());
                return;
            }
        }
    }
    let _ = failures.send("consumer cancelled by broker".to_string());
}
