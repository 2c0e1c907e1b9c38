use std::time::Duration;

/// Every way a churn run can fail. All of them are fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("unexpectedly connected: {population} connection {id}")]
    UnexpectedConnect { population: &'static str, id: usize },

    #[error("unexpected disconnect for {population} {id}: {reason}")]
    UnexpectedDisconnect {
        population: &'static str,
        id: usize,
        reason: String,
    },

    #[error(
        "publisher {publisher_id} delivered message index {received}, expected index {expected}"
    )]
    OutOfOrder {
        publisher_id: u64,
        expected: u64,
        received: u64,
    },

    #[error("consumer {consumer_id} received an unparseable envelope: {reason}")]
    MalformedEnvelope { consumer_id: usize, reason: String },

    #[error("proxy did not expose its control socket after {tries} polls")]
    ProxyStartupTimeout { tries: u32 },

    #[error("proxy exited with status {0}")]
    ProxyExited(String),

    #[error("no stats received within {0:?}")]
    StatsTimeout(Duration),

    #[error("error listening for stats: {0}")]
    StatsListen(std::io::Error),

    #[error("control command {command:?} failed: {reason}")]
    Control {
        command: Vec<String>,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
