use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_PUBLISHED: IntCounter = IntCounter::new(
        "churn_messages_published_total",
        "Messages confirmed by the broker for all publishers"
    )
    .expect("metric can be created");
    pub static ref MESSAGES_ACCEPTED: IntCounter = IntCounter::new(
        "churn_messages_accepted_total",
        "Messages accepted in order by the verifier"
    )
    .expect("metric can be created");
    /// Exact repeats of the last accepted index (tolerated redeliveries)
    pub static ref DUPLICATES_TOLERATED: IntCounter = IntCounter::new(
        "churn_duplicates_tolerated_total",
        "Redelivered messages tolerated by the verifier"
    )
    .expect("metric can be created");
    /// Envelopes from a previous run that were dropped untouched
    pub static ref STALE_DISCARDED: IntCounter = IntCounter::new(
        "churn_stale_envelopes_total",
        "Envelopes discarded because they belong to another run"
    )
    .expect("metric can be created");
    pub static ref CONNECTS: IntCounterVec = IntCounterVec::new(
        Opts::new("churn_connects_total", "Connect notifications per population"),
        &["population"]
    )
    .expect("metric can be created");
    pub static ref DISCONNECTS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "churn_disconnects_total",
            "Disconnect notifications per population"
        ),
        &["population"]
    )
    .expect("metric can be created");
    /// Raw sockets closed by the broken-connection servers
    pub static ref PEER_SEVERED: IntCounter = IntCounter::new(
        "churn_peer_severed_total",
        "Accepted backend sockets closed after a random delay"
    )
    .expect("metric can be created");
    /// Client connections closed locally by their kill timer
    pub static ref LOCAL_KILLS: IntCounter = IntCounter::new(
        "churn_local_kills_total",
        "Client connections closed locally after a random delay"
    )
    .expect("metric can be created");
}

pub fn register_metrics() {
    let _ = REGISTRY.register(Box::new(MESSAGES_PUBLISHED.clone()));
    let _ = REGISTRY.register(Box::new(MESSAGES_ACCEPTED.clone()));
    let _ = REGISTRY.register(Box::new(DUPLICATES_TOLERATED.clone()));
    let _ = REGISTRY.register(Box::new(STALE_DISCARDED.clone()));
    let _ = REGISTRY.register(Box::new(CONNECTS.clone()));
    let _ = REGISTRY.register(Box::new(DISCONNECTS.clone()));
    let _ = REGISTRY.register(Box::new(PEER_SEVERED.clone()));
    let _ = REGISTRY.register(Box::new(LOCAL_KILLS.clone()));
}

pub fn render_metrics() -> String {
    let metric_families = REGISTRY.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|_| "# Error: Invalid UTF8".to_string())
}
