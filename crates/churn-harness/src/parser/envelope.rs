use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Payload carried by every published message.
///
/// `startup_time` ties the message to one harness run so that messages left
/// on a durable queue by an earlier run can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub time: u64,
    pub message_index: u64,
    pub publisher_id: u64,
    pub startup_time: u64,
}

impl Envelope {
    pub fn new(message_index: u64, publisher_id: u64, startup_time: u64) -> Self {
        Self {
            time: now_millis(),
            message_index,
            publisher_id,
            startup_time,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

/// Milliseconds since the unix epoch. Used both for message timestamps and as
/// the run's startup identifier.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
