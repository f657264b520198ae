// Wire messages exchanged over the live channel
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Unix milliseconds at send time
    Ping { timestamp: i64 },
    Pong { timestamp: i64 },
    GetResults { query: String },
}

impl OutboundMessage {
    pub fn ping() -> Self {
        OutboundMessage::Ping { timestamp: now_millis() }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Payload is validated separately so a bad update is dropped, not treated as garbage
    LiveUpdate {
        #[serde(default)]
        data: Value,
    },
    #[serde(other)]
    Unknown,
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
