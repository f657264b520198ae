// Live update domain model - server-pushed results for one template
use super::template::TemplateId;
use super::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveResult {
    /// Opaque result payload; its shape depends on the template's widget type
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Receipt time when the server sent none, or one that cannot be read
    #[serde(default = "Utc::now", deserialize_with = "timestamp::or_now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdate {
    pub template_id: TemplateId,
    pub result: LiveResult,
}

impl LiveUpdate {
    #[cfg(test)]
    pub fn new(template_id: TemplateId, data: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            template_id,
            result: LiveResult {
                data,
                error: None,
                timestamp,
            },
        }
    }

    #[cfg(test)]
    pub fn failed(template_id: TemplateId, error: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            template_id,
            result: LiveResult {
                data: Value::Null,
                error: Some(error),
                timestamp,
            },
        }
    }

    /// Validate a raw `live_update` payload.
    /// Payloads without a template identifier are rejected.
    pub fn from_payload(payload: Value) -> Result<Self, String> {
        match payload.get("template_id") {
            Some(id) if id.is_i64() || id.is_u64() => {}
            Some(other) => return Err(format!("template_id is not an integer: {}", other)),
            None => return Err("missing template_id".to_string()),
        }
        serde_json::from_value(payload).map_err(|e| e.to_string())
    }

    /// Moment the result was generated on the server
    pub fn generated_at(&self) -> DateTime<Utc> {
        self.result.timestamp
    }
}
