//! JSON message model used by the plain producer

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A JSON-encoded message with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonMessage {
    pub id: String,
    pub counter: u64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl JsonMessage {
    /// Create a message with a fresh id and the current time
    pub fn new(counter: u64, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            counter,
            content: content.into(),
            timestamp: Utc::now(),
            headers: HashMap::new(),
        }
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for JsonMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message #{} - ID: {} - Time: {} - Content: {}",
            self.counter,
            self.id,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.content
        )
    }
}
