//! Sample producers
//!
//! [`ChangeDataProducer`] emits protobuf change-data messages;
//! [`MixedProducer`] alternates JSON and plain-text messages. Both are
//! [`MessageSource`]s driven by a [`Producer`] loop against any
//! [`Publisher`].
//!
//! # Example
//!
//! ```rust,no_run
//! use sluice_client::{ChangeDataProducer, MemoryLog, Producer};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let log = MemoryLog::new();
//! log.create_topic("events", 2);
//!
//! let producer = Producer::new(Arc::new(log), "events", ChangeDataProducer::new());
//! let sent = producer
//!     .run(CancellationToken::new(), Duration::from_secs(2))
//!     .await;
//! # }
//! ```

use crate::error::PublishError;
use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use sluice_protocol::change::change_record;
use sluice_protocol::{
    AggregationPattern, ChangeDataMessage, ChangeRecord, Department, Header, JsonMessage,
    OperationType, CONTENT_KIND_HEADER, PROTOBUF_CONTENT_KIND,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SAMPLE_TENANT_UID: u64 = 12345;
const SAMPLE_USER_ID: u64 = 1001;
const SAMPLE_USER_NAME: &str = "System User";
const SAMPLE_SERVICE: &str = "sluice-producer";

/// Append-side capability of a log
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Append a record, returning its partition and offset
    async fn publish(
        &self,
        topic: &str,
        key: Option<Bytes>,
        value: Bytes,
        headers: Vec<Header>,
    ) -> Result<(u32, u64), PublishError>;
}

/// A message ready to be published
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Vec<Header>,
    /// One-line summary for logs
    pub summary: String,
}

/// Generates the next message to publish
pub trait MessageSource: Send {
    fn next_message(&mut self) -> Result<OutgoingMessage, PublishError>;
}

// ============================================================================
// Change-data messages
// ============================================================================

/// Builds change-data messages with a sequence counter owned by the instance
#[derive(Debug, Default)]
pub struct ChangeDataProducer {
    counter: u32,
}

impl ChangeDataProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages built so far
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Build the next message: one department create, plus an aggregation
    /// pattern update on every third message.
    pub fn next_change_message(&mut self) -> ChangeDataMessage {
        self.counter += 1;
        let n = self.counter;

        let mut records = vec![ChangeRecord::new(
            OperationType::Create,
            change_record::Data::Department(sample_department(n)),
        )];
        if n % 3 == 0 {
            records.push(ChangeRecord::new(
                OperationType::Update,
                change_record::Data::AggregationPattern(sample_aggregation_pattern(n)),
            ));
        }

        ChangeDataMessage {
            request_id: uuid::Uuid::new_v4().to_string(),
            message_number: n,
            total_message_count: n + 1,
            tenant_uid: SAMPLE_TENANT_UID,
            records,
        }
    }
}

impl MessageSource for ChangeDataProducer {
    fn next_message(&mut self) -> Result<OutgoingMessage, PublishError> {
        let msg = self.next_change_message();
        let headers = vec![
            Header::new("request-id", msg.request_id.clone()),
            Header::new("message-number", msg.message_number.to_string()),
            Header::new("tenant-uid", msg.tenant_uid.to_string()),
            Header::new(CONTENT_KIND_HEADER, PROTOBUF_CONTENT_KIND),
            Header::new("message-type", "ChangeDataMessage"),
        ];
        Ok(OutgoingMessage {
            key: Some(Bytes::from(msg.request_id.clone())),
            value: Bytes::from(msg.encode_to_vec()),
            headers,
            summary: format!(
                "ChangeDataMessage request_id={} records={}",
                msg.request_id,
                msg.records.len()
            ),
        })
    }
}

fn sample_department(n: u32) -> Department {
    let now = chrono::Utc::now();
    Department {
        id: format!("dept-{n}"),
        biid: format!("biid-{n}"),
        r#type: "department".to_string(),
        tenant_uid: SAMPLE_TENANT_UID,
        code: format!("DEPT{n:03}"),
        name: format!("Department {n}"),
        short_name: format!("Dept{n}"),
        valid_from: now.format("%Y-%m-%d").to_string(),
        valid_to: None,
        transaction_from: now.timestamp_millis(),
        transaction_to: None,
        transaction_from_by: SAMPLE_USER_ID,
        transaction_from_by_name: SAMPLE_USER_NAME.to_string(),
        transaction_from_by_srv: SAMPLE_SERVICE.to_string(),
        disp_order: n,
        search_key: format!("dept{n}"),
        version: 1,
        parent_biid: None,
        parent_code: None,
        parent_name: None,
    }
}

fn sample_aggregation_pattern(n: u32) -> AggregationPattern {
    AggregationPattern {
        id: format!("agg-{n}"),
        biid: format!("agg-biid-{n}"),
        tenant_uid: SAMPLE_TENANT_UID,
        name: format!("Aggregation Pattern {n}"),
        transaction_from: chrono::Utc::now().timestamp_millis(),
        transaction_to: None,
        transaction_from_by: SAMPLE_USER_ID,
        transaction_from_by_name: SAMPLE_USER_NAME.to_string(),
        transaction_from_by_srv: SAMPLE_SERVICE.to_string(),
        version: 1,
    }
}

// ============================================================================
// JSON / plain-text messages
// ============================================================================

/// Alternates JSON (odd counter) and plain-text (even counter) messages
#[derive(Debug, Default)]
pub struct MixedProducer {
    counter: u64,
}

impl MixedProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}

impl MessageSource for MixedProducer {
    fn next_message(&mut self) -> Result<OutgoingMessage, PublishError> {
        self.counter += 1;
        let n = self.counter;

        if n % 2 == 0 {
            let content = format!(
                "Plain text message #{n} - ID: {} - Time: {}",
                uuid::Uuid::new_v4(),
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            );
            return Ok(OutgoingMessage {
                key: Some(Bytes::from(format!("key-{n}"))),
                value: Bytes::from(content.clone()),
                headers: vec![
                    Header::new("source", SAMPLE_SERVICE),
                    Header::new("counter", n.to_string()),
                    Header::new("type", "plain-text"),
                ],
                summary: content,
            });
        }

        let mut msg = JsonMessage::new(n, format!("JSON message content #{n}"));
        let timestamp = msg
            .timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        msg.add_header("message-id", msg.id.clone());
        msg.add_header("counter", n.to_string());
        msg.add_header("timestamp", timestamp.clone());
        msg.add_header("type", "json");

        let json = msg
            .to_json()
            .map_err(|e| PublishError::Encode(e.to_string()))?;
        Ok(OutgoingMessage {
            key: Some(Bytes::from(msg.id.clone())),
            value: Bytes::from(json),
            headers: vec![
                Header::new("message-id", msg.id.clone()),
                Header::new("counter", n.to_string()),
                Header::new("timestamp", timestamp),
                Header::new("type", "json"),
            ],
            summary: msg.to_string(),
        })
    }
}

// ============================================================================
// Producer loop
// ============================================================================

/// Publishes messages from a [`MessageSource`] to one topic
pub struct Producer<S> {
    publisher: Arc<dyn Publisher>,
    topic: String,
    source: S,
}

impl<S: MessageSource> Producer<S> {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>, source: S) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            source,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Build and publish one message
    pub async fn send_next(&mut self) -> Result<(u32, u64), PublishError> {
        let msg = self.source.next_message()?;
        let (partition, offset) = self
            .publisher
            .publish(&self.topic, msg.key, msg.value, msg.headers)
            .await?;
        info!(
            topic = %self.topic,
            partition,
            offset,
            "Sent {}",
            msg.summary
        );
        Ok((partition, offset))
    }

    /// Publish on every tick until cancelled. Publish failures are logged
    /// and the loop keeps going. Returns the number of messages sent.
    pub async fn run(mut self, cancel: CancellationToken, interval: Duration) -> u64 {
        info!(topic = %self.topic, ?interval, "Producer started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut sent = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.send_next().await {
                        Ok(_) => sent += 1,
                        Err(e) => warn!(topic = %self.topic, error = %e, "Failed to send message"),
                    }
                }
            }
        }

        info!(topic = %self.topic, sent, "Producer stopped");
        sent
    }
}
