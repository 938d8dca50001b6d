//! Records as read from a partition

use bytes::Bytes;
use std::fmt;

/// Header carrying the payload kind used to select a decoder
pub const CONTENT_KIND_HEADER: &str = "content-kind";

/// `content-kind` value that selects the change-record decoder
pub const PROTOBUF_CONTENT_KIND: &str = "application/x-protobuf";

/// A topic-partition pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    /// Topic name
    pub topic: String,
    /// Partition id within the topic
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A single record header. Header order is preserved and keys may repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Bytes,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An immutable record read from one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Topic the record belongs to
    pub topic: String,
    /// Partition the record belongs to
    pub partition: u32,
    /// Offset within the partition
    pub offset: u64,
    /// Record key (empty when the producer sent none)
    pub key: Bytes,
    /// Record value
    pub value: Bytes,
    /// Timestamp in milliseconds since epoch
    pub timestamp: i64,
    /// Ordered headers, duplicates allowed
    pub headers: Vec<Header>,
}

impl Record {
    /// Create a record with no key and no headers
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        offset: u64,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: Bytes::new(),
            value: value.into(),
            timestamp: 0,
            headers: Vec::new(),
        }
    }

    /// Set the key
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = key.into();
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Append a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    /// Topic-partition this record was read from
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Look up a header value. When a key repeats, the last occurrence wins.
    pub fn header(&self, key: &str) -> Option<&Bytes> {
        self.headers
            .iter()
            .rev()
            .find(|h| h.key == key)
            .map(|h| &h.value)
    }

    /// The `content-kind` header as a string, if present and valid UTF-8
    pub fn content_kind(&self) -> Option<&str> {
        self.header(CONTENT_KIND_HEADER)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Size of key, value and headers in bytes
    pub fn size(&self) -> usize {
        let header_size: usize = self
            .headers
            .iter()
            .map(|h| h.key.len() + h.value.len())
            .sum();
        self.key.len() + self.value.len() + header_size
    }
}
