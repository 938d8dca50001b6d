//! Sluice record model and payload codecs
//!
//! This crate defines the types shared between producers and consumer groups:
//! the [`Record`] read from a partition, the protobuf change-data schema, the
//! JSON message model, and the header-driven [`decode`] entry point.
//!
//! # Example
//!
//! ```rust
//! use sluice_protocol::{decode, DecodedPayload, Record};
//!
//! let record = Record::new("events", 0, 0, "hello");
//! assert_eq!(decode(&record).unwrap(), DecodedPayload::Text("hello".into()));
//! ```

pub mod change;
mod decode;
mod error;
mod message;
mod record;

pub use change::{
    AggregationPattern, AggregationPatternDepartment, ChangeDataMessage, ChangeKind, ChangeRecord,
    Department, OperationType,
};
pub use decode::{decode, DecodedPayload};
pub use error::DecodeError;
pub use message::JsonMessage;
pub use record::{Header, Record, TopicPartition, CONTENT_KIND_HEADER, PROTOBUF_CONTENT_KIND};
