//! Change-data records (protobuf)
//!
//! Messages are declared with `prost` derives rather than generated from a
//! `.proto` file, so the crate builds without `protoc`. Field tags are part
//! of the wire contract with producers and must not be renumbered.
//!
//! ```text
//! message ChangeDataMessage {
//!   string request_id = 1;
//!   uint32 message_number = 2;
//!   uint32 total_message_count = 3;
//!   uint64 tenant_uid = 4;
//!   repeated ChangeRecord records = 5;
//! }
//!
//! message ChangeRecord {
//!   OperationType operation_type = 1;
//!   oneof data {
//!     Department department = 2;
//!     AggregationPattern aggregation_pattern = 3;
//!     AggregationPatternDepartment aggregation_pattern_department = 4;
//!   }
//! }
//! ```

use crate::error::DecodeError;
use prost::Message;

/// A batch of row changes emitted by one upstream request
#[derive(Clone, PartialEq, Message)]
pub struct ChangeDataMessage {
    #[prost(string, tag = "1")]
    pub request_id: String,
    #[prost(uint32, tag = "2")]
    pub message_number: u32,
    #[prost(uint32, tag = "3")]
    pub total_message_count: u32,
    #[prost(uint64, tag = "4")]
    pub tenant_uid: u64,
    #[prost(message, repeated, tag = "5")]
    pub records: Vec<ChangeRecord>,
}

impl ChangeDataMessage {
    /// Decode from protobuf bytes
    pub fn decode_from(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self::decode(bytes)?)
    }
}

/// One row change
#[derive(Clone, PartialEq, Message)]
pub struct ChangeRecord {
    #[prost(enumeration = "OperationType", tag = "1")]
    pub operation_type: i32,
    #[prost(oneof = "change_record::Data", tags = "2, 3, 4")]
    pub data: Option<change_record::Data>,
}

pub mod change_record {
    /// Row payload
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Data {
        #[prost(message, tag = "2")]
        Department(super::Department),
        #[prost(message, tag = "3")]
        AggregationPattern(super::AggregationPattern),
        #[prost(message, tag = "4")]
        AggregationPatternDepartment(super::AggregationPatternDepartment),
    }
}

/// Kind of row change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum OperationType {
    Unspecified = 0,
    Create = 1,
    Update = 2,
    Delete = 3,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Unspecified => "UNSPECIFIED",
            OperationType::Create => "CREATE",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Department {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub biid: String,
    #[prost(string, tag = "3")]
    pub r#type: String,
    #[prost(uint64, tag = "4")]
    pub tenant_uid: u64,
    #[prost(string, tag = "5")]
    pub code: String,
    #[prost(string, tag = "6")]
    pub name: String,
    #[prost(string, tag = "7")]
    pub short_name: String,
    /// ISO-8601 calendar date
    #[prost(string, tag = "8")]
    pub valid_from: String,
    #[prost(string, optional, tag = "9")]
    pub valid_to: Option<String>,
    /// Milliseconds since epoch
    #[prost(int64, tag = "10")]
    pub transaction_from: i64,
    #[prost(int64, optional, tag = "11")]
    pub transaction_to: Option<i64>,
    #[prost(uint64, tag = "12")]
    pub transaction_from_by: u64,
    #[prost(string, tag = "13")]
    pub transaction_from_by_name: String,
    #[prost(string, tag = "14")]
    pub transaction_from_by_srv: String,
    #[prost(uint32, tag = "15")]
    pub disp_order: u32,
    #[prost(string, tag = "16")]
    pub search_key: String,
    #[prost(uint32, tag = "17")]
    pub version: u32,
    #[prost(string, optional, tag = "18")]
    pub parent_biid: Option<String>,
    #[prost(string, optional, tag = "19")]
    pub parent_code: Option<String>,
    #[prost(string, optional, tag = "20")]
    pub parent_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AggregationPattern {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub biid: String,
    #[prost(uint64, tag = "3")]
    pub tenant_uid: u64,
    #[prost(string, tag = "4")]
    pub name: String,
    #[prost(int64, tag = "5")]
    pub transaction_from: i64,
    #[prost(int64, optional, tag = "6")]
    pub transaction_to: Option<i64>,
    #[prost(uint64, tag = "7")]
    pub transaction_from_by: u64,
    #[prost(string, tag = "8")]
    pub transaction_from_by_name: String,
    #[prost(string, tag = "9")]
    pub transaction_from_by_srv: String,
    #[prost(uint32, tag = "10")]
    pub version: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct AggregationPatternDepartment {
    #[prost(string, tag = "1")]
    pub aggregation_pattern_id: String,
    #[prost(string, tag = "2")]
    pub department_biid: String,
    #[prost(string, tag = "3")]
    pub path: String,
}

/// Borrowed view over a change record's payload.
///
/// `Unknown` is returned when the oneof is absent on the wire, which is what
/// prost produces for a payload tag this build does not know about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeKind<'a> {
    Department(&'a Department),
    AggregationPattern(&'a AggregationPattern),
    AggregationPatternDepartment(&'a AggregationPatternDepartment),
    Unknown,
}

impl ChangeKind<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            ChangeKind::Department(_) => "department",
            ChangeKind::AggregationPattern(_) => "aggregation_pattern",
            ChangeKind::AggregationPatternDepartment(_) => "aggregation_pattern_department",
            ChangeKind::Unknown => "unknown",
        }
    }
}

impl ChangeRecord {
    /// Build a record for the given operation and payload
    pub fn new(operation: OperationType, data: change_record::Data) -> Self {
        Self {
            operation_type: operation as i32,
            data: Some(data),
        }
    }

    /// Payload view with an explicit tag for unrecognised kinds
    pub fn kind(&self) -> ChangeKind<'_> {
        use change_record::Data;
        match &self.data {
            Some(Data::Department(d)) => ChangeKind::Department(d),
            Some(Data::AggregationPattern(a)) => ChangeKind::AggregationPattern(a),
            Some(Data::AggregationPatternDepartment(a)) => {
                ChangeKind::AggregationPatternDepartment(a)
            }
            None => ChangeKind::Unknown,
        }
    }
}
