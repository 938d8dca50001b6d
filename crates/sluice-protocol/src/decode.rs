//! Header-driven payload decoding
//!
//! A `content-kind: application/x-protobuf` header selects the change-record
//! decoder. Anything else (including no header at all) goes through the
//! fallback path: a [`JsonMessage`] if the value parses as one, otherwise
//! UTF-8 text.

use crate::change::ChangeDataMessage;
use crate::error::DecodeError;
use crate::message::JsonMessage;
use crate::record::{Record, PROTOBUF_CONTENT_KIND};

/// A decoded record value
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    ChangeData(ChangeDataMessage),
    Json(JsonMessage),
    Text(String),
}

impl DecodedPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            DecodedPayload::ChangeData(_) => "change-data",
            DecodedPayload::Json(_) => "json",
            DecodedPayload::Text(_) => "text",
        }
    }
}

/// Decode a record's value according to its `content-kind` header
pub fn decode(record: &Record) -> Result<DecodedPayload, DecodeError> {
    match record.content_kind() {
        Some(PROTOBUF_CONTENT_KIND) => Ok(DecodedPayload::ChangeData(
            ChangeDataMessage::decode_from(&record.value)?,
        )),
        _ => decode_fallback(&record.value),
    }
}

fn decode_fallback(value: &[u8]) -> Result<DecodedPayload, DecodeError> {
    if let Ok(msg) = serde_json::from_slice::<JsonMessage>(value) {
        return Ok(DecodedPayload::Json(msg));
    }
    let text = std::str::from_utf8(value)?;
    Ok(DecodedPayload::Text(text.to_string()))
}
