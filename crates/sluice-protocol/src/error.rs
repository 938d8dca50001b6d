//! Payload decoding errors

use thiserror::Error;

/// Failure to decode a record payload.
///
/// Decode failures never stop a partition; callers log them with the
/// record's partition and offset and move on.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The value is not a valid change-data protobuf message
    #[error("Invalid change-data payload: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// The value is neither JSON nor UTF-8 text
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Application-level rejection raised by a record handler
    #[error("Rejected record: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::Rejected("bad tenant".to_string());
        assert_eq!(err.to_string(), "Rejected record: bad tenant");

        let utf8 = std::str::from_utf8(&[0xc3, 0x28]).unwrap_err();
        let err = DecodeError::from(utf8);
        assert!(err.to_string().starts_with("Payload is not valid UTF-8"));
    }
}
