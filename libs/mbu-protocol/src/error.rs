//! Codec errors

use thiserror::Error;

use crate::constants::exception_description;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Function code not supported
    #[error("Illegal function 0x{0:02X}")]
    IllegalFunction(u8),

    /// Quantity or byte count out of the allowed range
    #[error("Illegal data value for function 0x{function:02X}: {reason}")]
    IllegalDataValue { function: u8, reason: String },

    /// PDU shorter than its function requires, or otherwise unreadable
    #[error("Malformed PDU: {0}")]
    Malformed(String),

    /// RTU frame whose checksum does not match
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// RTU frame whose length cannot be derived from its function code
    #[error("Cannot determine frame length for function 0x{0:02X}")]
    UnknownLength(u8),

    /// TCP header that cannot belong to a Modbus stream
    #[error("Invalid MBAP header: {0}")]
    InvalidHeader(String),

    /// Peer replied with an exception
    #[error("Exception 0x{code:02X} ({}) for function 0x{function:02X}", exception_description(*code))]
    Exception { function: u8, code: u8 },

    /// Reply does not match the request that was sent
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ProtocolError {
    pub fn illegal_value(function: u8, reason: impl Into<String>) -> Self {
        Self::IllegalDataValue {
            function,
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    /// The byte stream can no longer be split into frames.
    ///
    /// On TCP a bad MBAP header means the next frame boundary is unknown, so
    /// the connection has to be dropped. Everything else concerns one frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidHeader(_))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_only_header_errors_are_fatal() {
        assert!(ProtocolError::InvalidHeader("protocol id 1".into()).is_fatal());
        assert!(!ProtocolError::IllegalFunction(0x2B).is_fatal());
        assert!(!ProtocolError::CrcMismatch {
            expected: 1,
            actual: 2
        }
        .is_fatal());
        assert!(!ProtocolError::malformed("empty").is_fatal());
    }

    #[test]
    fn test_exception_message() {
        let err = ProtocolError::Exception {
            function: 0x03,
            code: 0x02,
        };
        assert_eq!(
            err.to_string(),
            "Exception 0x02 (Illegal Data Address) for function 0x03"
        );
    }
}
