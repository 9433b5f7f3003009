//! Modbus wire codec
//!
//! - [`pdu`]: requests and responses, independent of the transport
//! - [`frame`]: TCP (MBAP header) and RTU (unit id + CRC16) framing
//! - [`constants`]: size limits and function/exception codes
//! - [`stream`]: frame-at-a-time reads over tokio byte streams

pub mod bits;
pub mod constants;
pub mod error;
pub mod frame;
pub mod pdu;
pub mod stream;

pub use constants::{exception_description, ExceptionCode, FunctionCode};
pub use error::ProtocolError;
pub use frame::{
    crc16, decode_adu, encode_adu, frame_length, Adu, AduHeader, Framing, Role, TransactionIds,
};
pub use pdu::{encode_exception, Request, Response};
pub use stream::{FramedStream, ReadOutcome};
