//! ADU framing for TCP and RTU
//!
//! TCP: `transaction id(2) | protocol id(2) = 0 | length(2) | unit id(1) | PDU`
//! RTU: `unit id(1) | PDU | CRC16 little-endian(2)`

use tracing::debug;

use crate::constants::{
    EXCEPTION_FLAG, MAX_MBAP_LENGTH, MAX_RTU_ADU_SIZE, MBAP_HEADER_LEN, MIN_MBAP_LENGTH,
    MIN_RTU_FRAME_LEN,
};
use crate::error::ProtocolError;

/// Frame layout on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// MBAP header, used on TCP
    Tcp,
    /// Unit id + CRC, used on serial lines
    Rtu,
}

/// Which side produced the bytes being framed; RTU lengths depend on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Request,
    Response,
}

/// Addressing part of an ADU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AduHeader {
    Tcp { transaction_id: u16, unit_id: u8 },
    Rtu { unit_id: u8 },
}

impl AduHeader {
    pub fn unit_id(&self) -> u8 {
        match self {
            Self::Tcp { unit_id, .. } | Self::Rtu { unit_id } => *unit_id,
        }
    }

    pub fn framing(&self) -> Framing {
        match self {
            Self::Tcp { .. } => Framing::Tcp,
            Self::Rtu { .. } => Framing::Rtu,
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adu {
    pub header: AduHeader,
    pub pdu: Vec<u8>,
}

/// Calculate CRC16 checksum (Modbus RTU)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Build a complete frame around `pdu`
pub fn encode_adu(header: AduHeader, pdu: &[u8]) -> Vec<u8> {
    match header {
        AduHeader::Tcp {
            transaction_id,
            unit_id,
        } => {
            let length = (pdu.len() + 1) as u16;
            let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
            frame.extend_from_slice(&transaction_id.to_be_bytes());
            frame.extend_from_slice(&0u16.to_be_bytes());
            frame.extend_from_slice(&length.to_be_bytes());
            frame.push(unit_id);
            frame.extend_from_slice(pdu);
            frame
        },
        AduHeader::Rtu { unit_id } => {
            let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
            frame.push(unit_id);
            frame.extend_from_slice(pdu);
            let crc = crc16(&frame);
            frame.extend_from_slice(&crc.to_le_bytes());
            frame
        },
    }
}

fn check_mbap(buf: &[u8]) -> Result<usize, ProtocolError> {
    let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
    if protocol_id != 0 {
        return Err(ProtocolError::InvalidHeader(format!(
            "protocol id {}",
            protocol_id
        )));
    }
    let length = usize::from(u16::from_be_bytes([buf[4], buf[5]]));
    if !(MIN_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
        return Err(ProtocolError::InvalidHeader(format!("length {}", length)));
    }
    Ok(MBAP_HEADER_LEN + length)
}

fn rtu_length(role: Role, buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(&fc) = buf.get(1) else {
        return Ok(None);
    };
    // unit + fc + fields + crc
    let byte_count_at = |offset: usize, fixed: usize| -> Result<Option<usize>, ProtocolError> {
        Ok(buf.get(offset).map(|&count| fixed + usize::from(count)))
    };

    match role {
        Role::Request => match fc {
            0x01..=0x06 => Ok(Some(8)),
            0x0F | 0x10 => byte_count_at(6, 9),
            other => Err(ProtocolError::UnknownLength(other)),
        },
        Role::Response => {
            if fc & EXCEPTION_FLAG != 0 {
                return Ok(Some(5));
            }
            match fc {
                0x01..=0x04 => byte_count_at(2, 5),
                0x05 | 0x06 | 0x0F | 0x10 => Ok(Some(8)),
                other => Err(ProtocolError::UnknownLength(other)),
            }
        },
    }
}

/// Length of the frame at the start of `buf`.
///
/// `Ok(None)` means more bytes are needed before the length is known. For
/// RTU an unsupported function code yields `UnknownLength`; the caller then
/// has to fall back to inter-frame silence.
pub fn frame_length(framing: Framing, role: Role, buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    match framing {
        Framing::Tcp => {
            if buf.len() < MBAP_HEADER_LEN {
                return Ok(None);
            }
            check_mbap(buf).map(Some)
        },
        Framing::Rtu => {
            let len = rtu_length(role, buf)?;
            match len {
                Some(n) if n > MAX_RTU_ADU_SIZE => Err(ProtocolError::malformed(format!(
                    "RTU frame length {} exceeds {}",
                    n, MAX_RTU_ADU_SIZE
                ))),
                other => Ok(other),
            }
        },
    }
}

/// Split one complete frame into header and PDU
pub fn decode_adu(framing: Framing, frame: &[u8]) -> Result<Adu, ProtocolError> {
    match framing {
        Framing::Tcp => {
            if frame.len() < MBAP_HEADER_LEN + MIN_MBAP_LENGTH {
                return Err(ProtocolError::malformed(format!(
                    "TCP frame too short: {} bytes",
                    frame.len()
                )));
            }
            let total = check_mbap(frame)?;
            if frame.len() != total {
                return Err(ProtocolError::InvalidHeader(format!(
                    "length field says {} bytes, frame has {}",
                    total,
                    frame.len()
                )));
            }
            let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
            let unit_id = frame[6];
            debug!(
                "Parsed TCP frame: trans_id={:04X}, unit_id={}, pdu_len={}",
                transaction_id,
                unit_id,
                frame.len() - 7
            );
            Ok(Adu {
                header: AduHeader::Tcp {
                    transaction_id,
                    unit_id,
                },
                pdu: frame[7..].to_vec(),
            })
        },
        Framing::Rtu => {
            if frame.len() < MIN_RTU_FRAME_LEN {
                return Err(ProtocolError::malformed(format!(
                    "RTU frame too short: {} bytes",
                    frame.len()
                )));
            }
            let body_len = frame.len() - 2;
            let expected = crc16(&frame[..body_len]);
            let actual = u16::from_le_bytes([frame[body_len], frame[body_len + 1]]);
            if expected != actual {
                return Err(ProtocolError::CrcMismatch { expected, actual });
            }
            Ok(Adu {
                header: AduHeader::Rtu { unit_id: frame[0] },
                pdu: frame[1..body_len].to_vec(),
            })
        },
    }
}

/// Transaction id generator for TCP clients, skips zero on wrap
#[derive(Debug, Clone)]
pub struct TransactionIds {
    next: u16,
}

impl Default for TransactionIds {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl TransactionIds {
    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        if self.next == 0 {
            self.next = 1;
        }
        id
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_value() {
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
        let frame = encode_adu(AduHeader::Rtu { unit_id: 1 }, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&frame[6..], &[0x84, 0x0A]);
    }

    #[test]
    fn test_tcp_frame_build_parse() {
        let header = AduHeader::Tcp {
            transaction_id: 0x1234,
            unit_id: 7,
        };
        let frame = encode_adu(header, &[0x03, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(
            frame,
            vec![0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x07, 0x03, 0x00, 0x00, 0x00, 0x02]
        );
        assert_eq!(frame_length(Framing::Tcp, Role::Request, &frame).unwrap(), Some(12));

        let adu = decode_adu(Framing::Tcp, &frame).unwrap();
        assert_eq!(adu.header, header);
        assert_eq!(adu.pdu, vec![0x03, 0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_tcp_bad_header_is_fatal() {
        let frame = [0x00, 0x01, 0x00, 0x05, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        let err = frame_length(Framing::Tcp, Role::Request, &frame).unwrap_err();
        assert!(err.is_fatal());

        let frame = [0x00, 0x01, 0x00, 0x00, 0x04, 0x00];
        assert!(frame_length(Framing::Tcp, Role::Request, &frame)
            .unwrap_err()
            .is_fatal());

        assert_eq!(frame_length(Framing::Tcp, Role::Request, &frame[..4]).unwrap(), None);
    }

    #[test]
    fn test_rtu_frame_build_parse() {
        let frame = encode_adu(AduHeader::Rtu { unit_id: 0x11 }, &[0x06, 0x00, 0x01, 0x00, 0x03]);
        assert_eq!(frame_length(Framing::Rtu, Role::Request, &frame).unwrap(), Some(8));

        let adu = decode_adu(Framing::Rtu, &frame).unwrap();
        assert_eq!(adu.header.unit_id(), 0x11);
        assert_eq!(adu.pdu, vec![0x06, 0x00, 0x01, 0x00, 0x03]);
    }

    #[test]
    fn test_rtu_crc_mismatch_is_not_fatal() {
        let mut frame = encode_adu(AduHeader::Rtu { unit_id: 1 }, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        frame[7] ^= 0xFF;
        let err = decode_adu(Framing::Rtu, &frame).unwrap_err();
        assert!(matches!(err, ProtocolError::CrcMismatch { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_rtu_lengths() {
        // write multiple registers: byte count at offset 6
        let partial = [0x01, 0x10, 0x00, 0x00, 0x00, 0x02];
        assert_eq!(frame_length(Framing::Rtu, Role::Request, &partial).unwrap(), None);
        let header = [0x01, 0x10, 0x00, 0x00, 0x00, 0x02, 0x04];
        assert_eq!(frame_length(Framing::Rtu, Role::Request, &header).unwrap(), Some(13));

        // read response: byte count at offset 2
        assert_eq!(
            frame_length(Framing::Rtu, Role::Response, &[0x01, 0x03, 0x06]).unwrap(),
            Some(11)
        );
        // exception response
        assert_eq!(
            frame_length(Framing::Rtu, Role::Response, &[0x01, 0x83]).unwrap(),
            Some(5)
        );
        assert_eq!(
            frame_length(Framing::Rtu, Role::Request, &[0x01, 0x2B]),
            Err(ProtocolError::UnknownLength(0x2B))
        );
        assert_eq!(frame_length(Framing::Rtu, Role::Request, &[0x01]).unwrap(), None);
    }

    #[test]
    fn test_transaction_ids_skip_zero() {
        let mut ids = TransactionIds { next: 0xFFFF };
        assert_eq!(ids.next_id(), 0xFFFF);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(TransactionIds::default().next_id(), 1);
    }
}
