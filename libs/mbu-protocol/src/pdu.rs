//! Request and response PDUs
//!
//! A PDU is the function code followed by its data, without unit id,
//! MBAP header or CRC.

use tracing::debug;

use crate::bits::{pack_bits, unpack_bits};
use crate::constants::{
    ExceptionCode, FunctionCode, COIL_OFF, COIL_ON, EXCEPTION_FLAG, MAX_READ_COILS,
    MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::error::ProtocolError;

fn read_u16(pdu: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    pdu.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| {
            ProtocolError::malformed(format!(
                "need {} bytes, have {}",
                offset + 2,
                pdu.len()
            ))
        })
}

fn read_u8(pdu: &[u8], offset: usize) -> Result<u8, ProtocolError> {
    pdu.get(offset).copied().ok_or_else(|| {
        ProtocolError::malformed(format!("need {} bytes, have {}", offset + 1, pdu.len()))
    })
}

fn check_quantity(function: u8, quantity: u16, max: usize) -> Result<(), ProtocolError> {
    if quantity == 0 || usize::from(quantity) > max {
        return Err(ProtocolError::illegal_value(
            function,
            format!("quantity {} not in 1..={}", quantity, max),
        ));
    }
    Ok(())
}

/// A decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { start: u16, count: u16 },
    ReadDiscreteInputs { start: u16, count: u16 },
    ReadHoldingRegisters { start: u16, count: u16 },
    ReadInputRegisters { start: u16, count: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { start: u16, values: Vec<bool> },
    WriteMultipleRegisters { start: u16, values: Vec<u16> },
}

impl Request {
    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadCoils { .. } => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Number of elements the request reads or writes
    pub fn count(&self) -> usize {
        match self {
            Self::ReadCoils { count, .. }
            | Self::ReadDiscreteInputs { count, .. }
            | Self::ReadHoldingRegisters { count, .. }
            | Self::ReadInputRegisters { count, .. } => usize::from(*count),
            Self::WriteSingleCoil { .. } | Self::WriteSingleRegister { .. } => 1,
            Self::WriteMultipleCoils { values, .. } => values.len(),
            Self::WriteMultipleRegisters { values, .. } => values.len(),
        }
    }

    /// Decode a request PDU.
    ///
    /// Unknown functions yield `IllegalFunction`, bad quantities or byte
    /// counts `IllegalDataValue`, short PDUs `Malformed`.
    pub fn decode(pdu: &[u8]) -> Result<Self, ProtocolError> {
        let fc_byte = *pdu
            .first()
            .ok_or_else(|| ProtocolError::malformed("empty PDU"))?;
        let function = FunctionCode::try_from(fc_byte)?;

        let request = match function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                let start = read_u16(pdu, 1)?;
                let count = read_u16(pdu, 3)?;
                let max = match function {
                    FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => MAX_READ_COILS,
                    _ => MAX_READ_REGISTERS,
                };
                check_quantity(fc_byte, count, max)?;
                match function {
                    FunctionCode::ReadCoils => Self::ReadCoils { start, count },
                    FunctionCode::ReadDiscreteInputs => Self::ReadDiscreteInputs { start, count },
                    FunctionCode::ReadHoldingRegisters => {
                        Self::ReadHoldingRegisters { start, count }
                    },
                    _ => Self::ReadInputRegisters { start, count },
                }
            },
            FunctionCode::WriteSingleCoil => {
                let address = read_u16(pdu, 1)?;
                let raw = read_u16(pdu, 3)?;
                let value = match raw {
                    COIL_ON => true,
                    COIL_OFF => false,
                    other => {
                        return Err(ProtocolError::illegal_value(
                            fc_byte,
                            format!("coil value 0x{:04X}", other),
                        ))
                    },
                };
                Self::WriteSingleCoil { address, value }
            },
            FunctionCode::WriteSingleRegister => Self::WriteSingleRegister {
                address: read_u16(pdu, 1)?,
                value: read_u16(pdu, 3)?,
            },
            FunctionCode::WriteMultipleCoils => {
                let start = read_u16(pdu, 1)?;
                let count = read_u16(pdu, 3)?;
                let byte_count = usize::from(read_u8(pdu, 5)?);
                check_quantity(fc_byte, count, MAX_WRITE_COILS)?;
                if byte_count != usize::from(count).div_ceil(8) {
                    return Err(ProtocolError::illegal_value(
                        fc_byte,
                        format!("byte count {} for {} coils", byte_count, count),
                    ));
                }
                let data = pdu
                    .get(6..6 + byte_count)
                    .ok_or_else(|| ProtocolError::malformed("coil data truncated"))?;
                Self::WriteMultipleCoils {
                    start,
                    values: unpack_bits(data, usize::from(count)),
                }
            },
            FunctionCode::WriteMultipleRegisters => {
                let start = read_u16(pdu, 1)?;
                let count = read_u16(pdu, 3)?;
                let byte_count = usize::from(read_u8(pdu, 5)?);
                check_quantity(fc_byte, count, MAX_WRITE_REGISTERS)?;
                if byte_count != usize::from(count) * 2 {
                    return Err(ProtocolError::illegal_value(
                        fc_byte,
                        format!("byte count {} for {} registers", byte_count, count),
                    ));
                }
                let data = pdu
                    .get(6..6 + byte_count)
                    .ok_or_else(|| ProtocolError::malformed("register data truncated"))?;
                Self::WriteMultipleRegisters {
                    start,
                    values: data
                        .chunks_exact(2)
                        .map(|b| u16::from_be_bytes([b[0], b[1]]))
                        .collect(),
                }
            },
        };

        debug!(
            "Request decoded: FC={:02X} ({}), count={}",
            fc_byte,
            function.name(),
            request.count()
        );
        Ok(request)
    }

    /// Encode the request PDU
    pub fn encode(&self) -> Vec<u8> {
        let mut pdu = vec![self.function().code()];
        match self {
            Self::ReadCoils { start, count }
            | Self::ReadDiscreteInputs { start, count }
            | Self::ReadHoldingRegisters { start, count }
            | Self::ReadInputRegisters { start, count } => {
                pdu.extend_from_slice(&start.to_be_bytes());
                pdu.extend_from_slice(&count.to_be_bytes());
            },
            Self::WriteSingleCoil { address, value } => {
                pdu.extend_from_slice(&address.to_be_bytes());
                let raw = if *value { COIL_ON } else { COIL_OFF };
                pdu.extend_from_slice(&raw.to_be_bytes());
            },
            Self::WriteSingleRegister { address, value } => {
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&value.to_be_bytes());
            },
            Self::WriteMultipleCoils { start, values } => {
                let packed = pack_bits(values);
                pdu.extend_from_slice(&start.to_be_bytes());
                pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
                pdu.push(packed.len() as u8);
                pdu.extend_from_slice(&packed);
            },
            Self::WriteMultipleRegisters { start, values } => {
                pdu.extend_from_slice(&start.to_be_bytes());
                pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
                pdu.push((values.len() * 2) as u8);
                for value in values {
                    pdu.extend_from_slice(&value.to_be_bytes());
                }
            },
        }
        pdu
    }
}

/// A successful reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { start: u16, count: u16 },
    WriteMultipleRegisters { start: u16, count: u16 },
}

impl Response {
    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadCoils(_) => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Number of elements read or acknowledged as written
    pub fn count(&self) -> usize {
        match self {
            Self::ReadCoils(values) | Self::ReadDiscreteInputs(values) => values.len(),
            Self::ReadHoldingRegisters(values) | Self::ReadInputRegisters(values) => values.len(),
            Self::WriteSingleCoil { .. } | Self::WriteSingleRegister { .. } => 1,
            Self::WriteMultipleCoils { count, .. } | Self::WriteMultipleRegisters { count, .. } => {
                usize::from(*count)
            },
        }
    }

    /// Encode the reply PDU
    pub fn encode(&self) -> Vec<u8> {
        let mut pdu = vec![self.function().code()];
        match self {
            Self::ReadCoils(values) | Self::ReadDiscreteInputs(values) => {
                let packed = pack_bits(values);
                pdu.push(packed.len() as u8);
                pdu.extend_from_slice(&packed);
            },
            Self::ReadHoldingRegisters(values) | Self::ReadInputRegisters(values) => {
                pdu.push((values.len() * 2) as u8);
                for value in values {
                    pdu.extend_from_slice(&value.to_be_bytes());
                }
            },
            Self::WriteSingleCoil { address, value } => {
                pdu.extend_from_slice(&address.to_be_bytes());
                let raw = if *value { COIL_ON } else { COIL_OFF };
                pdu.extend_from_slice(&raw.to_be_bytes());
            },
            Self::WriteSingleRegister { address, value } => {
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&value.to_be_bytes());
            },
            Self::WriteMultipleCoils { start, count }
            | Self::WriteMultipleRegisters { start, count } => {
                pdu.extend_from_slice(&start.to_be_bytes());
                pdu.extend_from_slice(&count.to_be_bytes());
            },
        }
        pdu
    }

    /// Decode the reply to `request`.
    ///
    /// An exception reply becomes `ProtocolError::Exception`.
    pub fn decode(request: &Request, pdu: &[u8]) -> Result<Self, ProtocolError> {
        let fc_byte = read_u8(pdu, 0)?;
        let expected = request.function().code();

        if fc_byte == expected | EXCEPTION_FLAG {
            return Err(ProtocolError::Exception {
                function: expected,
                code: read_u8(pdu, 1)?,
            });
        }
        if fc_byte != expected {
            return Err(ProtocolError::UnexpectedResponse(format!(
                "function 0x{:02X} in reply to 0x{:02X}",
                fc_byte, expected
            )));
        }

        let response = match request {
            Request::ReadCoils { count, .. } | Request::ReadDiscreteInputs { count, .. } => {
                let byte_count = usize::from(read_u8(pdu, 1)?);
                let data = pdu
                    .get(2..2 + byte_count)
                    .ok_or_else(|| ProtocolError::malformed("bit data truncated"))?;
                // A short reply decodes to fewer values; the caller compares counts.
                let available = (byte_count * 8).min(usize::from(*count));
                let values = unpack_bits(data, available);
                if matches!(request, Request::ReadCoils { .. }) {
                    Self::ReadCoils(values)
                } else {
                    Self::ReadDiscreteInputs(values)
                }
            },
            Request::ReadHoldingRegisters { .. } | Request::ReadInputRegisters { .. } => {
                let byte_count = usize::from(read_u8(pdu, 1)?);
                if byte_count % 2 != 0 {
                    return Err(ProtocolError::malformed(format!(
                        "odd register byte count {}",
                        byte_count
                    )));
                }
                let data = pdu
                    .get(2..2 + byte_count)
                    .ok_or_else(|| ProtocolError::malformed("register data truncated"))?;
                let values = data
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();
                if matches!(request, Request::ReadHoldingRegisters { .. }) {
                    Self::ReadHoldingRegisters(values)
                } else {
                    Self::ReadInputRegisters(values)
                }
            },
            Request::WriteSingleCoil { .. } => Self::WriteSingleCoil {
                address: read_u16(pdu, 1)?,
                value: read_u16(pdu, 3)? == COIL_ON,
            },
            Request::WriteSingleRegister { .. } => Self::WriteSingleRegister {
                address: read_u16(pdu, 1)?,
                value: read_u16(pdu, 3)?,
            },
            Request::WriteMultipleCoils { .. } => Self::WriteMultipleCoils {
                start: read_u16(pdu, 1)?,
                count: read_u16(pdu, 3)?,
            },
            Request::WriteMultipleRegisters { .. } => Self::WriteMultipleRegisters {
                start: read_u16(pdu, 1)?,
                count: read_u16(pdu, 3)?,
            },
        };
        Ok(response)
    }
}

/// Encode an exception reply PDU for `function`
pub fn encode_exception(function: u8, code: ExceptionCode) -> Vec<u8> {
    vec![function | EXCEPTION_FLAG, code.code()]
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_decode_read_holding_registers() {
        let request = Request::decode(&[0x03, 0x00, 0x6B, 0x00, 0x03]).unwrap();
        assert_eq!(
            request,
            Request::ReadHoldingRegisters {
                start: 0x6B,
                count: 3
            }
        );
        assert_eq!(request.count(), 3);
    }

    #[test]
    fn test_decode_rejects_unknown_function() {
        assert_eq!(
            Request::decode(&[0x2B, 0x0E, 0x01]),
            Err(ProtocolError::IllegalFunction(0x2B))
        );
        assert!(matches!(
            Request::decode(&[]),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_quantity() {
        // zero registers
        assert!(matches!(
            Request::decode(&[0x03, 0x00, 0x00, 0x00, 0x00]),
            Err(ProtocolError::IllegalDataValue { function: 0x03, .. })
        ));
        // 126 registers
        assert!(matches!(
            Request::decode(&[0x04, 0x00, 0x00, 0x00, 0x7E]),
            Err(ProtocolError::IllegalDataValue { .. })
        ));
        // 2001 coils
        assert!(matches!(
            Request::decode(&[0x01, 0x00, 0x00, 0x07, 0xD1]),
            Err(ProtocolError::IllegalDataValue { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_is_malformed() {
        assert!(matches!(
            Request::decode(&[0x03, 0x00]),
            Err(ProtocolError::Malformed(_))
        ));
        // byte count says 4 bytes follow, only 2 present
        assert!(matches!(
            Request::decode(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x01]),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_single_coil_values() {
        assert_eq!(
            Request::decode(&[0x05, 0x00, 0xAC, 0xFF, 0x00]).unwrap(),
            Request::WriteSingleCoil {
                address: 0xAC,
                value: true
            }
        );
        assert!(matches!(
            Request::decode(&[0x05, 0x00, 0xAC, 0x12, 0x34]),
            Err(ProtocolError::IllegalDataValue { .. })
        ));
    }

    #[test]
    fn test_decode_write_multiple_coils() {
        // 10 coils starting at 0x13: CD 01
        let request =
            Request::decode(&[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]).unwrap();
        match &request {
            Request::WriteMultipleCoils { start, values } => {
                assert_eq!(*start, 0x13);
                assert_eq!(values.len(), 10);
                assert!(values[0] && !values[1] && values[8] && !values[9]);
            },
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            request.encode(),
            vec![0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );

        // byte count inconsistent with quantity
        assert!(matches!(
            Request::decode(&[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x01, 0xCD]),
            Err(ProtocolError::IllegalDataValue { .. })
        ));
    }

    #[test]
    fn test_encode_write_multiple_registers() {
        let request = Request::WriteMultipleRegisters {
            start: 1,
            values: vec![0x000A, 0x0102],
        };
        assert_eq!(
            request.encode(),
            vec![0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_response_encoding() {
        let reply = Response::ReadCoils(vec![true, false, true]);
        assert_eq!(reply.encode(), vec![0x01, 0x01, 0x05]);

        let reply = Response::ReadInputRegisters(vec![0x1234]);
        assert_eq!(reply.encode(), vec![0x04, 0x02, 0x12, 0x34]);

        let reply = Response::WriteMultipleRegisters { start: 0, count: 3 };
        assert_eq!(reply.encode(), vec![0x10, 0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_response_decode_for_request() {
        let request = Request::ReadCoils { start: 0, count: 3 };
        let reply = Response::decode(&request, &[0x01, 0x01, 0x05]).unwrap();
        assert_eq!(reply, Response::ReadCoils(vec![true, false, true]));
        assert_eq!(reply.count(), 3);

        let request = Request::ReadHoldingRegisters { start: 0, count: 2 };
        let reply = Response::decode(&request, &[0x03, 0x04, 0x00, 0x01, 0x00, 0x02]).unwrap();
        assert_eq!(reply, Response::ReadHoldingRegisters(vec![1, 2]));
    }

    #[test]
    fn test_response_decode_exception() {
        let request = Request::ReadCoils {
            start: 95,
            count: 10,
        };
        let pdu = encode_exception(0x01, ExceptionCode::IllegalDataAddress);
        assert_eq!(pdu, vec![0x81, 0x02]);
        assert_eq!(
            Response::decode(&request, &pdu),
            Err(ProtocolError::Exception {
                function: 0x01,
                code: 0x02
            })
        );
    }

    #[test]
    fn test_response_decode_mismatched_function() {
        let request = Request::ReadCoils { start: 0, count: 1 };
        assert!(matches!(
            Response::decode(&request, &[0x03, 0x02, 0x00, 0x00]),
            Err(ProtocolError::UnexpectedResponse(_))
        ));
    }
}
