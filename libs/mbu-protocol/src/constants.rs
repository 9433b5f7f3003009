//! Modbus protocol constants
//!
//! - Maximum PDU size: 253 bytes (RS485 ADU limit of 256 bytes minus address and CRC)
//! - Register/coil limits are derived from that PDU size

use std::fmt;

use crate::error::ProtocolError;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length up to and including the length field
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2)
/// The unit id that follows is counted by the length field.
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size per Modbus specification
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Smallest valid MBAP length field value (Unit ID + function code)
pub const MIN_MBAP_LENGTH: usize = 2;

/// Largest TCP ADU: MBAP header + unit id + PDU
pub const MAX_TCP_ADU_SIZE: usize = MBAP_HEADER_LEN + MAX_MBAP_LENGTH;

/// Smallest RTU frame: unit id + function code + CRC(2)
pub const MIN_RTU_FRAME_LEN: usize = 4;

/// Largest RTU frame: unit id + PDU + CRC(2)
pub const MAX_RTU_ADU_SIZE: usize = 1 + MAX_PDU_SIZE + 2;

/// Unit id addressing every device on a serial line; never answered
pub const BROADCAST_UNIT_ID: u8 = 0;

/// Coil "on" value in FC05 requests and replies
pub const COIL_ON: u16 = 0xFF00;

/// Coil "off" value in FC05 requests and replies
pub const COIL_OFF: u16 = 0x0000;

/// Bit set on the function code of an exception reply
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Operation Limits
// ============================================================================

/// Maximum registers for FC03/FC04: 1 + 1 + N*2 <= 253
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum registers for FC16: 1 + 2 + 2 + 1 + N*2 <= 253
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Maximum coils for FC01/FC02
pub const MAX_READ_COILS: usize = 2000;

/// Maximum coils for FC15 (0x7B0)
pub const MAX_WRITE_COILS: usize = 1968;

// ============================================================================
// Function codes
// ============================================================================

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub const ALL: [FunctionCode; 8] = [
        Self::ReadCoils,
        Self::ReadDiscreteInputs,
        Self::ReadHoldingRegisters,
        Self::ReadInputRegisters,
        Self::WriteSingleCoil,
        Self::WriteSingleRegister,
        Self::WriteMultipleCoils,
        Self::WriteMultipleRegisters,
    ];

    pub fn code(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::WriteSingleCoil
                | Self::WriteSingleRegister
                | Self::WriteMultipleCoils
                | Self::WriteMultipleRegisters
        )
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|fc| fc.code() == code)
            .ok_or(ProtocolError::IllegalFunction(code))
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(0x{:02X}) {}", self.code(), self.name())
    }
}

// ============================================================================
// Exception codes
// ============================================================================

/// Exception codes the server produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
}

impl ExceptionCode {
    pub fn code(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
        }
    }

    pub fn description(self) -> &'static str {
        exception_description(self.code())
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Human readable text for any exception code seen on the wire
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MBAP_HEADER_LEN, 6);
        assert_eq!(MAX_PDU_SIZE, 253);
        assert_eq!(MAX_MBAP_LENGTH, 254);
        assert_eq!(MAX_TCP_ADU_SIZE, 260);
        assert_eq!(MAX_RTU_ADU_SIZE, 256);
    }

    #[test]
    fn test_register_and_coil_limits() {
        assert!(1 + 1 + MAX_READ_REGISTERS * 2 <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + MAX_WRITE_REGISTERS * 2 <= MAX_PDU_SIZE);
        assert!(1 + 1 + MAX_READ_COILS.div_ceil(8) <= MAX_PDU_SIZE);
        assert!(1 + 2 + 2 + 1 + MAX_WRITE_COILS.div_ceil(8) <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_function_code_lookup() {
        assert_eq!(FunctionCode::try_from(0x10).unwrap(), FunctionCode::WriteMultipleRegisters);
        assert_eq!(FunctionCode::try_from(0x03).unwrap().name(), "Read Holding Registers");
        assert!(matches!(
            FunctionCode::try_from(0x2B),
            Err(ProtocolError::IllegalFunction(0x2B))
        ));
        for fc in FunctionCode::ALL {
            assert_eq!(FunctionCode::try_from(fc.code()).unwrap(), fc);
        }
    }

    #[test]
    fn test_exception_descriptions() {
        assert_eq!(ExceptionCode::IllegalDataAddress.code(), 2);
        assert_eq!(ExceptionCode::IllegalFunction.description(), "Illegal Function");
        assert_eq!(exception_description(0x0B), "Gateway Target Device Failed to Respond");
        assert_eq!(exception_description(0x42), "Unknown Exception");
    }
}
