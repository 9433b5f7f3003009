//! Supported function codes and the data each one carries

use errors::ConfigError;
use mbu_protocol::constants::{
    MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use mbu_protocol::FunctionCode;

/// Shape of the data a function reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// One value (write single coil/register)
    Single,
    /// Bit array, printed as `0x%02x`
    Bits,
    /// Register array, printed as `0x%04x`
    Words,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpec {
    pub code: FunctionCode,
    pub payload: Payload,
    pub is_write: bool,
}

pub const FUNCTIONS: [FunctionSpec; 8] = [
    FunctionSpec {
        code: FunctionCode::ReadCoils,
        payload: Payload::Bits,
        is_write: false,
    },
    FunctionSpec {
        code: FunctionCode::ReadDiscreteInputs,
        payload: Payload::Bits,
        is_write: false,
    },
    FunctionSpec {
        code: FunctionCode::ReadHoldingRegisters,
        payload: Payload::Words,
        is_write: false,
    },
    FunctionSpec {
        code: FunctionCode::ReadInputRegisters,
        payload: Payload::Words,
        is_write: false,
    },
    FunctionSpec {
        code: FunctionCode::WriteSingleCoil,
        payload: Payload::Single,
        is_write: true,
    },
    FunctionSpec {
        code: FunctionCode::WriteSingleRegister,
        payload: Payload::Single,
        is_write: true,
    },
    FunctionSpec {
        code: FunctionCode::WriteMultipleCoils,
        payload: Payload::Bits,
        is_write: true,
    },
    FunctionSpec {
        code: FunctionCode::WriteMultipleRegisters,
        payload: Payload::Words,
        is_write: true,
    },
];

impl FunctionSpec {
    /// Find the table entry for a raw `-t` value
    pub fn lookup(raw: &str) -> Result<Self, ConfigError> {
        let unknown = || ConfigError::new("function type", raw, "not a supported function code");
        let code = common::parse_int(raw).map_err(|_| ConfigError::not_integer("function type", raw))?;
        FUNCTIONS
            .iter()
            .find(|spec| i64::from(spec.code.code()) == code)
            .copied()
            .ok_or_else(unknown)
    }

    /// Largest element count one request may carry
    pub fn max_count(&self) -> usize {
        match self.code {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => MAX_READ_COILS,
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                MAX_READ_REGISTERS
            },
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => 1,
            FunctionCode::WriteMultipleCoils => MAX_WRITE_COILS,
            FunctionCode::WriteMultipleRegisters => MAX_WRITE_REGISTERS,
        }
    }

    /// Whether values are bits (coils) rather than registers
    pub fn is_bit_access(&self) -> bool {
        matches!(
            self.code,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::WriteSingleCoil
                | FunctionCode::WriteMultipleCoils
        )
    }
}

/// Usage text listing every function code
pub fn usage_table() -> String {
    FUNCTIONS
        .iter()
        .map(|spec| format!("\t{}", spec.code))
        .collect::<Vec<_>>()
        .join("\n")
}
