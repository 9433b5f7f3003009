//! Shared register memory
//!
//! Four independent banks sized once at startup. Each bank sits behind its
//! own lock, held for exactly one read or write call.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest useful bank: one element per 16-bit address
pub const MAX_BANK_SIZE: usize = 0x1_0000;

/// Register bank (address space)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bank {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
}

impl Bank {
    pub const ALL: [Bank; 4] = [
        Self::Coils,
        Self::DiscreteInputs,
        Self::HoldingRegisters,
        Self::InputRegisters,
    ];

    /// Client requests may write this bank
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Coils | Self::HoldingRegisters)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Coils => "coils",
            Self::DiscreteInputs => "discrete inputs",
            Self::HoldingRegisters => "holding registers",
            Self::InputRegisters => "input registers",
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Range [{start}, {start}+{count}) outside {bank} of size {size}")]
    Range {
        bank: Bank,
        start: usize,
        count: usize,
        size: usize,
    },

    #[error("Operation not permitted on {bank}")]
    NotPermitted { bank: Bank },
}

/// Bank sizes, fixed for the lifetime of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankSizes {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
}

impl Default for BankSizes {
    fn default() -> Self {
        Self {
            coils: 100,
            discrete_inputs: 100,
            holding_registers: 100,
            input_registers: 100,
        }
    }
}

impl BankSizes {
    pub fn uniform(size: usize) -> Self {
        Self {
            coils: size,
            discrete_inputs: size,
            holding_registers: size,
            input_registers: size,
        }
    }

    pub fn size_of(&self, bank: Bank) -> usize {
        match bank {
            Bank::Coils => self.coils,
            Bank::DiscreteInputs => self.discrete_inputs,
            Bank::HoldingRegisters => self.holding_registers,
            Bank::InputRegisters => self.input_registers,
        }
    }

    /// First bank larger than [`MAX_BANK_SIZE`]
    pub fn oversized(&self) -> Option<(Bank, usize)> {
        Bank::ALL
            .into_iter()
            .map(|bank| (bank, self.size_of(bank)))
            .find(|(_, size)| *size > MAX_BANK_SIZE)
    }
}

/// The four banks
#[derive(Debug)]
pub struct RegisterStore {
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
    sizes: BankSizes,
}

fn check_range(bank: Bank, size: usize, start: usize, count: usize) -> Result<(), StoreError> {
    match start.checked_add(count) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StoreError::Range {
            bank,
            start,
            count,
            size,
        }),
    }
}

impl RegisterStore {
    pub fn new(sizes: BankSizes) -> Self {
        Self {
            coils: RwLock::new(vec![false; sizes.coils]),
            discrete_inputs: RwLock::new(vec![false; sizes.discrete_inputs]),
            holding_registers: RwLock::new(vec![0; sizes.holding_registers]),
            input_registers: RwLock::new(vec![0; sizes.input_registers]),
            sizes,
        }
    }

    pub fn sizes(&self) -> BankSizes {
        self.sizes
    }

    fn bit_bank(&self, bank: Bank) -> Result<&RwLock<Vec<bool>>, StoreError> {
        match bank {
            Bank::Coils => Ok(&self.coils),
            Bank::DiscreteInputs => Ok(&self.discrete_inputs),
            _ => Err(StoreError::NotPermitted { bank }),
        }
    }

    fn word_bank(&self, bank: Bank) -> Result<&RwLock<Vec<u16>>, StoreError> {
        match bank {
            Bank::HoldingRegisters => Ok(&self.holding_registers),
            Bank::InputRegisters => Ok(&self.input_registers),
            _ => Err(StoreError::NotPermitted { bank }),
        }
    }

    pub fn read_bits(&self, bank: Bank, start: usize, count: usize) -> Result<Vec<bool>, StoreError> {
        let lock = self.bit_bank(bank)?;
        check_range(bank, self.sizes.size_of(bank), start, count)?;
        let cells = lock.read();
        Ok(cells[start..start + count].to_vec())
    }

    /// Write coils. Discrete inputs are read-only.
    pub fn write_bits(&self, bank: Bank, start: usize, values: &[bool]) -> Result<(), StoreError> {
        if !bank.is_writable() {
            return Err(StoreError::NotPermitted { bank });
        }
        self.preset_bits(bank, start, values)
    }

    pub fn read_words(&self, bank: Bank, start: usize, count: usize) -> Result<Vec<u16>, StoreError> {
        let lock = self.word_bank(bank)?;
        check_range(bank, self.sizes.size_of(bank), start, count)?;
        let cells = lock.read();
        Ok(cells[start..start + count].to_vec())
    }

    /// Write holding registers. Input registers are read-only.
    pub fn write_words(&self, bank: Bank, start: usize, values: &[u16]) -> Result<(), StoreError> {
        if !bank.is_writable() {
            return Err(StoreError::NotPermitted { bank });
        }
        self.preset_words(bank, start, values)
    }

    /// Server-side seeding that may also fill discrete inputs
    pub fn preset_bits(&self, bank: Bank, start: usize, values: &[bool]) -> Result<(), StoreError> {
        let lock = self.bit_bank(bank)?;
        check_range(bank, self.sizes.size_of(bank), start, values.len())?;
        let mut cells = lock.write();
        cells[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Server-side seeding that may also fill input registers
    pub fn preset_words(&self, bank: Bank, start: usize, values: &[u16]) -> Result<(), StoreError> {
        let lock = self.word_bank(bank)?;
        check_range(bank, self.sizes.size_of(bank), start, values.len())?;
        let mut cells = lock.write();
        cells[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// The debug printout: upper bound of every bank
    pub fn describe_ranges(&self) -> String {
        format!(
            "Ranges: \n \tCoils: 0-0x{:04x}\n\tDigital inputs: 0-0x{:04x}\n\tHolding registers: 0-0x{:04x}\n\tInput registers: 0-0x{:04x}",
            self.sizes.coils,
            self.sizes.discrete_inputs,
            self.sizes.holding_registers,
            self.sizes.input_registers
        )
    }
}
