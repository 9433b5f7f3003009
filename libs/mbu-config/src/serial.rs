//! Serial line parameters

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use common::parse_int_as;
use errors::ConfigError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Parity setting of the serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    /// One character code used in logs and device descriptions
    pub fn code(self) -> char {
        match self {
            Self::None => 'N',
            Self::Even => 'E',
            Self::Odd => 'O',
        }
    }
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "even" => Ok(Self::Even),
            "odd" => Ok(Self::Odd),
            _ => Err(ConfigError::not_one_of("parity", s, "none, even, odd")),
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Seven,
    Eight,
}

impl DataBits {
    pub fn value(self) -> u8 {
        match self {
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<i64> for DataBits {
    type Error = ();

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            _ => Err(()),
        }
    }
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    pub fn value(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

impl TryFrom<i64> for StopBits {
    type Error = ();

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(()),
        }
    }
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Serial line configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path (e.g., "/dev/ttyUSB0", "COM1")
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::Even,
        }
    }
}

impl SerialConfig {
    /// Validate and apply one parameter.
    ///
    /// Keys: `b`/`baud`, `d`/`data-bits`, `s`/`stop-bits`, `p`/`parity`.
    /// Baud and bit counts accept decimal or `0x` hex.
    pub fn parse_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "b" | "baud" => {
                let baud = parse_int_as::<u32>(value)
                    .map_err(|_| ConfigError::not_integer("baud rate", value))?;
                if baud == 0 {
                    return Err(ConfigError::new("baud rate", value, "must be greater than zero"));
                }
                self.baud_rate = baud;
            },
            "d" | "data-bits" => {
                self.data_bits = parse_int_as::<i64>(value)
                    .ok()
                    .and_then(|v| DataBits::try_from(v).ok())
                    .ok_or_else(|| ConfigError::not_one_of("data bits", value, "7, 8"))?;
            },
            "s" | "stop-bits" => {
                self.stop_bits = parse_int_as::<i64>(value)
                    .ok()
                    .and_then(|v| StopBits::try_from(v).ok())
                    .ok_or_else(|| ConfigError::not_one_of("stop bits", value, "1, 2"))?;
            },
            "p" | "parity" => {
                self.parity = value.parse()?;
            },
            _ => {
                return Err(ConfigError::new(
                    "rtu parameter",
                    format!("{}={}", key, value),
                    "unknown parameter",
                ))
            },
        }
        Ok(())
    }

    /// Port builder carrying every line setting
    pub fn port_builder(&self, timeout: Duration) -> tokio_serial::SerialPortBuilder {
        tokio_serial::new(&self.device, self.baud_rate)
            .data_bits(self.data_bits.into())
            .parity(self.parity.into())
            .stop_bits(self.stop_bits.into())
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(timeout)
    }

    /// Time needed to transmit `chars` characters at the configured baud rate
    pub fn char_time(&self, chars: u32) -> Duration {
        // start + data + parity + stop
        let bits_per_char = 1
            + u32::from(self.data_bits.value())
            + u32::from(self.parity != Parity::None)
            + u32::from(self.stop_bits.value());
        let micros = u64::from(bits_per_char) * u64::from(chars) * 1_000_000
            / u64::from(self.baud_rate.max(1));
        Duration::from_micros(micros)
    }
}

impl fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rtu {} {} {}{}{}",
            self.device,
            self.baud_rate,
            self.data_bits.value(),
            self.parity.code(),
            self.stop_bits.value()
        )
    }
}
