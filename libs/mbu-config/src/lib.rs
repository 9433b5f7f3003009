//! Transport configuration
//!
//! A [`TransportConfig`] is either a serial line or a network endpoint. Every
//! field is validated when it is set; a rejected value leaves the previously
//! valid configuration untouched.

mod network;
mod serial;

use std::fmt;
use std::str::FromStr;

use errors::ConfigError;
use serde::{Deserialize, Serialize};

pub use network::{NetworkConfig, DEFAULT_ADDRESS, DEFAULT_PORT};
pub use serial::{DataBits, Parity, SerialConfig, StopBits, DEFAULT_BAUD_RATE};

/// Which transport a binary was asked to use (`-m tcp|rtu`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// RTU framing over a serial line
    Serial,
    /// MBAP framing over TCP
    Network,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rtu" | "serial" => Ok(Self::Serial),
            "tcp" | "network" => Ok(Self::Network),
            _ => Err(ConfigError::not_one_of("connection type", s, "tcp, rtu")),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "rtu"),
            Self::Network => write!(f, "tcp"),
        }
    }
}

/// Parameters for exactly one transport kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Serial(SerialConfig),
    Network(NetworkConfig),
}

impl TransportConfig {
    /// Defaults for the given kind
    pub fn new(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Serial => Self::Serial(SerialConfig::default()),
            TransportKind::Network => Self::Network(NetworkConfig::default()),
        }
    }

    /// Apply one `-p/-b/-d/-s` style parameter.
    ///
    /// `p` is the port for the network transport and the parity for the
    /// serial one.
    pub fn set_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match self {
            Self::Serial(serial) => serial.parse_param(key, value),
            Self::Network(network) => network.parse_param(key, value),
        }
    }

    /// Set the free positional argument: device path or host address
    pub fn set_endpoint(&mut self, endpoint: &str) -> Result<(), ConfigError> {
        let endpoint = endpoint.trim();
        match self {
            Self::Serial(serial) => {
                if endpoint.is_empty() {
                    return Err(ConfigError::new("device", endpoint, "must not be empty"));
                }
                serial.device = endpoint.to_string();
            },
            Self::Network(network) => {
                if endpoint.is_empty() {
                    return Err(ConfigError::new("address", endpoint, "must not be empty"));
                }
                network.address = endpoint.to_string();
            },
        }
        Ok(())
    }

    /// Final check before the config is handed to a backend
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Serial(serial) if serial.device.is_empty() => Err(ConfigError::missing("device")),
            Self::Network(network) if network.address.is_empty() => {
                Err(ConfigError::missing("address"))
            },
            _ => Ok(()),
        }
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(serial) => serial.fmt(f),
            Self::Network(network) => network.fmt(f),
        }
    }
}
