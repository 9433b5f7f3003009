//! Network endpoint parameters

use std::fmt;

use common::parse_int_as;
use errors::ConfigError;

pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 502;

/// TCP endpoint: the bind address for the server, the peer for the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub address: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl NetworkConfig {
    /// Validate and apply one parameter. Only `p`/`port` is known.
    pub fn parse_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "p" | "port" => {
                self.port = parse_int_as::<u16>(value)
                    .map_err(|_| ConfigError::new("port", value, "not an integer in 0..=65535"))?;
                Ok(())
            },
            _ => Err(ConfigError::new(
                "tcp parameter",
                format!("{}={}", key, value),
                "only the port can be set for tcp",
            )),
        }
    }

    /// `host:port` string accepted by `TcpListener::bind` and `TcpStream::connect`
    pub fn socket_addr_string(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp {}", self.socket_addr_string())
    }
}
