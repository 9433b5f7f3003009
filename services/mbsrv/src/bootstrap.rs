//! Command-line arguments for mbsrv

use std::path::PathBuf;

use clap::Parser;
use common::parse::{parse_int, parse_int_as};
use errors::ConfigError;
use mbu_config::{TransportConfig, TransportKind};

pub use common::bootstrap_args::ServiceArgs;

use crate::settings::{BankOverrides, SettingsOverrides};
use crate::store::MAX_BANK_SIZE;

/// Command-line arguments for mbsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mbsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus server over a serial line (RTU) or TCP",
    long_about = None
)]
pub struct Args {
    #[command(flatten)]
    pub service: ServiceArgs,

    /// Connection type
    #[arg(short = 'm', long = "mode", value_name = "tcp|rtu")]
    pub mode: String,

    /// Number of discrete inputs
    #[arg(long = "di", value_name = "N", allow_hyphen_values = true)]
    pub discrete_inputs: Option<String>,

    /// Number of coils
    #[arg(long = "co", value_name = "N", allow_hyphen_values = true)]
    pub coils: Option<String>,

    /// Number of input registers
    #[arg(long = "ir", value_name = "N", allow_hyphen_values = true)]
    pub input_registers: Option<String>,

    /// Number of holding registers
    #[arg(long = "hr", value_name = "N", allow_hyphen_values = true)]
    pub holding_registers: Option<String>,

    /// TCP port, or parity (none|even|odd) for rtu
    #[arg(short = 'p', value_name = "PORT|PARITY")]
    pub port_or_parity: Option<String>,

    /// Baud rate (rtu)
    #[arg(short = 'b', value_name = "BAUD")]
    pub baud: Option<String>,

    /// Data bits, 7 or 8 (rtu)
    #[arg(short = 'd', value_name = "BITS")]
    pub data_bits: Option<String>,

    /// Stop bits, 1 or 2 (rtu)
    #[arg(short = 's', value_name = "BITS")]
    pub stop_bits: Option<String>,

    /// Idle read timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<String>,

    /// Only answer this unit id (rtu)
    #[arg(long = "unit", value_name = "ID")]
    pub unit: Option<String>,

    /// Maximum simultaneous TCP clients
    #[arg(long, value_name = "N")]
    pub max_connections: Option<String>,

    /// YAML settings file
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Serial device, or address to listen on for tcp
    #[arg(value_name = "DEVICE|ADDRESS")]
    pub endpoint: Option<String>,
}

fn bank_size(field: &str, raw: Option<&String>) -> Result<Option<usize>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = parse_int(raw).map_err(|_| ConfigError::not_integer(field, raw.as_str()))?;
    if value < 0 {
        return Err(ConfigError::new(field, raw.as_str(), "must not be negative"));
    }
    match usize::try_from(value) {
        Ok(size) if size <= MAX_BANK_SIZE => Ok(Some(size)),
        _ => Err(ConfigError::new(field, raw.as_str(), "must not exceed 0x10000")),
    }
}

impl Args {
    /// Build and validate the transport from `-m`, the line options and the
    /// positional endpoint
    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        let kind: TransportKind = self.mode.parse()?;
        let mut config = TransportConfig::new(kind);

        let params = [
            ("p", &self.port_or_parity),
            ("b", &self.baud),
            ("d", &self.data_bits),
            ("s", &self.stop_bits),
        ];
        for (key, value) in params {
            if let Some(value) = value {
                config.set_param(key, value)?;
            }
        }

        match (&self.endpoint, kind) {
            (Some(endpoint), _) => config.set_endpoint(endpoint)?,
            (None, TransportKind::Serial) => return Err(ConfigError::missing("device")),
            (None, TransportKind::Network) => {},
        }

        config.validate()?;
        Ok(config)
    }

    /// Settings given as flags, layered over file and environment
    pub fn overrides(&self) -> Result<SettingsOverrides, ConfigError> {
        let banks = BankOverrides {
            coils: bank_size("coils", self.coils.as_ref())?,
            discrete_inputs: bank_size("discrete inputs", self.discrete_inputs.as_ref())?,
            holding_registers: bank_size("holding registers", self.holding_registers.as_ref())?,
            input_registers: bank_size("input registers", self.input_registers.as_ref())?,
        };

        let read_timeout_ms = match &self.timeout_ms {
            Some(raw) => match parse_int_as::<u64>(raw) {
                Ok(ms) if ms > 0 => Some(ms),
                _ => return Err(ConfigError::new("timeout", raw.as_str(), "must be a positive integer")),
            },
            None => None,
        };

        let unit_id = match &self.unit {
            Some(raw) => match parse_int_as::<u8>(raw) {
                Ok(id @ 1..=247) => Some(id),
                _ => return Err(ConfigError::new("unit id", raw.as_str(), "must be within 1..=247")),
            },
            None => None,
        };

        let max_connections = match &self.max_connections {
            Some(raw) => match parse_int_as::<usize>(raw) {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    return Err(ConfigError::new(
                        "max connections",
                        raw.as_str(),
                        "must be a positive integer",
                    ))
                },
            },
            None => None,
        };

        Ok(SettingsOverrides {
            banks,
            read_timeout_ms,
            unit_id,
            max_connections,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use mbu_config::Parity;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("mbsrv").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_tcp_defaults_and_port() {
        let config = parse(&["-m", "tcp"]).transport_config().unwrap();
        match config {
            TransportConfig::Network(net) => {
                assert_eq!(net.address, "0.0.0.0");
                assert_eq!(net.port, 502);
            },
            other => panic!("unexpected {:?}", other),
        }

        let config = parse(&["-m", "tcp", "-p", "1502", "127.0.0.1"])
            .transport_config()
            .unwrap();
        assert_eq!(config.to_string(), "tcp 127.0.0.1:1502");
    }

    #[test]
    fn test_rtu_line_options() {
        let config = parse(&["-m", "rtu", "-b", "19200", "-p", "none", "-s", "2", "/dev/ttyS1"])
            .transport_config()
            .unwrap();
        match config {
            TransportConfig::Serial(serial) => {
                assert_eq!(serial.device, "/dev/ttyS1");
                assert_eq!(serial.baud_rate, 19200);
                assert_eq!(serial.parity, Parity::None);
                assert_eq!(serial.stop_bits.value(), 2);
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rtu_requires_device() {
        let err = parse(&["-m", "rtu"]).transport_config().unwrap_err();
        assert_eq!(err.field, "device");
    }

    #[test]
    fn test_invalid_transport_values() {
        assert_eq!(
            parse(&["-m", "udp"]).transport_config().unwrap_err().field,
            "connection type"
        );
        assert_eq!(
            parse(&["-m", "rtu", "-d", "9", "/dev/ttyS0"])
                .transport_config()
                .unwrap_err()
                .field,
            "data bits"
        );
        // -b has no meaning for tcp
        assert!(parse(&["-m", "tcp", "-b", "9600"]).transport_config().is_err());
    }

    #[test]
    fn test_bank_sizes() {
        let overrides = parse(&["-m", "tcp", "--co", "0x20", "--hr", "500", "--di", "0"])
            .overrides()
            .unwrap();
        assert_eq!(overrides.banks.coils, Some(32));
        assert_eq!(overrides.banks.holding_registers, Some(500));
        assert_eq!(overrides.banks.discrete_inputs, Some(0));
        assert_eq!(overrides.banks.input_registers, None);

        let err = parse(&["-m", "tcp", "--hr", "-5"]).overrides().unwrap_err();
        assert_eq!(err.field, "holding registers");
        let err = parse(&["-m", "tcp", "--ir", "many"]).overrides().unwrap_err();
        assert_eq!(err.field, "input registers");

        // One element per 16-bit address at most
        let overrides = parse(&["-m", "tcp", "--di", "0x10000"]).overrides().unwrap();
        assert_eq!(overrides.banks.discrete_inputs, Some(0x1_0000));
        let err = parse(&["-m", "tcp", "--co", "0x10001"]).overrides().unwrap_err();
        assert_eq!(err.field, "coils");
        let err = parse(&["-m", "tcp", "--co", "0x7fffffffffffffff"])
            .overrides()
            .unwrap_err();
        assert_eq!(err.field, "coils");
    }

    #[test]
    fn test_numeric_flags() {
        let overrides = parse(&[
            "-m",
            "rtu",
            "--unit",
            "17",
            "--timeout-ms",
            "250",
            "--max-connections",
            "3",
            "/dev/ttyS0",
        ])
        .overrides()
        .unwrap();
        assert_eq!(overrides.unit_id, Some(17));
        assert_eq!(overrides.read_timeout_ms, Some(250));
        assert_eq!(overrides.max_connections, Some(3));

        assert!(parse(&["-m", "rtu", "--unit", "0"]).overrides().is_err());
        assert!(parse(&["-m", "tcp", "--timeout-ms", "0"]).overrides().is_err());
    }

    #[test]
    fn test_debug_flag_is_shared() {
        let args = parse(&["--debug", "-m", "tcp"]);
        assert!(args.service.debug);
        assert_eq!(args.service.effective_level(), tracing::Level::DEBUG);
    }
}
