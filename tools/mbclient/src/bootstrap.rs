//! Command-line arguments for mbclient

use clap::Parser;

pub use common::bootstrap_args::ServiceArgs;

/// Default slave (unit) address
pub const DEFAULT_SLAVE: &str = "1";
/// Default first register/coil address
pub const DEFAULT_START: &str = "100";
/// Default response timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: &str = "1000";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "mbclient",
    version = env!("CARGO_PKG_VERSION"),
    about = "Send one Modbus request over a serial line (RTU) or TCP",
    after_help = "Examples (server on port 1502):\n\
        \twrite: mbclient --debug -m tcp -t 0x10 -r 0 -p 1502 127.0.0.1 0x01 0x02 0x03\n\
        \tread:  mbclient --debug -m tcp -t 0x03 -r 0 -p 1502 127.0.0.1 -c 3"
)]
pub struct Args {
    #[command(flatten)]
    pub service: ServiceArgs,

    /// Connection type
    #[arg(short = 'm', long = "mode", value_name = "tcp|rtu")]
    pub mode: String,

    /// Slave (unit) address
    #[arg(short = 'a', value_name = "ADDR", default_value = DEFAULT_SLAVE)]
    pub slave: String,

    /// Number of elements to read; writes default to the number of values
    #[arg(short = 'c', value_name = "N")]
    pub count: Option<String>,

    /// Start address
    #[arg(short = 'r', value_name = "ADDR", default_value = DEFAULT_START)]
    pub start: String,

    /// Function code: 0x01-0x06, 0x0F, 0x10
    #[arg(short = 't', value_name = "CODE")]
    pub function: String,

    /// Response timeout in milliseconds
    #[arg(short = 'o', value_name = "MS", default_value = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: String,

    /// Reference addresses start at zero: subtract one from the start address
    #[arg(short = '0')]
    pub zero_based: bool,

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

    /// Serial device or host, followed by the values to write
    #[arg(value_name = "DEVICE|HOST [VALUES]")]
    pub positional: Vec<String>,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["mbclient", "-m", "tcp", "-t", "3", "localhost"]).unwrap();
        assert_eq!(args.slave, "1");
        assert_eq!(args.start, "100");
        assert_eq!(args.timeout_ms, "1000");
        assert_eq!(args.count, None);
        assert!(!args.zero_based);
        assert_eq!(args.positional, vec!["localhost"]);
    }

    #[test]
    fn test_options_after_positionals() {
        let args = Args::try_parse_from([
            "mbclient", "--debug", "-m", "tcp", "-t", "0x03", "-r", "0", "-p", "1502", "127.0.0.1",
            "-c", "3", "-0",
        ])
        .unwrap();
        assert!(args.service.debug);
        assert!(args.zero_based);
        assert_eq!(args.count.as_deref(), Some("3"));
        assert_eq!(args.port_or_parity.as_deref(), Some("1502"));
        assert_eq!(args.positional, vec!["127.0.0.1"]);
    }

    #[test]
    fn test_function_is_required() {
        assert!(Args::try_parse_from(["mbclient", "-m", "tcp", "localhost"]).is_err());
    }
}
