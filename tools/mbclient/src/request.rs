//! Turns parsed arguments into one validated request

use std::time::Duration;

use common::parse::{parse_int, parse_int_as};
use errors::ConfigError;
use mbu_config::{TransportConfig, TransportKind};
use mbu_protocol::Request;

use crate::bootstrap::Args;
use crate::functions::{FunctionSpec, Payload};

/// Everything needed to issue the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPlan {
    pub transport: TransportConfig,
    pub unit_id: u8,
    pub function: FunctionSpec,
    pub request: Request,
    pub timeout: Duration,
    /// Values given on the command line, as typed (for `--debug`)
    pub write_values: Vec<i64>,
}

impl RequestPlan {
    /// Number of elements the reply has to carry
    pub fn expected_count(&self) -> usize {
        self.request.count()
    }
}

/// Split positionals into the endpoint (first non-integer) and write values
fn classify(positional: &[String]) -> Result<(Option<String>, Vec<i64>), ConfigError> {
    let mut endpoint = None;
    let mut values = Vec::new();
    for arg in positional {
        match parse_int(arg) {
            Ok(value) => values.push(value),
            Err(_) if endpoint.is_none() => endpoint = Some(arg.clone()),
            Err(_) => return Err(ConfigError::not_integer("write value", arg.as_str())),
        }
    }
    Ok((endpoint, values))
}

fn transport_config(args: &Args, endpoint: Option<&str>) -> Result<TransportConfig, ConfigError> {
    let kind: TransportKind = args.mode.parse()?;
    let mut config = TransportConfig::new(kind);
    let params = [
        ("p", &args.port_or_parity),
        ("b", &args.baud),
        ("d", &args.data_bits),
        ("s", &args.stop_bits),
    ];
    for (key, value) in params {
        if let Some(value) = value {
            config.set_param(key, value)?;
        }
    }
    let endpoint = endpoint.ok_or_else(|| match kind {
        TransportKind::Serial => ConfigError::missing("device"),
        TransportKind::Network => ConfigError::missing("host"),
    })?;
    config.set_endpoint(endpoint)?;
    config.validate()?;
    Ok(config)
}

fn start_address(args: &Args) -> Result<u16, ConfigError> {
    let raw = args.start.as_str();
    let mut start = parse_int(raw).map_err(|_| ConfigError::not_integer("start address", raw))?;
    if args.zero_based {
        start -= 1;
    }
    u16::try_from(start).map_err(|_| {
        ConfigError::new("start address", raw, "must be within 0..=65535 after -0 adjustment")
    })
}

fn resolve_count(
    function: &FunctionSpec,
    explicit: Option<&str>,
    values: &[i64],
) -> Result<usize, ConfigError> {
    let explicit = match explicit {
        Some(raw) => Some(
            parse_int_as::<usize>(raw).map_err(|_| ConfigError::not_integer("count", raw))?,
        ),
        None => None,
    };

    let count = if function.is_write {
        if values.is_empty() {
            return Err(ConfigError::new(
                "write data",
                "",
                "a write function needs at least one value",
            ));
        }
        if let Some(count) = explicit {
            if count != values.len() {
                return Err(ConfigError::new(
                    "count",
                    count.to_string(),
                    format!("does not match the {} value(s) given", values.len()),
                ));
            }
        }
        values.len()
    } else {
        if !values.is_empty() {
            return Err(ConfigError::new(
                "write data",
                values.len().to_string(),
                "read functions take no values",
            ));
        }
        explicit.unwrap_or(1)
    };

    if count == 0 || count > function.max_count() {
        return Err(ConfigError::new(
            "count",
            count.to_string(),
            format!("must be within 1..={}", function.max_count()),
        ));
    }
    Ok(count)
}

fn to_word(value: i64) -> Result<u16, ConfigError> {
    u16::try_from(value)
        .map_err(|_| ConfigError::new("write value", value.to_string(), "must fit in 16 bits"))
}

fn build_request(
    function: &FunctionSpec,
    start: u16,
    count: usize,
    values: &[i64],
) -> Result<Request, ConfigError> {
    use mbu_protocol::FunctionCode as F;

    if usize::from(start) + count > 0x1_0000 {
        return Err(ConfigError::new(
            "start address",
            start.to_string(),
            format!("{} elements run past address 0xFFFF", count),
        ));
    }
    // Bounded by max_count above
    let quantity = count as u16;

    Ok(match (function.code, function.payload) {
        (F::ReadCoils, _) => Request::ReadCoils { start, count: quantity },
        (F::ReadDiscreteInputs, _) => Request::ReadDiscreteInputs { start, count: quantity },
        (F::ReadHoldingRegisters, _) => Request::ReadHoldingRegisters { start, count: quantity },
        (F::ReadInputRegisters, _) => Request::ReadInputRegisters { start, count: quantity },
        (F::WriteSingleCoil, Payload::Single) => Request::WriteSingleCoil {
            address: start,
            value: values[0] != 0,
        },
        (F::WriteSingleRegister, Payload::Single) => Request::WriteSingleRegister {
            address: start,
            value: to_word(values[0])?,
        },
        (F::WriteMultipleCoils, _) => Request::WriteMultipleCoils {
            start,
            values: values.iter().map(|v| *v != 0).collect(),
        },
        (F::WriteMultipleRegisters, _) => Request::WriteMultipleRegisters {
            start,
            values: values.iter().map(|v| to_word(*v)).collect::<Result<_, _>>()?,
        },
        (code, payload) => {
            return Err(ConfigError::new(
                "function type",
                code.to_string(),
                format!("inconsistent payload {:?}", payload),
            ))
        },
    })
}

/// Validate every argument and build the request
pub fn build_plan(args: &Args) -> Result<RequestPlan, ConfigError> {
    let function = FunctionSpec::lookup(&args.function)?;
    let (endpoint, values) = classify(&args.positional)?;
    let transport = transport_config(args, endpoint.as_deref())?;

    let unit_id = parse_int_as::<u8>(&args.slave).map_err(|_| {
        ConfigError::new("slave address", args.slave.as_str(), "must be within 0..=255")
    })?;

    let timeout_ms = parse_int_as::<u64>(&args.timeout_ms)
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or_else(|| {
            ConfigError::new("timeout", args.timeout_ms.as_str(), "must be a positive integer")
        })?;

    let start = start_address(args)?;
    let count = resolve_count(&function, args.count.as_deref(), &values)?;
    let request = build_request(&function, start, count, &values)?;

    Ok(RequestPlan {
        transport,
        unit_id,
        function,
        request,
        timeout: Duration::from_millis(timeout_ms),
        write_values: values,
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use clap::Parser;

    fn build(argv: &[&str]) -> Result<RequestPlan, ConfigError> {
        let argv = std::iter::once("mbclient").chain(argv.iter().copied());
        let args = Args::try_parse_from(argv).unwrap();
        build_plan(&args)
    }

    #[test]
    fn test_read_defaults() {
        let plan = build(&["-m", "tcp", "-t", "0x03", "localhost"]).unwrap();
        assert_eq!(plan.unit_id, 1);
        assert_eq!(plan.timeout, Duration::from_millis(1000));
        assert_eq!(plan.request, Request::ReadHoldingRegisters { start: 100, count: 1 });
        assert_eq!(plan.transport.to_string(), "tcp localhost:502");
    }

    #[test]
    fn test_write_multiple_counts_values() {
        let plan = build(&[
            "-m", "tcp", "-t", "0x10", "-r", "0", "-p", "1502", "127.0.0.1", "0x01", "0x02", "3",
        ])
        .unwrap();
        assert_eq!(
            plan.request,
            Request::WriteMultipleRegisters {
                start: 0,
                values: vec![1, 2, 3]
            }
        );
        assert_eq!(plan.expected_count(), 3);
        assert_eq!(plan.write_values, vec![1, 2, 3]);
    }

    #[test]
    fn test_values_before_endpoint() {
        let plan = build(&["-m", "tcp", "-t", "0x0F", "1", "0", "hostname", "1"]).unwrap();
        assert_eq!(
            plan.request,
            Request::WriteMultipleCoils {
                start: 100,
                values: vec![true, false, true]
            }
        );
    }

    #[test]
    fn test_single_writes() {
        let plan = build(&["-m", "rtu", "-t", "5", "-a", "0x11", "/dev/ttyS0", "1"]).unwrap();
        assert_eq!(plan.unit_id, 17);
        assert_eq!(
            plan.request,
            Request::WriteSingleCoil {
                address: 100,
                value: true
            }
        );

        let plan = build(&["-m", "rtu", "-t", "6", "/dev/ttyS0", "0xFFFF"]).unwrap();
        assert_eq!(
            plan.request,
            Request::WriteSingleRegister {
                address: 100,
                value: 0xFFFF
            }
        );

        assert!(build(&["-m", "rtu", "-t", "6", "/dev/ttyS0", "1", "2"]).is_err());
        assert_eq!(
            build(&["-m", "rtu", "-t", "6", "/dev/ttyS0", "70000"]).unwrap_err().field,
            "write value"
        );
    }

    #[test]
    fn test_count_rules() {
        let err = build(&["-m", "tcp", "-t", "0x10", "-c", "2", "host", "1", "2", "3"]).unwrap_err();
        assert_eq!(err.field, "count");

        let err = build(&["-m", "tcp", "-t", "0x10", "host"]).unwrap_err();
        assert_eq!(err.field, "write data");

        let plan_ok = build(&["-m", "tcp", "-t", "1", "-c", "16", "host"]).unwrap();
        assert_eq!(plan_ok.request, Request::ReadCoils { start: 100, count: 16 });

        assert!(build(&["-m", "tcp", "-t", "3", "-c", "126", "host"]).is_err());
        assert!(build(&["-m", "tcp", "-t", "3", "-c", "0", "host"]).is_err());
    }

    #[test]
    fn test_zero_based_start() {
        let plan_ok = build(&["-m", "tcp", "-t", "4", "-r", "1", "-0", "host"]).unwrap();
        assert_eq!(plan_ok.request, Request::ReadInputRegisters { start: 0, count: 1 });

        let err = build(&["-m", "tcp", "-t", "4", "-r", "0", "-0", "host"]).unwrap_err();
        assert_eq!(err.field, "start address");
    }

    #[test]
    fn test_endpoint_and_function_errors() {
        assert_eq!(build(&["-m", "rtu", "-t", "3"]).unwrap_err().field, "device");
        assert_eq!(build(&["-m", "tcp", "-t", "3"]).unwrap_err().field, "host");
        assert_eq!(build(&["-m", "tcp", "-t", "0x2B", "host"]).unwrap_err().field, "function type");
        assert_eq!(build(&["-m", "tcp", "-t", "3", "-o", "0", "host"]).unwrap_err().field, "timeout");
        assert_eq!(build(&["-m", "tcp", "-t", "3", "a", "b"]).unwrap_err().field, "write value");
    }
}
