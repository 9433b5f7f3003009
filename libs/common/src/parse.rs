//! Integer parsing for command-line values
//!
//! Every numeric option accepts either a `0x`-prefixed hexadecimal value or a
//! plain decimal one, e.g. `-t0x10` and `-t16` are the same function code.

use std::fmt;

/// Error returned when a value is not an integer or does not fit its target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntParseError {
    NotAnInteger(String),
    OutOfRange(String),
}

impl fmt::Display for IntParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnInteger(raw) => write!(f, "'{}' is not an integer", raw),
            Self::OutOfRange(raw) => write!(f, "'{}' is out of range", raw),
        }
    }
}

impl std::error::Error for IntParseError {}

/// Parse a decimal or `0x`-prefixed hex integer.
pub fn parse_int(raw: &str) -> Result<i64, IntParseError> {
    let trimmed = raw.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let parsed = match body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        Some(hex) if !hex.is_empty() => i64::from_str_radix(hex, 16),
        Some(_) => return Err(IntParseError::NotAnInteger(raw.to_string())),
        None => body.parse::<i64>(),
    };

    let value = parsed.map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => {
            IntParseError::OutOfRange(raw.to_string())
        },
        _ => IntParseError::NotAnInteger(raw.to_string()),
    })?;

    Ok(if negative { -value } else { value })
}

/// Parse an integer and narrow it to `T`.
pub fn parse_int_as<T: TryFrom<i64>>(raw: &str) -> Result<T, IntParseError> {
    let value = parse_int(raw)?;
    T::try_from(value).map_err(|_| IntParseError::OutOfRange(raw.to_string()))
}

/// True when `raw` parses as an integer
pub fn is_int(raw: &str) -> bool {
    parse_int(raw).is_ok()
}
