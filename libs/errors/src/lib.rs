//! Unified error handling for mbutils
//!
//! Mirrors the taxonomy the tools expose to operators:
//! - [`ConfigError`]: bad command-line or settings value, fatal at startup
//! - [`MbuError::Io`]: transport failure, fatal to one connection or session
//! - [`MbuError::Protocol`]: malformed frame or unexpected reply
//! - [`MbuError::Exception`]: the peer answered with a protocol exception

use std::fmt;

use thiserror::Error;

// ============================================================================
// ConfigError
// ============================================================================

/// A rejected configuration value.
///
/// Always names the field and carries the raw value exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {field} '{value}': {reason}")]
pub struct ConfigError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Value was expected to be an integer
    pub fn not_integer(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, value, "not an integer")
    }

    /// Value parsed but is not one of the accepted values
    pub fn not_one_of(field: impl Into<String>, value: impl Into<String>, allowed: &str) -> Self {
        Self::new(field, value, format!("expected one of {}", allowed))
    }

    /// Required value is absent
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "", "missing")
    }
}

// ============================================================================
// MbuError
// ============================================================================

/// Main error type for the server and client binaries
#[derive(Debug, Error)]
pub enum MbuError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Exception response to function 0x{function:02X}: {description} (code {code})")]
    Exception {
        function: u8,
        code: u8,
        description: String,
    },
}

/// Result type alias using MbuError
pub type MbuResult<T> = Result<T, MbuError>;

impl MbuError {
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Settings(_) => 2,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for MbuError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            MbuError::Timeout(err.to_string())
        } else {
            MbuError::Io(err.to_string())
        }
    }
}

/// Attach context to foreign errors while converting into [`MbuError`]
pub trait ErrorExt<T> {
    fn io_context(self, msg: &str) -> MbuResult<T>;
}

impl<T, E: fmt::Display> ErrorExt<T> for Result<T, E> {
    fn io_context(self, msg: &str) -> MbuResult<T> {
        self.map_err(|e| MbuError::Io(format!("{}: {}", msg, e)))
    }
}
