//! Common command-line arguments for mbutils binaries
//!
//! Flattened into each binary's own `Args` with `#[command(flatten)]`.

use clap::Args;

use crate::logging::LogConfig;

/// Logging and verbosity arguments shared by the server and the client
#[derive(Debug, Clone, Args)]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,

    /// Enable debug mode: frame dumps and verbose output
    #[arg(long)]
    pub debug: bool,

    /// Disable colored output (useful for log files)
    #[arg(long)]
    pub no_color: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            debug: false,
            no_color: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Level after applying `--debug`, which never raises a more verbose level
    pub fn effective_level(&self) -> tracing::Level {
        let level = self.parse_log_level();
        if self.debug && level < tracing::Level::DEBUG {
            tracing::Level::DEBUG
        } else {
            level
        }
    }

    /// Logging configuration for a binary
    pub fn log_config(&self, service_name: &str) -> LogConfig {
        LogConfig {
            service_name: service_name.to_string(),
            console_level: self.effective_level(),
            ansi: !self.no_color,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = ServiceArgs::default();
        assert_eq!(args.parse_log_level(), tracing::Level::INFO);
        assert!(!args.debug);
    }

    #[test]
    fn test_parse_log_level() {
        let args = ServiceArgs {
            log_level: "WARNING".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::WARN);

        let args = ServiceArgs {
            log_level: "bogus".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        let args = ServiceArgs {
            debug: true,
            ..Default::default()
        };
        assert_eq!(args.effective_level(), tracing::Level::DEBUG);

        let args = ServiceArgs {
            log_level: "trace".to_string(),
            debug: true,
            ..Default::default()
        };
        assert_eq!(args.effective_level(), tracing::Level::TRACE);
    }

    #[test]
    fn test_log_config_no_color() {
        let args = ServiceArgs {
            no_color: true,
            ..Default::default()
        };
        let config = args.log_config("mbsrv");
        assert!(!config.ansi);
        assert_eq!(config.service_name, "mbsrv");
    }
}
