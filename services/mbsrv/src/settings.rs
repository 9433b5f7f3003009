//! Server settings
//!
//! Layered with figment, later layers win:
//! 1. built-in defaults
//! 2. YAML file given with `--config`
//! 3. `MBSRV_` environment variables (`MBSRV_BANKS__COILS=500`)
//! 4. command-line flags

use std::path::Path;
use std::time::Duration;

use errors::{MbuError, MbuResult};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::DEFAULT_BACKLOG;
use crate::multiplexer::{MultiplexerOptions, DEFAULT_RETRY_DELAY};
use crate::session::{SessionOptions, DEFAULT_READ_TIMEOUT};
use crate::store::{BankSizes, MAX_BANK_SIZE};

pub const ENV_PREFIX: &str = "MBSRV_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub banks: BankSizes,
    /// Idle read timeout of a session
    pub read_timeout_ms: u64,
    /// RTU unit id to answer; unset answers every unit
    pub unit_id: Option<u8>,
    /// TCP client limit; unset is unlimited
    pub max_connections: Option<usize>,
    pub backlog: u32,
    /// Delay between attempts to open the serial line
    pub retry_delay_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            banks: BankSizes::default(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            unit_id: None,
            max_connections: None,
            backlog: DEFAULT_BACKLOG,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

/// Bank sizes given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BankOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coils: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discrete_inputs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holding_registers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_registers: Option<usize>,
}

/// Settings given on the command line; unset fields leave lower layers alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettingsOverrides {
    pub banks: BankOverrides,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl ServerSettings {
    pub fn figment(config_file: Option<&Path>, overrides: &SettingsOverrides) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ServerSettings::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
    }

    /// Load and validate all layers
    pub fn load(config_file: Option<&Path>, overrides: &SettingsOverrides) -> MbuResult<Self> {
        if let Some(path) = config_file {
            if !path.is_file() {
                return Err(MbuError::settings(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
        }

        let settings: ServerSettings = Self::figment(config_file, overrides)
            .extract()
            .map_err(|e| MbuError::settings(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        debug!("Effective settings: {:?}", settings);
        Ok(settings)
    }

    pub fn validate(&self) -> MbuResult<()> {
        if let Some((bank, size)) = self.banks.oversized() {
            return Err(MbuError::settings(format!(
                "{} size {} exceeds {}",
                bank, size, MAX_BANK_SIZE
            )));
        }
        if let Some(unit) = self.unit_id {
            if !(1..=247).contains(&unit) {
                return Err(MbuError::settings(format!(
                    "unit_id {} must be within 1..=247",
                    unit
                )));
            }
        }
        if self.read_timeout_ms == 0 {
            return Err(MbuError::settings("read_timeout_ms must be greater than zero"));
        }
        if self.max_connections == Some(0) {
            return Err(MbuError::settings("max_connections must be at least 1"));
        }
        if self.backlog == 0 {
            return Err(MbuError::settings("backlog must be at least 1"));
        }
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            unit_filter: self.unit_id,
        }
    }

    pub fn multiplexer_options(&self) -> MultiplexerOptions {
        MultiplexerOptions {
            session: self.session_options(),
            max_connections: self.max_connections,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}
