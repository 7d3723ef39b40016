//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/labsweep.toml` unless told otherwise)
//! 2. environment variables prefixed with `LABSWEEP_`, nested keys separated by
//!    a double underscore
//!
//! # Example
//! ```no_run
//! use labsweep::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // LABSWEEP_APPLICATION__LOG_LEVEL=debug overrides application.log_level
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Drivers from {}", config.drivers.dir.display());
//! # Ok(())
//! # }
//! ```

use crate::logging::OutputFormat;
use daq_core::{DaqError, DaqResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/labsweep.toml";
pub const ENV_PREFIX: &str = "LABSWEEP_";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub application: ApplicationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub drivers: DriversConfig,
    /// Instruments the `run` command connects
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Where result files go
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File name prefix; the run timestamp is appended
    #[serde(default = "default_base_name")]
    pub base_name: String,
    /// tab, comma or semicolon
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            base_name: default_base_name(),
            delimiter: default_delimiter(),
        }
    }
}

impl StorageConfig {
    /// Field separator byte for the configured delimiter name.
    pub fn delimiter_byte(&self) -> DaqResult<u8> {
        match self.delimiter.to_lowercase().as_str() {
            "tab" | "\t" => Ok(b'\t'),
            "comma" | "," => Ok(b','),
            "semicolon" | ";" => Ok(b';'),
            other => Err(DaqError::Config(format!(
                "Invalid delimiter '{}'. Must be one of: tab, comma, semicolon",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriversConfig {
    /// Directory scanned for `*.ini` driver files
    pub dir: PathBuf,
}

impl Default for DriversConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("drivers"),
        }
    }
}

/// One instrument to connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Name used in plans
    pub name: String,
    /// Driver name as given in the driver file's `name` key
    pub driver: String,
    /// `tcp://host:port`, `serial:///dev/ttyUSB0` or `mock://`
    pub address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_base_name() -> String {
    "labsweep".to_string()
}

fn default_delimiter() -> String {
    "tab".to_string()
}

fn default_enabled() -> bool {
    true
}

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> DaqResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.storage.delimiter_byte()?;
        if self.storage.base_name.trim().is_empty() {
            return Err(DaqError::Config("storage.base_name is empty".into()));
        }

        let mut names = HashSet::new();
        for instrument in &self.instruments {
            if instrument.name.trim().is_empty() {
                return Err(DaqError::Config("instrument with an empty name".into()));
            }
            if !names.insert(&instrument.name) {
                return Err(DaqError::Config(format!(
                    "Duplicate instrument name: {}",
                    instrument.name
                )));
            }
        }

        Ok(())
    }

    /// Get all enabled instruments
    pub fn enabled_instruments(&self) -> impl Iterator<Item = &InstrumentDefinition> {
        self.instruments.iter().filter(|inst| inst.enabled)
    }
}
