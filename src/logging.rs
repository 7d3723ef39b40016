//! Tracing initialisation
//!
//! Every crate in the workspace logs through `tracing` macros with structured
//! fields (`instrument`, `quantity`, `step`). The binary installs one
//! `tracing-subscriber` fmt layer filtered by an `EnvFilter`. `RUST_LOG`, when set,
//! wins over the configured level, so wire traffic of a single crate can be
//! inspected with e.g. `RUST_LOG=daq_driver_generic=trace`.
//!
//! Calling [`init`] again after a subscriber is installed does nothing.
//!
//! # Example
//! ```no_run
//! use labsweep::logging::{self, LogSettings, OutputFormat};
//! use tracing::Level;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! logging::init(&LogSettings::new(Level::DEBUG).format(OutputFormat::Compact))?;
//! tracing::info!(instrument = "Source", "Connected");
//! # Ok(())
//! # }
//! ```

use crate::config::AppConfig;
use daq_core::{DaqError, DaqResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured
    #[default]
    Pretty,
    /// One line per event, no colours; suits a terminal during long runs
    Compact,
    /// One JSON object per event
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: Level,
    pub format: OutputFormat,
    /// Also log when spans open and close
    pub span_events: bool,
    /// Source file and line of each event
    pub source_location: bool,
}

impl LogSettings {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::default(),
            span_events: false,
            source_location: false,
        }
    }

    pub fn from_app_config(config: &AppConfig) -> DaqResult<Self> {
        let level = parse_level(&config.application.log_level)?;
        Ok(Self::new(level).format(config.application.log_format))
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn source_location(mut self, enabled: bool) -> Self {
        self.source_location = enabled;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_ascii_lowercase()))
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = tracing_subscriber::fmt::layer()
            .with_span_events(spans)
            .with_file(self.source_location)
            .with_line_number(self.source_location);
        match self.format {
            OutputFormat::Pretty => base.pretty().boxed(),
            OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
            OutputFormat::Json => base.json().boxed(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

/// Install logging as the application configuration describes it.
pub fn init_from_config(config: &AppConfig) -> DaqResult<()> {
    init(&LogSettings::from_app_config(config)?)
}

/// Install the global subscriber.
pub fn init(settings: &LogSettings) -> DaqResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }
    let installed = tracing_subscriber::registry()
        .with(settings.layer().with_filter(settings.filter()))
        .try_init();
    match installed {
        Ok(()) => Ok(()),
        // Another thread installed one in between.
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(DaqError::Config(format!("cannot install logging: {}", e))),
    }
}

fn parse_level(raw: &str) -> DaqResult<Level> {
    Level::from_str(raw.trim()).map_err(|_| {
        DaqError::Config(format!(
            "log level '{}' is not one of trace, debug, info, warn, error",
            raw
        ))
    })
}
