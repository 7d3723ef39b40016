//! Error taxonomy for instrument sessions, plans and runs.
//!
//! `DaqError` is the single error type shared by every library crate in the
//! workspace. Each variant family maps onto one [`ErrorKind`]:
//!
//! - **`Parse`**: a driver description file is malformed. Terminal for that driver;
//!   the instrument is never added to the catalogue.
//! - **`Identity`**: the model check performed while opening a session failed.
//! - **`Transport`**: I/O against the physical instrument failed. Annotated with the
//!   instrument name and the attempted operation, the underlying `std::io::Error`
//!   is kept as the source.
//! - **`Value`**: an input is out of bounds, an unknown combo entry, an unknown boolean
//!   literal, or otherwise unusable. Always reported before any wire I/O.
//! - **`Validation`**: an experiment plan broke one of its construction rules.
//! - **`Execution`**: a run failed mid-flight; the engine transitions to `Failed`.
//!
//! `Value` errors are recoverable by the caller (fix the input and try again). All
//! other kinds abort their containing operation and should be surfaced to the operator.
//! Nothing in the core retries.

use std::io;
use thiserror::Error;

/// Convenience alias for results using the workspace error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Coarse classification of a [`DaqError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    Identity,
    Transport,
    Value,
    Validation,
    Execution,
    Storage,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Identity => "identity",
            ErrorKind::Transport => "transport",
            ErrorKind::Value => "value",
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Storage => "storage",
            ErrorKind::Config => "config",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for labsweep.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Driver file is malformed. `section` names the offending section (or `"<file>"`
    /// for problems that are not tied to one section).
    #[error("Driver parse error in [{section}]: {message}")]
    Parse { section: String, message: String },

    /// Model check failed while opening a session.
    #[error("Instrument '{instrument}' failed identity check: {message}")]
    Identity { instrument: String, message: String },

    /// I/O against an instrument failed.
    #[error("Transport error on '{instrument}' during {operation}: {source}")]
    Transport {
        instrument: String,
        operation: String,
        #[source]
        source: io::Error,
    },

    /// A value was rejected before any wire I/O took place.
    #[error("Invalid value for '{quantity}': {message}")]
    Value { quantity: String, message: String },

    /// An experiment plan broke a construction rule.
    #[error("Plan validation failed for {subject}: {rule}")]
    Validation { subject: String, rule: String },

    /// A run failed mid-flight.
    #[error("Run failed{}: {message}", step_suffix(.step))]
    Execution {
        step: Option<usize>,
        message: String,
        #[source]
        source: Option<Box<DaqError>>,
    },

    /// Result file could not be created or appended to.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Application configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Standard I/O outside of instrument transports (driver files, result files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn step_suffix(step: &Option<usize>) -> String {
    step.map(|s| format!(" at step {}", s)).unwrap_or_default()
}

impl DaqError {
    pub fn parse(section: impl Into<String>, message: impl Into<String>) -> Self {
        DaqError::Parse {
            section: section.into(),
            message: message.into(),
        }
    }

    pub fn identity(instrument: impl Into<String>, message: impl Into<String>) -> Self {
        DaqError::Identity {
            instrument: instrument.into(),
            message: message.into(),
        }
    }

    pub fn transport(
        instrument: impl Into<String>,
        operation: impl Into<String>,
        source: io::Error,
    ) -> Self {
        DaqError::Transport {
            instrument: instrument.into(),
            operation: operation.into(),
            source,
        }
    }

    pub fn value(quantity: impl Into<String>, message: impl Into<String>) -> Self {
        DaqError::Value {
            quantity: quantity.into(),
            message: message.into(),
        }
    }

    pub fn validation(subject: impl Into<String>, rule: impl Into<String>) -> Self {
        DaqError::Validation {
            subject: subject.into(),
            rule: rule.into(),
        }
    }

    /// Wrap `cause` as the fatal error of a run.
    pub fn execution(step: Option<usize>, cause: DaqError) -> Self {
        DaqError::Execution {
            step,
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaqError::Parse { .. } => ErrorKind::Parse,
            DaqError::Identity { .. } => ErrorKind::Identity,
            DaqError::Transport { .. } => ErrorKind::Transport,
            DaqError::Value { .. } => ErrorKind::Value,
            DaqError::Validation { .. } => ErrorKind::Validation,
            DaqError::Execution { .. } => ErrorKind::Execution,
            DaqError::Storage(_) | DaqError::Io(_) => ErrorKind::Storage,
            DaqError::Config(_) => ErrorKind::Config,
        }
    }

    /// True when the error is a transport failure caused by the link going away
    /// (as opposed to a timeout or an instrument-side complaint).
    pub fn is_disconnect(&self) -> bool {
        match self {
            DaqError::Transport { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            DaqError::Execution {
                source: Some(inner),
                ..
            } => inner.is_disconnect(),
            _ => false,
        }
    }
}
