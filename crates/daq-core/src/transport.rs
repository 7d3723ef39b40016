//! Transport contract between an instrument session and the physical link.
//!
//! The core never talks to VISA, USB or vendor SDKs directly. It consumes the
//! narrow [`Transport`] capability: write a command string, read a reply string,
//! clear, close, and accept link tuning through [`TransportSettings`].
//!
//! Implementations in this crate:
//! - [`StreamTransport`](crate::stream::StreamTransport): any tokio byte stream
//!   (TCP socket, serial port)
//! - [`MockTransport`](crate::mock::MockTransport): scripted replies for tests
//!
//! Errors are plain `std::io::Error`; the session wraps them into
//! [`DaqError::Transport`](crate::error::DaqError::Transport) annotated with the
//! instrument name and the attempted operation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::str::FromStr;
use std::time::Duration;

/// Message termination characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Termination {
    /// Termination is left to the transport's defaults.
    #[default]
    Auto,
    None,
    Cr,
    Lf,
    CrLf,
}

impl Termination {
    /// Characters handed to the transport. `Auto` and `None` both map to the empty
    /// string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Auto | Termination::None => "",
            Termination::Cr => "\r",
            Termination::Lf => "\n",
            Termination::CrLf => "\r\n",
        }
    }
}

impl FromStr for Termination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Auto" => Ok(Termination::Auto),
            "None" => Ok(Termination::None),
            "CR" => Ok(Termination::Cr),
            "LF" => Ok(Termination::Lf),
            "CR+LF" => Ok(Termination::CrLf),
            other => Err(format!(
                "term_char '{}' must be one of Auto, None, CR, LF, CR+LF",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "no parity" => Ok(Parity::None),
            "odd" | "odd parity" => Ok(Parity::Odd),
            "even" | "even parity" => Ok(Parity::Even),
            other => Err(format!("parity '{}' must be None, Odd or Even", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl FromStr for StopBits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(StopBits::One),
            "1.5" => Ok(StopBits::OnePointFive),
            "2" => Ok(StopBits::Two),
            other => Err(format!("stop_bits '{}' must be 1, 1.5 or 2", other)),
        }
    }
}

/// Serial line parameters, applied only to serial instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

/// Link tuning applied to a transport when a session opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub termination: Termination,
    pub send_end: bool,
    pub query_errors: bool,
    pub serial: Option<SerialSettings>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            termination: Termination::Auto,
            send_end: true,
            query_errors: false,
            serial: None,
        }
    }
}

/// Narrow I/O capability an instrument session requires from its link.
///
/// `read` blocks until a full reply is available; the session bounds every call
/// with its configured timeout, so implementations may wait indefinitely.
#[async_trait]
pub trait Transport: Send {
    /// Apply timeout, termination and send-end settings.
    async fn configure(&mut self, settings: &TransportSettings) -> io::Result<()>;

    /// Apply serial line parameters. Non-serial transports reject this.
    async fn configure_serial(&mut self, serial: &SerialSettings) -> io::Result<()> {
        let _ = serial;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transport is not a serial port",
        ))
    }

    /// Write one command (the transport appends termination).
    async fn write(&mut self, command: &str) -> io::Result<()>;

    /// Read one reply with termination stripped.
    async fn read(&mut self) -> io::Result<String>;

    /// Discard pending input.
    async fn clear(&mut self) -> io::Result<()>;

    /// Release the link. Called at most once by the session.
    async fn close(&mut self) -> io::Result<()>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}
