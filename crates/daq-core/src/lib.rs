//! `daq-core`
//!
//! Core types shared by the labsweep crates: the error taxonomy, the user-form value
//! model, the transport contract an instrument session drives, and the result
//! record a run produces.
//!
//! ## Layers
//!
//! - **Transport**: low-level I/O (`write`, `read`, `clear`, `close`, link tuning).
//!   [`stream::StreamTransport`] covers TCP sockets and serial ports;
//!   [`mock::MockTransport`] covers tests.
//! - **Quantity access**: [`QuantityIo`] and [`QuantityLookup`], the narrow
//!   interface the experiment engine uses to set and read quantities by id.
//! - **Records**: [`ResultRecord`] and the column naming scheme used by sinks.
//!
//! ## Example
//!
//! ```rust,no_run
//! use daq_core::mock::MockTransport;
//! use daq_core::{Transport, TransportSettings};
//! # async fn example() -> std::io::Result<()> {
//! let mut link = MockTransport::new("Source").with_reply("*IDN?", "ACME,SG-100");
//! link.configure(&TransportSettings::default()).await?;
//! link.write("*IDN?").await?;
//! assert_eq!(link.read().await?, "ACME,SG-100");
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod data;
pub mod error;
pub mod limits;
pub mod mock;
pub mod stream;
pub mod transport;
pub mod value;

pub use access::{QuantityIo, QuantityLookup};
pub use data::{input_column, output_column, CellFailure, ResultRecord, STEP2_COLUMN, STEP_COLUMN};
pub use error::{DaqError, DaqResult, ErrorKind};
pub use transport::{Parity, SerialSettings, StopBits, Termination, Transport, TransportSettings};
pub use value::{DataType, Permission, QuantityId, Value};

pub use num_complex::Complex64;
