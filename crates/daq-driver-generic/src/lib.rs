//! Driver-file described instruments.
//!
//! An instrument is described by a sectioned key–value driver file ([`config`]). A
//! [`Session`] binds a parsed driver to a live transport and owns one [`Quantity`]
//! per definition; the [`InstrumentRegistry`] owns the open sessions and resolves
//! links between them.
//!
//! ```rust,no_run
//! use daq_driver_generic::{DriverConfig, Session};
//! use daq_core::mock::MockTransport;
//! use std::sync::Arc;
//! # async fn example() -> daq_core::DaqResult<()> {
//! let driver = Arc::new(DriverConfig::from_file("drivers/signal_generator.ini".as_ref())?);
//! let transport = Box::new(MockTransport::new("Source").with_echo());
//! let mut source = Session::open("Source", driver, transport).await?;
//! source.set("Frequency", 1.0e6).await?;
//! source.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod catalogue;
pub mod config;
pub mod ini;
pub mod quantity;
pub mod registry;
pub mod session;

pub use catalogue::{Catalogue, DriverCatalogue, LoadReport};
pub use config::{BoolLiterals, ComboEntry, DriverConfig, IdentityEntry, ModelOptions, QuantityDef};
pub use quantity::Quantity;
pub use registry::InstrumentRegistry;
pub use session::{LinkDirection, Session, VisibilityChange};
