//! # labsweep
//!
//! Instrument orchestration for laboratory benches: instruments described by driver
//! files, driven over a text command protocol, and parameter sweeps recorded to
//! delimited text files.
//!
//! ## Crate Structure
//!
//! - **`daq-core`**: errors, values, the transport contract and the mock transport
//! - **`daq-driver-generic`**: driver files, quantities, sessions and the registry of
//!   open instruments
//! - **`daq-experiment`**: plans, sweep generation and the run engine
//! - **`daq-storage`**: result sinks
//!
//! This crate adds what the `labsweep` binary needs on top:
//!
//! - **`config`**: application configuration (Figment, TOML + environment)
//! - **`logging`**: tracing subscriber setup
//! - **`transports`**: opening instrument links from address strings
//! - **`bench`**: connecting every configured instrument

pub mod bench;
pub mod config;
pub mod logging;
pub mod transports;

pub use daq_core as core;
pub use daq_driver_generic as drivers;
pub use daq_experiment as experiment;
pub use daq_storage as storage;
