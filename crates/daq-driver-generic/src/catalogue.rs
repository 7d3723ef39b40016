//! Catalogue of drivers and latest known quantity values.
//!
//! The core reads drivers and latest values through the [`Catalogue`] trait and never
//! cares where they are stored. [`DriverCatalogue`] is the in-process implementation:
//! drivers parsed from a directory of driver files, instruments registered under
//! their own names, latest values in memory.

use crate::config::DriverConfig;
use daq_core::{DaqError, DaqResult, Value};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Extension of driver description files.
pub const DRIVER_EXTENSION: &str = "ini";

pub trait Catalogue: Send + Sync {
    /// Driver record for an instrument (or a driver name).
    fn get_driver(&self, name: &str) -> DaqResult<Arc<DriverConfig>>;

    /// Latest known user-form value, `None` when unknown.
    fn get_latest(&self, name: &str, label: &str) -> Option<Value>;

    fn set_latest(&self, name: &str, label: &str, value: &Value);
}

/// Outcome of [`DriverCatalogue::load_dir`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(PathBuf, DaqError)>,
}

#[derive(Default)]
pub struct DriverCatalogue {
    drivers: RwLock<BTreeMap<String, Arc<DriverConfig>>>,
    instruments: RwLock<BTreeMap<String, String>>,
    latest: RwLock<HashMap<(String, String), Value>>,
}

impl DriverCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a driver under its own name.
    pub fn add_driver(&self, driver: DriverConfig) -> Arc<DriverConfig> {
        let driver = Arc::new(driver);
        self.drivers
            .write()
            .insert(driver.name.clone(), Arc::clone(&driver));
        driver
    }

    pub fn load_file(&self, path: &Path) -> DaqResult<Arc<DriverConfig>> {
        let driver = DriverConfig::from_file(path)?;
        Ok(self.add_driver(driver))
    }

    /// Load every driver file in `dir`. A malformed file is logged and skipped; its
    /// driver is not added.
    pub fn load_dir(&self, dir: &Path) -> DaqResult<LoadReport> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(DRIVER_EXTENSION))
            })
            .collect();
        paths.sort();

        let mut report = LoadReport::default();
        for path in paths {
            match self.load_file(&path) {
                Ok(driver) => {
                    info!(driver = %driver.name, path = %path.display(), "Loaded driver");
                    report.loaded.push(driver.name.clone());
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Rejected driver file");
                    report.failed.push((path, e));
                }
            }
        }
        Ok(report)
    }

    /// Register `instrument` as an instance of the driver named `driver`.
    pub fn register_instrument(&self, instrument: &str, driver: &str) -> DaqResult<()> {
        if !self.drivers.read().contains_key(driver) {
            return Err(DaqError::Config(format!(
                "instrument '{}' uses unknown driver '{}'",
                instrument, driver
            )));
        }
        self.instruments
            .write()
            .insert(instrument.to_string(), driver.to_string());
        Ok(())
    }

    pub fn drivers(&self) -> Vec<Arc<DriverConfig>> {
        self.drivers.read().values().cloned().collect()
    }

    /// `(instrument, driver)` pairs in name order.
    pub fn instruments(&self) -> Vec<(String, String)> {
        self.instruments
            .read()
            .iter()
            .map(|(i, d)| (i.clone(), d.clone()))
            .collect()
    }
}

impl Catalogue for DriverCatalogue {
    fn get_driver(&self, name: &str) -> DaqResult<Arc<DriverConfig>> {
        let driver_name = self
            .instruments
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string());
        self.drivers
            .read()
            .get(&driver_name)
            .cloned()
            .ok_or_else(|| DaqError::Config(format!("no driver for '{}'", name)))
    }

    fn get_latest(&self, name: &str, label: &str) -> Option<Value> {
        self.latest
            .read()
            .get(&(name.to_string(), label.to_string()))
            .cloned()
    }

    fn set_latest(&self, name: &str, label: &str, value: &Value) {
        self.latest
            .write()
            .insert((name.to_string(), label.to_string()), value.clone());
    }
}
