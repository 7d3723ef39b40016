//! Connecting the configured instruments.
//!
//! A bench is the driver catalogue plus the registry of open sessions built from
//! an [`AppConfig`]. Either every enabled instrument connects or none stays open.

use crate::config::{AppConfig, InstrumentDefinition};
use crate::transports::{open_transport, InstrumentAddress};
use daq_core::DaqResult;
use daq_driver_generic::{Catalogue, DriverCatalogue, InstrumentRegistry, LoadReport};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Bench {
    pub catalogue: Arc<DriverCatalogue>,
    pub registry: InstrumentRegistry,
}

/// Load the driver directory and register every enabled instrument with its driver.
pub fn load_catalogue(config: &AppConfig) -> DaqResult<(Arc<DriverCatalogue>, LoadReport)> {
    let catalogue = Arc::new(DriverCatalogue::new());
    let report = catalogue.load_dir(&config.drivers.dir)?;
    for instrument in config.enabled_instruments() {
        catalogue.register_instrument(&instrument.name, &instrument.driver)?;
    }
    Ok((catalogue, report))
}

impl Bench {
    /// Open a session for every enabled instrument, in configuration order.
    pub async fn connect(config: &AppConfig) -> DaqResult<Self> {
        let (catalogue, report) = load_catalogue(config)?;
        if !report.failed.is_empty() {
            warn!(rejected = report.failed.len(), "Some driver files were rejected");
        }

        let mut registry = InstrumentRegistry::new();
        for instrument in config.enabled_instruments() {
            if let Err(e) = connect_one(&mut registry, &catalogue, instrument).await {
                warn!(instrument = %instrument.name, error = %e, "Connect failed, closing bench");
                if let Err(close_err) = registry.close_all().await {
                    warn!(error = %close_err, "Close after failed connect also failed");
                }
                return Err(e);
            }
        }
        info!(instruments = registry.len(), "Bench connected");
        Ok(Self {
            catalogue,
            registry,
        })
    }

    pub async fn close(&mut self) -> DaqResult<()> {
        self.registry.close_all().await
    }
}

async fn connect_one(
    registry: &mut InstrumentRegistry,
    catalogue: &Arc<DriverCatalogue>,
    instrument: &InstrumentDefinition,
) -> DaqResult<()> {
    let address: InstrumentAddress = instrument.address.parse()?;
    let driver = catalogue.get_driver(&instrument.name)?;
    let transport = open_transport(&instrument.name, &address, &driver).await?;
    let shared: Arc<dyn Catalogue> = Arc::clone(catalogue) as Arc<dyn Catalogue>;
    let session = registry.connect(&instrument.name, shared, transport).await?;
    info!(
        instrument = %instrument.name,
        driver = %instrument.driver,
        model = session.model_id().unwrap_or("-"),
        "Connected"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplicationConfig, DriversConfig, StorageConfig};
    use crate::logging::OutputFormat;
    use daq_core::{QuantityId, QuantityIo, Value};
    use std::fs;

    const GENERATOR: &str = "\
[General settings]
name: Generator

[Model and options]
model_str_1: SG-100

[VISA settings]
timeout: 1

[Frequency]
datatype: DOUBLE
unit: Hz
low_lim: 0
set_cmd: FREQ
get_cmd: FREQ?
";

    const BROKEN: &str = "\
[Model and options]
model_str_1: X
";

    fn config(dir: &std::path::Path, instruments: Vec<InstrumentDefinition>) -> AppConfig {
        AppConfig {
            application: ApplicationConfig {
                name: "Test".to_string(),
                log_level: "info".to_string(),
                log_format: OutputFormat::Compact,
            },
            storage: StorageConfig::default(),
            drivers: DriversConfig {
                dir: dir.to_path_buf(),
            },
            instruments,
        }
    }

    fn instrument(name: &str, driver: &str, address: &str) -> InstrumentDefinition {
        InstrumentDefinition {
            name: name.to_string(),
            driver: driver.to_string(),
            address: address.to_string(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_connect_simulated_bench() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("generator.ini"), GENERATOR).unwrap();
        fs::write(dir.path().join("broken.ini"), BROKEN).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut disabled = instrument("Spare", "Generator", "tcp://10.255.255.1:5025");
        disabled.enabled = false;
        let config = config(
            dir.path(),
            vec![instrument("Source", "Generator", "mock://"), disabled],
        );

        let (_, report) = load_catalogue(&config).unwrap();
        assert_eq!(report.loaded, vec!["Generator".to_string()]);
        assert_eq!(report.failed.len(), 1);

        let mut bench = Bench::connect(&config).await.unwrap();
        assert_eq!(bench.registry.names(), vec!["Source"]);

        let id = QuantityId::new("Source", "Frequency");
        bench.registry.set(&id, Value::Double(2.5e3)).await.unwrap();
        assert_eq!(bench.registry.get(&id).await.unwrap(), Value::Double(2.5e3));
        assert_eq!(
            bench.catalogue.get_latest("Source", "Frequency"),
            Some(Value::Double(2.5e3))
        );
        bench.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_driver_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("generator.ini"), GENERATOR).unwrap();
        let config = config(dir.path(), vec![instrument("Meter", "Power Meter", "mock://")]);

        let err = Bench::connect(&config).await.err().unwrap();
        assert_eq!(err.kind(), daq_core::ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_bad_address_aborts_connect() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("generator.ini"), GENERATOR).unwrap();
        let config = config(
            dir.path(),
            vec![
                instrument("Source", "Generator", "mock://"),
                instrument("Second", "Generator", "gpib://12"),
            ],
        );

        let err = Bench::connect(&config).await.err().unwrap();
        assert_eq!(err.kind(), daq_core::ErrorKind::Config);
    }
}
