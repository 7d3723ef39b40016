//! Opening instrument links from address strings.
//!
//! | Address | Link |
//! |---|---|
//! | `tcp://host:port` | raw socket |
//! | `serial:///dev/ttyUSB0` | serial port, line settings from the driver (feature `serial`) |
//! | `mock://` | simulated instrument that echoes what is set and passes the model check |

use daq_core::mock::MockTransport;
use daq_core::stream::StreamTransport;
use daq_core::{DaqError, DaqResult, Transport};
use daq_driver_generic::DriverConfig;
use std::fmt;
use std::io;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentAddress {
    /// `host:port`
    Tcp(String),
    /// Device path
    Serial(String),
    Mock,
}

impl FromStr for InstrumentAddress {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = s.split_once("://").ok_or_else(|| {
            DaqError::Config(format!(
                "address '{}' has no scheme (tcp://, serial:// or mock://)",
                s
            ))
        })?;
        match scheme.to_ascii_lowercase().as_str() {
            "tcp" if rest.contains(':') => Ok(InstrumentAddress::Tcp(rest.to_string())),
            "tcp" => Err(DaqError::Config(format!(
                "tcp address '{}' needs host:port",
                s
            ))),
            "serial" if !rest.is_empty() => Ok(InstrumentAddress::Serial(rest.to_string())),
            "serial" => Err(DaqError::Config(format!(
                "serial address '{}' needs a device path",
                s
            ))),
            "mock" => Ok(InstrumentAddress::Mock),
            other => Err(DaqError::Config(format!(
                "unknown address scheme '{}' in '{}'",
                other, s
            ))),
        }
    }
}

impl fmt::Display for InstrumentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentAddress::Tcp(addr) => write!(f, "tcp://{}", addr),
            InstrumentAddress::Serial(path) => write!(f, "serial://{}", path),
            InstrumentAddress::Mock => f.write_str("mock://"),
        }
    }
}

/// Open the link for instrument `name`. The session configures it afterwards.
pub async fn open_transport(
    name: &str,
    address: &InstrumentAddress,
    driver: &DriverConfig,
) -> DaqResult<Box<dyn Transport>> {
    info!(instrument = %name, address = %address, "Opening link");
    match address {
        InstrumentAddress::Tcp(addr) => {
            let link = tokio::time::timeout(
                driver.transport.timeout,
                StreamTransport::connect_tcp(addr),
            )
            .await
            .map_err(|_| {
                DaqError::transport(
                    name,
                    "connect",
                    io::Error::new(io::ErrorKind::TimedOut, format!("no answer from {}", addr)),
                )
            })?
            .map_err(|e| DaqError::transport(name, "connect", e))?;
            Ok(Box::new(link))
        }
        InstrumentAddress::Serial(path) => open_serial(name, path, driver),
        InstrumentAddress::Mock => Ok(Box::new(simulated(name, driver))),
    }
}

#[cfg(feature = "serial")]
fn open_serial(name: &str, path: &str, driver: &DriverConfig) -> DaqResult<Box<dyn Transport>> {
    use daq_core::stream::SerialTransport;

    let settings = driver.transport.serial.unwrap_or_default();
    let link = SerialTransport::open(path, &settings)
        .map_err(|e| DaqError::transport(name, "open serial port", e))?;
    Ok(Box::new(link))
}

#[cfg(not(feature = "serial"))]
fn open_serial(name: &str, path: &str, _driver: &DriverConfig) -> DaqResult<Box<dyn Transport>> {
    Err(DaqError::Config(format!(
        "instrument '{}' uses serial port {} but labsweep was built without the 'serial' feature",
        name, path
    )))
}

/// Echo instrument that answers the driver's model and option queries.
pub fn simulated(name: &str, driver: &DriverConfig) -> MockTransport {
    let mut mock = MockTransport::new(name);
    let model = &driver.model;
    if let Some(first) = model.models.first() {
        mock = mock.with_reply(
            model.model_cmd.clone(),
            format!("labsweep,{},0,0", first.matcher),
        );
    }
    if !model.option_cmd.is_empty() {
        let installed: Vec<&str> = model.options.iter().map(|o| o.matcher.as_str()).collect();
        mock = mock.with_reply(model.option_cmd.clone(), installed.join(","));
    }
    mock.with_echo()
}
