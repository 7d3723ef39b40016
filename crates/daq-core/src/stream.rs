//! Transport over any tokio byte stream.
//!
//! [`StreamTransport`] covers message-based instruments reachable through a TCP
//! socket (raw SCPI sockets) or a serial port. Commands are written with the
//! configured termination; replies are read up to the final termination byte.
//!
//! ```rust,ignore
//! let mut link = StreamTransport::connect_tcp("192.168.1.20:5025").await?;
//! link.configure(&settings).await?;
//! link.write("*IDN?").await?;
//! let idn = link.read().await?;
//! ```

#[cfg(feature = "serial")]
use crate::transport::SerialSettings;
use crate::transport::{Termination, Transport, TransportSettings};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Terminator used when the driver leaves termination to the transport.
const DEFAULT_TERMINATOR: &str = "\n";

pub struct StreamTransport<S> {
    stream: BufReader<S>,
    description: String,
    terminator: String,
    closed: bool,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, description: impl Into<String>) -> Self {
        Self {
            stream: BufReader::new(stream),
            description: description.into(),
            terminator: DEFAULT_TERMINATOR.to_string(),
            closed: false,
        }
    }

    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is closed", self.description),
            ))
        } else {
            Ok(())
        }
    }

    fn apply_termination(&mut self, termination: Termination) {
        self.terminator = match termination.as_str() {
            "" => DEFAULT_TERMINATOR.to_string(),
            chars => chars.to_string(),
        };
    }
}

impl StreamTransport<TcpStream> {
    /// Open a raw socket connection (`host:port`).
    pub async fn connect_tcp(address: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, format!("tcp://{}", address)))
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn configure(&mut self, settings: &TransportSettings) -> io::Result<()> {
        self.apply_termination(settings.termination);
        debug!(
            transport = %self.description,
            terminator = ?self.terminator,
            timeout_ms = settings.timeout.as_millis() as u64,
            "Configured stream transport"
        );
        Ok(())
    }

    async fn write(&mut self, command: &str) -> io::Result<()> {
        self.ensure_open()?;
        trace!(transport = %self.description, command, "write");
        let inner = self.stream.get_mut();
        inner.write_all(command.as_bytes()).await?;
        inner.write_all(self.terminator.as_bytes()).await?;
        inner.flush().await
    }

    async fn read(&mut self) -> io::Result<String> {
        self.ensure_open()?;
        let delimiter = self.terminator.as_bytes().last().copied().unwrap_or(b'\n');
        let mut buf = Vec::new();
        let n = self.stream.read_until(delimiter, &mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} closed by peer", self.description),
            ));
        }
        let text = String::from_utf8(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let reply = text.trim_end_matches(['\r', '\n']).to_string();
        trace!(transport = %self.description, reply = %reply, "read");
        Ok(reply)
    }

    async fn clear(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        // Drain without waiting: the buffer, then whatever the peer already sent.
        let mut dropped = 0;
        loop {
            let ready = match tokio::time::timeout(Duration::ZERO, self.stream.fill_buf()).await {
                Ok(Ok(buf)) if !buf.is_empty() => buf.len(),
                Ok(Ok(_)) | Err(_) => break,
                Ok(Err(e)) => return Err(e),
            };
            self.stream.consume(ready);
            dropped += ready;
        }
        if dropped > 0 {
            trace!(link = %self.description, bytes = dropped, "Discarded pending input");
        }
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.get_mut().shutdown().await
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Serial port transport. Line parameters can be re-applied after opening.
#[cfg(feature = "serial")]
pub struct SerialTransport {
    inner: StreamTransport<tokio_serial::SerialStream>,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    /// Open `path` with the given line parameters.
    pub fn open(path: &str, serial: &SerialSettings) -> io::Result<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(path, serial.baud_rate)
            .data_bits(data_bits(serial.data_bits)?)
            .stop_bits(stop_bits(serial)?)
            .parity(parity(serial))
            .open_native_async()
            .map_err(io::Error::from)?;
        Ok(Self {
            inner: StreamTransport::new(stream, format!("serial://{}", path)),
        })
    }
}

#[cfg(feature = "serial")]
fn data_bits(bits: u8) -> io::Result<tokio_serial::DataBits> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported data bits {}", other),
        )),
    }
}

#[cfg(feature = "serial")]
fn stop_bits(serial: &SerialSettings) -> io::Result<tokio_serial::StopBits> {
    use crate::transport::StopBits;
    match serial.stop_bits {
        StopBits::One => Ok(tokio_serial::StopBits::One),
        StopBits::Two => Ok(tokio_serial::StopBits::Two),
        StopBits::OnePointFive => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "1.5 stop bits not supported by this serial backend",
        )),
    }
}

#[cfg(feature = "serial")]
fn parity(serial: &SerialSettings) -> tokio_serial::Parity {
    use crate::transport::Parity;
    match serial.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl Transport for SerialTransport {
    async fn configure(&mut self, settings: &TransportSettings) -> io::Result<()> {
        self.inner.configure(settings).await
    }

    async fn configure_serial(&mut self, serial: &SerialSettings) -> io::Result<()> {
        use tokio_serial::SerialPort;

        let port = self.inner.stream.get_mut();
        port.set_baud_rate(serial.baud_rate).map_err(io::Error::from)?;
        port.set_data_bits(data_bits(serial.data_bits)?)
            .map_err(io::Error::from)?;
        port.set_stop_bits(stop_bits(serial)?)
            .map_err(io::Error::from)?;
        port.set_parity(parity(serial)).map_err(io::Error::from)?;
        Ok(())
    }

    async fn write(&mut self, command: &str) -> io::Result<()> {
        self.inner.write(command).await
    }

    async fn read(&mut self) -> io::Result<String> {
        self.inner.read().await
    }

    async fn clear(&mut self) -> io::Result<()> {
        self.inner.clear().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.close().await
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_write_appends_configured_terminator() {
        let (client, mut device) = duplex(256);
        let mut link = StreamTransport::new(client, "duplex");
        let settings = TransportSettings {
            termination: Termination::CrLf,
            ..Default::default()
        };
        link.configure(&settings).await.unwrap();
        link.write("FREQ 10").await.unwrap();

        let mut buf = [0u8; 9];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"FREQ 10\r\n");
    }

    #[tokio::test]
    async fn test_read_strips_terminator() {
        let (client, mut device) = duplex(256);
        let mut link = StreamTransport::new(client, "duplex");
        link.configure(&TransportSettings::default()).await.unwrap();
        assert_eq!(link.terminator(), "\n");

        device.write_all(b"ACME,Model 7\r\n").await.unwrap();
        assert_eq!(link.read().await.unwrap(), "ACME,Model 7");
    }

    #[tokio::test]
    async fn test_clear_drops_replies_already_sent() {
        let (client, mut device) = duplex(256);
        let mut link = StreamTransport::new(client, "duplex");
        link.configure(&TransportSettings::default()).await.unwrap();

        // A late answer plus a partial line, neither read yet.
        device.write_all(b"1.0\n1.").await.unwrap();
        link.clear().await.unwrap();
        device.write_all(b"2.0\n").await.unwrap();
        assert_eq!(link.read().await.unwrap(), "2.0");

        // Nothing pending: clear returns without waiting.
        link.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_after_peer_close_is_disconnect() {
        let (client, device) = duplex(16);
        let mut link = StreamTransport::new(client, "duplex");
        drop(device);
        let err = link.read().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _device) = duplex(16);
        let mut link = StreamTransport::new(client, "duplex");
        link.close().await.unwrap();
        link.close().await.unwrap();
        assert_eq!(
            link.write("X").await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }
}
