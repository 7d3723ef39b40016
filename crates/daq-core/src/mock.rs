//! Mock transport for testing sessions and runs without hardware.
//!
//! [`MockTransport`] answers commands from a script of exact-match replies and can
//! optionally simulate a simple SCPI-like instrument: `HDR value` stores `value`
//! under `HDR`, and a later `HDR?` answers it. Every write is logged, and failures
//! can be injected one-shot or permanently (disconnect).
//!
//! Reads with no pending reply wait forever, the way a silent instrument does; the
//! session's timeout is what bounds them.
//!
//! # Example
//!
//! ```
//! use daq_core::mock::MockTransport;
//!
//! let mock = MockTransport::new("Source")
//!     .with_reply("*IDN?", "ACME,SG-100,0,1.0")
//!     .with_echo();
//! let handle = mock.handle();
//! assert!(handle.writes().is_empty());
//! ```

use crate::transport::{SerialSettings, Transport, TransportSettings};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use tracing::trace;

type ReadHook = Box<dyn FnMut(usize) + Send>;

#[derive(Default)]
struct MockState {
    replies: HashMap<String, String>,
    queued: VecDeque<String>,
    echo: bool,
    echo_store: HashMap<String, String>,
    pending: VecDeque<String>,
    writes: Vec<String>,
    reads: usize,
    settings: Option<TransportSettings>,
    serial: Option<SerialSettings>,
    fail_next_write: Option<io::ErrorKind>,
    fail_next_read: Option<io::ErrorKind>,
    disconnected: bool,
    closed: bool,
    close_calls: usize,
    read_hook: Option<ReadHook>,
}

/// Scripted transport. Clone the [`MockHandle`] before moving the transport into a
/// session to keep inspecting it.
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
}

/// Shared view on a [`MockTransport`] for assertions and failure injection.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Answer `command` with `reply` every time it is written.
    pub fn with_reply(self, command: impl Into<String>, reply: impl Into<String>) -> Self {
        self.state
            .lock()
            .replies
            .insert(command.into(), reply.into());
        self
    }

    /// Simulate `HDR value` / `HDR?` store and recall for unscripted commands.
    pub fn with_echo(self) -> Self {
        self.state.lock().echo = true;
        self
    }

    /// Preload the simulated value behind `header` (echo mode).
    pub fn with_stored(self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.state
            .lock()
            .echo_store
            .insert(header.into(), value.into());
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MockHandle {
    /// Every command written so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    /// Written commands that are not queries.
    pub fn set_writes(&self) -> Vec<String> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| !w.trim_end().ends_with('?'))
            .cloned()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    /// Settings most recently applied through `configure`.
    pub fn settings(&self) -> Option<TransportSettings> {
        self.state.lock().settings.clone()
    }

    pub fn serial(&self) -> Option<SerialSettings> {
        self.state.lock().serial
    }

    /// Queue a reply served before any scripted or simulated one.
    pub fn queue_reply(&self, reply: impl Into<String>) {
        self.state.lock().queued.push_back(reply.into());
    }

    /// Set the simulated value behind `header`.
    pub fn store(&self, header: impl Into<String>, value: impl Into<String>) {
        self.state
            .lock()
            .echo_store
            .insert(header.into(), value.into());
    }

    pub fn stored(&self, header: &str) -> Option<String> {
        self.state.lock().echo_store.get(header).cloned()
    }

    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.state.lock().fail_next_write = Some(kind);
    }

    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.state.lock().fail_next_read = Some(kind);
    }

    /// Drop the link: every later write and read fails with `BrokenPipe`.
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Run `hook` with the 1-based read count on every read. The hook runs under
    /// the mock's lock and must not call back into this handle.
    pub fn on_read(&self, hook: impl FnMut(usize) + Send + 'static) {
        self.state.lock().read_hook = Some(Box::new(hook));
    }
}

impl MockState {
    fn check_link(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock closed"));
        }
        if self.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock link lost"));
        }
        Ok(())
    }

    fn respond(&mut self, command: &str) {
        if let Some(reply) = self.queued.pop_front() {
            self.pending.push_back(reply);
            return;
        }
        if let Some(reply) = self.replies.get(command) {
            self.pending.push_back(reply.clone());
            return;
        }
        if !self.echo {
            return;
        }
        let command = command.trim();
        if let Some(header) = command.strip_suffix('?') {
            let reply = self
                .echo_store
                .get(header.trim())
                .cloned()
                .unwrap_or_else(|| "0".to_string());
            self.pending.push_back(reply);
        } else if let Some((header, value)) = command.split_once(' ') {
            self.echo_store
                .insert(header.trim().to_string(), value.trim().to_string());
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn configure(&mut self, settings: &TransportSettings) -> io::Result<()> {
        let mut state = self.state.lock();
        state.check_link()?;
        state.settings = Some(settings.clone());
        Ok(())
    }

    async fn configure_serial(&mut self, serial: &SerialSettings) -> io::Result<()> {
        let mut state = self.state.lock();
        state.check_link()?;
        state.serial = Some(*serial);
        Ok(())
    }

    async fn write(&mut self, command: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        state.check_link()?;
        if let Some(kind) = state.fail_next_write.take() {
            return Err(io::Error::new(kind, "injected write failure"));
        }
        trace!(mock = %self.name, command, "mock write");
        state.writes.push(command.to_string());
        state.respond(command);
        Ok(())
    }

    async fn read(&mut self) -> io::Result<String> {
        let reply = {
            let mut state = self.state.lock();
            state.check_link()?;
            state.reads += 1;
            let count = state.reads;
            if let Some(hook) = state.read_hook.as_mut() {
                hook(count);
            }
            if let Some(kind) = state.fail_next_read.take() {
                return Err(io::Error::new(kind, "injected read failure"));
            }
            state.pending.pop_front()
        };
        match reply {
            Some(reply) => Ok(reply),
            None => std::future::pending().await,
        }
    }

    async fn clear(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.check_link()?;
        state.pending.clear();
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        state.closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mock://{}", self.name)
    }
}
