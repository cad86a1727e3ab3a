//! Reliable TCP/Serial communication backends, shared by the Modbus adapter and the control panel.
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::MutexGuard;

use crate::Result;

/// TCP communications
pub mod tcp;
/// Serial communications
pub mod serial;

/// A versatile (TCP/serial) client handle. Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct Client(Arc<dyn Communicator + Send + Sync>);

impl Client {
    /// Lock the client for exclusive access across a single request/response transaction
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }
    /// Write data to the client, reconnecting first if the connection is down
    pub fn write(&self, buf: &[u8]) -> Result<()> {
        self.0.write(buf)
    }
    /// Read exactly `buf.len()` bytes
    pub fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        self.0.read_exact(buf)
    }
    /// Read a single line, terminated by the given byte. Returns `None` on a read timeout (not a
    /// hard error, so the caller can keep polling).
    pub fn read_line(&self, terminator: u8) -> Result<Option<String>> {
        self.0.read_line(terminator)
    }
    /// Drop the underlying connection; the next call reconnects lazily
    pub fn reset(&self) {
        self.0.reset();
    }
    /// The protocol this client speaks
    pub fn protocol(&self) -> Protocol {
        self.0.protocol()
    }
}

/// The wire protocol carried by a [`Client`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Modbus TCP / raw TCP
    Tcp,
    /// Modbus RTU / raw serial
    Serial,
}

trait Communicator {
    fn lock(&self) -> MutexGuard<'_, ()>;
    fn write(&self, buf: &[u8]) -> Result<()>;
    fn read_exact(&self, buf: &mut [u8]) -> Result<()>;
    fn read_line(&self, terminator: u8) -> Result<Option<String>>;
    fn reset(&self);
    fn protocol(&self) -> Protocol;
}

pub(crate) fn wrap<C: Communicator + Send + Sync + 'static>(c: C) -> Client {
    Client(Arc::new(c))
}

pub(crate) trait Stream: Read + Write + Send {}
impl<T: Read + Write + Send> Stream for T {}

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
