use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use super::{Client, Communicator, Protocol};
use crate::{Error, Result};

/// Create a new TCP client. The connection is established lazily on first use and transparently
/// re-established after any read/write error.
pub fn connect<A: ToSocketAddrs + std::fmt::Debug>(addr: A, timeout: Duration) -> Result<Client> {
    Ok(super::wrap(Tcp::create(addr, timeout)?))
}

struct Tcp {
    addr: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    timeout: Duration,
    busy: Mutex<()>,
}

macro_rules! handle_stream_error {
    ($stream:expr, $err:expr, $always:expr) => {{
        if $always || $err.kind() == std::io::ErrorKind::TimedOut {
            $stream.take();
        }
        $err
    }};
}

impl Tcp {
    fn create<A: ToSocketAddrs + std::fmt::Debug>(addr: A, timeout: Duration) -> Result<Self> {
        Ok(Self {
            addr: addr
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| Error::config(format!("invalid address: {:?}", addr)))?,
            stream: Mutex::new(None),
            busy: Mutex::new(()),
            timeout,
        })
    }

    fn get_stream(&self) -> std::io::Result<MutexGuard<'_, Option<TcpStream>>> {
        let mut lock = self.stream.lock();
        if lock.is_none() {
            let stream = TcpStream::connect_timeout(&self.addr, self.timeout)?;
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;
            stream.set_nodelay(true)?;
            lock.replace(stream);
        }
        Ok(lock)
    }
}

impl Communicator for Tcp {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.busy.lock()
    }
    fn write(&self, buf: &[u8]) -> Result<()> {
        let mut stream = self.get_stream()?;
        stream
            .as_mut()
            .unwrap()
            .write_all(buf)
            .map_err(|e| handle_stream_error!(stream, e, true))
            .map_err(Into::into)
    }
    fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut stream = self.get_stream()?;
        stream
            .as_mut()
            .unwrap()
            .read_exact(buf)
            .map_err(|e| handle_stream_error!(stream, e, false))
            .map_err(Into::into)
    }
    fn read_line(&self, terminator: u8) -> Result<Option<String>> {
        let mut stream = self.get_stream()?;
        let mut reader = BufReader::new(stream.as_mut().unwrap().try_clone()?);
        let mut buf = Vec::new();
        match reader.read_until(terminator, &mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(String::from_utf8_lossy(&buf).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut
                || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(None)
            }
            Err(e) => {
                stream.take();
                Err(e.into())
            }
        }
    }
    fn reset(&self) {
        self.stream.lock().take();
    }
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }
}
