use std::io::{Read, Write};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serial::prelude::*;
use serial::SystemPort;

use super::{Client, Communicator, Protocol};
use crate::{Error, Result};

/// Structured serial port configuration, as carried by the configuration document
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// device path, e.g. `/dev/ttyUSB0`
    pub device: String,
    /// baud rate
    pub baud: u32,
    /// data bits per character, default 8
    pub data_bits: u8,
    /// parity: 'N', 'E' or 'O'
    pub parity: char,
    /// stop bits, 1 or 2
    pub stop_bits: u8,
    /// read timeout
    pub read_timeout: Duration,
    /// minimum spacing enforced between consecutive frames written to the port
    pub frame_delay: Duration,
}

fn baud_rate(baud: u32) -> Result<serial::BaudRate> {
    Ok(match baud {
        110 => serial::Baud110,
        300 => serial::Baud300,
        600 => serial::Baud600,
        1200 => serial::Baud1200,
        2400 => serial::Baud2400,
        4800 => serial::Baud4800,
        9600 => serial::Baud9600,
        19200 => serial::Baud19200,
        38400 => serial::Baud38400,
        57600 => serial::Baud57600,
        115200 => serial::Baud115200,
        other => serial::BaudOther(other as usize),
    })
}

fn char_size(bits: u8) -> Result<serial::CharSize> {
    match bits {
        5 => Ok(serial::Bits5),
        6 => Ok(serial::Bits6),
        7 => Ok(serial::Bits7),
        8 => Ok(serial::Bits8),
        other => Err(Error::config(format!("unsupported serial char size: {}", other))),
    }
}

fn parity(p: char) -> Result<serial::Parity> {
    match p {
        'N' => Ok(serial::ParityNone),
        'E' => Ok(serial::ParityEven),
        'O' => Ok(serial::ParityOdd),
        other => Err(Error::config(format!("unsupported serial parity: {}", other))),
    }
}

fn stop_bits(bits: u8) -> Result<serial::StopBits> {
    match bits {
        1 => Ok(serial::Stop1),
        2 => Ok(serial::Stop2),
        other => Err(Error::config(format!("unsupported serial stop bits: {}", other))),
    }
}

fn open(cfg: &SerialConfig) -> Result<SystemPort> {
    let mut port = serial::open(&cfg.device).map_err(|e| Error::transport(e.to_string()))?;
    let baud = baud_rate(cfg.baud)?;
    let chars = char_size(cfg.data_bits)?;
    let par = parity(cfg.parity)?;
    let stop = stop_bits(cfg.stop_bits)?;
    port.reconfigure(&|settings| {
        settings.set_baud_rate(baud)?;
        settings.set_char_size(chars);
        settings.set_parity(par);
        settings.set_stop_bits(stop);
        settings.set_flow_control(serial::FlowNone);
        Ok(())
    })
    .map_err(|e| Error::transport(e.to_string()))?;
    port.set_timeout(cfg.read_timeout)
        .map_err(|e| Error::transport(e.to_string()))?;
    Ok(port)
}

/// Create a new serial client. The port is opened lazily on first use and re-opened
/// transparently after a read/write error.
pub fn connect(cfg: SerialConfig) -> Result<Client> {
    Ok(super::wrap(Serial {
        cfg,
        port: Mutex::new(SPort::default()),
        busy: Mutex::new(()),
    }))
}

struct Serial {
    cfg: SerialConfig,
    port: Mutex<SPort>,
    busy: Mutex<()>,
}

#[derive(Default)]
struct SPort {
    system_port: Option<SystemPort>,
    last_frame: Option<Instant>,
}

impl Serial {
    fn get_port(&self) -> Result<MutexGuard<'_, SPort>> {
        let mut lock = self.port.lock();
        if lock.system_port.is_none() {
            lock.system_port.replace(open(&self.cfg)?);
            lock.last_frame.take();
        }
        Ok(lock)
    }
}

impl Communicator for Serial {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.busy.lock()
    }
    fn write(&self, buf: &[u8]) -> Result<()> {
        let mut port = self.get_port()?;
        if let Some(last_frame) = port.last_frame {
            let elapsed = last_frame.elapsed();
            if elapsed < self.cfg.frame_delay {
                std::thread::sleep(self.cfg.frame_delay - elapsed);
            }
        }
        let result = port
            .system_port
            .as_mut()
            .unwrap()
            .write_all(buf)
            .map_err(Error::from);
        if result.is_ok() {
            port.last_frame.replace(Instant::now());
        } else {
            port.system_port.take();
        }
        result
    }
    fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut port = self.get_port()?;
        port.system_port
            .as_mut()
            .unwrap()
            .read_exact(buf)
            .map_err(|e| {
                port.system_port.take();
                e
            })
            .map_err(Into::into)
    }
    fn read_line(&self, terminator: u8) -> Result<Option<String>> {
        let mut port = self.get_port()?;
        let sys = port.system_port.as_mut().unwrap();
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match sys.read_exact(&mut byte) {
                Ok(()) => {
                    if byte[0] == terminator {
                        return Ok(Some(String::from_utf8_lossy(&buf).into_owned()));
                    }
                    buf.push(byte[0]);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    port.system_port.take();
                    return Err(e.into());
                }
            }
        }
    }
    fn reset(&self) {
        let mut port = self.port.lock();
        port.system_port.take();
        port.last_frame.take();
    }
    fn protocol(&self) -> Protocol {
        Protocol::Serial
    }
}
