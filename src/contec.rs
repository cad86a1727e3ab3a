//! Discrete I/O module: a Contec Modbus-TCP unit exposing digital inputs (read-only discretes)
//! and digital outputs (read/write coils).
use std::time::Duration;

use parking_lot::Mutex;

use crate::comm::tcp;
use crate::component::{Component, ComponentState};
use crate::config::ContecConfig;
use crate::modbus::ModbusBus;
use crate::types::RobotComponent;
use crate::{Error, Result};

struct Inner {
    bus: Option<ModbusBus>,
}

/// Discrete I/O module.
pub struct Contec {
    ip_address: String,
    port: u16,
    slave_id: u8,
    n_di: usize,
    n_do: usize,
    timeout: Duration,
    inner: Mutex<Inner>,
    state: Mutex<ComponentState>,
}

impl Contec {
    /// Build a Contec instance from its configuration section. Does not connect.
    pub fn new(cfg: &ContecConfig) -> Self {
        Self {
            ip_address: cfg.ip_address.clone(),
            port: cfg.port,
            slave_id: cfg.slave_id as u8,
            n_di: cfg.n_di,
            n_do: cfg.n_do,
            timeout: Duration::from_millis(cfg.response_timeout_ms),
            inner: Mutex::new(Inner { bus: None }),
            state: Mutex::new(ComponentState::Error),
        }
    }

    fn ensure_bus<'a>(&self, inner: &'a mut Inner) -> Result<&'a mut ModbusBus> {
        if inner.bus.is_none() {
            let client = tcp::connect((self.ip_address.as_str(), self.port), self.timeout)?;
            inner.bus = Some(ModbusBus::new(client, self.slave_id));
        }
        Ok(inner.bus.as_mut().unwrap())
    }

    fn fail(&self, err: Error) -> Error {
        *self.state.lock() = ComponentState::Error;
        self.inner.lock().bus = None;
        err
    }

    /// Read the digital inputs, a bit vector of length `nDI` starting at address 0.
    pub fn read_inputs(&self) -> Result<Vec<bool>> {
        let mut inner = self.inner.lock();
        let bus = self.ensure_bus(&mut inner)?;
        bus.read_discretes(0, self.n_di as u16)
            .map_err(|e| self.fail(e))
    }

    /// Read the digital outputs, a bit vector of length `nDO` starting at address 0.
    pub fn read_outputs(&self) -> Result<Vec<bool>> {
        let mut inner = self.inner.lock();
        let bus = self.ensure_bus(&mut inner)?;
        bus.read_coils(0, self.n_do as u16).map_err(|e| self.fail(e))
    }

    /// Write the digital outputs. Rejects any vector whose length isn't exactly `nDO`.
    pub fn set_outputs(&self, outputs: &[bool]) -> Result<()> {
        if outputs.len() != self.n_do {
            return Err(Error::rejected(format!(
                "invalid number of outputs provided! {} instead of {}",
                outputs.len(),
                self.n_do
            )));
        }
        let mut inner = self.inner.lock();
        let bus = self.ensure_bus(&mut inner)?;
        bus.write_coils(0, outputs).map_err(|e| self.fail(e))
    }
}

impl Component for Contec {
    fn component_type(&self) -> RobotComponent {
        RobotComponent::Contec
    }

    fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match self.ensure_bus(&mut inner) {
            Ok(_) => {
                *self.state.lock() = ComponentState::Normal;
                Ok(())
            }
            Err(e) => {
                inner.bus = None;
                *self.state.lock() = ComponentState::Error;
                Err(e)
            }
        }
    }

    fn reset(&self) {
        self.inner.lock().bus = None;
        *self.state.lock() = ComponentState::Error;
    }

    fn state(&self) -> ComponentState {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ContecConfig {
        ContecConfig {
            ip_address: "127.0.0.1".to_owned(),
            port: 15020,
            slave_id: 1,
            n_di: 8,
            n_do: 4,
            response_timeout_ms: 50,
        }
    }

    #[test]
    fn set_outputs_rejects_wrong_length() {
        let contec = Contec::new(&cfg());
        let err = contec.set_outputs(&[true, false]).unwrap_err();
        assert!(matches!(err, Error::OperationRejected(_)));
    }

    #[test]
    fn starts_in_error_state() {
        let contec = Contec::new(&cfg());
        assert_eq!(contec.state(), ComponentState::Error);
    }
}
