//! A thin Modbus client adapter: one bus per physical link (TCP or RTU-over-serial), shared by
//! every component that talks to the devices on that link. Holds the wire-protocol bookkeeping
//! (transaction ids, frame re-assembly); callers work in registers and booleans, never bytes.
use rmodbus::client::ModbusRequest;
use rmodbus::{guess_response_frame_len, ModbusProto};

use crate::comm::{Client, Protocol};
use crate::{Error, Result};

impl From<Protocol> for ModbusProto {
    fn from(value: Protocol) -> Self {
        match value {
            Protocol::Tcp => ModbusProto::TcpUdp,
            Protocol::Serial => ModbusProto::Rtu,
        }
    }
}

/// A Modbus client bound to one unit (slave) id over one [`Client`] transport.
///
/// Cheap to construct; the expensive part (the connection) lives in the shared [`Client`], so a
/// `ModbusBus` can be created fresh per call without any extra cost.
pub struct ModbusBus {
    client: Client,
    unit_id: u8,
    request_id: u16,
}

macro_rules! prepare_transaction {
    ($self:expr) => {{
        let mut mreq = ModbusRequest::new($self.unit_id, $self.client.protocol().into());
        mreq.tr_id = $self.request_id;
        $self.request_id = $self.request_id.wrapping_add(1);
        mreq
    }};
}

macro_rules! communicate {
    ($self:expr, $buf:expr) => {{
        $self.client.write(&$buf)?;
        let mut head = [0u8; 6];
        $self.client.read_exact(&mut head)?;
        $buf.truncate(0);
        $buf.extend_from_slice(&head);
        let len = guess_response_frame_len(&head, $self.client.protocol().into())?;
        if len > 6 {
            let mut rest = vec![0u8; usize::from(len - 6)];
            $self.client.read_exact(&mut rest)?;
            $buf.extend_from_slice(&rest);
        }
    }};
}

impl ModbusBus {
    /// Create a new bus view over `client`, addressing unit (slave) `unit_id`.
    pub fn new(client: Client, unit_id: u8) -> Self {
        Self {
            client,
            unit_id,
            request_id: 1,
        }
    }

    /// Read `count` consecutive holding registers starting at `offset`.
    pub fn read_holdings(&mut self, offset: u16, count: u16) -> Result<Vec<u16>> {
        let _lock = self.client.lock();
        let mut mreq = prepare_transaction!(self);
        let mut buf = Vec::with_capacity(16);
        mreq.generate_get_holdings(offset, count, &mut buf)?;
        communicate!(self, buf);
        let mut data = Vec::new();
        mreq.parse_u16(&buf, &mut data)?;
        Ok(data)
    }

    /// Write consecutive holding registers starting at `offset` in a single bulk transaction.
    pub fn write_holdings(&mut self, offset: u16, values: &[u16]) -> Result<()> {
        let _lock = self.client.lock();
        let mut data_buf = Vec::with_capacity(values.len() * 2);
        for v in values {
            data_buf.extend_from_slice(&v.to_be_bytes());
        }
        let mut mreq = prepare_transaction!(self);
        let mut buf = Vec::with_capacity(16);
        mreq.generate_set_holdings_bulk_from_slice(offset, &data_buf, &mut buf)?;
        communicate!(self, buf);
        mreq.parse_ok(&buf)?;
        Ok(())
    }

    /// Read a single holding register.
    pub fn read_holding(&mut self, offset: u16) -> Result<u16> {
        let regs = self.read_holdings(offset, 1)?;
        regs.first().copied().ok_or_else(|| Error::transport("empty modbus response"))
    }

    /// Write a single holding register.
    pub fn write_holding(&mut self, offset: u16, value: u16) -> Result<()> {
        self.write_holdings(offset, &[value])
    }

    /// Read a 32-bit value spread over two consecutive holding registers, high word first (the
    /// AR-KD2 convention for position/speed pairs).
    pub fn read_holding_u32(&mut self, offset: u16) -> Result<u32> {
        let regs = self.read_holdings(offset, 2)?;
        let (hi, lo) = (
            *regs.first().ok_or_else(|| Error::transport("empty modbus response"))?,
            *regs.get(1).ok_or_else(|| Error::transport("truncated modbus response"))?,
        );
        Ok((u32::from(hi) << 16) | u32::from(lo))
    }

    /// Write a 32-bit value as two consecutive holding registers, high word first.
    pub fn write_holding_u32(&mut self, offset: u16, value: u32) -> Result<()> {
        let hi = (value >> 16) as u16;
        let lo = (value & 0xFFFF) as u16;
        self.write_holdings(offset, &[hi, lo])
    }

    /// Read `count` consecutive discrete inputs starting at `offset`.
    pub fn read_discretes(&mut self, offset: u16, count: u16) -> Result<Vec<bool>> {
        let _lock = self.client.lock();
        let mut mreq = prepare_transaction!(self);
        let mut buf = Vec::with_capacity(16);
        mreq.generate_get_discretes(offset, count, &mut buf)?;
        communicate!(self, buf);
        let mut data = Vec::new();
        mreq.parse_bool(&buf, &mut data)?;
        Ok(data)
    }

    /// Read `count` consecutive coils starting at `offset`.
    pub fn read_coils(&mut self, offset: u16, count: u16) -> Result<Vec<bool>> {
        let _lock = self.client.lock();
        let mut mreq = prepare_transaction!(self);
        let mut buf = Vec::with_capacity(16);
        mreq.generate_get_coils(offset, count, &mut buf)?;
        communicate!(self, buf);
        let mut data = Vec::new();
        mreq.parse_bool(&buf, &mut data)?;
        Ok(data)
    }

    /// Write consecutive coils starting at `offset` in a single bulk transaction.
    pub fn write_coils(&mut self, offset: u16, values: &[bool]) -> Result<()> {
        let _lock = self.client.lock();
        let mut mreq = prepare_transaction!(self);
        let mut buf = Vec::with_capacity(16);
        mreq.generate_set_coils_bulk(offset, values, &mut buf)?;
        communicate!(self, buf);
        mreq.parse_ok(&buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_maps_to_modbus_proto() {
        assert!(matches!(ModbusProto::from(Protocol::Tcp), ModbusProto::TcpUdp));
        assert!(matches!(ModbusProto::from(Protocol::Serial), ModbusProto::Rtu));
    }
}
