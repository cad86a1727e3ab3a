//! Server-side network transport: a PUB socket publishing [`RobotStatus`] snapshots, and a REP
//! socket exchanging command/response documents. Grounded on the `zmq` crate — PUB/SUB and
//! REQ/REP are native ZeroMQ socket kinds, a direct fit for the configuration's socket-kind
//! names; the teacher itself only has an in-process `hub`, so this is learned from the rest of
//! the corpus rather than adapted from teacher code.
//!
//! [`bind`] hands back two single-owner halves rather than one shared struct: each socket is
//! only ever touched from the thread that owns it (control loop publishes, command server
//! replies), so there is no need to make either half `Sync`.
use std::time::Duration;

use serde_json::Value;

use crate::config::RimoServerConfig;
use crate::types::RobotStatus;
use crate::{Error, Result};

/// Publishes [`RobotStatus`] snapshots on the status PUB socket. Owned by the control thread.
pub struct StatusPublisher {
    socket: zmq::Socket,
}

impl StatusPublisher {
    /// Serialize and publish one status snapshot. Never blocks (PUB sockets drop to slow/absent
    /// subscribers rather than backing up the control thread).
    pub fn publish(&self, status: &RobotStatus) -> Result<()> {
        let body = serde_json::to_vec(status)?;
        self.socket.send(body, zmq::DONTWAIT).map_err(zmq_err)
    }
}

/// Exchanges command request/response documents on the command REP socket. Owned by the command
/// server thread.
pub struct CommandEndpoint {
    socket: zmq::Socket,
}

impl CommandEndpoint {
    /// Receive one command document, or `None` on a receive timeout.
    pub fn receive_command(&self) -> Result<Option<Value>> {
        match self.socket.recv_bytes(0) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(zmq_err(e)),
        }
    }

    /// Send the reply to the command most recently received. Must be called exactly once per
    /// successful `receive_command` (REP socket ordering requirement).
    pub fn send_response(&self, response: &Value) -> Result<()> {
        let body = serde_json::to_vec(response)?;
        self.socket.send(body, 0).map_err(zmq_err)
    }
}

impl crate::command_server::CommandChannel for CommandEndpoint {
    fn receive_command(&self) -> Result<Option<Value>> {
        CommandEndpoint::receive_command(self)
    }
    fn send_response(&self, response: &Value) -> Result<()> {
        CommandEndpoint::send_response(self, response)
    }
}

/// Bind both sockets on a fresh context. `command_receive_timeout` bounds how long
/// `CommandEndpoint::receive_command` blocks, so the command-server thread can observe its
/// `running` flag between polls.
pub fn bind(cfg: &RimoServerConfig, command_receive_timeout: Duration) -> Result<(StatusPublisher, CommandEndpoint)> {
    let context = zmq::Context::new();

    let status = context.socket(zmq::PUB).map_err(zmq_err)?;
    status.bind(&cfg.status_address).map_err(zmq_err)?;

    let command = context.socket(zmq::REP).map_err(zmq_err)?;
    command
        .set_rcvtimeo(command_receive_timeout.as_millis() as i32)
        .map_err(zmq_err)?;
    command.bind(&cfg.command_address).map_err(zmq_err)?;

    Ok((StatusPublisher { socket: status }, CommandEndpoint { socket: command }))
}

fn zmq_err(e: zmq::Error) -> Error {
    Error::transport(e.to_string())
}
