//! Command server event loop: pulls wire request documents off the command channel, runs them
//! through a [`CommandProcessor`], and sends back the response. Grounded on §4.10's loop-while-
//! running shape, the same cancellation idiom used by every other long-lived thread in this
//! crate (bounded blocking call, observe `running`, repeat).
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use crate::command::{CommandProcessor, Dispatch};
use crate::Result;

/// The minimal transport surface a [`CommandServer`] needs: receive one request (or time out),
/// send back exactly one response per request received.
pub trait CommandChannel {
    /// Receive a single request document, or `None` on a receive timeout.
    fn receive_command(&self) -> Result<Option<Value>>;
    /// Send the response to the most recently received request.
    fn send_response(&self, response: &Value) -> Result<()>;
}

/// Drives the command request/response loop on its own thread.
pub struct CommandServer<C, D> {
    channel: C,
    processor: CommandProcessor<D>,
}

impl<C: CommandChannel, D: Dispatch> CommandServer<C, D> {
    /// Build a command server around a channel and an injected dispatch function.
    pub fn new(channel: C, dispatch: D) -> Self {
        Self { channel, processor: CommandProcessor::new(dispatch) }
    }

    /// Run until `running` is cleared. Each iteration blocks at most one receive-timeout
    /// interval, so shutdown latency is bounded by the channel's own timeout.
    pub fn run_loop(&self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            match self.channel.receive_command() {
                Ok(None) => continue,
                Ok(Some(document)) => {
                    let response = self.processor.process(&document);
                    if let Err(e) = self.channel.send_response(&response) {
                        log::error!("CommandServer failed to send response: {}", e);
                    }
                }
                Err(e) => {
                    log::error!("CommandServer receive failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Hands out queued requests one at a time; once drained, flips `running` off so the loop
    /// under test terminates instead of busy-spinning (a real [`crate::transport::Transport`]
    /// would instead block on its socket receive timeout).
    struct FakeChannel<'a> {
        inbox: Mutex<VecDeque<Value>>,
        outbox: Mutex<Vec<Value>>,
        running: &'a AtomicBool,
    }

    impl CommandChannel for FakeChannel<'_> {
        fn receive_command(&self) -> Result<Option<Value>> {
            let mut inbox = self.inbox.lock();
            match inbox.pop_front() {
                Some(value) => Ok(Some(value)),
                None => {
                    self.running.store(false, Ordering::Relaxed);
                    Ok(None)
                }
            }
        }
        fn send_response(&self, response: &Value) -> Result<()> {
            self.outbox.lock().push(response.clone());
            Ok(())
        }
    }

    #[test]
    fn processes_every_queued_request_then_stops_when_drained() {
        let running = AtomicBool::new(true);
        let channel = FakeChannel {
            inbox: Mutex::new(VecDeque::from([json!({"type": "contecDiagnostics"})])),
            outbox: Mutex::new(Vec::new()),
            running: &running,
        };
        let server = CommandServer::new(channel, |_: Command, _: Duration| -> Result<String> { Ok(String::new()) });
        server.run_loop(&running);
        assert_eq!(server.channel.outbox.lock().len(), 1);
        assert_eq!(server.channel.outbox.lock()[0]["status"], "OK");
    }

    #[test]
    fn empty_queue_stops_the_loop_without_sending_anything() {
        let running = AtomicBool::new(true);
        let channel = FakeChannel { inbox: Mutex::new(VecDeque::new()), outbox: Mutex::new(Vec::new()), running: &running };
        let server = CommandServer::new(channel, |_: Command, _: Duration| -> Result<String> { Ok(String::new()) });
        server.run_loop(&running);
        assert!(server.channel.outbox.lock().is_empty());
    }
}
