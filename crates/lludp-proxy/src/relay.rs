//! Per-datagram relay logic, independent of sockets.
//!
//! Every datagram goes through the same steps:
//!
//! 1. Decode the header and message number. Undecodable datagrams are
//!    logged and discarded.
//! 2. A resend of a packet the proxy already dropped is acked and
//!    dropped again without reaching hooks.
//! 3. If a hook or subscriber wants the message, parse its body.
//! 4. Dispatch to subscribers, then run hooks in order.
//! 5. Drop the message if a hook said so or took it, otherwise forward.

use std::time::Instant;

use lludp_protocol::{Direction, Message};
use lludp_transport::{DatagramSink, UdpSink};

use crate::hook::{MessageHook, Verdict};
use crate::{ProxyError, Session};

/// A [`Session`] plus the hooks that see its traffic.
pub struct Relay<T: DatagramSink = UdpSink> {
    session: Session<T>,
    hooks: Vec<Box<dyn MessageHook<T>>>,
}

impl<T: DatagramSink> Relay<T> {
    pub fn new(session: Session<T>) -> Self {
        Self {
            session,
            hooks: Vec::new(),
        }
    }

    /// Appends a hook. Hooks run in the order they were added.
    pub fn add_hook(&mut self, hook: Box<dyn MessageHook<T>>) {
        self.hooks.push(hook);
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    /// Relays one datagram received from the endpoint `direction` leaves.
    ///
    /// # Errors
    /// Only circuit and transport failures are returned. Malformed wire
    /// input is logged and discarded.
    pub fn handle_datagram(&mut self, data: &[u8], direction: Direction) -> Result<(), ProxyError> {
        self.session.circuit_mut().touch();

        let decoded = self.session.circuit().codec().decode_lazy(data, direction);
        let mut message = match decoded {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, %direction, len = data.len(), "undecodable datagram discarded");
                return Ok(());
            }
        };

        if let Some(packet_id) = message.packet_id() {
            if self.session.circuit().was_dropped(direction, packet_id) {
                tracing::warn!(
                    message = %message.name(),
                    packet_id,
                    %direction,
                    "resend of dropped packet, dropping again"
                );
                self.session.circuit_mut().drop_message(&mut message)?;
                return Ok(());
            }
        }

        if self.wants(message.name()) {
            let parsed = self.session.circuit().codec().parse_body(&mut message);
            if let Err(err) = parsed {
                tracing::warn!(
                    error = %err,
                    message = %message.name(),
                    %direction,
                    "body did not parse, relaying raw"
                );
            }
        }

        let verdict = if message.is_parsed() {
            self.run_hooks(&mut message)
        } else {
            Verdict::Forward
        };

        if message.is_finalized() {
            // A hook already sent or dropped it.
            return Ok(());
        }
        if verdict == Verdict::Drop || message.is_queued() {
            self.session.circuit_mut().drop_message(&mut message)?;
        } else {
            self.session.circuit_mut().send(&mut message)?;
        }
        Ok(())
    }

    fn wants(&self, name: &str) -> bool {
        self.session.handler().wants(name) || self.hooks.iter().any(|hook| hook.wants(name))
    }

    fn run_hooks(&mut self, message: &mut Message) -> Verdict {
        self.session.handler_mut().dispatch(message);
        for hook in &mut self.hooks {
            if !hook.wants(message.name()) {
                continue;
            }
            if hook.on_message(&mut self.session, message) == Verdict::Drop {
                tracing::debug!(message = %message.name(), "hook dropped message");
                return Verdict::Drop;
            }
        }
        Verdict::Forward
    }

    /// Resends injected packets that are still unacked. Returns how many
    /// went out.
    pub fn housekeeping(&mut self, now: Instant) -> usize {
        self.session.circuit_mut().resend_unacked(now)
    }
}
