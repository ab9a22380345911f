//! The state a running proxy keeps for its one viewer/simulator pair.

use lludp_circuit::{CircuitError, Disposition, MessageHandler, ProxiedCircuit, Subscription};
use lludp_protocol::Message;
use lludp_transport::{DatagramSink, UdpSink};

/// One proxied circuit plus the subscribers watching it.
///
/// Hooks get `&mut Session` so they can inject packets or subscribe to
/// replies while handling a message.
pub struct Session<T: DatagramSink = UdpSink> {
    circuit: ProxiedCircuit<T>,
    handler: MessageHandler,
}

impl<T: DatagramSink> Session<T> {
    pub fn new(circuit: ProxiedCircuit<T>) -> Self {
        Self {
            circuit,
            handler: MessageHandler::new(),
        }
    }

    /// Sends a message the proxy made up itself.
    ///
    /// Any packet id on the message is discarded; the circuit assigns
    /// one that fits the receiver's sequence.
    pub fn inject(&mut self, mut message: Message) -> Result<Disposition, CircuitError> {
        if message.packet_id().is_some() {
            message.set_packet_id(None)?;
        }
        let disposition = self.circuit.send(&mut message)?;
        tracing::debug!(
            message = %message.name(),
            packet_id = message.packet_id(),
            direction = %message.direction(),
            "injected"
        );
        Ok(disposition)
    }

    /// Receives a copy of every relayed message named `name`.
    pub fn subscribe(&mut self, name: impl Into<String>) -> Subscription {
        self.handler.subscribe(name)
    }

    pub fn circuit(&self) -> &ProxiedCircuit<T> {
        &self.circuit
    }

    pub fn circuit_mut(&mut self) -> &mut ProxiedCircuit<T> {
        &mut self.circuit
    }

    pub fn handler(&self) -> &MessageHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut MessageHandler {
        &mut self.handler
    }
}
