//! A circuit for messages this side originates end to end.

use std::net::SocketAddr;
use std::time::Instant;

use lludp_protocol::{Message, PacketFlags, UdpCodec};
use lludp_transport::DatagramSink;

use crate::CircuitError;

/// One reliable logical connection between two UDP endpoints.
///
/// Numbers outgoing packets from its own counter. It knows nothing about
/// injection; use [`ProxiedCircuit`](crate::ProxiedCircuit) when relaying
/// someone else's traffic.
pub struct Circuit<T> {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    codec: UdpCodec,
    transport: T,
    last_packet_id: u32,
    last_activity: Instant,
}

impl<T: DatagramSink> Circuit<T> {
    pub fn new(
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        codec: UdpCodec,
        transport: T,
    ) -> Self {
        tracing::info!(%local_addr, %peer_addr, "circuit created");
        Self {
            local_addr,
            peer_addr,
            codec,
            transport,
            last_packet_id: 0,
            last_activity: Instant::now(),
        }
    }

    /// Assigns the next packet id and freezes the message.
    ///
    /// # Errors
    /// Returns [`CircuitError::AlreadyFinalized`] or
    /// [`CircuitError::Queued`] if the message was already handled;
    /// the counter is not advanced in that case.
    pub fn prepare(&mut self, message: &mut Message) -> Result<(), CircuitError> {
        if message.is_finalized() {
            return Err(CircuitError::AlreadyFinalized(message.name().to_string()));
        }
        if message.is_queued() {
            return Err(CircuitError::Queued(message.name().to_string()));
        }
        let packet_id = self.last_packet_id.wrapping_add(1);
        let mut flags = message.flags();
        flags.set(PacketFlags::ACK, !message.acks().is_empty());
        message.set_packet_id(Some(packet_id))?;
        message.set_flags(flags)?;
        self.last_packet_id = packet_id;
        message.finalize();
        Ok(())
    }

    /// Prepares, encodes and sends a message toward its direction.
    pub fn send(&mut self, message: &mut Message) -> Result<(), CircuitError> {
        self.prepare(message)?;
        let data = self.codec.encode(message)?;
        self.transport.send_datagram(&data, message.direction())?;
        self.last_activity = Instant::now();
        tracing::debug!(
            message = %message.name(),
            packet_id = message.packet_id(),
            direction = %message.direction(),
            "sent"
        );
        Ok(())
    }

    /// Records that something arrived from the peer.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Id of the most recent packet sent.
    pub fn last_packet_id(&self) -> u32 {
        self.last_packet_id
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn codec(&self) -> &UdpCodec {
        &self.codec
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
