//! Datagram transport layer for the LLUDP proxy.
//!
//! The protocol engine above this crate is synchronous: it decides what
//! bytes go out and in which [`Direction`], then hands them to a
//! [`DatagramSink`]. Sinks never block the caller.
//!
//! - [`UdpSink`] writes straight to the client-facing and server-facing
//!   UDP sockets of a running proxy.
//! - [`ChannelSink`] pushes [`Datagram`]s into a Tokio channel, which is
//!   handy when a separate task owns the sockets (and in tests).

mod error;
mod udp;

pub use error::TransportError;
pub use udp::UdpSink;

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Which way a packet travels through the proxy.
///
/// The proxy sits between a viewer (the client) and a simulator (the
/// server). Every packet belongs to exactly one of these two streams,
/// and each stream has its own sequence-number space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Client → server.
    Out,
    /// Server → client.
    In,
}

impl Direction {
    /// The stream travelling the other way.
    pub fn opposite(self) -> Self {
        match self {
            Self::Out => Self::In,
            Self::In => Self::Out,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Out => write!(f, "OUT"),
            Self::In => write!(f, "IN"),
        }
    }
}

/// Destination for serialized packets.
///
/// Implementations must not block: the circuit layer calls this from
/// inside the proxy's single-threaded event loop.
pub trait DatagramSink: Send + 'static {
    /// Sends one datagram toward the endpoint `direction` points at.
    fn send_datagram(
        &mut self,
        data: &[u8],
        direction: Direction,
    ) -> Result<(), TransportError>;
}

/// A datagram captured by a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Raw wire bytes.
    pub data: Vec<u8>,
    /// Where the bytes were headed.
    pub direction: Direction,
}

/// A [`DatagramSink`] that forwards every datagram into an unbounded
/// Tokio channel.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Datagram>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Datagram>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DatagramSink for ChannelSink {
    fn send_datagram(
        &mut self,
        data: &[u8],
        direction: Direction,
    ) -> Result<(), TransportError> {
        self.sender
            .send(Datagram {
                data: data.to_vec(),
                direction,
            })
            .map_err(|_| TransportError::ChannelClosed)
    }
}
