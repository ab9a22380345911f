//! Error types for the circuit layer.

use lludp_protocol::{DeserializeError, MessageError, SerializeError};
use lludp_transport::TransportError;

/// Errors that can occur while sending, dropping, or waiting for messages.
///
/// The first three variants are programming errors: the message was
/// already handled once. They never change circuit state, so the
/// circuit stays usable for later messages.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError {
    /// The message was already sent or dropped.
    #[error("message {0} is already finalized")]
    AlreadyFinalized(String),

    /// The message was taken for later sending and may only be dropped.
    #[error("message {0} is queued and cannot be sent")]
    Queued(String),

    /// Only messages received from a real endpoint can be dropped.
    #[error("message {0} has no packet id")]
    NoPacketId(String),

    /// No matching message arrived before the deadline.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The handler went away while a wait was pending.
    #[error("message handler closed")]
    HandlerClosed,

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    Deserialize(#[from] DeserializeError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
