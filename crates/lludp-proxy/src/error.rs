//! Unified error type for the proxy.

use lludp_circuit::CircuitError;
use lludp_protocol::ProtocolError;
use lludp_transport::TransportError;

/// Top-level error that wraps every sub-crate error.
///
/// The `#[from]` conversions let `?` lift transport, protocol and
/// circuit errors straight into this type.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// A datagram could not be sent or a socket could not be bound.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A template failed to load or a message failed to encode or decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The circuit refused a send or drop, or a wait timed out.
    #[error(transparent)]
    Circuit(#[from] CircuitError),

    /// The upstream address did not resolve to anything.
    #[error("cannot resolve address {0}")]
    Resolve(String),

    /// The proxy loop is no longer running.
    #[error("proxy stopped")]
    Stopped,

    /// Socket I/O outside the transport sink.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: ProxyError = TransportError::NoClientAddress.into();
        assert!(matches!(err, ProxyError::Transport(_)));
        assert_eq!(err.to_string(), "client address not yet known");
    }

    #[test]
    fn test_from_circuit_error() {
        let err: ProxyError = CircuitError::HandlerClosed.into();
        assert!(matches!(err, ProxyError::Circuit(_)));
    }

    #[test]
    fn test_from_protocol_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no template");
        let err: ProxyError = ProtocolError::from(io).into();
        assert!(matches!(err, ProxyError::Protocol(ProtocolError::Io(_))));
    }
}
