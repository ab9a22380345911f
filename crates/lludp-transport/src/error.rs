/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Binding a socket failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// No datagram has arrived from the client yet, so there is nowhere
    /// to send inbound traffic.
    #[error("client address not yet known")]
    NoClientAddress,

    /// The receiving half of a channel sink was dropped.
    #[error("datagram channel closed")]
    ChannelClosed,
}
