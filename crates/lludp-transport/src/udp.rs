//! UDP sink backed by Tokio sockets.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::{DatagramSink, Direction, TransportError};

/// Writes datagrams to the two sockets a proxy owns.
///
/// Outbound traffic leaves through the server-facing socket toward the
/// upstream simulator. Inbound traffic leaves through the client-facing
/// socket toward whichever address the viewer last sent from.
///
/// Sends never wait. If a socket is not writable yet, or its buffer is
/// full, the send fails with [`TransportError::SendFailed`] carrying
/// `WouldBlock`. Treat that as a lost packet: LLUDP resends reliable
/// traffic. Await [`UdpSocket::writable`] on fresh sockets before the
/// first send.
pub struct UdpSink {
    client_socket: Arc<UdpSocket>,
    server_socket: Arc<UdpSocket>,
    client_addr: Option<SocketAddr>,
    server_addr: SocketAddr,
}

impl UdpSink {
    /// Creates a sink over already-bound sockets.
    pub fn new(
        client_socket: Arc<UdpSocket>,
        server_socket: Arc<UdpSocket>,
        server_addr: SocketAddr,
    ) -> Self {
        Self {
            client_socket,
            server_socket,
            client_addr: None,
            server_addr,
        }
    }

    /// Binds a fresh socket, mapping the failure into a [`TransportError`].
    pub async fn bind(addr: &str) -> Result<UdpSocket, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        tracing::info!(addr, "UDP socket bound");
        Ok(socket)
    }

    /// Records where the viewer is sending from.
    pub fn set_client_addr(&mut self, addr: SocketAddr) {
        if self.client_addr != Some(addr) {
            tracing::debug!(%addr, "client address learned");
            self.client_addr = Some(addr);
        }
    }

    /// The viewer's address, once known.
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    /// The upstream simulator's address.
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

impl DatagramSink for UdpSink {
    fn send_datagram(
        &mut self,
        data: &[u8],
        direction: Direction,
    ) -> Result<(), TransportError> {
        let (socket, addr) = match direction {
            Direction::Out => (&self.server_socket, self.server_addr),
            Direction::In => (
                &self.client_socket,
                self.client_addr.ok_or(TransportError::NoClientAddress)?,
            ),
        };
        socket
            .try_send_to(data, addr)
            .map(|_| ())
            .map_err(TransportError::SendFailed)
    }
}
