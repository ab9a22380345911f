//! `ProxyServer` builder and relay loop.
//!
//! Ties the layers together: two UDP sockets feed the [`Relay`], which
//! decodes, runs hooks, and forwards through one proxied circuit.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lludp_circuit::{CircuitConfig, ProxiedCircuit, Subscription};
use lludp_protocol::{Direction, Message, TemplateDictionary, UdpCodec};
use lludp_transport::UdpSink;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::hook::MessageHook;
use crate::{ProxyConfig, ProxyError, Relay, Session};

/// Largest datagram the proxy will read. LLUDP packets stay well under
/// the usual MTU; this leaves room for oversized zero-coded bodies.
const MAX_DATAGRAM: usize = 65_535;

/// Builder for configuring and starting a proxy.
///
/// # Example
///
/// ```rust,ignore
/// let server = ProxyServer::builder()
///     .listen("127.0.0.1:13001")
///     .upstream("203.0.113.7:13000")
///     .hook(MyHook)
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct ProxyServerBuilder {
    config: ProxyConfig,
    dictionary: Option<Arc<TemplateDictionary>>,
    hooks: Vec<Box<dyn MessageHook>>,
}

impl ProxyServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ProxyConfig::default(),
            dictionary: None,
            hooks: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ProxyConfig) -> Self {
        self.config = config;
        self
    }

    /// Address the viewer connects to.
    pub fn listen(mut self, addr: &str) -> Self {
        self.config.listen_addr = addr.to_string();
        self
    }

    /// Simulator to relay to.
    pub fn upstream(mut self, addr: &str) -> Self {
        self.config.upstream_addr = addr.to_string();
        self
    }

    pub fn circuit_config(mut self, config: CircuitConfig) -> Self {
        self.config.circuit = config;
        self
    }

    pub fn housekeeping_interval(mut self, interval: Duration) -> Self {
        self.config.housekeeping_interval = interval;
        self
    }

    /// Uses a custom template dictionary instead of the builtin one.
    pub fn dictionary(mut self, dictionary: Arc<TemplateDictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    /// Adds a hook. Hooks run in the order they were added.
    pub fn hook(mut self, hook: impl MessageHook) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Binds both sockets and resolves the upstream address.
    pub async fn build(self) -> Result<ProxyServer, ProxyError> {
        let upstream = tokio::net::lookup_host(self.config.upstream_addr.as_str())
            .await?
            .next()
            .ok_or_else(|| ProxyError::Resolve(self.config.upstream_addr.clone()))?;

        let client_socket = Arc::new(UdpSink::bind(&self.config.listen_addr).await?);
        let unspecified = if upstream.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let server_socket = Arc::new(UdpSink::bind(unspecified).await?);

        let sink = UdpSink::new(Arc::clone(&client_socket), Arc::clone(&server_socket), upstream);
        let codec = match self.dictionary {
            Some(dictionary) => UdpCodec::new(dictionary),
            None => UdpCodec::default(),
        };
        let circuit = ProxiedCircuit::new(codec, sink, self.config.circuit.clone());

        let mut relay = Relay::new(Session::new(circuit));
        for hook in self.hooks {
            relay.add_hook(hook);
        }

        let (injector, injections) = mpsc::unbounded_channel();
        Ok(ProxyServer {
            client_socket,
            server_socket,
            upstream,
            relay,
            housekeeping_interval: self.config.housekeeping_interval,
            injector,
            injections,
        })
    }
}

impl Default for ProxyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for injecting messages into a running proxy from another task.
#[derive(Debug, Clone)]
pub struct Injector {
    sender: mpsc::UnboundedSender<Message>,
}

impl Injector {
    /// Queues a message for injection. It is sent in the direction it
    /// carries, with a packet id chosen by the circuit.
    pub fn inject(&self, message: Message) -> Result<(), ProxyError> {
        self.sender.send(message).map_err(|_| ProxyError::Stopped)
    }
}

/// A bound proxy, ready to [`run`](Self::run).
pub struct ProxyServer {
    client_socket: Arc<UdpSocket>,
    server_socket: Arc<UdpSocket>,
    upstream: SocketAddr,
    relay: Relay,
    housekeeping_interval: Duration,
    injector: mpsc::UnboundedSender<Message>,
    injections: mpsc::UnboundedReceiver<Message>,
}

impl ProxyServer {
    pub fn builder() -> ProxyServerBuilder {
        ProxyServerBuilder::new()
    }

    /// Client-facing address the viewer should send to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.client_socket.local_addr()
    }

    /// Address packets to the simulator leave from.
    pub fn upstream_local_addr(&self) -> std::io::Result<SocketAddr> {
        self.server_socket.local_addr()
    }

    pub fn upstream_addr(&self) -> SocketAddr {
        self.upstream
    }

    /// Receives a copy of every relayed message named `name`.
    ///
    /// Subscriptions taken before [`run`](Self::run) keep working while
    /// the proxy runs.
    pub fn subscribe(&mut self, name: impl Into<String>) -> Subscription {
        self.relay.session_mut().subscribe(name)
    }

    pub fn injector(&self) -> Injector {
        Injector {
            sender: self.injector.clone(),
        }
    }

    /// Runs the relay loop until the task is cancelled.
    ///
    /// Per-datagram failures are logged and never end the loop.
    pub async fn run(mut self) -> Result<(), ProxyError> {
        tracing::info!(
            listen = %self.client_socket.local_addr()?,
            upstream = %self.upstream,
            "LLUDP proxy running"
        );

        // The sink never waits, so both sockets must be ready before the
        // first relayed send.
        self.client_socket.writable().await?;
        self.server_socket.writable().await?;

        let mut client_buf = vec![0u8; MAX_DATAGRAM];
        let mut server_buf = vec![0u8; MAX_DATAGRAM];
        let mut housekeeping = tokio::time::interval(self.housekeeping_interval);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.client_socket.recv_from(&mut client_buf) => match received {
                    Ok((len, from)) => {
                        self.relay
                            .session_mut()
                            .circuit_mut()
                            .transport_mut()
                            .set_client_addr(from);
                        self.relay_datagram(&client_buf[..len], Direction::Out);
                    }
                    Err(e) => tracing::error!(error = %e, "client socket receive failed"),
                },
                received = self.server_socket.recv_from(&mut server_buf) => match received {
                    Ok((len, from)) if from == self.upstream => {
                        self.relay_datagram(&server_buf[..len], Direction::In);
                    }
                    Ok((_, from)) => {
                        tracing::debug!(%from, "ignoring datagram from unknown peer");
                    }
                    Err(e) => tracing::error!(error = %e, "server socket receive failed"),
                },
                Some(message) = self.injections.recv() => {
                    if let Err(e) = self.relay.session_mut().inject(message) {
                        tracing::warn!(error = %e, "injection failed");
                    }
                }
                _ = housekeeping.tick() => {
                    let resent = self.relay.housekeeping(Instant::now());
                    if resent > 0 {
                        tracing::debug!(resent, "resent injected packets");
                    }
                }
            }
        }
    }

    fn relay_datagram(&mut self, data: &[u8], direction: Direction) {
        if let Err(e) = self.relay.handle_datagram(data, direction) {
            tracing::warn!(error = %e, %direction, "relay failed");
        }
    }
}
