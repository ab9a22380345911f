//! Extension point for code that inspects or rewrites relayed traffic.

use lludp_protocol::Message;
use lludp_transport::{DatagramSink, UdpSink};

use crate::Session;

/// What a hook wants done with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Relay it (possibly modified).
    Forward,
    /// Swallow it. The sender is still acked.
    Drop,
}

/// Called for every relayed message whose name the hook wants.
///
/// Hooks run in registration order. The first one to return
/// [`Verdict::Drop`] stops the chain. A hook may also
/// [`take`](Message::take) the message to send a copy later through
/// [`Session::inject`]; the original is then dropped.
pub trait MessageHook<T: DatagramSink = UdpSink>: Send + 'static {
    /// Whether this hook wants to see `name`. Wanted messages are parsed
    /// before hooks run; everything else is relayed raw.
    fn wants(&self, _name: &str) -> bool {
        true
    }

    fn on_message(&mut self, session: &mut Session<T>, message: &mut Message) -> Verdict;
}
