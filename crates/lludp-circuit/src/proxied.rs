//! A circuit that relays another endpoint's traffic and can inject or
//! drop packets without either endpoint noticing.
//!
//! Each direction has its own [`InjectionTracker`]. A message travelling
//! in direction `D`:
//!
//! - has its packet id translated by `D`'s tracker,
//! - carries acks for packets that travelled the opposite way, which are
//!   translated back by the *opposite* tracker.
//!
//! ```text
//!  viewer ──OUT──▶ proxy ──OUT──▶ simulator      ids: out tracker
//!  viewer ◀──IN─── proxy ◀──IN─── simulator      ids: in tracker
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use lludp_protocol::{Block, Direction, Message, MessageError, PacketFlags, UdpCodec, Value};
use lludp_transport::DatagramSink;

use crate::config::CircuitConfig;
use crate::injection::{InjectionTracker, NoOriginalId};
use crate::CircuitError;

const PACKET_ACK: &str = "PacketAck";
const START_PING_CHECK: &str = "StartPingCheck";
/// Most ids one `PacketAck` can carry.
const MAX_ACKS_PER_PACKET: usize = 255;

/// What [`ProxiedCircuit::prepare`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Send the message on.
    Forward,
    /// Nothing useful is left in the message; don't send it.
    Suppress,
}

/// A reliable packet the proxy injected and is waiting to see acked.
#[derive(Debug, Clone)]
struct PendingResend {
    data: Vec<u8>,
    sent_at: Instant,
    tries: u32,
}

/// Relays messages between a viewer and a simulator while keeping both
/// sides' sequence and ack spaces consistent.
pub struct ProxiedCircuit<T> {
    codec: UdpCodec,
    transport: T,
    config: CircuitConfig,
    out_injections: InjectionTracker,
    in_injections: InjectionTracker,
    unacked_out: BTreeMap<u32, PendingResend>,
    unacked_in: BTreeMap<u32, PendingResend>,
    last_activity: Instant,
}

impl<T: DatagramSink> ProxiedCircuit<T> {
    pub fn new(codec: UdpCodec, transport: T, config: CircuitConfig) -> Self {
        let (window, dropped) = (config.injection_window, config.dropped_window);
        Self {
            out_injections: InjectionTracker::with_dropped_capacity(window, dropped),
            in_injections: InjectionTracker::with_dropped_capacity(window, dropped),
            codec,
            transport,
            config,
            unacked_out: BTreeMap::new(),
            unacked_in: BTreeMap::new(),
            last_activity: Instant::now(),
        }
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Translates a message's ids for the far side and freezes it.
    ///
    /// Messages without a packet id are injections and get a fresh id.
    /// Messages with one are relayed: their id is shifted past earlier
    /// injections and their acks are mapped back to the ids the far side
    /// actually used. Acks for injected packets are consumed here.
    ///
    /// # Errors
    /// Fails without touching circuit state if the message was already
    /// handled, or if a `PacketAck`/`StartPingCheck` body can't be parsed.
    pub fn prepare(&mut self, message: &mut Message) -> Result<Disposition, CircuitError> {
        if message.is_finalized() {
            return Err(CircuitError::AlreadyFinalized(message.name().to_string()));
        }
        if message.is_queued() {
            return Err(CircuitError::Queued(message.name().to_string()));
        }

        let direction = message.direction();
        let mut disposition = Disposition::Forward;

        match message.packet_id() {
            None => {
                let packet_id = self.tracker_mut(direction).gen_injectable_id();
                message.set_packet_id(Some(packet_id))?;
                message.mark_synthetic();
            }
            Some(original) => {
                let is_ack = message.name() == PACKET_ACK;
                let is_ping = message.name() == START_PING_CHECK;
                if is_ack || is_ping {
                    self.codec.parse_body(message)?;
                }

                let effective = self.tracker(direction).get_effective_id(original);
                self.tracker_mut(direction).track_seen(effective);
                message.set_packet_id(Some(effective))?;

                let acks = self.rewrite_acked_ids(direction.opposite(), message.acks());
                message.set_acks(acks)?;

                if is_ack && !self.rewrite_packet_ack(message)? && message.acks().is_empty() {
                    disposition = Disposition::Suppress;
                } else if is_ping {
                    self.rewrite_ping(message)?;
                }
            }
        }

        let mut flags = message.flags();
        flags.set(PacketFlags::ACK, !message.acks().is_empty());
        message.set_flags(flags)?;
        message.finalize();
        Ok(disposition)
    }

    /// Prepares and transmits a message.
    ///
    /// Reliable injections are remembered until the far side acks them
    /// and resent by [`resend_unacked`](Self::resend_unacked).
    pub fn send(&mut self, message: &mut Message) -> Result<Disposition, CircuitError> {
        // Validate injections before they consume an id.
        if message.packet_id().is_none() && !message.is_finalized() {
            self.codec.encode(message)?;
        }

        let disposition = self.prepare(message)?;
        let direction = message.direction();
        if disposition == Disposition::Suppress {
            tracing::debug!(
                message = %message.name(),
                %direction,
                "suppressed, only acked injected packets"
            );
            return Ok(disposition);
        }

        let data = self.codec.encode(message)?;
        self.transport.send_datagram(&data, direction)?;
        self.last_activity = Instant::now();

        if let (true, true, Some(packet_id)) =
            (message.is_synthetic(), message.is_reliable(), message.packet_id())
        {
            let sent_at = self.last_activity;
            self.unacked_mut(direction).insert(
                packet_id,
                PendingResend {
                    data,
                    sent_at,
                    tries: 0,
                },
            );
        }

        tracing::trace!(
            message = %message.name(),
            packet_id = message.packet_id(),
            %direction,
            synthetic = message.is_synthetic(),
            "sent"
        );
        Ok(disposition)
    }

    /// Swallows a relayed message.
    ///
    /// The sender still gets an ack if it asked for one, so it stops
    /// retransmitting. Acks the message carried are forwarded on their
    /// own, since the far side is still waiting for them.
    pub fn drop_message(&mut self, message: &mut Message) -> Result<(), CircuitError> {
        if message.is_finalized() {
            return Err(CircuitError::AlreadyFinalized(message.name().to_string()));
        }
        let Some(original) = message.packet_id() else {
            return Err(CircuitError::NoPacketId(message.name().to_string()));
        };
        let direction = message.direction();

        let mut carried = message.acks().to_vec();
        if message.name() == PACKET_ACK {
            self.codec.parse_body(message)?;
            carried.extend(packet_ack_ids(message));
        }

        let tracker = self.tracker_mut(direction);
        tracker.mark_dropped(original);
        let effective = tracker.get_effective_id(original);
        tracker.track_seen(effective);
        message.finalize();

        tracing::debug!(
            message = %message.name(),
            packet_id = original,
            %direction,
            reliable = message.is_reliable(),
            "dropped"
        );

        if message.is_reliable() {
            self.send_acks(vec![original], direction.opposite())?;
        }
        let forwarded = self.rewrite_acked_ids(direction.opposite(), &carried);
        if !forwarded.is_empty() {
            self.send_acks(forwarded, direction)?;
        }
        Ok(())
    }

    /// Injects `PacketAck`s for `ids`, 255 at a time.
    ///
    /// The ids must already be in the receiver's id space.
    pub fn send_acks(&mut self, ids: Vec<u32>, direction: Direction) -> Result<(), CircuitError> {
        for chunk in ids.chunks(MAX_ACKS_PER_PACKET) {
            let blocks = chunk
                .iter()
                .map(|id| Block::new("Packets").with("ID", *id));
            let mut ack = Message::with_blocks(PACKET_ACK, direction, blocks);
            self.send(&mut ack)?;
        }
        Ok(())
    }

    /// Resends injected reliable packets that have waited too long.
    ///
    /// Returns how many packets went out again. Packets past
    /// `max_resends` are given up on. A failed send counts as a lost
    /// packet: it is logged, still uses up a try, and the remaining
    /// packets are resent anyway.
    pub fn resend_unacked(&mut self, now: Instant) -> usize {
        let mut resent = 0;
        for direction in [Direction::Out, Direction::In] {
            let interval = self.config.resend_interval;
            let max_resends = self.config.max_resends;
            let due: Vec<u32> = self
                .unacked(direction)
                .iter()
                .filter(|(_, p)| now.saturating_duration_since(p.sent_at) >= interval)
                .map(|(id, _)| *id)
                .collect();

            for packet_id in due {
                let (transport, unacked) = match direction {
                    Direction::Out => (&mut self.transport, &mut self.unacked_out),
                    Direction::In => (&mut self.transport, &mut self.unacked_in),
                };
                let Some(pending) = unacked.get_mut(&packet_id) else {
                    continue;
                };
                if pending.tries >= max_resends {
                    unacked.remove(&packet_id);
                    tracing::warn!(packet_id, %direction, "injected packet never acked, giving up");
                    continue;
                }
                if let Some(flags) = pending.data.first_mut() {
                    *flags |= PacketFlags::RESENT.bits();
                }
                pending.tries += 1;
                pending.sent_at = now;
                if let Err(e) = transport.send_datagram(&pending.data, direction) {
                    tracing::warn!(packet_id, %direction, error = %e, "resend failed");
                    continue;
                }
                resent += 1;
                tracing::debug!(packet_id, %direction, tries = pending.tries, "resent injected packet");
            }
        }
        resent
    }

    // -----------------------------------------------------------------------
    // Rewriting
    // -----------------------------------------------------------------------

    /// Maps acked ids for packets that travelled `packets_direction` back
    /// to the ids their real sender used. Acks for injected packets clear
    /// the pending resend and are removed.
    fn rewrite_acked_ids(&mut self, packets_direction: Direction, ids: &[u32]) -> Vec<u32> {
        let (tracker, unacked) = match packets_direction {
            Direction::Out => (&self.out_injections, &mut self.unacked_out),
            Direction::In => (&self.in_injections, &mut self.unacked_in),
        };
        let mut originals = Vec::with_capacity(ids.len());
        for &id in ids {
            match tracker.get_original_id(id) {
                Ok(original) => originals.push(original),
                Err(NoOriginalId::Injected(id)) => {
                    if unacked.remove(&id).is_some() {
                        tracing::trace!(packet_id = id, direction = %packets_direction, "injected packet acked");
                    }
                }
                Err(NoOriginalId::Forgotten(id)) => {
                    tracing::warn!(packet_id = id, direction = %packets_direction, "ack withheld, id outside injection window");
                }
            }
        }
        originals
    }

    /// Rewrites a relayed `PacketAck` body. Returns whether any ids remain.
    fn rewrite_packet_ack(&mut self, message: &mut Message) -> Result<bool, CircuitError> {
        let direction = message.direction();
        let ids = packet_ack_ids(message);
        let kept = self.rewrite_acked_ids(direction.opposite(), &ids);
        let blocks: Vec<Block> = kept
            .iter()
            .map(|id| Block::new("Packets").with("ID", *id))
            .collect();

        match message.blocks_mut("Packets") {
            Ok(group) => *group = blocks,
            Err(MessageError::NoSuchBlock { .. }) => {
                for block in blocks {
                    message.add_block(block)?;
                }
            }
            Err(err) => return Err(err.into()),
        }
        Ok(!kept.is_empty())
    }

    /// Shifts a ping's oldest-unacked id into the receiver's id space, no
    /// later than our own oldest unacked injection.
    fn rewrite_ping(&mut self, message: &mut Message) -> Result<(), CircuitError> {
        let direction = message.direction();
        let Some(oldest) = message
            .block("PingID")
            .and_then(|b| b.get("OldestUnacked"))
            .and_then(Value::as_u32)
        else {
            return Ok(());
        };
        let mut effective = self.tracker(direction).get_effective_id(oldest);
        if let Some(ours) = self.oldest_unacked(direction) {
            effective = effective.min(ours);
        }
        message.block_mut("PingID")?.set("OldestUnacked", effective);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    pub fn tracker(&self, direction: Direction) -> &InjectionTracker {
        match direction {
            Direction::Out => &self.out_injections,
            Direction::In => &self.in_injections,
        }
    }

    fn tracker_mut(&mut self, direction: Direction) -> &mut InjectionTracker {
        match direction {
            Direction::Out => &mut self.out_injections,
            Direction::In => &mut self.in_injections,
        }
    }

    fn unacked(&self, direction: Direction) -> &BTreeMap<u32, PendingResend> {
        match direction {
            Direction::Out => &self.unacked_out,
            Direction::In => &self.unacked_in,
        }
    }

    fn unacked_mut(&mut self, direction: Direction) -> &mut BTreeMap<u32, PendingResend> {
        match direction {
            Direction::Out => &mut self.unacked_out,
            Direction::In => &mut self.unacked_in,
        }
    }

    /// Oldest injected reliable packet in `direction` not yet acked.
    pub fn oldest_unacked(&self, direction: Direction) -> Option<u32> {
        self.unacked(direction).keys().next().copied()
    }

    /// Injected reliable packets in `direction` still waiting for acks.
    pub fn unacked_len(&self, direction: Direction) -> usize {
        self.unacked(direction).len()
    }

    /// True if the proxy dropped this real packet earlier.
    pub fn was_dropped(&self, direction: Direction, original_id: u32) -> bool {
        self.tracker(direction).was_dropped(original_id)
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Records that something arrived from either endpoint.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn codec(&self) -> &UdpCodec {
        &self.codec
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

fn packet_ack_ids(message: &Message) -> Vec<u32> {
    message
        .blocks_named("Packets")
        .iter()
        .filter_map(|b| b.get("ID").and_then(Value::as_u32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lludp_transport::{ChannelSink, Datagram, TransportError};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn proxy_with(config: CircuitConfig) -> (ProxiedCircuit<ChannelSink>, UnboundedReceiver<Datagram>) {
        let (sink, rx) = ChannelSink::new();
        (ProxiedCircuit::new(UdpCodec::default(), sink, config), rx)
    }

    fn proxy() -> (ProxiedCircuit<ChannelSink>, UnboundedReceiver<Datagram>) {
        proxy_with(CircuitConfig::default())
    }

    fn ping(direction: Direction) -> Message {
        Message::with_blocks(
            "CompletePingCheck",
            direction,
            [Block::new("PingID").with("PingID", 1u8)],
        )
    }

    fn relayed(direction: Direction, packet_id: u32) -> Message {
        let mut msg = ping(direction);
        msg.set_packet_id(Some(packet_id)).unwrap();
        msg
    }

    fn reliable(mut msg: Message) -> Message {
        msg.set_flags(PacketFlags::RELIABLE).unwrap();
        msg
    }

    fn packet_ack(direction: Direction, packet_id: u32, ids: &[u32]) -> Message {
        let mut msg = Message::with_blocks(
            PACKET_ACK,
            direction,
            ids.iter().map(|id| Block::new("Packets").with("ID", *id)),
        );
        msg.set_packet_id(Some(packet_id)).unwrap();
        msg
    }

    fn drain(rx: &mut UnboundedReceiver<Datagram>) -> Vec<Datagram> {
        let mut out = Vec::new();
        while let Ok(datagram) = rx.try_recv() {
            out.push(datagram);
        }
        out
    }

    #[test]
    fn test_send_shifts_real_ids_after_injection() {
        let (mut proxy, mut rx) = proxy();

        let mut first = relayed(Direction::Out, 1);
        let mut injected = reliable(ping(Direction::Out));
        let mut second = relayed(Direction::Out, 2);
        proxy.send(&mut first).unwrap();
        proxy.send(&mut injected).unwrap();
        proxy.send(&mut second).unwrap();

        assert_eq!(first.packet_id(), Some(1));
        assert_eq!(injected.packet_id(), Some(2));
        assert!(injected.is_synthetic());
        assert_eq!(second.packet_id(), Some(3));
        assert_eq!(proxy.unacked_len(Direction::Out), 1);
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[test]
    fn test_send_rewrites_acks_and_consumes_injected() {
        let (mut proxy, _rx) = proxy();
        proxy.send(&mut relayed(Direction::Out, 1)).unwrap();
        proxy.send(&mut reliable(ping(Direction::Out))).unwrap();
        proxy.send(&mut relayed(Direction::Out, 2)).unwrap();

        let mut reply = relayed(Direction::In, 1);
        reply.set_acks(vec![1, 2, 3]).unwrap();
        proxy.send(&mut reply).unwrap();

        assert_eq!(reply.acks(), [1, 2]);
        assert!(reply.flags().contains(PacketFlags::ACK));
        assert_eq!(proxy.unacked_len(Direction::Out), 0);
    }

    #[test]
    fn test_send_suppresses_ack_for_only_injected_ids() {
        let (mut proxy, mut rx) = proxy();
        proxy.send(&mut relayed(Direction::Out, 1)).unwrap();
        proxy.send(&mut reliable(ping(Direction::Out))).unwrap();
        drain(&mut rx);

        let mut ack = packet_ack(Direction::In, 1, &[2]);
        let disposition = proxy.send(&mut ack).unwrap();

        assert_eq!(disposition, Disposition::Suppress);
        assert!(ack.is_finalized());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(proxy.unacked_len(Direction::Out), 0);
    }

    #[test]
    fn test_send_packet_ack_keeps_real_ids() {
        let (mut proxy, mut rx) = proxy();
        proxy.send(&mut relayed(Direction::Out, 1)).unwrap();
        proxy.send(&mut ping(Direction::Out)).unwrap();
        proxy.send(&mut relayed(Direction::Out, 2)).unwrap();
        drain(&mut rx);

        let mut ack = packet_ack(Direction::In, 1, &[2, 3]);
        assert_eq!(proxy.send(&mut ack).unwrap(), Disposition::Forward);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        let decoded = proxy.codec().decode(&sent[0].data, Direction::In).unwrap();
        assert_eq!(packet_ack_ids(&decoded), [2]);
    }

    #[test]
    fn test_drop_reliable_message_acks_sender() {
        let (mut proxy, mut rx) = proxy();
        let mut msg = reliable(relayed(Direction::Out, 7));

        proxy.drop_message(&mut msg).unwrap();

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].direction, Direction::In);
        let ack = proxy.codec().decode(&sent[0].data, Direction::In).unwrap();
        assert_eq!(ack.name(), PACKET_ACK);
        assert_eq!(packet_ack_ids(&ack), [7]);
        assert!(msg.is_finalized());
        assert!(proxy.was_dropped(Direction::Out, 7));
    }

    #[test]
    fn test_drop_forwards_carried_acks() {
        let (mut proxy, mut rx) = proxy();
        proxy.send(&mut relayed(Direction::Out, 1)).unwrap();
        drain(&mut rx);

        let mut msg = relayed(Direction::In, 4);
        msg.set_acks(vec![1]).unwrap();
        proxy.drop_message(&mut msg).unwrap();

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].direction, Direction::In);
        let ack = proxy.codec().decode(&sent[0].data, Direction::In).unwrap();
        assert_eq!(packet_ack_ids(&ack), [1]);
    }

    #[test]
    fn test_drop_injected_message_fails() {
        let (mut proxy, _rx) = proxy();
        let err = proxy.drop_message(&mut ping(Direction::Out)).unwrap_err();
        assert!(matches!(err, CircuitError::NoPacketId(_)));
    }

    #[test]
    fn test_prepare_twice_leaves_trackers_untouched() {
        let (mut proxy, _rx) = proxy();
        let mut msg = relayed(Direction::Out, 3);
        proxy.send(&mut msg).unwrap();

        let err = proxy.send(&mut msg).unwrap_err();

        assert!(matches!(err, CircuitError::AlreadyFinalized(_)));
        assert_eq!(proxy.tracker(Direction::Out).last_seen(), 3);
    }

    #[test]
    fn test_ping_oldest_unacked_clamped_to_injection() {
        let (mut proxy, _rx) = proxy();
        proxy.send(&mut reliable(ping(Direction::Out))).unwrap();

        let mut check = Message::with_blocks(
            START_PING_CHECK,
            Direction::Out,
            [Block::new("PingID")
                .with("PingID", 5u8)
                .with("OldestUnacked", 1u32)],
        );
        check.set_packet_id(Some(1)).unwrap();
        proxy.send(&mut check).unwrap();

        assert_eq!(check.packet_id(), Some(2));
        let oldest = check.block("PingID").and_then(|b| b.get("OldestUnacked"));
        assert_eq!(oldest.and_then(Value::as_u32), Some(1));
    }

    #[test]
    fn test_resend_unacked_sets_resent_then_gives_up() {
        let config = CircuitConfig {
            max_resends: 1,
            ..CircuitConfig::default()
        };
        let (mut proxy, mut rx) = proxy_with(config);
        proxy.send(&mut reliable(ping(Direction::In))).unwrap();
        drain(&mut rx);
        let start = proxy.last_activity();

        assert_eq!(proxy.resend_unacked(start), 0);
        assert_eq!(proxy.resend_unacked(start + Duration::from_secs(1)), 1);
        let resent = drain(&mut rx);
        assert_eq!(resent[0].data[0] & PacketFlags::RESENT.bits(), PacketFlags::RESENT.bits());

        assert_eq!(proxy.resend_unacked(start + Duration::from_secs(2)), 0);
        assert_eq!(proxy.unacked_len(Direction::In), 0);
    }

    /// Fails every send toward the viewer after `fail_in` is set.
    struct FlakySink {
        inner: ChannelSink,
        fail_in: bool,
    }

    impl DatagramSink for FlakySink {
        fn send_datagram(&mut self, data: &[u8], direction: Direction) -> Result<(), TransportError> {
            if self.fail_in && direction == Direction::In {
                return Err(TransportError::NoClientAddress);
            }
            self.inner.send_datagram(data, direction)
        }
    }

    #[test]
    fn test_resend_unacked_continues_past_failed_send() {
        let (inner, mut rx) = ChannelSink::new();
        let sink = FlakySink { inner, fail_in: false };
        let mut proxy = ProxiedCircuit::new(UdpCodec::default(), sink, CircuitConfig::default());
        proxy.send(&mut reliable(ping(Direction::Out))).unwrap();
        proxy.send(&mut reliable(ping(Direction::In))).unwrap();
        proxy.send(&mut reliable(ping(Direction::In))).unwrap();
        drain(&mut rx);
        proxy.transport_mut().fail_in = true;

        let later = proxy.last_activity() + Duration::from_secs(1);
        assert_eq!(proxy.resend_unacked(later), 1);

        let resent = drain(&mut rx);
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].direction, Direction::Out);
        assert_eq!(proxy.unacked_len(Direction::In), 2);

        proxy.transport_mut().fail_in = false;
        assert_eq!(proxy.resend_unacked(later + Duration::from_secs(1)), 3);
    }
}
