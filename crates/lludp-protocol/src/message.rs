//! The in-memory form of one LLUDP packet.

use bitflags::bitflags;
use lludp_transport::Direction;

use crate::block::Block;
use crate::error::MessageError;
use crate::template::MessageNumber;

bitflags! {
    /// The packet header's flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        /// The body after the header is zero-run compressed.
        const ZEROCODED = 0x80;
        /// The receiver must ack this packet.
        const RELIABLE = 0x40;
        /// This is a retransmission.
        const RESENT = 0x20;
        /// Acks are appended after the body.
        const ACK = 0x10;
    }
}

/// One protocol message: header state plus ordered, named blocks.
///
/// A message is mutable until a circuit prepares or drops it. From then on
/// it is *finalized* and every mutator returns
/// [`MessageError::Finalized`].
#[derive(Debug, Clone)]
pub struct Message {
    name: String,
    number: Option<MessageNumber>,
    packet_id: Option<u32>,
    flags: PacketFlags,
    acks: Vec<u32>,
    direction: Direction,
    extra: Vec<u8>,
    blocks: Vec<(String, Vec<Block>)>,
    /// Expanded body bytes that haven't been parsed into blocks yet.
    raw_body: Option<Vec<u8>>,
    finalized: bool,
    queued: bool,
    synthetic: bool,
}

impl Message {
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            number: None,
            packet_id: None,
            flags: PacketFlags::empty(),
            acks: Vec::new(),
            direction,
            extra: Vec::new(),
            blocks: Vec::new(),
            raw_body: None,
            finalized: false,
            queued: false,
            synthetic: false,
        }
    }

    /// Builds a fresh message from blocks in wire order.
    pub fn with_blocks(
        name: impl Into<String>,
        direction: Direction,
        blocks: impl IntoIterator<Item = Block>,
    ) -> Self {
        let mut message = Self::new(name, direction);
        for block in blocks {
            message.push_block(block);
        }
        message
    }

    /// A message decoded from the wire whose body is still raw.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_wire(
        name: String,
        number: MessageNumber,
        packet_id: u32,
        flags: PacketFlags,
        acks: Vec<u32>,
        direction: Direction,
        extra: Vec<u8>,
        raw_body: Vec<u8>,
    ) -> Self {
        let mut message = Self::new(name, direction);
        message.number = Some(number);
        message.packet_id = Some(packet_id);
        message.flags = flags;
        message.acks = acks;
        message.extra = extra;
        message.raw_body = Some(raw_body);
        message
    }

    // -- accessors ----------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire number, known once the message has been decoded.
    pub fn number(&self) -> Option<MessageNumber> {
        self.number
    }

    /// `None` until a circuit assigns one or the message is decoded.
    pub fn packet_id(&self) -> Option<u32> {
        self.packet_id
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn is_reliable(&self) -> bool {
        self.flags.contains(PacketFlags::RELIABLE)
    }

    pub fn acks(&self) -> &[u32] {
        &self.acks
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn extra(&self) -> &[u8] {
        &self.extra
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// True once [`take`](Self::take) has produced a copy to send later.
    pub fn is_queued(&self) -> bool {
        self.queued
    }

    /// True for packets the proxy originated rather than relayed.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// False while the body is still held as raw bytes.
    pub fn is_parsed(&self) -> bool {
        self.raw_body.is_none()
    }

    pub fn raw_body(&self) -> Option<&[u8]> {
        self.raw_body.as_deref()
    }

    /// All block groups in wire order.
    pub fn blocks(&self) -> impl Iterator<Item = (&str, &[Block])> {
        self.blocks.iter().map(|(n, b)| (n.as_str(), b.as_slice()))
    }

    /// Every instance of the named block, empty if absent.
    pub fn blocks_named(&self, name: &str) -> &[Block] {
        self.blocks
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.as_slice())
            .unwrap_or(&[])
    }

    /// The first instance of the named block.
    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks_named(name).first()
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.blocks.iter().any(|(n, _)| n == name)
    }

    // -- mutators -----------------------------------------------------------

    fn check_mutable(&self) -> Result<(), MessageError> {
        if self.finalized {
            return Err(MessageError::Finalized(self.name.clone()));
        }
        Ok(())
    }

    fn push_block(&mut self, mut block: Block) -> &mut Block {
        block.attach(&self.name);
        let index = match self.blocks.iter().position(|(n, _)| n == block.name()) {
            Some(index) => index,
            None => {
                self.blocks.push((block.name().to_string(), Vec::new()));
                self.blocks.len() - 1
            }
        };
        let group = &mut self.blocks[index].1;
        group.push(block);
        let last = group.len() - 1;
        &mut group[last]
    }

    /// Appends a block instance, after any existing instances of the
    /// same block.
    pub fn add_block(&mut self, block: Block) -> Result<&mut Block, MessageError> {
        self.check_mutable()?;
        Ok(self.push_block(block))
    }

    /// The first instance of the named block, mutably.
    pub fn block_mut(&mut self, name: &str) -> Result<&mut Block, MessageError> {
        let message = self.name.clone();
        self.blocks_mut(name)?
            .first_mut()
            .ok_or_else(|| MessageError::NoSuchBlock {
                message,
                block: name.to_string(),
            })
    }

    /// Every instance of the named block, mutably.
    pub fn blocks_mut(&mut self, name: &str) -> Result<&mut Vec<Block>, MessageError> {
        self.check_mutable()?;
        let message = self.name.clone();
        self.blocks
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
            .ok_or_else(|| MessageError::NoSuchBlock {
                message,
                block: name.to_string(),
            })
    }

    /// Removes every instance of the named block.
    pub fn remove_block(&mut self, name: &str) -> Result<Vec<Block>, MessageError> {
        self.check_mutable()?;
        let index = self
            .blocks
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| MessageError::NoSuchBlock {
                message: self.name.clone(),
                block: name.to_string(),
            })?;
        Ok(self.blocks.remove(index).1)
    }

    pub fn set_packet_id(&mut self, packet_id: Option<u32>) -> Result<(), MessageError> {
        self.check_mutable()?;
        self.packet_id = packet_id;
        Ok(())
    }

    pub fn set_flags(&mut self, flags: PacketFlags) -> Result<(), MessageError> {
        self.check_mutable()?;
        self.flags = flags;
        Ok(())
    }

    pub fn set_acks(&mut self, acks: Vec<u32>) -> Result<(), MessageError> {
        self.check_mutable()?;
        self.acks = acks;
        Ok(())
    }

    pub fn set_direction(&mut self, direction: Direction) -> Result<(), MessageError> {
        self.check_mutable()?;
        self.direction = direction;
        Ok(())
    }

    pub fn set_extra(&mut self, extra: Vec<u8>) -> Result<(), MessageError> {
        self.check_mutable()?;
        self.extra = extra;
        Ok(())
    }

    // -- lifecycle ----------------------------------------------------------

    /// Freezes the message. Called by circuits once it is on its way.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Marks the message as originated by the proxy.
    pub fn mark_synthetic(&mut self) {
        self.synthetic = true;
    }

    /// Deep-copies the message for sending later and marks this one as
    /// queued, so it can only be dropped.
    ///
    /// The copy has no packet id, no acks and no `RESENT`/`ACK` flags;
    /// a circuit will assign fresh ones when it goes out.
    pub fn take(&mut self) -> Result<Message, MessageError> {
        self.check_mutable()?;
        let mut copy = self.clone();
        copy.packet_id = None;
        copy.acks.clear();
        copy.flags.remove(PacketFlags::RESENT | PacketFlags::ACK);
        copy.finalized = false;
        copy.queued = false;
        copy.synthetic = false;
        self.queued = true;
        Ok(copy)
    }

    // -- codec hooks --------------------------------------------------------

    pub(crate) fn install_body(&mut self, blocks: Vec<(String, Vec<Block>)>) {
        self.blocks = blocks;
        self.raw_body = None;
    }

    /// Raw body bytes and block groups, for the serializer.
    pub(crate) fn body_parts(&self) -> (Option<&[u8]>, &[(String, Vec<Block>)]) {
        (self.raw_body.as_deref(), &self.blocks)
    }

    // -- views --------------------------------------------------------------

    /// A JSON view for logging and comparison.
    #[cfg(feature = "json")]
    pub fn to_dict(&self) -> serde_json::Value {
        use serde_json::json;

        let flags: Vec<&str> = self.flags.iter_names().map(|(name, _)| name).collect();
        let blocks: Vec<serde_json::Value> = self
            .blocks
            .iter()
            .map(|(name, instances)| {
                json!({
                    "name": name,
                    "instances": instances.iter().map(Block::to_dict).collect::<Vec<_>>(),
                })
            })
            .collect();

        let mut dict = json!({
            "name": self.name,
            "packet_id": self.packet_id,
            "direction": self.direction,
            "flags": flags,
            "acks": self.acks,
            "extra": self.extra,
            "blocks": blocks,
        });
        if let (Some(raw), Some(map)) = (&self.raw_body, dict.as_object_mut()) {
            map.insert("raw_body".to_string(), json!(raw));
        }
        dict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn chat() -> Message {
        Message::with_blocks(
            "ChatFromViewer",
            Direction::Out,
            [
                Block::new("AgentData"),
                Block::new("ChatData").with("Message", "hi").with("Type", 1u8),
            ],
        )
    }

    #[test]
    fn test_with_blocks_attaches_message_name() {
        let msg = chat();
        assert_eq!(msg.block("ChatData").unwrap().message_name(), Some("ChatFromViewer"));
        let names: Vec<&str> = msg.blocks().map(|(n, _)| n).collect();
        assert_eq!(names, ["AgentData", "ChatData"]);
    }

    #[test]
    fn test_add_block_groups_instances() {
        let mut msg = Message::new("PacketAck", Direction::In);
        msg.add_block(Block::new("Packets").with("ID", 1u32)).unwrap();
        msg.add_block(Block::new("Packets").with("ID", 2u32)).unwrap();
        assert_eq!(msg.blocks_named("Packets").len(), 2);
        assert_eq!(msg.blocks().count(), 1);
    }

    #[test]
    fn test_mutation_after_finalize_fails() {
        let mut msg = chat();
        msg.finalize();

        let err = msg.add_block(Block::new("X")).unwrap_err();
        assert_eq!(err, MessageError::Finalized("ChatFromViewer".into()));
        assert!(msg.block_mut("ChatData").is_err());
        assert!(msg.set_acks(vec![1]).is_err());
        assert!(msg.take().is_err());
    }

    #[test]
    fn test_block_mut_missing_names_message() {
        let mut msg = chat();
        let err = msg.block_mut("Nope").unwrap_err();
        assert_eq!(
            err,
            MessageError::NoSuchBlock {
                message: "ChatFromViewer".into(),
                block: "Nope".into()
            }
        );
    }

    #[test]
    fn test_take_strips_wire_state_and_queues_original() {
        let mut msg = chat();
        msg.set_packet_id(Some(9)).unwrap();
        msg.set_acks(vec![1, 2]).unwrap();
        msg.set_flags(PacketFlags::RELIABLE | PacketFlags::ACK | PacketFlags::RESENT)
            .unwrap();

        let copy = msg.take().unwrap();

        assert!(msg.is_queued());
        assert!(!copy.is_queued());
        assert_eq!(copy.packet_id(), None);
        assert!(copy.acks().is_empty());
        assert_eq!(copy.flags(), PacketFlags::RELIABLE);
        assert_eq!(
            copy.block("ChatData").unwrap().get("Message"),
            Some(&Value::Text("hi".into()))
        );
    }

    #[test]
    fn test_to_dict_lists_blocks_in_order() {
        let dict = chat().to_dict();
        assert_eq!(dict["name"], "ChatFromViewer");
        assert_eq!(dict["direction"], "Out");
        assert_eq!(dict["blocks"][1]["name"], "ChatData");
        assert_eq!(
            dict["blocks"][1]["instances"][0]["Type"],
            serde_json::json!({"type": "U8", "value": 1})
        );
        assert!(dict.get("raw_body").is_none());
    }
}
