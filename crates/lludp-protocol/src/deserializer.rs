//! Datagram → [`Message`].
//!
//! Decoding is split in two. [`decode_lazy`] reads the header, the acks
//! and the message number, and keeps the expanded body as raw bytes.
//! [`parse_body`] walks the template later, and only for messages
//! someone actually wants to look at.

use bytes::Buf;
use lludp_transport::Direction;

use crate::block::Block;
use crate::dictionary::TemplateDictionary;
use crate::error::DeserializeError;
use crate::message::{Message, PacketFlags};
use crate::packer::{self, TextFields};
use crate::template::{BlockKind, FieldKind, MessageNumber, MessageTemplate, MsgFrequency};
use crate::zerocode;

/// Flags, packet id and extra length.
pub(crate) const HEADER_LEN: usize = 6;

/// Name given to messages whose number isn't in the dictionary.
pub fn unknown_message_name(id: u16) -> String {
    format!("UnknownMessage:{id}")
}

pub(crate) fn decode_lazy(
    dictionary: &TemplateDictionary,
    data: &[u8],
    direction: Direction,
) -> Result<Message, DeserializeError> {
    if data.len() < HEADER_LEN {
        return Err(DeserializeError::TooShort(data.len()));
    }
    let mut header = &data[..HEADER_LEN];
    let flags = PacketFlags::from_bits_retain(header.get_u8());
    let packet_id = header.get_u32();
    let extra_len = usize::from(header.get_u8());

    let mut end = data.len();
    let mut acks = Vec::new();
    if flags.contains(PacketFlags::ACK) {
        let count = usize::from(data[end - 1]);
        let region = 1 + count * 4;
        if HEADER_LEN + region > data.len() {
            return Err(DeserializeError::AckRegion {
                count,
                len: data.len(),
            });
        }
        end -= region;
        // Acks are written newest-last; read them back from the end.
        let mut region = &data[end..data.len() - 1];
        while region.len() >= 4 {
            let at = region.len() - 4;
            acks.push(u32::from_be_bytes([
                region[at],
                region[at + 1],
                region[at + 2],
                region[at + 3],
            ]));
            region = &region[..at];
        }
    }

    let body_start = HEADER_LEN + extra_len;
    if body_start > end {
        return Err(DeserializeError::TooShort(data.len()));
    }
    let extra = data[HEADER_LEN..body_start].to_vec();
    let body = &data[body_start..end];
    let body = if flags.contains(PacketFlags::ZEROCODED) {
        zerocode::zero_decode(body)?
    } else {
        body.to_vec()
    };

    let (number, number_len) = read_number(&body)?;
    let name = match dictionary.get_by_id(number.frequency, number.id) {
        Some(template) => template.name.clone(),
        None => unknown_message_name(number.id),
    };
    let raw_body = body[number_len..].to_vec();

    tracing::trace!(
        message = %name,
        packet_id,
        %direction,
        body_len = raw_body.len(),
        "datagram decoded"
    );

    Ok(Message::from_wire(
        name, number, packet_id, flags, acks, direction, extra, raw_body,
    ))
}

/// Reads the `0xFF` prefix and message number from the front of `body`.
fn read_number(body: &[u8]) -> Result<(MessageNumber, usize), DeserializeError> {
    let prefix = body.iter().take(3).take_while(|&&b| b == 0xFF).count();
    let frequency = MsgFrequency::from_prefix_len(prefix).ok_or(DeserializeError::MissingNumber)?;
    let width = frequency.id_width();
    let id_bytes = body
        .get(prefix..prefix + width)
        .ok_or(DeserializeError::MissingNumber)?;
    let id = match id_bytes {
        [hi, lo] => u16::from_be_bytes([*hi, *lo]),
        [id] => u16::from(*id),
        _ => return Err(DeserializeError::MissingNumber),
    };
    Ok((MessageNumber { frequency, id }, prefix + width))
}

/// Parses a lazily decoded message's body into blocks.
///
/// Messages that are already parsed, or whose number isn't in the
/// dictionary, are left alone.
pub(crate) fn parse_body(
    dictionary: &TemplateDictionary,
    text_fields: &TextFields,
    message: &mut Message,
) -> Result<(), DeserializeError> {
    let Some(raw) = message.raw_body() else {
        return Ok(());
    };
    let template = match message.number() {
        Some(number) => dictionary.get_by_id(number.frequency, number.id),
        None => dictionary.get_by_name(message.name()),
    };
    let Some(template) = template else {
        return Ok(());
    };
    let blocks = parse_blocks(template, text_fields, raw)?;
    message.install_body(blocks);
    Ok(())
}

fn parse_blocks(
    template: &MessageTemplate,
    text_fields: &TextFields,
    body: &[u8],
) -> Result<Vec<(String, Vec<Block>)>, DeserializeError> {
    let mut buf = body;
    let mut groups = Vec::with_capacity(template.blocks.len());

    for block_template in &template.blocks {
        let truncated = || DeserializeError::TruncatedBlock {
            message: template.name.clone(),
            block: block_template.name.clone(),
        };
        let count = match block_template.kind {
            // Trailing blocks may be left off entirely.
            BlockKind::Single | BlockKind::Variable if buf.is_empty() => continue,
            BlockKind::Single => 1,
            BlockKind::Multiple(n) => {
                if buf.is_empty() {
                    return Err(truncated());
                }
                n
            }
            BlockKind::Variable => usize::from(buf.get_u8()),
        };

        let mut instances = Vec::with_capacity(count);
        for _ in 0..count {
            let mut block = Block::new(block_template.name.as_str());
            block.attach(&template.name);
            for variable in &block_template.variables {
                let text = matches!(variable.kind, FieldKind::Variable(_))
                    && text_fields.is_text(&variable.name);
                let value = packer::unpack(variable.kind, &mut buf, text).map_err(|source| {
                    DeserializeError::Field {
                        message: template.name.clone(),
                        block: block_template.name.clone(),
                        field: variable.name.clone(),
                        source,
                    }
                })?;
                block.set(variable.name.as_str(), value);
            }
            instances.push(block);
        }
        groups.push((block_template.name.clone(), instances));
    }

    if !buf.is_empty() {
        tracing::warn!(
            message = %template.name,
            trailing = buf.len(),
            "unparsed bytes after last block"
        );
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn dict() -> &'static TemplateDictionary {
        TemplateDictionary::builtin()
    }

    #[test]
    fn test_decode_lazy_short_datagram_fails() {
        let err = decode_lazy(dict(), &[0, 0, 0], Direction::In).unwrap_err();
        assert!(matches!(err, DeserializeError::TooShort(3)));
    }

    #[test]
    fn test_decode_lazy_ack_count_too_large_fails() {
        // ACK flag, claims 9 acks but carries none.
        let data = [0x10, 0, 0, 0, 1, 0, 0x01, 0, 9];
        let err = decode_lazy(dict(), &data, Direction::In).unwrap_err();
        assert!(matches!(err, DeserializeError::AckRegion { count: 9, .. }));
    }

    #[test]
    fn test_decode_lazy_reads_acks_back_to_front() {
        // CompletePingCheck (High 2) with PingID 7, acking 5 then 6.
        let data = [
            0x10, 0, 0, 0, 3, 0, // header
            0x02, 7, // number + body
            0, 0, 0, 6, 0, 0, 0, 5, 2, // acks reversed + count
        ];
        let msg = decode_lazy(dict(), &data, Direction::Out).unwrap();
        assert_eq!(msg.name(), "CompletePingCheck");
        assert_eq!(msg.packet_id(), Some(3));
        assert_eq!(msg.acks(), [5, 6]);
        assert_eq!(msg.raw_body(), Some(&[7u8][..]));
    }

    #[test]
    fn test_decode_lazy_empty_body_has_no_number() {
        let err = decode_lazy(dict(), &[0, 0, 0, 0, 1, 0], Direction::In).unwrap_err();
        assert!(matches!(err, DeserializeError::MissingNumber));
    }

    #[test]
    fn test_parse_body_fills_blocks() {
        let mut msg = decode_lazy(dict(), &[0, 0, 0, 0, 1, 0, 0x02, 9], Direction::In).unwrap();
        assert!(!msg.is_parsed());

        parse_body(dict(), &TextFields::default(), &mut msg).unwrap();

        assert!(msg.is_parsed());
        assert_eq!(msg.block("PingID").unwrap().get("PingID"), Some(&Value::U8(9)));
    }

    #[test]
    fn test_parse_body_truncated_field_names_location() {
        // StartPingCheck needs PingID + OldestUnacked (5 bytes).
        let mut msg =
            decode_lazy(dict(), &[0, 0, 0, 0, 1, 0, 0x01, 9, 1, 2], Direction::In).unwrap();
        let err = parse_body(dict(), &TextFields::default(), &mut msg).unwrap_err();
        match err {
            DeserializeError::Field { block, field, .. } => {
                assert_eq!(block, "PingID");
                assert_eq!(field, "OldestUnacked");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!msg.is_parsed());
    }

    #[test]
    fn test_parse_body_trailing_single_may_be_absent() {
        // ImprovedInstantMessage with only AgentData present.
        let mut data = vec![0, 0, 0, 0, 1, 0, 0xFF, 0xFF, 0x00, 0xFE];
        data.extend_from_slice(&[0x11; 32]);
        let mut msg = decode_lazy(dict(), &data, Direction::Out).unwrap();
        parse_body(dict(), &TextFields::default(), &mut msg).unwrap();
        assert!(msg.block("AgentData").is_some());
        assert!(!msg.has_block("MessageBlock"));
    }

    #[test]
    fn test_read_number_tiers() {
        let (n, len) = read_number(&[0x04]).unwrap();
        assert_eq!((n.frequency, n.id, len), (MsgFrequency::High, 4, 1));
        let (n, len) = read_number(&[0xFF, 0x06]).unwrap();
        assert_eq!((n.frequency, n.id, len), (MsgFrequency::Medium, 6, 2));
        let (n, len) = read_number(&[0xFF, 0xFF, 0x01, 0x83]).unwrap();
        assert_eq!((n.frequency, n.id, len), (MsgFrequency::Low, 387, 4));
        let (n, len) = read_number(&[0xFF, 0xFF, 0xFF, 0xFB]).unwrap();
        assert_eq!((n.frequency, n.id, len), (MsgFrequency::Fixed, 0xFB, 4));
        assert!(read_number(&[0xFF, 0xFF, 0x01]).is_err());
    }
}
