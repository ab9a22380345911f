//! [`Message`] → datagram.

use bytes::BufMut;

use crate::block::Block;
use crate::deserializer::HEADER_LEN;
use crate::dictionary::TemplateDictionary;
use crate::error::SerializeError;
use crate::message::{Message, PacketFlags};
use crate::packer;
use crate::template::{encode_number, BlockKind, MessageTemplate, MessageTemplateBlock};
use crate::value::Value;
use crate::zerocode;

pub(crate) fn encode(
    dictionary: &TemplateDictionary,
    message: &Message,
) -> Result<Vec<u8>, SerializeError> {
    let template = dictionary.get_by_name(message.name());
    let (raw_body, _) = message.body_parts();

    let number = match (template, message.number()) {
        (Some(template), _) => template.number,
        // Unparsed unknown messages still know their own number.
        (None, Some(number)) if raw_body.is_some() => number,
        _ => return Err(SerializeError::UnknownMessage(message.name().to_string())),
    };

    if message.extra().len() > usize::from(u8::MAX) {
        return Err(SerializeError::ExtraTooLong(message.extra().len()));
    }
    if message.acks().len() > usize::from(u8::MAX) {
        return Err(SerializeError::TooManyAcks(message.acks().len()));
    }

    let mut body = encode_number(number);
    match (raw_body, template) {
        (Some(raw), _) => body.extend_from_slice(raw),
        (None, Some(template)) => encode_blocks(template, message, &mut body)?,
        (None, None) => {
            return Err(SerializeError::UnknownMessage(message.name().to_string()));
        }
    }

    let flags = message.flags();
    if flags.contains(PacketFlags::ZEROCODED) {
        body = zerocode::zero_encode(&body);
    }

    let acks_len = if flags.contains(PacketFlags::ACK) {
        message.acks().len() * 4 + 1
    } else {
        0
    };
    let mut out = Vec::with_capacity(HEADER_LEN + message.extra().len() + body.len() + acks_len);
    out.put_u8(flags.bits());
    out.put_u32(message.packet_id().unwrap_or(0));
    out.put_u8(message.extra().len() as u8);
    out.put_slice(message.extra());
    out.put_slice(&body);
    if flags.contains(PacketFlags::ACK) {
        for ack in message.acks().iter().rev() {
            out.put_u32(*ack);
        }
        out.put_u8(message.acks().len() as u8);
    }
    Ok(out)
}

fn encode_blocks(
    template: &MessageTemplate,
    message: &Message,
    out: &mut Vec<u8>,
) -> Result<(), SerializeError> {
    let (_, groups) = message.body_parts();
    // First Single block that was left out. Nothing after it may carry
    // data.
    let mut missing: Option<&str> = None;
    // Zero counts for absent Variable blocks, written only if a later
    // block has data.
    let mut deferred = 0usize;

    for block_template in &template.blocks {
        let group = groups
            .iter()
            .find(|(name, _)| *name == block_template.name)
            .map(|(_, instances)| instances.as_slice());
        let instances = group.unwrap_or(&[]);

        if instances.is_empty() {
            match block_template.kind {
                BlockKind::Variable if group.is_some() && missing.is_none() => {
                    out.put_bytes(0, deferred);
                    deferred = 0;
                    out.put_u8(0);
                }
                BlockKind::Variable => deferred += 1,
                // The decoder reads exactly n instances, trailing or not.
                BlockKind::Multiple(n) => {
                    return Err(SerializeError::BlockCount {
                        message: template.name.clone(),
                        block: block_template.name.clone(),
                        expected: n.to_string(),
                        actual: 0,
                    });
                }
                BlockKind::Single => {
                    if missing.is_none() {
                        missing = Some(block_template.name.as_str());
                    }
                }
            }
            continue;
        }

        if let Some(missing) = missing {
            return Err(SerializeError::UnexpectedBlock {
                message: template.name.clone(),
                block: block_template.name.clone(),
                missing: missing.to_string(),
            });
        }

        let count_error = |expected: &str| SerializeError::BlockCount {
            message: template.name.clone(),
            block: block_template.name.clone(),
            expected: expected.to_string(),
            actual: instances.len(),
        };
        out.put_bytes(0, deferred);
        deferred = 0;
        match block_template.kind {
            BlockKind::Single if instances.len() != 1 => return Err(count_error("1")),
            BlockKind::Multiple(n) if instances.len() != n => {
                return Err(count_error(&n.to_string()));
            }
            BlockKind::Variable if instances.len() > usize::from(u8::MAX) => {
                return Err(count_error("at most 255"));
            }
            BlockKind::Variable => out.put_u8(instances.len() as u8),
            _ => {}
        }

        for block in instances {
            encode_block(template, block_template, block, out)?;
        }
    }
    Ok(())
}

fn encode_block(
    template: &MessageTemplate,
    block_template: &MessageTemplateBlock,
    block: &Block,
    out: &mut Vec<u8>,
) -> Result<(), SerializeError> {
    for variable in &block_template.variables {
        let default;
        let value = match block.get(&variable.name) {
            Some(value) => value,
            None if block.is_fill_missing() => {
                default = Value::default_for(variable.kind);
                &default
            }
            None => {
                return Err(SerializeError::MissingField {
                    message: template.name.clone(),
                    block: block_template.name.clone(),
                    field: variable.name.clone(),
                });
            }
        };
        packer::pack(variable.kind, value, out).map_err(|source| SerializeError::Field {
            message: template.name.clone(),
            block: block_template.name.clone(),
            field: variable.name.clone(),
            source,
        })?;
    }

    for (field, _) in block.iter() {
        if block_template.variable(field).is_none() {
            tracing::debug!(
                message = %template.name,
                block = %block_template.name,
                field,
                "field not in template, skipped"
            );
        }
    }
    Ok(())
}
