//! Message templates, wire codec, and message model for LLUDP.
//!
//! - **Templates** ([`TemplateDictionary`], [`MessageTemplate`]): the
//!   catalog of message shapes, parsed from the template language.
//! - **Model** ([`Message`], [`Block`], [`Value`]): one decoded packet as
//!   named blocks of typed fields, plus [`Subfield`] views over packed
//!   fields.
//! - **Codec** ([`UdpCodec`]): exact wire bytes in and out, including
//!   zero-run compression and the ack trailer.
//!
//! # Architecture
//!
//! ```text
//! Transport (datagrams) → Protocol (Message) → Circuit (packet ids, acks)
//! ```
//!
//! Nothing here knows about sockets or sequence numbers; that lives in
//! `lludp-circuit`.

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod block;
mod codec;
mod deserializer;
mod dictionary;
mod error;
mod message;
pub mod packer;
mod parser;
mod serializer;
mod subfield;
mod template;
mod value;
pub mod zerocode;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use block::Block;
pub use codec::UdpCodec;
pub use deserializer::unknown_message_name;
pub use dictionary::TemplateDictionary;
pub use error::{
    DeserializeError, FieldError, MessageError, ProtocolError, SerializeError, SubfieldError,
    TemplateError, ZeroCodeError,
};
pub use message::{Message, PacketFlags};
pub use packer::TextFields;
pub use subfield::{
    EnumSerializer, FlagsSerializer, StructSerializer, Subfield, SubfieldRegistry,
    SubfieldSerializer,
};
pub use template::{
    BlockKind, FieldKind, LengthPrefix, MessageNumber, MessageTemplate, MessageTemplateBlock,
    MessageTemplateVariable, MsgDeprecation, MsgEncoding, MsgFrequency, MsgTrust,
};
pub use value::Value;

/// Re-exported so callers can name directions without depending on the
/// transport crate directly.
pub use lludp_transport::Direction;
