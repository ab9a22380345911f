//! Error types for the protocol layer.
//!
//! Each stage of the codec has its own enum so callers can tell a broken
//! template file apart from a broken packet or a broken outbound message.
//! [`ProtocolError`] gathers them for callers that don't care which.

use crate::template::FieldKind;

/// A malformed template file. Fatal at load time.
#[derive(Debug, thiserror::Error)]
#[error("template line {line}: {message}")]
pub struct TemplateError {
    /// 1-based line in the template source.
    pub line: usize,
    pub message: String,
}

impl TemplateError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Zero-run expansion failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZeroCodeError {
    /// A `0x00` was the last byte, so its run length is missing.
    #[error("zero run at offset {0} has no length byte")]
    Truncated(usize),

    /// Expansion would exceed the output ceiling.
    #[error("expanded body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Scalar pack/unpack failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// Not enough input left for the field.
    #[error("need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// The value's variant doesn't match the template's field type.
    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        expected: FieldKind,
        actual: &'static str,
    },

    /// A blob is longer than its length prefix or fixed size allows.
    #[error("value is {len} bytes, limit is {limit}")]
    TooLong { len: usize, limit: usize },
}

/// Failures turning a datagram into a [`Message`](crate::Message).
///
/// Decoding never fails just because the message number is unknown;
/// those packets come back as `UnknownMessage:<id>`.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),

    /// The ack count claims more ids than the datagram holds.
    #[error("ack region of {count} ids does not fit in {len} bytes")]
    AckRegion { count: usize, len: usize },

    /// The message number prefix ran off the end of the body.
    #[error("body ends inside the message number")]
    MissingNumber,

    #[error(transparent)]
    ZeroCode(#[from] ZeroCodeError),

    #[error("{message}.{block}.{field}: {source}")]
    Field {
        message: String,
        block: String,
        field: String,
        #[source]
        source: FieldError,
    },

    /// A Variable block's count byte or a Multiple block's instances ran
    /// off the end of the body.
    #[error("{message}.{block}: body ends inside block")]
    TruncatedBlock { message: String, block: String },
}

/// Failures turning a [`Message`](crate::Message) into wire bytes.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("no template named {0}")]
    UnknownMessage(String),

    /// A `Single` block is missing but a later block has data.
    #[error("{message}: block {block} present after missing block {missing}")]
    UnexpectedBlock {
        message: String,
        block: String,
        missing: String,
    },

    /// Wrong number of instances for the block's repetition kind.
    #[error("{message}.{block}: expected {expected} instances, got {actual}")]
    BlockCount {
        message: String,
        block: String,
        expected: String,
        actual: usize,
    },

    #[error("{message}.{block}: missing field {field}")]
    MissingField {
        message: String,
        block: String,
        field: String,
    },

    #[error("{message}.{block}.{field}: {source}")]
    Field {
        message: String,
        block: String,
        field: String,
        #[source]
        source: FieldError,
    },

    #[error("extra header is {0} bytes, limit is 255")]
    ExtraTooLong(usize),

    #[error("{0} acks do not fit in one packet")]
    TooManyAcks(usize),
}

/// Misuse of the [`Message`](crate::Message) model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("message {0} is finalized")]
    Finalized(String),

    #[error("message {message} has no block {block}")]
    NoSuchBlock { message: String, block: String },
}

/// Subfield lookup and conversion failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubfieldError {
    #[error("no subfield serializer for {message}.{block}.{field}")]
    NoSerializer {
        message: String,
        block: String,
        field: String,
    },

    /// The block was never attached to a message, so no key exists.
    #[error("block {0} does not belong to a message")]
    Detached(String),

    #[error("block has no field {0}")]
    MissingField(String),

    #[error("invalid subfield value: {0}")]
    Invalid(String),
}

/// Any protocol-layer error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Deserialize(#[from] DeserializeError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Subfield(#[from] SubfieldError),

    #[error("cannot read template file: {0}")]
    Io(#[from] std::io::Error),
}
