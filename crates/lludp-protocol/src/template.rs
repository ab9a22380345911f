//! Message template types: the shapes every LLUDP message must follow.
//!
//! A template says which blocks a message has, how often each block
//! repeats, and which typed fields each block carries. The wire codec
//! never guesses; it walks these structures in declaration order.

use std::fmt;

// ---------------------------------------------------------------------------
// Frequency
// ---------------------------------------------------------------------------

/// The numbering tier a message belongs to.
///
/// The tier decides how many `0xFF` bytes precede the message number on
/// the wire and how wide the number itself is:
///
/// ```text
/// High    [id]                 1 byte
/// Medium  FF [id]              1 byte
/// Low     FF FF [id id]        2 bytes, big-endian
/// Fixed   FF FF FF [id]        1 byte
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MsgFrequency {
    High,
    Medium,
    Low,
    Fixed,
}

impl MsgFrequency {
    /// Number of leading `0xFF` bytes.
    pub fn prefix_len(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
            Self::Fixed => 3,
        }
    }

    /// Width of the message number that follows the prefix.
    pub fn id_width(self) -> usize {
        match self {
            Self::Low => 2,
            _ => 1,
        }
    }

    /// Selects the tier from a count of leading `0xFF` bytes.
    pub fn from_prefix_len(len: usize) -> Option<Self> {
        match len {
            0 => Some(Self::High),
            1 => Some(Self::Medium),
            2 => Some(Self::Low),
            3 => Some(Self::Fixed),
            _ => None,
        }
    }

    /// Largest number this tier can express without colliding with the
    /// next tier's prefix.
    pub fn max_id(self) -> u16 {
        match self {
            Self::High | Self::Medium | Self::Fixed => 0xFE,
            Self::Low => 0xFEFF,
        }
    }
}

impl fmt::Display for MsgFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Fixed => "Fixed",
        };
        f.write_str(name)
    }
}

/// Wire identity of a message: its tier plus its number within the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageNumber {
    pub frequency: MsgFrequency,
    pub id: u16,
}

impl fmt::Display for MessageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.frequency, self.id)
    }
}

// ---------------------------------------------------------------------------
// Header attributes
// ---------------------------------------------------------------------------

/// Whether the simulator trusts this message from other simulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgTrust {
    Trusted,
    NotTrusted,
}

/// Default body encoding for the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgEncoding {
    Unencoded,
    Zerocoded,
}

/// Deprecation status. Absent in the template means `NotDeprecated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MsgDeprecation {
    Deprecated,
    UdpDeprecated,
    UdpBlackListed,
    #[default]
    NotDeprecated,
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// The scalar type of a template field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    S64,
    F32,
    F64,
    Vector3,
    Vector3d,
    Vector4,
    Quaternion,
    Uuid,
    Bool,
    IpAddr,
    IpPort,
    /// Opaque bytes of a length fixed by the template.
    Fixed(usize),
    /// Opaque bytes behind a 1- or 2-byte little-endian length prefix.
    Variable(LengthPrefix),
}

/// Width of the length prefix in front of a `Variable` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LengthPrefix {
    One,
    Two,
}

impl LengthPrefix {
    /// Bytes taken by the prefix itself.
    pub fn width(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    /// Longest payload the prefix can describe.
    pub fn max_len(self) -> usize {
        match self {
            Self::One => u8::MAX as usize,
            Self::Two => u16::MAX as usize,
        }
    }
}

impl FieldKind {
    /// Encoded width in bytes, or `None` for `Variable` fields.
    pub fn fixed_width(self) -> Option<usize> {
        let width = match self {
            Self::U8 | Self::S8 | Self::Bool => 1,
            Self::U16 | Self::S16 | Self::IpPort => 2,
            Self::U32 | Self::S32 | Self::F32 | Self::IpAddr => 4,
            Self::U64 | Self::S64 | Self::F64 => 8,
            Self::Vector3 | Self::Quaternion => 12,
            Self::Vector4 | Self::Uuid => 16,
            Self::Vector3d => 24,
            Self::Fixed(size) => size,
            Self::Variable(_) => return None,
        };
        Some(width)
    }

    /// Parses a template type keyword. `Fixed` and `Variable` need their
    /// size argument and are handled by the parser.
    pub fn from_keyword(word: &str) -> Option<Self> {
        let kind = match word {
            "U8" => Self::U8,
            "U16" => Self::U16,
            "U32" => Self::U32,
            "U64" => Self::U64,
            "S8" => Self::S8,
            "S16" => Self::S16,
            "S32" => Self::S32,
            "S64" => Self::S64,
            "F32" => Self::F32,
            "F64" => Self::F64,
            "LLVector3" => Self::Vector3,
            "LLVector3d" => Self::Vector3d,
            "LLVector4" => Self::Vector4,
            "LLQuaternion" => Self::Quaternion,
            "LLUUID" => Self::Uuid,
            "BOOL" => Self::Bool,
            "IPADDR" => Self::IpAddr,
            "IPPORT" => Self::IpPort,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(size) => write!(f, "Fixed {size}"),
            Self::Variable(prefix) => write!(f, "Variable {}", prefix.width()),
            other => write!(f, "{other:?}"),
        }
    }
}

/// One field declaration inside a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplateVariable {
    pub name: String,
    pub kind: FieldKind,
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// How many instances of a block appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Exactly one. May be omitted entirely when it is trailing and empty.
    Single,
    /// Exactly `N`, with `N` fixed by the template.
    Multiple(usize),
    /// A one-byte count (0–255) followed by that many instances.
    Variable,
}

/// One block declaration inside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplateBlock {
    pub name: String,
    pub kind: BlockKind,
    pub variables: Vec<MessageTemplateVariable>,
}

impl MessageTemplateBlock {
    /// Looks up a field declaration by name.
    pub fn variable(&self, name: &str) -> Option<&MessageTemplateVariable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The complete description of one message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub name: String,
    pub number: MessageNumber,
    pub trust: MsgTrust,
    pub encoding: MsgEncoding,
    pub deprecation: MsgDeprecation,
    pub blocks: Vec<MessageTemplateBlock>,
}

impl MessageTemplate {
    /// Looks up a block declaration by name.
    pub fn block(&self, name: &str) -> Option<&MessageTemplateBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// The frequency-prefix + message-number bytes for this template.
    pub fn wire_number(&self) -> Vec<u8> {
        encode_number(self.number)
    }
}

/// Encodes a frequency prefix and message number.
pub(crate) fn encode_number(number: MessageNumber) -> Vec<u8> {
    let mut out = vec![0xFF; number.frequency.prefix_len()];
    match number.frequency {
        MsgFrequency::Low => out.extend_from_slice(&number.id.to_be_bytes()),
        _ => out.push(number.id as u8),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_prefix_and_width_table() {
        assert_eq!(MsgFrequency::High.prefix_len(), 0);
        assert_eq!(MsgFrequency::Medium.prefix_len(), 1);
        assert_eq!(MsgFrequency::Low.prefix_len(), 2);
        assert_eq!(MsgFrequency::Fixed.prefix_len(), 3);

        assert_eq!(MsgFrequency::High.id_width(), 1);
        assert_eq!(MsgFrequency::Medium.id_width(), 1);
        assert_eq!(MsgFrequency::Low.id_width(), 2);
        assert_eq!(MsgFrequency::Fixed.id_width(), 1);
    }

    #[test]
    fn test_encode_number_low_is_big_endian() {
        let number = MessageNumber {
            frequency: MsgFrequency::Low,
            id: 387,
        };
        assert_eq!(encode_number(number), vec![0xFF, 0xFF, 0x01, 0x83]);
    }

    #[test]
    fn test_encode_number_fixed_has_three_ff() {
        let number = MessageNumber {
            frequency: MsgFrequency::Fixed,
            id: 0xFB,
        };
        assert_eq!(encode_number(number), vec![0xFF, 0xFF, 0xFF, 0xFB]);
    }

    #[test]
    fn test_field_kind_widths() {
        assert_eq!(FieldKind::Quaternion.fixed_width(), Some(12));
        assert_eq!(FieldKind::Vector3d.fixed_width(), Some(24));
        assert_eq!(FieldKind::Fixed(32).fixed_width(), Some(32));
        assert_eq!(FieldKind::Variable(LengthPrefix::Two).fixed_width(), None);
    }

    #[test]
    fn test_field_kind_from_keyword_rejects_unknown() {
        assert_eq!(FieldKind::from_keyword("LLUUID"), Some(FieldKind::Uuid));
        assert_eq!(FieldKind::from_keyword("U128"), None);
    }
}
