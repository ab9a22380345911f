//! Subfield serializers: structured views over fields whose raw value
//! packs several things together (bit flags, enumerations, little
//! structs inside a blob).
//!
//! Serializers are looked up by `(message, block, field)` in an explicit
//! [`SubfieldRegistry`] built at startup.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use crate::error::SubfieldError;
use crate::packer;
use crate::template::FieldKind;
use crate::value::Value;

/// The structured form of a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum Subfield {
    /// Names of the set bits. Bits without a name appear as `0x..`.
    Flags(Vec<String>),
    /// The variant name, or the decimal value if it has none.
    Enum(String),
    /// Named members in layout order.
    Struct(Vec<(String, Value)>),
}

/// Converts between a field's [`Value`] and its [`Subfield`] view.
pub trait SubfieldSerializer: Send + Sync {
    fn deserialize(&self, value: &Value) -> Result<Subfield, SubfieldError>;

    fn serialize(&self, subfield: &Subfield) -> Result<Value, SubfieldError>;
}

impl fmt::Debug for dyn SubfieldSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubfieldSerializer")
    }
}

fn invalid(msg: impl Into<String>) -> SubfieldError {
    SubfieldError::Invalid(msg.into())
}

fn integer_of(value: &Value) -> Result<u64, SubfieldError> {
    match value {
        Value::U8(v) => Ok(u64::from(*v)),
        Value::U16(v) => Ok(u64::from(*v)),
        Value::U32(v) => Ok(u64::from(*v)),
        Value::U64(v) => Ok(*v),
        other => Err(invalid(format!("{} is not an unsigned integer", other.kind_name()))),
    }
}

fn integer_value(kind: FieldKind, raw: u64) -> Result<Value, SubfieldError> {
    let out_of_range = || invalid(format!("{raw:#x} does not fit in {kind}"));
    let value = match kind {
        FieldKind::U8 => Value::U8(u8::try_from(raw).map_err(|_| out_of_range())?),
        FieldKind::U16 => Value::U16(u16::try_from(raw).map_err(|_| out_of_range())?),
        FieldKind::U32 => Value::U32(u32::try_from(raw).map_err(|_| out_of_range())?),
        FieldKind::U64 => Value::U64(raw),
        other => return Err(invalid(format!("{other} cannot hold an integer subfield"))),
    };
    Ok(value)
}

fn parse_integer(text: &str) -> Option<u64> {
    match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Named bits of an unsigned integer field.
#[derive(Debug, Clone)]
pub struct FlagsSerializer {
    kind: FieldKind,
    flags: Vec<(String, u64)>,
}

impl FlagsSerializer {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            flags: Vec::new(),
        }
    }

    pub fn flag(mut self, name: impl Into<String>, bit: u64) -> Self {
        self.flags.push((name.into(), bit));
        self
    }
}

impl SubfieldSerializer for FlagsSerializer {
    fn deserialize(&self, value: &Value) -> Result<Subfield, SubfieldError> {
        let raw = integer_of(value)?;
        let mut rest = raw;
        let mut names = Vec::new();
        for (name, bit) in &self.flags {
            if raw & bit == *bit && *bit != 0 {
                names.push(name.clone());
                rest &= !bit;
            }
        }
        if rest != 0 {
            names.push(format!("{rest:#x}"));
        }
        Ok(Subfield::Flags(names))
    }

    fn serialize(&self, subfield: &Subfield) -> Result<Value, SubfieldError> {
        let Subfield::Flags(names) = subfield else {
            return Err(invalid("flags field needs Subfield::Flags"));
        };
        let mut raw = 0u64;
        for name in names {
            let bit = self
                .flags
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, bit)| *bit)
                .or_else(|| parse_integer(name))
                .ok_or_else(|| invalid(format!("unknown flag {name}")))?;
            raw |= bit;
        }
        integer_value(self.kind, raw)
    }
}

// ---------------------------------------------------------------------------
// Enum
// ---------------------------------------------------------------------------

/// Named values of an unsigned integer field.
#[derive(Debug, Clone)]
pub struct EnumSerializer {
    kind: FieldKind,
    variants: Vec<(String, u64)>,
}

impl EnumSerializer {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            variants: Vec::new(),
        }
    }

    pub fn variant(mut self, name: impl Into<String>, value: u64) -> Self {
        self.variants.push((name.into(), value));
        self
    }
}

impl SubfieldSerializer for EnumSerializer {
    fn deserialize(&self, value: &Value) -> Result<Subfield, SubfieldError> {
        let raw = integer_of(value)?;
        let name = self
            .variants
            .iter()
            .find(|(_, v)| *v == raw)
            .map(|(n, _)| n.clone())
            .unwrap_or_else(|| raw.to_string());
        Ok(Subfield::Enum(name))
    }

    fn serialize(&self, subfield: &Subfield) -> Result<Value, SubfieldError> {
        let Subfield::Enum(name) = subfield else {
            return Err(invalid("enum field needs Subfield::Enum"));
        };
        let raw = self
            .variants
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .or_else(|| parse_integer(name))
            .ok_or_else(|| invalid(format!("unknown variant {name}")))?;
        integer_value(self.kind, raw)
    }
}

// ---------------------------------------------------------------------------
// Struct
// ---------------------------------------------------------------------------

/// A fixed layout of scalars packed into a blob field.
#[derive(Debug, Clone)]
pub struct StructSerializer {
    members: Vec<(String, FieldKind)>,
}

impl StructSerializer {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    pub fn member(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.members.push((name.into(), kind));
        self
    }
}

impl Default for StructSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl SubfieldSerializer for StructSerializer {
    fn deserialize(&self, value: &Value) -> Result<Subfield, SubfieldError> {
        let mut buf = value
            .as_bytes()
            .ok_or_else(|| invalid(format!("{} is not a blob", value.kind_name())))?;
        let mut members = Vec::with_capacity(self.members.len());
        for (name, kind) in &self.members {
            let member = packer::unpack(*kind, &mut buf, false)
                .map_err(|e| invalid(format!("{name}: {e}")))?;
            members.push((name.clone(), member));
        }
        if !buf.is_empty() {
            return Err(invalid(format!("{} trailing bytes", buf.len())));
        }
        Ok(Subfield::Struct(members))
    }

    fn serialize(&self, subfield: &Subfield) -> Result<Value, SubfieldError> {
        let Subfield::Struct(values) = subfield else {
            return Err(invalid("struct field needs Subfield::Struct"));
        };
        let mut out = Vec::new();
        for (name, kind) in &self.members {
            let member = values
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v)
                .ok_or_else(|| invalid(format!("missing member {name}")))?;
            packer::pack(*kind, member, &mut out)
                .map_err(|e| invalid(format!("{name}: {e}")))?;
        }
        Ok(Value::Bytes(out))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type SubfieldKey = (String, String, String);

/// Subfield serializers keyed by `(message, block, field)`.
#[derive(Debug, Default, Clone)]
pub struct SubfieldRegistry {
    serializers: HashMap<SubfieldKey, Arc<dyn SubfieldSerializer>>,
}

impl SubfieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a serializer, replacing any previous one for the same key.
    pub fn register(
        mut self,
        message: &str,
        block: &str,
        field: &str,
        serializer: impl SubfieldSerializer + 'static,
    ) -> Self {
        self.serializers.insert(
            (message.to_string(), block.to_string(), field.to_string()),
            Arc::new(serializer),
        );
        self
    }

    pub fn get(
        &self,
        message: &str,
        block: &str,
        field: &str,
    ) -> Option<&Arc<dyn SubfieldSerializer>> {
        self.serializers
            .get(&(message.to_string(), block.to_string(), field.to_string()))
    }

    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }

    /// Serializers for the builtin agent, chat and throttle fields.
    pub fn standard() -> &'static SubfieldRegistry {
        static STANDARD: OnceLock<SubfieldRegistry> = OnceLock::new();
        STANDARD.get_or_init(build_standard)
    }
}

const AGENT_CONTROL_FLAGS: &[(&str, u64)] = &[
    ("AT_POS", 0x1),
    ("AT_NEG", 0x2),
    ("LEFT_POS", 0x4),
    ("LEFT_NEG", 0x8),
    ("UP_POS", 0x10),
    ("UP_NEG", 0x20),
    ("PITCH_POS", 0x40),
    ("PITCH_NEG", 0x80),
    ("YAW_POS", 0x100),
    ("YAW_NEG", 0x200),
    ("FAST_AT", 0x400),
    ("FAST_LEFT", 0x800),
    ("FAST_UP", 0x1000),
    ("FLY", 0x2000),
    ("STOP", 0x4000),
    ("FINISH_ANIM", 0x8000),
    ("STAND_UP", 0x10000),
    ("SIT_ON_GROUND", 0x20000),
    ("MOUSELOOK", 0x40000),
    ("NUDGE_AT_POS", 0x80000),
    ("NUDGE_AT_NEG", 0x100000),
    ("NUDGE_LEFT_POS", 0x200000),
    ("NUDGE_LEFT_NEG", 0x400000),
    ("NUDGE_UP_POS", 0x800000),
    ("NUDGE_UP_NEG", 0x1000000),
    ("TURN_LEFT", 0x2000000),
    ("TURN_RIGHT", 0x4000000),
    ("AWAY", 0x8000000),
    ("LBUTTON_DOWN", 0x10000000),
    ("LBUTTON_UP", 0x20000000),
    ("ML_LBUTTON_DOWN", 0x40000000),
    ("ML_LBUTTON_UP", 0x80000000),
];

const CHAT_TYPES: &[(&str, u64)] = &[
    ("WHISPER", 0),
    ("NORMAL", 1),
    ("SHOUT", 2),
    ("START", 4),
    ("STOP", 5),
    ("DEBUG_MSG", 6),
    ("REGION", 7),
    ("OWNER", 8),
    ("DIRECT", 9),
];

fn chat_type() -> EnumSerializer {
    CHAT_TYPES
        .iter()
        .fold(EnumSerializer::new(FieldKind::U8), |s, (n, v)| s.variant(*n, *v))
}

fn build_standard() -> SubfieldRegistry {
    let control_flags = AGENT_CONTROL_FLAGS
        .iter()
        .fold(FlagsSerializer::new(FieldKind::U32), |s, (n, b)| s.flag(*n, *b));

    let agent_state = FlagsSerializer::new(FieldKind::U8)
        .flag("TYPING", 0x4)
        .flag("EDITING", 0x10);

    let source_type = EnumSerializer::new(FieldKind::U8)
        .variant("SYSTEM", 0)
        .variant("AGENT", 1)
        .variant("OBJECT", 2);

    let audible = EnumSerializer::new(FieldKind::U8)
        .variant("NOT", 255)
        .variant("BARELY", 0)
        .variant("FULLY", 1);

    let throttles = ["Resend", "Land", "Wind", "Cloud", "Task", "Texture", "Asset"]
        .into_iter()
        .fold(StructSerializer::new(), |s, n| s.member(n, FieldKind::F32));

    SubfieldRegistry::new()
        .register("AgentUpdate", "AgentData", "ControlFlags", control_flags)
        .register("AgentUpdate", "AgentData", "State", agent_state)
        .register("ChatFromViewer", "ChatData", "Type", chat_type())
        .register("ChatFromSimulator", "ChatData", "ChatType", chat_type())
        .register("ChatFromSimulator", "ChatData", "SourceType", source_type)
        .register("ChatFromSimulator", "ChatData", "Audible", audible)
        .register("AgentThrottle", "Throttle", "Throttles", throttles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_deserialize_names_bits_and_keeps_unknown() {
        let flags = FlagsSerializer::new(FieldKind::U8)
            .flag("TYPING", 0x4)
            .flag("EDITING", 0x10);
        let sub = flags.deserialize(&Value::U8(0x4 | 0x10 | 0x1)).unwrap();
        assert_eq!(
            sub,
            Subfield::Flags(vec!["TYPING".into(), "EDITING".into(), "0x1".into()])
        );
        assert_eq!(flags.serialize(&sub).unwrap(), Value::U8(0x15));
    }

    #[test]
    fn test_flags_serialize_unknown_name_fails() {
        let flags = FlagsSerializer::new(FieldKind::U8).flag("A", 1);
        let err = flags
            .serialize(&Subfield::Flags(vec!["B".into()]))
            .unwrap_err();
        assert!(matches!(err, SubfieldError::Invalid(_)));
    }

    #[test]
    fn test_flags_serialize_overflow_fails() {
        let flags = FlagsSerializer::new(FieldKind::U8).flag("BIG", 0x100);
        assert!(flags.serialize(&Subfield::Flags(vec!["BIG".into()])).is_err());
    }

    #[test]
    fn test_enum_unknown_value_round_trips_as_number() {
        let sub = chat_type().deserialize(&Value::U8(3)).unwrap();
        assert_eq!(sub, Subfield::Enum("3".into()));
        assert_eq!(chat_type().serialize(&sub).unwrap(), Value::U8(3));
    }

    #[test]
    fn test_enum_named_variant() {
        let sub = chat_type().deserialize(&Value::U8(2)).unwrap();
        assert_eq!(sub, Subfield::Enum("SHOUT".into()));
    }

    #[test]
    fn test_struct_throttles_round_trip() {
        let registry = SubfieldRegistry::standard();
        let ser = registry.get("AgentThrottle", "Throttle", "Throttles").unwrap();

        let mut raw = Vec::new();
        for v in [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let sub = ser.deserialize(&Value::Bytes(raw.clone())).unwrap();
        let Subfield::Struct(members) = &sub else {
            panic!("expected struct");
        };
        assert_eq!(members[0], ("Resend".to_string(), Value::F32(1.0)));
        assert_eq!(members[6], ("Asset".to_string(), Value::F32(7.0)));
        assert_eq!(ser.serialize(&sub).unwrap(), Value::Bytes(raw));
    }

    #[test]
    fn test_struct_short_blob_fails() {
        let ser = StructSerializer::new().member("A", FieldKind::U32);
        assert!(ser.deserialize(&Value::Bytes(vec![1, 2])).is_err());
    }

    #[test]
    fn test_standard_registry_contents() {
        let registry = SubfieldRegistry::standard();
        assert_eq!(registry.len(), 7);
        assert!(registry.get("AgentUpdate", "AgentData", "ControlFlags").is_some());
        assert!(registry.get("AgentUpdate", "AgentData", "Flags").is_none());
    }
}
