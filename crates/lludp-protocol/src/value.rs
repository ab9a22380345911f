//! Decoded field values.

use std::net::Ipv4Addr;

use serde::Serialize;
use uuid::Uuid;

use crate::template::FieldKind;

/// One decoded field.
///
/// The variant set is closed: every template field type maps onto exactly
/// one variant, except `Variable` blobs, which decode as [`Value::Text`]
/// when the field is classified as text and as [`Value::Bytes`]
/// otherwise. `Fixed` blobs are always bytes.
///
/// Serializes as `{"type": "U32", "value": 7}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    S8(i8),
    S16(i16),
    S32(i32),
    S64(i64),
    F32(f32),
    F64(f64),
    Vector3([f32; 3]),
    Vector3d([f64; 3]),
    Vector4([f32; 4]),
    /// `[x, y, z, w]`; only x, y and z travel on the wire.
    Quaternion([f32; 4]),
    Uuid(Uuid),
    Bool(bool),
    IpAddr(Ipv4Addr),
    IpPort(u16),
    Bytes(Vec<u8>),
    Text(String),
}

impl Value {
    /// Variant name, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::U8(_) => "U8",
            Self::U16(_) => "U16",
            Self::U32(_) => "U32",
            Self::U64(_) => "U64",
            Self::S8(_) => "S8",
            Self::S16(_) => "S16",
            Self::S32(_) => "S32",
            Self::S64(_) => "S64",
            Self::F32(_) => "F32",
            Self::F64(_) => "F64",
            Self::Vector3(_) => "Vector3",
            Self::Vector3d(_) => "Vector3d",
            Self::Vector4(_) => "Vector4",
            Self::Quaternion(_) => "Quaternion",
            Self::Uuid(_) => "Uuid",
            Self::Bool(_) => "Bool",
            Self::IpAddr(_) => "IpAddr",
            Self::IpPort(_) => "IpPort",
            Self::Bytes(_) => "Bytes",
            Self::Text(_) => "Text",
        }
    }

    /// The zero value for a field type, used by fill-missing blocks.
    pub fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::U8 => Self::U8(0),
            FieldKind::U16 => Self::U16(0),
            FieldKind::U32 => Self::U32(0),
            FieldKind::U64 => Self::U64(0),
            FieldKind::S8 => Self::S8(0),
            FieldKind::S16 => Self::S16(0),
            FieldKind::S32 => Self::S32(0),
            FieldKind::S64 => Self::S64(0),
            FieldKind::F32 => Self::F32(0.0),
            FieldKind::F64 => Self::F64(0.0),
            FieldKind::Vector3 => Self::Vector3([0.0; 3]),
            FieldKind::Vector3d => Self::Vector3d([0.0; 3]),
            FieldKind::Vector4 => Self::Vector4([0.0; 4]),
            FieldKind::Quaternion => Self::Quaternion([0.0, 0.0, 0.0, 1.0]),
            FieldKind::Uuid => Self::Uuid(Uuid::nil()),
            FieldKind::Bool => Self::Bool(false),
            FieldKind::IpAddr => Self::IpAddr(Ipv4Addr::UNSPECIFIED),
            FieldKind::IpPort => Self::IpPort(0),
            FieldKind::Fixed(size) => Self::Bytes(vec![0; size]),
            FieldKind::Variable(_) => Self::Bytes(Vec::new()),
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Self::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Self::U16(v) | Self::IpPort(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::S32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(v) => Some(*v),
            _ => None,
        }
    }

    /// Text content. Bytes that happen to be NUL-terminated UTF-8 count.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Bytes(b) => b
                .strip_suffix(&[0])
                .and_then(|b| std::str::from_utf8(b).ok()),
            _ => None,
        }
    }

    /// Raw blob content.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => S8,
    i16 => S16,
    i32 => S32,
    i64 => S64,
    f32 => F32,
    f64 => F64,
    bool => Bool,
    Uuid => Uuid,
    Ipv4Addr => IpAddr,
    Vec<u8> => Bytes,
    String => Text,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}
