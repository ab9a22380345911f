//! Per-type field packing.
//!
//! Body scalars are little-endian. `IPADDR` and `IPPORT` are the
//! exception and travel in network byte order.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut};
use uuid::Uuid;

use crate::error::FieldError;
use crate::template::{FieldKind, LengthPrefix};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Text classification
// ---------------------------------------------------------------------------

/// Decides which `Variable` fields hold NUL-terminated text.
///
/// Classification is by field name only. A field that matches still
/// decodes as [`Value::Bytes`] if its payload isn't NUL-terminated UTF-8,
/// so a wrong guess never loses data.
#[derive(Debug, Clone)]
pub struct TextFields {
    names: HashSet<String>,
    suffixes: Vec<String>,
}

impl TextFields {
    /// A classifier that treats nothing as text.
    pub fn none() -> Self {
        Self {
            names: HashSet::new(),
            suffixes: Vec::new(),
        }
    }

    /// Adds an exact field name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    /// Adds a name suffix, e.g. `"Name"` matches `FirstName`.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffixes.push(suffix.into());
        self
    }

    pub fn is_text(&self, field: &str) -> bool {
        self.names.contains(field)
            || self.suffixes.iter().any(|s| field.ends_with(s.as_str()))
    }
}

impl Default for TextFields {
    fn default() -> Self {
        let mut fields = Self::none();
        for name in ["Text", "Message", "Filename", "MediaURL", "Desc"] {
            fields = fields.with_name(name);
        }
        for suffix in ["Name", "Title", "Description", "Message", "URL"] {
            fields = fields.with_suffix(suffix);
        }
        fields
    }
}

// ---------------------------------------------------------------------------
// Unpack
// ---------------------------------------------------------------------------

fn need(buf: &[u8], needed: usize) -> Result<(), FieldError> {
    if buf.len() < needed {
        return Err(FieldError::Truncated {
            needed,
            remaining: buf.len(),
        });
    }
    Ok(())
}

/// Reads one field of `kind` from the front of `buf`, advancing it.
///
/// `text` only matters for `Variable` fields.
pub fn unpack(
    kind: FieldKind,
    buf: &mut &[u8],
    text: bool,
) -> Result<Value, FieldError> {
    if let Some(width) = kind.fixed_width() {
        need(buf, width)?;
    }
    let value = match kind {
        FieldKind::U8 => Value::U8(buf.get_u8()),
        FieldKind::U16 => Value::U16(buf.get_u16_le()),
        FieldKind::U32 => Value::U32(buf.get_u32_le()),
        FieldKind::U64 => Value::U64(buf.get_u64_le()),
        FieldKind::S8 => Value::S8(buf.get_i8()),
        FieldKind::S16 => Value::S16(buf.get_i16_le()),
        FieldKind::S32 => Value::S32(buf.get_i32_le()),
        FieldKind::S64 => Value::S64(buf.get_i64_le()),
        FieldKind::F32 => Value::F32(buf.get_f32_le()),
        FieldKind::F64 => Value::F64(buf.get_f64_le()),
        FieldKind::Vector3 => {
            Value::Vector3([buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()])
        }
        FieldKind::Vector3d => {
            Value::Vector3d([buf.get_f64_le(), buf.get_f64_le(), buf.get_f64_le()])
        }
        FieldKind::Vector4 => Value::Vector4([
            buf.get_f32_le(),
            buf.get_f32_le(),
            buf.get_f32_le(),
            buf.get_f32_le(),
        ]),
        FieldKind::Quaternion => {
            let (x, y, z) = (buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le());
            let w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
            Value::Quaternion([x, y, z, w])
        }
        FieldKind::Uuid => {
            let mut raw = [0u8; 16];
            buf.copy_to_slice(&mut raw);
            Value::Uuid(Uuid::from_bytes(raw))
        }
        FieldKind::Bool => Value::Bool(buf.get_u8() != 0),
        FieldKind::IpAddr => Value::IpAddr(Ipv4Addr::from(buf.get_u32())),
        FieldKind::IpPort => Value::IpPort(buf.get_u16()),
        FieldKind::Fixed(size) => {
            let mut raw = vec![0u8; size];
            buf.copy_to_slice(&mut raw);
            Value::Bytes(raw)
        }
        FieldKind::Variable(prefix) => {
            need(buf, prefix.width())?;
            let len = match prefix {
                LengthPrefix::One => usize::from(buf.get_u8()),
                LengthPrefix::Two => usize::from(buf.get_u16_le()),
            };
            need(buf, len)?;
            let mut raw = vec![0u8; len];
            buf.copy_to_slice(&mut raw);
            if text { decode_text(raw) } else { Value::Bytes(raw) }
        }
    };
    Ok(value)
}

/// Exactly one trailing NUL is stripped; anything else stays bytes.
fn decode_text(raw: Vec<u8>) -> Value {
    if let Some((&0, body)) = raw.split_last() {
        if let Ok(s) = std::str::from_utf8(body) {
            return Value::Text(s.to_string());
        }
    }
    Value::Bytes(raw)
}

// ---------------------------------------------------------------------------
// Pack
// ---------------------------------------------------------------------------

fn mismatch(kind: FieldKind, value: &Value) -> FieldError {
    FieldError::TypeMismatch {
        expected: kind,
        actual: value.kind_name(),
    }
}

/// Appends `value` encoded as `kind`.
pub fn pack(
    kind: FieldKind,
    value: &Value,
    out: &mut Vec<u8>,
) -> Result<(), FieldError> {
    match (kind, value) {
        (FieldKind::U8, Value::U8(v)) => out.put_u8(*v),
        (FieldKind::U16, Value::U16(v)) => out.put_u16_le(*v),
        (FieldKind::U32, Value::U32(v)) => out.put_u32_le(*v),
        (FieldKind::U64, Value::U64(v)) => out.put_u64_le(*v),
        (FieldKind::S8, Value::S8(v)) => out.put_i8(*v),
        (FieldKind::S16, Value::S16(v)) => out.put_i16_le(*v),
        (FieldKind::S32, Value::S32(v)) => out.put_i32_le(*v),
        (FieldKind::S64, Value::S64(v)) => out.put_i64_le(*v),
        (FieldKind::F32, Value::F32(v)) => out.put_f32_le(*v),
        (FieldKind::F64, Value::F64(v)) => out.put_f64_le(*v),
        (FieldKind::Vector3, Value::Vector3(v)) => {
            v.iter().for_each(|c| out.put_f32_le(*c));
        }
        (FieldKind::Vector3d, Value::Vector3d(v)) => {
            v.iter().for_each(|c| out.put_f64_le(*c));
        }
        (FieldKind::Vector4, Value::Vector4(v)) => {
            v.iter().for_each(|c| out.put_f32_le(*c));
        }
        (FieldKind::Quaternion, Value::Quaternion([x, y, z, w])) => {
            // Only xyz is sent; the receiver assumes w >= 0.
            let sign = if *w < 0.0 { -1.0 } else { 1.0 };
            for c in [x, y, z] {
                out.put_f32_le(c * sign);
            }
        }
        (FieldKind::Uuid, Value::Uuid(v)) => out.put_slice(v.as_bytes()),
        (FieldKind::Bool, Value::Bool(v)) => out.put_u8(u8::from(*v)),
        (FieldKind::IpAddr, Value::IpAddr(v)) => out.put_slice(&v.octets()),
        (FieldKind::IpPort, Value::IpPort(v)) => out.put_u16(*v),
        (FieldKind::Fixed(size), Value::Bytes(_) | Value::Text(_)) => {
            let raw = value.as_bytes().unwrap_or_default();
            if raw.len() > size {
                return Err(FieldError::TooLong {
                    len: raw.len(),
                    limit: size,
                });
            }
            out.put_slice(raw);
            out.put_bytes(0, size - raw.len());
        }
        (FieldKind::Variable(prefix), Value::Bytes(raw)) => {
            put_variable(prefix, raw, false, out)?;
        }
        (FieldKind::Variable(prefix), Value::Text(s)) => {
            put_variable(prefix, s.as_bytes(), true, out)?;
        }
        (kind, value) => return Err(mismatch(kind, value)),
    }
    Ok(())
}

fn put_variable(
    prefix: LengthPrefix,
    raw: &[u8],
    terminate: bool,
    out: &mut Vec<u8>,
) -> Result<(), FieldError> {
    let len = raw.len() + usize::from(terminate);
    if len > prefix.max_len() {
        return Err(FieldError::TooLong {
            len,
            limit: prefix.max_len(),
        });
    }
    match prefix {
        LengthPrefix::One => out.put_u8(len as u8),
        LengthPrefix::Two => out.put_u16_le(len as u16),
    }
    out.put_slice(raw);
    if terminate {
        out.put_u8(0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(kind: FieldKind, value: Value) -> Vec<u8> {
        let mut out = Vec::new();
        pack(kind, &value, &mut out).unwrap();
        out
    }

    #[test]
    fn test_pack_u32_is_little_endian() {
        assert_eq!(packed(FieldKind::U32, Value::U32(0x0102_0304)), [4, 3, 2, 1]);
    }

    #[test]
    fn test_pack_ip_fields_are_big_endian() {
        assert_eq!(
            packed(FieldKind::IpAddr, Value::IpAddr(Ipv4Addr::new(10, 0, 0, 1))),
            [10, 0, 0, 1]
        );
        assert_eq!(packed(FieldKind::IpPort, Value::IpPort(13000)), [0x32, 0xC8]);

        let mut buf: &[u8] = &[0x32, 0xC8];
        assert_eq!(
            unpack(FieldKind::IpPort, &mut buf, false).unwrap(),
            Value::IpPort(13000)
        );
    }

    #[test]
    fn test_unpack_quaternion_reconstructs_w() {
        let mut out = Vec::new();
        for c in [0.0f32, 0.6, 0.0] {
            out.put_f32_le(c);
        }
        let mut buf = out.as_slice();
        let Value::Quaternion(q) = unpack(FieldKind::Quaternion, &mut buf, false).unwrap()
        else {
            panic!("expected quaternion");
        };
        assert!((q[3] - 0.8).abs() < 1e-6);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pack_quaternion_negative_w_flips_sign() {
        let bytes = packed(FieldKind::Quaternion, Value::Quaternion([0.0, 0.6, 0.0, -0.8]));
        let mut buf = bytes.as_slice();
        let Value::Quaternion(q) = unpack(FieldKind::Quaternion, &mut buf, false).unwrap()
        else {
            panic!("expected quaternion");
        };
        assert!((q[1] + 0.6).abs() < 1e-6);
        assert!((q[3] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_pack_text_appends_nul() {
        let bytes = packed(
            FieldKind::Variable(LengthPrefix::One),
            Value::Text("JB".into()),
        );
        assert_eq!(bytes, [3, b'J', b'B', 0]);
    }

    #[test]
    fn test_unpack_text_strips_exactly_one_nul() {
        let mut buf: &[u8] = &[3, b'a', 0, 0];
        let value = unpack(FieldKind::Variable(LengthPrefix::One), &mut buf, true).unwrap();
        assert_eq!(value, Value::Text("a\0".into()));
    }

    #[test]
    fn test_unpack_text_without_nul_stays_bytes() {
        let mut buf: &[u8] = &[2, b'h', b'i'];
        let value = unpack(FieldKind::Variable(LengthPrefix::One), &mut buf, true).unwrap();
        assert_eq!(value, Value::Bytes(b"hi".to_vec()));
    }

    #[test]
    fn test_unpack_variable_two_byte_prefix_is_little_endian() {
        let mut buf: &[u8] = &[2, 0, 0xAA, 0xBB, 0xCC];
        let value = unpack(FieldKind::Variable(LengthPrefix::Two), &mut buf, false).unwrap();
        assert_eq!(value, Value::Bytes(vec![0xAA, 0xBB]));
        assert_eq!(buf, [0xCC]);
    }

    #[test]
    fn test_unpack_truncated_reports_need() {
        let mut buf: &[u8] = &[1, 2];
        let err = unpack(FieldKind::U32, &mut buf, false).unwrap_err();
        assert_eq!(err, FieldError::Truncated { needed: 4, remaining: 2 });
    }

    #[test]
    fn test_pack_fixed_pads_and_rejects_overflow() {
        assert_eq!(
            packed(FieldKind::Fixed(4), Value::Bytes(vec![1, 2])),
            [1, 2, 0, 0]
        );
        let mut out = Vec::new();
        let err = pack(FieldKind::Fixed(1), &Value::Bytes(vec![1, 2]), &mut out).unwrap_err();
        assert_eq!(err, FieldError::TooLong { len: 2, limit: 1 });
    }

    #[test]
    fn test_pack_variable_too_long_fails() {
        let mut out = Vec::new();
        let err = pack(
            FieldKind::Variable(LengthPrefix::One),
            &Value::Bytes(vec![0; 256]),
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, FieldError::TooLong { len: 256, .. }));
    }

    #[test]
    fn test_pack_wrong_variant_is_type_mismatch() {
        let mut out = Vec::new();
        let err = pack(FieldKind::U8, &Value::U32(1), &mut out).unwrap_err();
        assert_eq!(
            err,
            FieldError::TypeMismatch {
                expected: FieldKind::U8,
                actual: "U32"
            }
        );
    }

    #[test]
    fn test_text_fields_default_matches_names() {
        let fields = TextFields::default();
        assert!(fields.is_text("FirstName"));
        assert!(fields.is_text("Message"));
        assert!(fields.is_text("GroupTitle"));
        assert!(!fields.is_text("BinaryBucket"));
        assert!(!fields.is_text("Throttles"));
        assert!(TextFields::none().with_name("Data").is_text("Data"));
    }
}
