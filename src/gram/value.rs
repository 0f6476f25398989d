//! Wire value encoding for Gram message envelopes.
//!
//! Gram serializes message bodies in a compact tagged binary form. Each value
//! is prefixed with a marker byte that indicates its type; small strings,
//! lists, maps and structures encode their size into the marker itself.
//!
//! Only the envelope subset is implemented here: null, boolean, integer,
//! float, bytes, string, list, map and structure. Richer payloads (graph
//! entities, temporal values) travel through the driver as opaque structures.

use std::collections::HashMap;
use std::fmt;

use bytes::{BufMut, BytesMut};

/// Type markers.
mod marker {
    pub const NULL: u8 = 0xC0;
    pub const FLOAT_64: u8 = 0xC1;
    pub const FALSE: u8 = 0xC2;
    pub const TRUE: u8 = 0xC3;

    pub const INT_8: u8 = 0xC8;
    pub const INT_16: u8 = 0xC9;
    pub const INT_32: u8 = 0xCA;
    pub const INT_64: u8 = 0xCB;

    pub const BYTES_8: u8 = 0xCC;
    pub const BYTES_16: u8 = 0xCD;
    pub const BYTES_32: u8 = 0xCE;

    pub const TINY_STRING_BASE: u8 = 0x80;
    pub const STRING_8: u8 = 0xD0;
    pub const STRING_16: u8 = 0xD1;
    pub const STRING_32: u8 = 0xD2;

    pub const TINY_LIST_BASE: u8 = 0x90;
    pub const LIST_8: u8 = 0xD4;
    pub const LIST_16: u8 = 0xD5;
    pub const LIST_32: u8 = 0xD6;

    pub const TINY_MAP_BASE: u8 = 0xA0;
    pub const MAP_8: u8 = 0xD8;
    pub const MAP_16: u8 = 0xD9;
    pub const MAP_32: u8 = 0xDA;

    pub const TINY_STRUCT_BASE: u8 = 0xB0;
    pub const STRUCT_8: u8 = 0xDC;
    pub const STRUCT_16: u8 = 0xDD;

    pub const TINY_MAX: usize = 15;
}

/// Wire serialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Unknown marker byte
    UnknownMarker(u8),
    /// Input ended mid-value
    UnexpectedEnd,
    /// Value too large to encode
    TooLarge(String),
    /// Map key was not a string
    InvalidKey,
    /// Structure-level violation (wrong tag, missing field, etc.)
    InvalidStructure(String),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::UnknownMarker(m) => write!(f, "Unknown marker: 0x{:02X}", m),
            WireError::UnexpectedEnd => write!(f, "Unexpected end of input"),
            WireError::TooLarge(what) => write!(f, "Value too large to encode: {}", what),
            WireError::InvalidKey => write!(f, "Map key must be a string"),
            WireError::InvalidStructure(msg) => write!(f, "Invalid structure: {}", msg),
        }
    }
}

impl std::error::Error for WireError {}

/// A tagged structure: a message envelope or an opaque payload value.
#[derive(Debug, Clone, PartialEq)]
pub struct WireStructure {
    /// Structure tag
    pub tag: u8,
    /// Structure fields
    pub fields: Vec<WireValue>,
}

impl WireStructure {
    /// Create a new structure.
    pub fn new(tag: u8, fields: Vec<WireValue>) -> Self {
        Self { tag, fields }
    }
}

/// All wire value variants.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Null
    Null,
    /// Boolean
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit IEEE 754 float
    Float(f64),
    /// Byte array
    Bytes(Vec<u8>),
    /// UTF-8 string
    String(String),
    /// Heterogeneous list
    List(Vec<WireValue>),
    /// String-keyed map
    Map(HashMap<String, WireValue>),
    /// Tagged structure
    Structure(WireStructure),
}

impl WireValue {
    /// Get as string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            WireValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            WireValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as map.
    pub fn as_map(&self) -> Option<&HashMap<String, WireValue>> {
        match self {
            WireValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get as list.
    pub fn as_list(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get as structure.
    pub fn as_structure(&self) -> Option<&WireStructure> {
        match self {
            WireValue::Structure(s) => Some(s),
            _ => None,
        }
    }

    /// Check for null.
    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        WireValue::String(s.to_string())
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        WireValue::String(s)
    }
}

impl From<i64> for WireValue {
    fn from(i: i64) -> Self {
        WireValue::Integer(i)
    }
}

impl From<bool> for WireValue {
    fn from(b: bool) -> Self {
        WireValue::Boolean(b)
    }
}

/// Encode a value into a fresh buffer.
pub fn encode(value: &WireValue) -> Result<BytesMut, WireError> {
    let mut buf = BytesMut::with_capacity(64);
    encode_into(value, &mut buf)?;
    Ok(buf)
}

/// Encode a value onto the end of an existing buffer.
pub fn encode_into(value: &WireValue, buf: &mut BytesMut) -> Result<(), WireError> {
    match value {
        WireValue::Null => buf.put_u8(marker::NULL),
        WireValue::Boolean(true) => buf.put_u8(marker::TRUE),
        WireValue::Boolean(false) => buf.put_u8(marker::FALSE),
        WireValue::Integer(i) => encode_int(*i, buf),
        WireValue::Float(v) => {
            buf.put_u8(marker::FLOAT_64);
            buf.put_f64(*v);
        }
        WireValue::Bytes(b) => encode_bytes(b, buf)?,
        WireValue::String(s) => encode_string(s, buf)?,
        WireValue::List(items) => {
            encode_size(
                items.len(),
                marker::TINY_LIST_BASE,
                [marker::LIST_8, marker::LIST_16, marker::LIST_32],
                "list",
                buf,
            )?;
            for item in items {
                encode_into(item, buf)?;
            }
        }
        WireValue::Map(entries) => {
            encode_size(
                entries.len(),
                marker::TINY_MAP_BASE,
                [marker::MAP_8, marker::MAP_16, marker::MAP_32],
                "map",
                buf,
            )?;
            for (key, item) in entries {
                encode_string(key, buf)?;
                encode_into(item, buf)?;
            }
        }
        WireValue::Structure(s) => {
            match s.fields.len() {
                n if n <= marker::TINY_MAX => {
                    buf.put_u8(marker::TINY_STRUCT_BASE | n as u8);
                }
                n if n <= u8::MAX as usize => {
                    buf.put_u8(marker::STRUCT_8);
                    buf.put_u8(n as u8);
                }
                n if n <= u16::MAX as usize => {
                    buf.put_u8(marker::STRUCT_16);
                    buf.put_u16(n as u16);
                }
                _ => return Err(WireError::TooLarge("structure".to_string())),
            }
            buf.put_u8(s.tag);
            for field in &s.fields {
                encode_into(field, buf)?;
            }
        }
    }
    Ok(())
}

fn encode_int(value: i64, buf: &mut BytesMut) {
    match value {
        -16..=127 => buf.put_i8(value as i8),
        -128..=-17 => {
            buf.put_u8(marker::INT_8);
            buf.put_i8(value as i8);
        }
        -32_768..=32_767 => {
            buf.put_u8(marker::INT_16);
            buf.put_i16(value as i16);
        }
        -2_147_483_648..=2_147_483_647 => {
            buf.put_u8(marker::INT_32);
            buf.put_i32(value as i32);
        }
        _ => {
            buf.put_u8(marker::INT_64);
            buf.put_i64(value);
        }
    }
}

fn encode_bytes(value: &[u8], buf: &mut BytesMut) -> Result<(), WireError> {
    match value.len() {
        n if n <= u8::MAX as usize => {
            buf.put_u8(marker::BYTES_8);
            buf.put_u8(n as u8);
        }
        n if n <= u16::MAX as usize => {
            buf.put_u8(marker::BYTES_16);
            buf.put_u16(n as u16);
        }
        n if n <= u32::MAX as usize => {
            buf.put_u8(marker::BYTES_32);
            buf.put_u32(n as u32);
        }
        _ => return Err(WireError::TooLarge("bytes".to_string())),
    }
    buf.put_slice(value);
    Ok(())
}

fn encode_string(value: &str, buf: &mut BytesMut) -> Result<(), WireError> {
    let bytes = value.as_bytes();
    encode_size(
        bytes.len(),
        marker::TINY_STRING_BASE,
        [marker::STRING_8, marker::STRING_16, marker::STRING_32],
        "string",
        buf,
    )?;
    buf.put_slice(bytes);
    Ok(())
}

fn encode_size(
    len: usize,
    tiny_base: u8,
    sized: [u8; 3],
    what: &str,
    buf: &mut BytesMut,
) -> Result<(), WireError> {
    match len {
        n if n <= marker::TINY_MAX => buf.put_u8(tiny_base | n as u8),
        n if n <= u8::MAX as usize => {
            buf.put_u8(sized[0]);
            buf.put_u8(n as u8);
        }
        n if n <= u16::MAX as usize => {
            buf.put_u8(sized[1]);
            buf.put_u16(n as u16);
        }
        n if n <= u32::MAX as usize => {
            buf.put_u8(sized[2]);
            buf.put_u32(n as u32);
        }
        _ => return Err(WireError::TooLarge(what.to_string())),
    }
    Ok(())
}

/// Decode a single value from a byte slice.
///
/// Trailing bytes after the first complete value are rejected; a framed
/// message carries exactly one envelope.
pub fn decode(data: &[u8]) -> Result<WireValue, WireError> {
    let mut cursor = Cursor { data, pos: 0 };
    let value = cursor.decode_value()?;
    if cursor.pos != data.len() {
        return Err(WireError::InvalidStructure(format!(
            "{} trailing bytes after value",
            data.len() - cursor.pos
        )));
    }
    Ok(value)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.pos + n > self.data.len() {
            return Err(WireError::UnexpectedEnd);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn decode_value(&mut self) -> Result<WireValue, WireError> {
        let m = self.read_u8()?;

        // Tiny integers occupy the marker byte itself
        if m <= 0x7F || m >= 0xF0 {
            return Ok(WireValue::Integer(m as i8 as i64));
        }

        match m {
            marker::NULL => Ok(WireValue::Null),
            marker::TRUE => Ok(WireValue::Boolean(true)),
            marker::FALSE => Ok(WireValue::Boolean(false)),
            marker::FLOAT_64 => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Ok(WireValue::Float(f64::from_be_bytes(raw)))
            }
            marker::INT_8 => Ok(WireValue::Integer(self.read_u8()? as i8 as i64)),
            marker::INT_16 => Ok(WireValue::Integer(self.read_u16()? as i16 as i64)),
            marker::INT_32 => Ok(WireValue::Integer(self.read_u32()? as i32 as i64)),
            marker::INT_64 => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Ok(WireValue::Integer(i64::from_be_bytes(raw)))
            }
            marker::BYTES_8 => {
                let n = self.read_u8()? as usize;
                Ok(WireValue::Bytes(self.take(n)?.to_vec()))
            }
            marker::BYTES_16 => {
                let n = self.read_u16()? as usize;
                Ok(WireValue::Bytes(self.take(n)?.to_vec()))
            }
            marker::BYTES_32 => {
                let n = self.read_u32()? as usize;
                Ok(WireValue::Bytes(self.take(n)?.to_vec()))
            }
            m if (marker::TINY_STRING_BASE..=0x8F).contains(&m) => {
                self.decode_string((m & 0x0F) as usize)
            }
            marker::STRING_8 => {
                let n = self.read_u8()? as usize;
                self.decode_string(n)
            }
            marker::STRING_16 => {
                let n = self.read_u16()? as usize;
                self.decode_string(n)
            }
            marker::STRING_32 => {
                let n = self.read_u32()? as usize;
                self.decode_string(n)
            }
            m if (marker::TINY_LIST_BASE..=0x9F).contains(&m) => {
                self.decode_list((m & 0x0F) as usize)
            }
            marker::LIST_8 => {
                let n = self.read_u8()? as usize;
                self.decode_list(n)
            }
            marker::LIST_16 => {
                let n = self.read_u16()? as usize;
                self.decode_list(n)
            }
            marker::LIST_32 => {
                let n = self.read_u32()? as usize;
                self.decode_list(n)
            }
            m if (marker::TINY_MAP_BASE..=0xAF).contains(&m) => {
                self.decode_map((m & 0x0F) as usize)
            }
            marker::MAP_8 => {
                let n = self.read_u8()? as usize;
                self.decode_map(n)
            }
            marker::MAP_16 => {
                let n = self.read_u16()? as usize;
                self.decode_map(n)
            }
            marker::MAP_32 => {
                let n = self.read_u32()? as usize;
                self.decode_map(n)
            }
            m if (marker::TINY_STRUCT_BASE..=0xBF).contains(&m) => {
                self.decode_structure((m & 0x0F) as usize)
            }
            marker::STRUCT_8 => {
                let n = self.read_u8()? as usize;
                self.decode_structure(n)
            }
            marker::STRUCT_16 => {
                let n = self.read_u16()? as usize;
                self.decode_structure(n)
            }
            other => Err(WireError::UnknownMarker(other)),
        }
    }

    fn decode_string(&mut self, len: usize) -> Result<WireValue, WireError> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| WireError::InvalidStructure("string is not UTF-8".to_string()))?;
        Ok(WireValue::String(s.to_string()))
    }

    fn decode_list(&mut self, len: usize) -> Result<WireValue, WireError> {
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(self.decode_value()?);
        }
        Ok(WireValue::List(items))
    }

    fn decode_map(&mut self, len: usize) -> Result<WireValue, WireError> {
        let mut entries = HashMap::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = match self.decode_value()? {
                WireValue::String(s) => s,
                _ => return Err(WireError::InvalidKey),
            };
            entries.insert(key, self.decode_value()?);
        }
        Ok(WireValue::Map(entries))
    }

    fn decode_structure(&mut self, field_count: usize) -> Result<WireValue, WireError> {
        let tag = self.read_u8()?;
        let mut fields = Vec::with_capacity(field_count.min(64));
        for _ in 0..field_count {
            fields.push(self.decode_value()?);
        }
        Ok(WireValue::Structure(WireStructure::new(tag, fields)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: WireValue) -> WireValue {
        let encoded = encode(&value).unwrap();
        decode(&encoded).unwrap()
    }

    #[test]
    fn test_null_round_trip() {
        assert_eq!(round_trip(WireValue::Null), WireValue::Null);
    }

    #[test]
    fn test_bool_round_trip() {
        assert_eq!(round_trip(WireValue::Boolean(true)), WireValue::Boolean(true));
        assert_eq!(round_trip(WireValue::Boolean(false)), WireValue::Boolean(false));
    }

    #[test]
    fn test_int_encodings() {
        // Each size class hits a different marker
        for value in [0i64, -16, 127, -17, -128, 128, 32_767, -32_768, 40_000,
                      2_147_483_647, -2_147_483_648, 2_147_483_648, i64::MIN, i64::MAX] {
            assert_eq!(round_trip(WireValue::Integer(value)), WireValue::Integer(value));
        }
    }

    #[test]
    fn test_tiny_int_single_byte() {
        let encoded = encode(&WireValue::Integer(42)).unwrap();
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded[0], 42);

        let encoded = encode(&WireValue::Integer(-1)).unwrap();
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded[0], 0xFF);
    }

    #[test]
    fn test_float_round_trip() {
        assert_eq!(round_trip(WireValue::Float(3.125)), WireValue::Float(3.125));
    }

    #[test]
    fn test_string_sizes() {
        let tiny = "hi".to_string();
        let short = "x".repeat(200);
        let long = "y".repeat(70_000);

        for s in [tiny, short, long] {
            assert_eq!(
                round_trip(WireValue::String(s.clone())),
                WireValue::String(s)
            );
        }
    }

    #[test]
    fn test_tiny_string_marker() {
        let encoded = encode(&WireValue::String("abc".to_string())).unwrap();
        assert_eq!(encoded[0], 0x83);
        assert_eq!(&encoded[1..], b"abc");
    }

    #[test]
    fn test_bytes_round_trip() {
        let value = WireValue::Bytes(vec![0x00, 0x01, 0xFF]);
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn test_list_round_trip() {
        let value = WireValue::List(vec![
            WireValue::Integer(1),
            WireValue::String("two".to_string()),
            WireValue::Null,
        ]);
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn test_map_round_trip() {
        let mut entries = HashMap::new();
        entries.insert("name".to_string(), WireValue::String("Alice".to_string()));
        entries.insert("age".to_string(), WireValue::Integer(30));
        let value = WireValue::Map(entries);
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn test_structure_round_trip() {
        let value = WireValue::Structure(WireStructure::new(
            0x10,
            vec![
                WireValue::String("RETURN 1".to_string()),
                WireValue::Map(HashMap::new()),
            ],
        ));
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn test_nested_round_trip() {
        let mut inner = HashMap::new();
        inner.insert(
            "items".to_string(),
            WireValue::List(vec![WireValue::Integer(1), WireValue::Integer(2)]),
        );
        let value = WireValue::Structure(WireStructure::new(
            0x70,
            vec![WireValue::Map(inner)],
        ));
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn test_decode_truncated() {
        let encoded = encode(&WireValue::String("hello".to_string())).unwrap();
        let err = decode(&encoded[..3]).unwrap_err();
        assert_eq!(err, WireError::UnexpectedEnd);
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut encoded = encode(&WireValue::Integer(1)).unwrap();
        encoded.put_u8(0x00);
        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, WireError::InvalidStructure(_)));
    }

    #[test]
    fn test_decode_unknown_marker() {
        // 0xCF is unassigned
        let err = decode(&[0xCF]).unwrap_err();
        assert_eq!(err, WireError::UnknownMarker(0xCF));
    }

    #[test]
    fn test_decode_non_string_map_key() {
        // Tiny map with one entry, key = integer 1
        let err = decode(&[0xA1, 0x01, 0x01]).unwrap_err();
        assert_eq!(err, WireError::InvalidKey);
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(WireValue::String("a".to_string()).as_str(), Some("a"));
        assert_eq!(WireValue::Integer(5).as_int(), Some(5));
        assert_eq!(WireValue::Boolean(true).as_bool(), Some(true));
        assert!(WireValue::Null.is_null());
        assert!(WireValue::Integer(5).as_str().is_none());
        assert!(WireValue::Map(HashMap::new()).as_map().is_some());
        assert!(WireValue::List(vec![]).as_list().is_some());
    }

    #[test]
    fn test_from_impls() {
        assert_eq!(WireValue::from("x"), WireValue::String("x".to_string()));
        assert_eq!(WireValue::from(7i64), WireValue::Integer(7));
        assert_eq!(WireValue::from(true), WireValue::Boolean(true));
    }
}
