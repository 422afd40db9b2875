//! Tagged value type
//!
//! Fixed-size values are stored inline; strings and blobs are
//! reference-counted so values stay cheap to clone across snapshot
//! buffers and aggregation keys.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::errors::{Result, TransitError};
use crate::types::AttrType;
use crate::vlq::{read_vlq, write_vlq, write_vlq_into};

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Empty,
    Blob(Arc<[u8]>),
    Int(i64),
    Uint(u64),
    Str(Arc<str>),
    Addr(u64),
    Double(f64),
    Bool(bool),
    Type(AttrType),
}

impl Value {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Value::Empty => AttrType::Inv,
            Value::Blob(_) => AttrType::Usr,
            Value::Int(_) => AttrType::Int,
            Value::Uint(_) => AttrType::Uint,
            Value::Str(_) => AttrType::String,
            Value::Addr(_) => AttrType::Addr,
            Value::Double(_) => AttrType::Double,
            Value::Bool(_) => AttrType::Bool,
            Value::Type(_) => AttrType::Type,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Value::Empty => 0,
            Value::Blob(b) => b.len(),
            Value::Str(s) => s.len(),
            Value::Bool(_) | Value::Type(_) => 1,
            _ => 8,
        }
    }

    /// Construct from a type tag and a byte payload.
    ///
    /// Numeric payloads are 8 bytes little-endian; bool and type are a
    /// single byte; strings must be valid UTF-8.
    pub fn from_bytes(t: AttrType, bytes: &[u8]) -> Result<Self> {
        fn fixed8(bytes: &[u8]) -> Result<u64> {
            let arr: [u8; 8] = bytes
                .try_into()
                .map_err(|_| TransitError::TruncatedInput)?;
            Ok(u64::from_le_bytes(arr))
        }
        match t {
            AttrType::Inv => Ok(Value::Empty),
            AttrType::Usr => Ok(Value::Blob(bytes.into())),
            AttrType::String => Ok(Value::Str(
                std::str::from_utf8(bytes)
                    .map_err(|_| TransitError::InvalidType(AttrType::String))?
                    .into(),
            )),
            AttrType::Int => Ok(Value::Int(fixed8(bytes)? as i64)),
            AttrType::Uint => Ok(Value::Uint(fixed8(bytes)?)),
            AttrType::Addr => Ok(Value::Addr(fixed8(bytes)?)),
            AttrType::Double => Ok(Value::Double(f64::from_bits(fixed8(bytes)?))),
            AttrType::Bool => match bytes.first() {
                Some(b) => Ok(Value::Bool(*b != 0)),
                None => Err(TransitError::TruncatedInput),
            },
            AttrType::Type => match bytes.first().and_then(|b| AttrType::from_tag(*b)) {
                Some(tag) => Ok(Value::Type(tag)),
                None => Err(TransitError::InvalidType(AttrType::Type)),
            },
        }
    }

    pub fn to_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Uint(v) | Value::Addr(v) => {
                i64::try_from(*v).map_err(|_| TransitError::OutOfRange)
            }
            Value::Double(d) => {
                if d.is_finite() && *d >= i64::MIN as f64 && *d < i64::MAX as f64 {
                    Ok(*d as i64)
                } else {
                    Err(TransitError::OutOfRange)
                }
            }
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Type(t) => Ok(*t as i64),
            _ => Err(TransitError::InvalidType(self.attr_type())),
        }
    }

    pub fn to_uint(&self) -> Result<u64> {
        match self {
            Value::Uint(v) | Value::Addr(v) => Ok(*v),
            Value::Int(v) => u64::try_from(*v).map_err(|_| TransitError::OutOfRange),
            Value::Double(d) => {
                if d.is_finite() && *d >= 0.0 && *d < u64::MAX as f64 {
                    Ok(*d as u64)
                } else {
                    Err(TransitError::OutOfRange)
                }
            }
            Value::Bool(b) => Ok(u64::from(*b)),
            Value::Type(t) => Ok(*t as u64),
            _ => Err(TransitError::InvalidType(self.attr_type())),
        }
    }

    pub fn to_double(&self) -> Result<f64> {
        match self {
            Value::Double(d) => Ok(*d),
            Value::Int(v) => Ok(*v as f64),
            Value::Uint(v) | Value::Addr(v) => Ok(*v as f64),
            Value::Bool(b) => Ok(f64::from(u8::from(*b))),
            Value::Type(t) => Ok(f64::from(*t as u8)),
            _ => Err(TransitError::InvalidType(self.attr_type())),
        }
    }

    pub fn to_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(v) => Ok(*v != 0),
            Value::Uint(v) | Value::Addr(v) => Ok(*v != 0),
            _ => Err(TransitError::InvalidType(self.attr_type())),
        }
    }

    pub fn to_attr_type(&self) -> Result<AttrType> {
        match self {
            Value::Type(t) => Ok(*t),
            _ => Err(TransitError::InvalidType(self.attr_type())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Parse the string representation of a value of type `t`.
    ///
    /// Input that does not denote a value of `t` reports `InvalidType`.
    pub fn from_string(t: AttrType, s: &str) -> Result<Self> {
        let err = || TransitError::InvalidType(t);
        match t {
            AttrType::Inv => Ok(Value::Empty),
            AttrType::Usr => {
                if s.len() % 2 != 0 {
                    return Err(err());
                }
                let mut bytes = Vec::with_capacity(s.len() / 2);
                for i in (0..s.len()).step_by(2) {
                    bytes.push(u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| err())?);
                }
                Ok(Value::Blob(bytes.into()))
            }
            AttrType::String => Ok(Value::Str(s.into())),
            AttrType::Int => s.parse().map(Value::Int).map_err(|_| err()),
            AttrType::Uint => s.parse().map(Value::Uint).map_err(|_| err()),
            AttrType::Addr => u64::from_str_radix(s, 16).map(Value::Addr).map_err(|_| err()),
            AttrType::Double => s.parse().map(Value::Double).map_err(|_| err()),
            AttrType::Bool => match s {
                "true" | "TRUE" | "True" | "1" => Ok(Value::Bool(true)),
                "false" | "FALSE" | "False" | "0" => Ok(Value::Bool(false)),
                _ => Err(err()),
            },
            AttrType::Type => s.parse().map(Value::Type).map_err(|_| err()),
        }
    }

    fn payload_word(&self) -> u64 {
        match self {
            Value::Empty => 0,
            Value::Int(v) => *v as u64,
            Value::Uint(v) | Value::Addr(v) => *v,
            Value::Double(d) => d.to_bits(),
            Value::Bool(b) => u64::from(*b),
            Value::Type(t) => *t as u64,
            Value::Str(_) | Value::Blob(_) => 0,
        }
    }

    fn header_word(&self) -> u64 {
        let tag = self.attr_type() as u64;
        match self {
            Value::Str(s) => ((s.len() as u64) << 8) | tag,
            Value::Blob(b) => ((b.len() as u64) << 8) | tag,
            _ => tag,
        }
    }

    /// Append the packed encoding: a VLQ type+size word, then either a
    /// VLQ payload word (fixed-size types) or the raw payload bytes
    /// (strings and blobs).
    pub fn pack(&self, buf: &mut Vec<u8>) {
        write_vlq(self.header_word(), buf);
        match self {
            Value::Str(s) => buf.extend_from_slice(s.as_bytes()),
            Value::Blob(b) => buf.extend_from_slice(b),
            _ => write_vlq(self.payload_word(), buf),
        }
    }

    /// Allocation-free `pack` into a fixed buffer. Returns the number
    /// of bytes written, or `None` if the buffer is too small.
    pub fn pack_into(&self, buf: &mut [u8]) -> Option<usize> {
        let mut pos = write_vlq_into(self.header_word(), buf)?;
        match self {
            Value::Str(s) => {
                let bytes = s.as_bytes();
                buf.get_mut(pos..pos + bytes.len())?.copy_from_slice(bytes);
                pos += bytes.len();
            }
            Value::Blob(b) => {
                buf.get_mut(pos..pos + b.len())?.copy_from_slice(b);
                pos += b.len();
            }
            _ => pos += write_vlq_into(self.payload_word(), &mut buf[pos..])?,
        }
        Some(pos)
    }

    /// Decode a packed value; returns it and the number of bytes read.
    pub fn unpack(buf: &[u8]) -> Result<(Self, usize)> {
        let (word, mut pos) = read_vlq(buf)?;
        let t = AttrType::from_tag((word & 0xff) as u8)
            .ok_or(TransitError::InvalidType(AttrType::Inv))?;
        let size = (word >> 8) as usize;
        match t {
            AttrType::String | AttrType::Usr => {
                let bytes = buf
                    .get(pos..pos + size)
                    .ok_or(TransitError::TruncatedInput)?;
                let value = Value::from_bytes(t, bytes)?;
                Ok((value, pos + size))
            }
            _ => {
                let (payload, used) = read_vlq(&buf[pos..])?;
                pos += used;
                let value = match t {
                    AttrType::Inv => Value::Empty,
                    AttrType::Int => Value::Int(payload as i64),
                    AttrType::Uint => Value::Uint(payload),
                    AttrType::Addr => Value::Addr(payload),
                    AttrType::Double => Value::Double(f64::from_bits(payload)),
                    AttrType::Bool => Value::Bool(payload != 0),
                    AttrType::Type => Value::Type(
                        AttrType::from_tag(payload as u8)
                            .ok_or(TransitError::InvalidType(AttrType::Type))?,
                    ),
                    AttrType::String | AttrType::Usr => unreachable!(),
                };
                Ok((value, pos))
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        // values of different types order by type tag
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Uint(a), Value::Uint(b)) => a.cmp(b),
            (Value::Addr(a), Value::Addr(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Type(a), Value::Type(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Empty, Value::Empty) => Ordering::Equal,
            _ => self.attr_type().cmp(&other.attr_type()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.attr_type() as u8).hash(state);
        match self {
            Value::Empty => {}
            Value::Str(s) => s.hash(state),
            Value::Blob(b) => b.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            v => v.payload_word().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Blob(b) => {
                for byte in b.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Addr(v) => write!(f, "{v:x}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Type(t) => write!(f, "{t}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v.into())
    }
}

impl From<AttrType> for Value {
    fn from(v: AttrType) -> Self {
        Value::Type(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Value> {
        vec![
            Value::Empty,
            Value::Blob(vec![0u8, 1, 0xfe].into()),
            Value::Int(-42),
            Value::Int(i64::MIN),
            Value::Uint(u64::MAX),
            Value::Str("hello, world".into()),
            Value::Str("".into()),
            Value::Addr(0xdeadbeef),
            Value::Double(0.25),
            Value::Double(-1.5e300),
            Value::Bool(true),
            Value::Type(AttrType::Double),
        ]
    }

    #[test]
    fn pack_unpack_identity() {
        for v in samples() {
            let mut buf = vec![];
            v.pack(&mut buf);
            let (decoded, used) = Value::unpack(&buf).unwrap();
            assert_eq!(decoded, v, "roundtrip failed for {v:?}");
            assert_eq!(used, buf.len());
        }
    }

    #[test]
    fn pack_into_matches_pack() {
        for v in samples() {
            let mut vec_buf = vec![];
            v.pack(&mut vec_buf);
            let mut arr = [0u8; 64];
            let n = v.pack_into(&mut arr).unwrap();
            assert_eq!(&arr[..n], &vec_buf[..]);
        }
    }

    #[test]
    fn unpack_truncated() {
        let mut buf = vec![];
        Value::Str("a longer string".into()).pack(&mut buf);
        buf.truncate(buf.len() - 1);
        assert_eq!(Value::unpack(&buf), Err(TransitError::TruncatedInput));
    }

    #[test]
    fn numeric_conversions() {
        assert_eq!(Value::Int(-7).to_double().unwrap(), -7.0);
        assert_eq!(Value::Uint(7).to_int().unwrap(), 7);
        assert_eq!(Value::Double(2.5).to_int().unwrap(), 2);
        assert_eq!(Value::Bool(true).to_uint().unwrap(), 1);
        assert_eq!(Value::Int(-1).to_uint(), Err(TransitError::OutOfRange));
        assert_eq!(
            Value::Uint(u64::MAX).to_int(),
            Err(TransitError::OutOfRange)
        );
        assert_eq!(
            Value::Str("1".into()).to_int(),
            Err(TransitError::InvalidType(AttrType::String))
        );
    }

    #[test]
    fn string_roundtrip() {
        for v in samples() {
            let s = v.to_string();
            let parsed = Value::from_string(v.attr_type(), &s).unwrap();
            assert_eq!(parsed, v, "string roundtrip failed for {v:?} ({s})");
        }
    }

    #[test]
    fn mixed_type_ordering_uses_type_tag() {
        let a = Value::Int(99);
        let b = Value::Str("1".into());
        assert_eq!(a.cmp(&b), Ordering::Less);
        assert_eq!(b.cmp(&a), Ordering::Greater);
    }

    #[test]
    fn from_bytes_fixed_width() {
        let v = Value::from_bytes(AttrType::Int, &(-3i64).to_le_bytes()).unwrap();
        assert_eq!(v, Value::Int(-3));
        assert!(Value::from_bytes(AttrType::Int, &[1, 2]).is_err());
    }
}
