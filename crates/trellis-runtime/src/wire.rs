//! Remote-call argument codec
//!
//! A compact byte format for shipping call arguments across the process
//! boundary: a little-endian value count followed by tagged values. Objects
//! travel by full tree path and enum items by name; both are re-resolved on
//! the receiving side, and unresolvable references decode as nil rather than
//! failing the whole packet.

use crate::object::ObjectHandle;
use crate::variant::Variant;
use thiserror::Error;
use trellis_core::Vector3;

const TAG_NIL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_VECTOR3: u8 = 5;
const TAG_OBJECT: u8 = 6;
const TAG_ENUM: u8 = 7;

/// Decode and encode failures.
#[derive(Debug, Error)]
pub enum WireError {
    /// Input ended inside a value.
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),
    /// An unrecognized value tag.
    #[error("unknown wire tag {tag} at byte {offset}")]
    UnknownTag {
        /// The offending tag byte.
        tag: u8,
        /// Offset of the tag in the input.
        offset: usize,
    },
    /// A string payload was not valid UTF-8.
    #[error("invalid utf-8 in string at byte {0}")]
    InvalidUtf8(usize),
    /// The value kind has no wire representation.
    #[error("cannot encode a {0} value")]
    Unsupported(&'static str),
    /// Bytes remained after the declared value count.
    #[error("{0} trailing bytes after the last value")]
    TrailingBytes(usize),
}

/// A value in its wire shape. Numbers are f64 on the wire regardless of
/// their in-memory representation, and objects are reduced to their full
/// tree path.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Absent value.
    Nil,
    /// Boolean.
    Bool(bool),
    /// Any numeric value.
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence.
    Array(Vec<WireValue>),
    /// 3-component vector.
    Vector3(Vector3),
    /// An object, by full tree path.
    Object(String),
    /// An enumeration item, by enumeration and item name.
    Enum {
        /// Enumeration name, e.g. `SignalBehavior`.
        name: String,
        /// Item name within the enumeration.
        item: String,
    },
}

impl WireValue {
    /// Reduce a variant to its wire shape. Functions and dictionaries do
    /// not cross the wire.
    pub fn from_variant(value: &Variant) -> Result<WireValue, WireError> {
        Ok(match value {
            Variant::Null => WireValue::Nil,
            Variant::Bool(b) => WireValue::Bool(*b),
            Variant::Int(i) => WireValue::Number(*i as f64),
            Variant::Double(d) => WireValue::Number(*d),
            Variant::String(s) => WireValue::String(s.clone()),
            Variant::Array(items) => WireValue::Array(
                items
                    .iter()
                    .map(WireValue::from_variant)
                    .collect::<Result<_, _>>()?,
            ),
            Variant::Object(obj) => WireValue::Object(obj.instance().full_name()),
            Variant::EnumItem(e) => WireValue::Enum {
                name: e.enum_name().to_string(),
                item: e.name().to_string(),
            },
            other => return Err(WireError::Unsupported(other.type_name())),
        })
    }

    /// Rebuild a variant, resolving object paths through `resolver` and
    /// enum names through the process-wide catalog. Unresolved paths and
    /// unknown enum items become null; vectors surface as 3-element arrays
    /// since the variant union has no vector payload.
    pub fn into_variant(self, resolver: &dyn Fn(&str) -> Option<ObjectHandle>) -> Variant {
        match self {
            WireValue::Nil => Variant::Null,
            WireValue::Bool(b) => Variant::Bool(b),
            WireValue::Number(n) => Variant::Double(n),
            WireValue::String(s) => Variant::String(s),
            WireValue::Array(items) => Variant::Array(
                items
                    .into_iter()
                    .map(|v| v.into_variant(resolver))
                    .collect(),
            ),
            WireValue::Vector3(v) => Variant::Array(vec![
                Variant::Double(v.x),
                Variant::Double(v.y),
                Variant::Double(v.z),
            ]),
            WireValue::Object(path) => match resolver(&path) {
                Some(obj) => Variant::Object(obj),
                None => Variant::Null,
            },
            WireValue::Enum { name, item } => {
                match trellis_core::find_enum_item(&name, &item) {
                    Some(e) => Variant::EnumItem(e),
                    None => Variant::Null,
                }
            }
        }
    }
}

/// Encode a value sequence.
pub fn encode(values: &[WireValue]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        encode_value(&mut out, value);
    }
    out
}

fn encode_value(out: &mut Vec<u8>, value: &WireValue) {
    match value {
        WireValue::Nil => out.push(TAG_NIL),
        WireValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        WireValue::Number(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&n.to_le_bytes());
        }
        WireValue::String(s) => {
            out.push(TAG_STRING);
            encode_str(out, s);
        }
        WireValue::Array(items) => {
            out.push(TAG_ARRAY);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_value(out, item);
            }
        }
        WireValue::Vector3(v) => {
            out.push(TAG_VECTOR3);
            out.extend_from_slice(&v.x.to_le_bytes());
            out.extend_from_slice(&v.y.to_le_bytes());
            out.extend_from_slice(&v.z.to_le_bytes());
        }
        WireValue::Object(path) => {
            out.push(TAG_OBJECT);
            encode_str(out, path);
        }
        WireValue::Enum { name, item } => {
            out.push(TAG_ENUM);
            encode_str(out, name);
            encode_str(out, item);
        }
    }
}

fn encode_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Decode a full packet. Fails on trailing bytes.
pub fn decode(bytes: &[u8]) -> Result<Vec<WireValue>, WireError> {
    let mut reader = Reader { buf: bytes, pos: 0 };
    let count = reader.read_u32()? as usize;
    let mut out = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        out.push(decode_value(&mut reader)?);
    }
    if reader.pos != bytes.len() {
        return Err(WireError::TrailingBytes(bytes.len() - reader.pos));
    }
    Ok(out)
}

fn decode_value(reader: &mut Reader<'_>) -> Result<WireValue, WireError> {
    let offset = reader.pos;
    let tag = reader.read_u8()?;
    Ok(match tag {
        TAG_NIL => WireValue::Nil,
        TAG_BOOL => WireValue::Bool(reader.read_u8()? != 0),
        TAG_NUMBER => WireValue::Number(reader.read_f64()?),
        TAG_STRING => WireValue::String(reader.read_str()?),
        TAG_ARRAY => {
            let len = reader.read_u32()? as usize;
            let mut items = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                items.push(decode_value(reader)?);
            }
            WireValue::Array(items)
        }
        TAG_VECTOR3 => WireValue::Vector3(Vector3::new(
            reader.read_f64()?,
            reader.read_f64()?,
            reader.read_f64()?,
        )),
        TAG_OBJECT => WireValue::Object(reader.read_str()?),
        TAG_ENUM => WireValue::Enum {
            name: reader.read_str()?,
            item: reader.read_str()?,
        },
        tag => return Err(WireError::UnknownTag { tag, offset }),
    })
}

/// Encode call arguments straight from variants.
pub fn encode_variants(args: &[Variant]) -> Result<Vec<u8>, WireError> {
    let values = args
        .iter()
        .map(WireValue::from_variant)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(encode(&values))
}

/// Decode call arguments straight to variants, resolving object paths
/// through `resolver`.
pub fn decode_variants(
    bytes: &[u8],
    resolver: &dyn Fn(&str) -> Option<ObjectHandle>,
) -> Result<Vec<Variant>, WireError> {
    Ok(decode(bytes)?
        .into_iter()
        .map(|v| v.into_variant(resolver))
        .collect())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], WireError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(WireError::UnexpectedEof(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_f64(&mut self) -> Result<f64, WireError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(f64::from_le_bytes(bytes))
    }

    fn read_str(&mut self) -> Result<String, WireError> {
        let len = self.read_u32()? as usize;
        let start = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| WireError::InvalidUtf8(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_scalars() {
        let values = vec![
            WireValue::Nil,
            WireValue::Bool(true),
            WireValue::Number(-2.5),
            WireValue::String("hello".to_string()),
            WireValue::Vector3(Vector3::new(1.0, 2.0, 3.0)),
            WireValue::Object("Game.Workspace.Part".to_string()),
        ];
        let bytes = encode(&values);
        assert_eq!(decode(&bytes).unwrap(), values);
    }

    #[test]
    fn test_round_trip_nested_array() {
        let values = vec![WireValue::Array(vec![
            WireValue::Number(1.0),
            WireValue::Array(vec![WireValue::Bool(false)]),
        ])];
        let bytes = encode(&values);
        assert_eq!(decode(&bytes).unwrap(), values);
    }

    #[test]
    fn test_truncated_input() {
        let bytes = encode(&[WireValue::Number(7.0)]);
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(WireError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_unknown_tag() {
        let mut bytes = encode(&[WireValue::Nil]);
        bytes[4] = 0xff;
        assert!(matches!(
            decode(&bytes),
            Err(WireError::UnknownTag { tag: 0xff, .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&[WireValue::Bool(true)]);
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(WireError::TrailingBytes(1))));
    }

    #[test]
    fn test_variant_boundary() {
        let args = vec![
            Variant::Null,
            Variant::Int(42),
            Variant::from("name"),
            Variant::Array(vec![Variant::Double(0.5)]),
        ];
        let bytes = encode_variants(&args).unwrap();
        let back = decode_variants(&bytes, &|_| None).unwrap();
        assert_eq!(back[0], Variant::Null);
        assert_eq!(back[1], Variant::Double(42.0));
        assert_eq!(back[2], Variant::from("name"));
        assert_eq!(back[3], Variant::Array(vec![Variant::Double(0.5)]));
    }

    #[test]
    fn test_enum_item_travels_by_name() {
        let deferred = trellis_core::SIGNAL_BEHAVIOR.item("Deferred").unwrap();
        let bytes = encode_variants(&[Variant::EnumItem(deferred)]).unwrap();
        let back = decode_variants(&bytes, &|_| None).unwrap();
        assert_eq!(back, vec![Variant::EnumItem(deferred)]);
    }

    #[test]
    fn test_unknown_enum_decodes_to_nil() {
        let bytes = encode(&[WireValue::Enum {
            name: "SignalBehavior".to_string(),
            item: "Eventually".to_string(),
        }]);
        let back = decode_variants(&bytes, &|_| None).unwrap();
        assert_eq!(back, vec![Variant::Null]);
    }

    #[test]
    fn test_function_is_unsupported() {
        let func = crate::variant::ScriptFunction::new(|_, _| Ok(0));
        let err = encode_variants(&[Variant::Function(func)]).unwrap_err();
        assert!(matches!(err, WireError::Unsupported("function")));
    }
}
