//! Typed value codec
//!
//! Pack/unpack between in-memory values and the length-prefixed byte form
//! used on the wire, in the data store, and in checkpoint records.
//!
//! Framing rules:
//!
//! - Primitives are little-endian fixed width (INTEGER/FLOAT/REF 8 bytes,
//!   FILE_REF 17). STRING and BLOB are the raw bytes; their length rides
//!   on the enclosing frame.
//! - CONTAINER and MULTISET are prefixed with their total serialized size
//!   in a varint padded to `vint::MAX_WIDTH`, so the prefix can be
//!   backfilled after the body is written without shifting data.
//! - A container slot that is reserved but not yet filled serializes as
//!   its key with a zero-length value; the reader restores the
//!   reservation from type context.
//!
//! Round-trip law: `unpack(t, pack(v)) == v` for every valid `(t, v)`.

use std::collections::BTreeMap;

use crate::error::{DataError, DataResult};
use crate::vint;

/// Tag for every storable type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DataType {
    Integer = 1,
    Float = 2,
    String = 3,
    Blob = 4,
    Ref = 5,
    FileRef = 6,
    Struct = 7,
    Container = 8,
    Multiset = 9,
}

impl DataType {
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(v: i32) -> DataResult<DataType> {
        use DataType::*;
        Ok(match v {
            1 => Integer,
            2 => Float,
            3 => String,
            4 => Blob,
            5 => Ref,
            6 => FileRef,
            7 => Struct,
            8 => Container,
            9 => Multiset,
            _ => return Err(DataError::Type),
        })
    }

    /// Containers and multisets grow after creation; everything else is
    /// written exactly once.
    #[inline]
    pub const fn is_compound(self) -> bool {
        matches!(self, DataType::Container | DataType::Multiset)
    }
}

/// Two-id file handle: the file datum and its status datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRef {
    pub file_id: i64,
    pub status_id: i64,
    pub mapped: bool,
}

/// One field of a struct value: its type tag and packed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub field_type: DataType,
    pub data: Vec<u8>,
}

/// Struct value: a type tag plus ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StructVal {
    pub tag: i32,
    pub fields: Vec<StructField>,
}

impl StructVal {
    /// Fields are addressed by decimal index when a struct datum is
    /// retrieved with a subscript.
    pub fn field(&self, idx: usize) -> DataResult<&StructField> {
        self.fields.get(idx).ok_or(DataError::SubscriptNotFound)
    }
}

/// Container value: key bytes mapped to an owned packed value of
/// `val_type`. `None` marks a slot reserved by `insert_atomic` but not
/// yet filled.
///
/// Keys are held in byte order, which makes `enumerate` slices
/// deterministic. The key type is carried but never used as a collation
/// rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerVal {
    pub key_type: DataType,
    pub val_type: DataType,
    pub entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl ContainerVal {
    pub fn new(key_type: DataType, val_type: DataType) -> Self {
        ContainerVal {
            key_type,
            val_type,
            entries: BTreeMap::new(),
        }
    }

    /// Number of keys, filled or reserved.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Multiset value: an insertion-ordered sequence of owned packed values.
#[derive(Debug, Clone, PartialEq)]
pub struct MultisetVal {
    pub elem_type: DataType,
    pub elems: Vec<Vec<u8>>,
}

impl MultisetVal {
    pub fn new(elem_type: DataType) -> Self {
        MultisetVal {
            elem_type,
            elems: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }
}

/// A storable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
    Blob(Vec<u8>),
    Ref(i64),
    FileRef(FileRef),
    Struct(StructVal),
    Container(ContainerVal),
    Multiset(MultisetVal),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::String(_) => DataType::String,
            Value::Blob(_) => DataType::Blob,
            Value::Ref(_) => DataType::Ref,
            Value::FileRef(_) => DataType::FileRef,
            Value::Struct(_) => DataType::Struct,
            Value::Container(_) => DataType::Container,
            Value::Multiset(_) => DataType::Multiset,
        }
    }

    /// Serialize to the wire/store byte form.
    pub fn pack(&self) -> Vec<u8> {
        match self {
            Value::Integer(v) => v.to_le_bytes().to_vec(),
            Value::Float(v) => v.to_le_bytes().to_vec(),
            Value::String(b) | Value::Blob(b) => b.clone(),
            Value::Ref(id) => id.to_le_bytes().to_vec(),
            Value::FileRef(fr) => {
                let mut out = Vec::with_capacity(17);
                out.extend_from_slice(&fr.file_id.to_le_bytes());
                out.extend_from_slice(&fr.status_id.to_le_bytes());
                out.push(fr.mapped as u8);
                out
            }
            Value::Struct(s) => {
                let mut out = Vec::new();
                vint::encode_i64(s.tag as i64, &mut out);
                vint::encode_u64(s.fields.len() as u64, &mut out);
                for f in &s.fields {
                    vint::encode_u64(f.field_type.as_i32() as u64, &mut out);
                    vint::encode_u64(f.data.len() as u64, &mut out);
                    out.extend_from_slice(&f.data);
                }
                out
            }
            Value::Container(c) => {
                let mut out = vec![0u8; vint::MAX_WIDTH];
                vint::encode_u64(c.key_type.as_i32() as u64, &mut out);
                vint::encode_u64(c.val_type.as_i32() as u64, &mut out);
                vint::encode_u64(c.entries.len() as u64, &mut out);
                for (key, val) in &c.entries {
                    vint::encode_u64(key.len() as u64, &mut out);
                    out.extend_from_slice(key);
                    match val {
                        Some(v) => {
                            vint::encode_u64(v.len() as u64, &mut out);
                            out.extend_from_slice(v);
                        }
                        None => {
                            vint::encode_u64(0, &mut out);
                        }
                    }
                }
                backfill_total(&mut out);
                out
            }
            Value::Multiset(m) => {
                let mut out = vec![0u8; vint::MAX_WIDTH];
                vint::encode_u64(m.elem_type.as_i32() as u64, &mut out);
                vint::encode_u64(m.elems.len() as u64, &mut out);
                for e in &m.elems {
                    vint::encode_u64(e.len() as u64, &mut out);
                    out.extend_from_slice(e);
                }
                backfill_total(&mut out);
                out
            }
        }
    }

    /// Deserialize from the wire/store byte form.
    pub fn unpack(t: DataType, buf: &[u8]) -> DataResult<Value> {
        match t {
            DataType::Integer => Ok(Value::Integer(i64::from_le_bytes(fixed8(buf)?))),
            DataType::Float => Ok(Value::Float(f64::from_le_bytes(fixed8(buf)?))),
            DataType::String => Ok(Value::String(buf.to_vec())),
            DataType::Blob => Ok(Value::Blob(buf.to_vec())),
            DataType::Ref => Ok(Value::Ref(i64::from_le_bytes(fixed8(buf)?))),
            DataType::FileRef => {
                if buf.len() != 17 {
                    return Err(DataError::Invalid);
                }
                Ok(Value::FileRef(FileRef {
                    file_id: i64::from_le_bytes(buf[0..8].try_into().unwrap()),
                    status_id: i64::from_le_bytes(buf[8..16].try_into().unwrap()),
                    mapped: buf[16] != 0,
                }))
            }
            DataType::Struct => {
                let mut cur = Cursor::new(buf);
                let tag = cur.vint_i64()? as i32;
                let nfields = cur.vint_u64()? as usize;
                let mut fields = Vec::with_capacity(nfields);
                for _ in 0..nfields {
                    let field_type = DataType::from_i32(cur.vint_u64()? as i32)?;
                    let len = cur.vint_u64()? as usize;
                    fields.push(StructField {
                        field_type,
                        data: cur.take(len)?.to_vec(),
                    });
                }
                cur.expect_end()?;
                Ok(Value::Struct(StructVal { tag, fields }))
            }
            DataType::Container => {
                let mut cur = Cursor::new(buf);
                cur.total_prefix()?;
                let key_type = DataType::from_i32(cur.vint_u64()? as i32)?;
                let val_type = DataType::from_i32(cur.vint_u64()? as i32)?;
                let nelems = cur.vint_u64()? as usize;
                let mut c = ContainerVal::new(key_type, val_type);
                for _ in 0..nelems {
                    let klen = cur.vint_u64()? as usize;
                    let key = cur.take(klen)?.to_vec();
                    let vlen = cur.vint_u64()? as usize;
                    let val = if vlen == 0 {
                        None
                    } else {
                        Some(cur.take(vlen)?.to_vec())
                    };
                    c.entries.insert(key, val);
                }
                cur.expect_end()?;
                Ok(Value::Container(c))
            }
            DataType::Multiset => {
                let mut cur = Cursor::new(buf);
                cur.total_prefix()?;
                let elem_type = DataType::from_i32(cur.vint_u64()? as i32)?;
                let nelems = cur.vint_u64()? as usize;
                let mut m = MultisetVal::new(elem_type);
                for _ in 0..nelems {
                    let len = cur.vint_u64()? as usize;
                    m.elems.push(cur.take(len)?.to_vec());
                }
                cur.expect_end()?;
                Ok(Value::Multiset(m))
            }
        }
    }

    /// Ids embedded in this value's storage. Destroying the owning datum
    /// releases one read reference on each of these.
    pub fn embedded_refs(&self) -> Vec<i64> {
        match self {
            Value::Ref(id) => vec![*id],
            Value::FileRef(fr) => vec![fr.file_id, fr.status_id],
            Value::Struct(s) => {
                let mut out = Vec::new();
                for f in &s.fields {
                    collect_packed_refs(f.field_type, &f.data, &mut out);
                }
                out
            }
            Value::Container(c) => {
                let mut out = Vec::new();
                for val in c.entries.values().flatten() {
                    collect_packed_refs(c.val_type, val, &mut out);
                }
                out
            }
            Value::Multiset(m) => {
                let mut out = Vec::new();
                for e in &m.elems {
                    collect_packed_refs(m.elem_type, e, &mut out);
                }
                out
            }
            _ => Vec::new(),
        }
    }
}

/// Ids embedded in a packed payload of a known type.
pub fn packed_refs(t: DataType, data: &[u8]) -> Vec<i64> {
    let mut out = Vec::new();
    collect_packed_refs(t, data, &mut out);
    out
}

fn collect_packed_refs(t: DataType, data: &[u8], out: &mut Vec<i64>) {
    match t {
        DataType::Ref => {
            if let Ok(b) = fixed8(data) {
                out.push(i64::from_le_bytes(b));
            }
        }
        DataType::FileRef => {
            if data.len() == 17 {
                out.push(i64::from_le_bytes(data[0..8].try_into().unwrap()));
                out.push(i64::from_le_bytes(data[8..16].try_into().unwrap()));
            }
        }
        _ => {}
    }
}

/// Parse a subscript as a decimal field index (struct addressing).
pub fn parse_subscript_index(sub: &[u8]) -> DataResult<usize> {
    let s = std::str::from_utf8(sub).map_err(|_| DataError::NumberFormat)?;
    s.trim_end_matches('\0')
        .parse::<usize>()
        .map_err(|_| DataError::NumberFormat)
}

/// Fill the reserved MAX_WIDTH prefix with the body size.
fn backfill_total(out: &mut [u8]) {
    let total = (out.len() - vint::MAX_WIDTH) as u64;
    // MAX_WIDTH always fits any u64
    vint::encode_u64_padded(total, &mut out[..vint::MAX_WIDTH]).unwrap();
}

fn fixed8(buf: &[u8]) -> DataResult<[u8; 8]> {
    buf.try_into().map_err(|_| DataError::Invalid)
}

/// Bounds-checked reader over a packed buffer.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn vint_u64(&mut self) -> DataResult<u64> {
        let (v, n) = vint::decode_u64(&self.buf[self.pos..]).ok_or(DataError::Invalid)?;
        self.pos += n;
        Ok(v)
    }

    fn vint_i64(&mut self) -> DataResult<i64> {
        let (v, n) = vint::decode_i64(&self.buf[self.pos..]).ok_or(DataError::Invalid)?;
        self.pos += n;
        Ok(v)
    }

    fn take(&mut self, len: usize) -> DataResult<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(DataError::Invalid);
        }
        let s = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    /// Read the padded total-size prefix and check it against the
    /// remaining bytes.
    fn total_prefix(&mut self) -> DataResult<()> {
        let total = self.vint_u64()? as usize;
        if self.buf.len() - self.pos != total {
            return Err(DataError::Invalid);
        }
        Ok(())
    }

    fn expect_end(&self) -> DataResult<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(DataError::Invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) {
        let t = v.data_type();
        let packed = v.pack();
        assert_eq!(Value::unpack(t, &packed).unwrap(), v);
    }

    #[test]
    fn test_primitives_round_trip() {
        round_trip(Value::Integer(42));
        round_trip(Value::Integer(-42));
        round_trip(Value::Integer(i64::MIN));
        round_trip(Value::Float(3.5));
        round_trip(Value::String(b"hello".to_vec()));
        round_trip(Value::String(Vec::new()));
        round_trip(Value::Blob(vec![0, 1, 255]));
        round_trip(Value::Ref(-7));
        round_trip(Value::FileRef(FileRef {
            file_id: 10,
            status_id: 11,
            mapped: true,
        }));
    }

    #[test]
    fn test_integer_is_eight_le_bytes() {
        let packed = Value::Integer(1).pack();
        assert_eq!(packed, vec![1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_struct_round_trip() {
        let s = Value::Struct(StructVal {
            tag: 3,
            fields: vec![
                StructField {
                    field_type: DataType::Integer,
                    data: Value::Integer(5).pack(),
                },
                StructField {
                    field_type: DataType::Ref,
                    data: Value::Ref(101).pack(),
                },
            ],
        });
        round_trip(s);
    }

    #[test]
    fn test_container_round_trip_with_reservation() {
        let mut c = ContainerVal::new(DataType::String, DataType::Integer);
        c.entries.insert(b"k1".to_vec(), Some(Value::Integer(1).pack()));
        c.entries.insert(b"k2".to_vec(), None); // reserved
        round_trip(Value::Container(c));
    }

    #[test]
    fn test_container_prefix_is_padded() {
        let c = ContainerVal::new(DataType::Integer, DataType::Integer);
        let packed = Value::Container(c).pack();
        let (total, used) = vint::decode_u64(&packed).unwrap();
        assert_eq!(used, vint::MAX_WIDTH);
        assert_eq!(total as usize, packed.len() - vint::MAX_WIDTH);
    }

    #[test]
    fn test_multiset_round_trip() {
        let mut m = MultisetVal::new(DataType::String);
        m.elems.push(b"a".to_vec());
        m.elems.push(b"bb".to_vec());
        round_trip(Value::Multiset(m));
    }

    #[test]
    fn test_embedded_refs() {
        assert_eq!(Value::Ref(9).embedded_refs(), vec![9]);
        assert_eq!(
            Value::FileRef(FileRef {
                file_id: 1,
                status_id: 2,
                mapped: false
            })
            .embedded_refs(),
            vec![1, 2]
        );
        let mut c = ContainerVal::new(DataType::String, DataType::Ref);
        c.entries.insert(b"x".to_vec(), Some(Value::Ref(101).pack()));
        c.entries.insert(b"y".to_vec(), None);
        assert_eq!(Value::Container(c).embedded_refs(), vec![101]);
        assert!(Value::Integer(3).embedded_refs().is_empty());
    }

    #[test]
    fn test_subscript_index() {
        assert_eq!(parse_subscript_index(b"3").unwrap(), 3);
        assert_eq!(parse_subscript_index(b"3\0").unwrap(), 3);
        assert_eq!(parse_subscript_index(b"x"), Err(DataError::NumberFormat));
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(Value::unpack(DataType::Integer, b"abc").is_err());
        assert!(Value::unpack(DataType::Container, b"").is_err());
        let mut c = ContainerVal::new(DataType::String, DataType::Integer);
        c.entries.insert(b"k".to_vec(), Some(Value::Integer(7).pack()));
        let mut packed = Value::Container(c).pack();
        packed.truncate(packed.len() - 1);
        assert!(Value::unpack(DataType::Container, &packed).is_err());
    }
}
