use vor_types::{AttrValue, Value};

use crate::hasher::{combine, ContentHasher};

/// Hash one literal. Floats hash by bit pattern; lobs by identity.
pub fn hash_value(value: &Value) -> u64 {
    let mut buf = Vec::with_capacity(17);
    match value {
        Value::None => buf.push(0),
        Value::Bool(b) => {
            buf.push(1);
            buf.push(u8::from(*b));
        }
        Value::Int(v) => {
            buf.push(2);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Value::Long(v) => {
            buf.push(3);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Value::Float(v) => {
            buf.push(4);
            buf.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        Value::Str(s) => {
            buf.push(5);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            buf.push(6);
            buf.extend_from_slice(b);
        }
        Value::Uuid(u) => {
            buf.push(7);
            buf.extend_from_slice(u.as_bytes());
        }
        Value::Lob(lob) => {
            buf.push(8);
            buf.extend_from_slice(lob.id.as_bytes());
            buf.push(u8::from(lob.indexed));
        }
        Value::SingleRef(id) => {
            buf.push(9);
            buf.extend_from_slice(id.as_bytes());
        }
    }
    ContentHasher::VALUE.hash(&buf)
}

/// Hash an attribute's content.
///
/// Lists hash in order; sets hash their sorted element hashes so that
/// membership, not insertion order, decides the result; dicts hash in key
/// order.
pub fn hash_attr_value(value: &AttrValue) -> u64 {
    match value {
        AttrValue::Nil => 0,
        AttrValue::Single(v) => hash_value(v),
        AttrValue::List(vs) => vs
            .iter()
            .fold(ContentHasher::VALUE.hash(b"list"), |h, v| {
                combine(h, hash_value(v))
            }),
        AttrValue::Set(set) => {
            let mut hashes: Vec<u64> = set.iter().map(hash_value).collect();
            hashes.sort_unstable();
            hashes
                .into_iter()
                .fold(ContentHasher::VALUE.hash(b"set"), combine)
        }
        AttrValue::Dict(map) => map
            .iter()
            .fold(ContentHasher::VALUE.hash(b"dict"), |h, (k, v)| {
                combine(combine(h, ContentHasher::NAME.hash_str(k)), hash_value(v))
            }),
    }
}
