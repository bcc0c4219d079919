//! Big-endian primitive encoding over flat byte buffers.

use crate::error::{CodecError, CodecResult};

/// A string field: the sign of its length prefix tells unicode from bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StringField {
    Unicode(String),
    Bytes(Vec<u8>),
}

/// Append-only encoder.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn int(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn long(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn float(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn uuid(&mut self, bytes: &[u8; 16]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 0 = false, 1 = true, 2 = none.
    pub fn boolean(&mut self, v: Option<bool>) {
        self.buf.push(match v {
            Some(false) => 0,
            Some(true) => 1,
            None => 2,
        });
    }

    /// `n` as a u16 count field.
    pub fn count_u16(&mut self, n: usize, field: &'static str) -> CodecResult<()> {
        let v = u16::try_from(n).map_err(|_| too_long(field, n, usize::from(u16::MAX)))?;
        self.u16(v);
        Ok(())
    }

    /// `n` as a u32 count field.
    pub fn count_u32(&mut self, n: usize, field: &'static str) -> CodecResult<()> {
        let v = u32::try_from(n).map_err(|_| too_long(field, n, u32::MAX as usize))?;
        self.u32(v);
        Ok(())
    }

    /// Length `len + 1`, then UTF-8 bytes.
    pub fn string(&mut self, s: &str) -> CodecResult<()> {
        let n = string_length(s.len(), "string")?;
        self.int(n);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    /// Length `-(len + 1)`, then the raw bytes.
    pub fn bytes(&mut self, b: &[u8]) -> CodecResult<()> {
        let n = string_length(b.len(), "byte string")?;
        self.int(-n);
        self.buf.extend_from_slice(b);
        Ok(())
    }

    /// u16 length, then the bytes. Used for attribute names.
    pub fn symbol(&mut self, s: &str) -> CodecResult<()> {
        self.count_u16(s.len(), "symbol")?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// Longest string whose `len + 1` prefix still fits an i32.
pub const MAX_STRING_LEN: usize = i32::MAX as usize - 1;

fn string_length(len: usize, field: &'static str) -> CodecResult<i32> {
    i32::try_from(len)
        .ok()
        .and_then(|n| n.checked_add(1))
        .ok_or_else(|| too_long(field, len, MAX_STRING_LEN))
}

fn too_long(field: &'static str, len: usize, max: usize) -> CodecError {
    CodecError::TooLong { field, len, max }
}

/// Cursor over an encoded record.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0)
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                len: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn peek(&self) -> CodecResult<u8> {
        self.data.get(self.pos).copied().ok_or(CodecError::Truncated {
            offset: self.pos,
            needed: 1,
            len: self.data.len(),
        })
    }

    pub fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn int(&mut self) -> CodecResult<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn long(&mut self) -> CodecResult<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    pub fn float(&mut self) -> CodecResult<f64> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    pub fn uuid(&mut self) -> CodecResult<[u8; 16]> {
        self.array()
    }

    /// Any byte other than 0 or 1 reads as none.
    pub fn boolean(&mut self) -> CodecResult<Option<bool>> {
        Ok(match self.u8()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        })
    }

    pub fn string(&mut self) -> CodecResult<StringField> {
        let len = self.int()?;
        if len >= 0 {
            let n = (len as usize).saturating_sub(1);
            let offset = self.pos;
            let raw = self.take(n)?;
            let s = String::from_utf8(raw.to_vec())
                .map_err(|_| CodecError::InvalidUtf8 { offset })?;
            Ok(StringField::Unicode(s))
        } else {
            let n = (-(len as i64) as usize).saturating_sub(1);
            Ok(StringField::Bytes(self.take(n)?.to_vec()))
        }
    }

    pub fn symbol(&mut self) -> CodecResult<String> {
        let len = self.u16()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// The u16 ending `from_end` bytes before the end of the data.
    pub fn u16_at_end(&self, from_end: usize) -> CodecResult<u16> {
        let start = self.data.len().checked_sub(from_end).ok_or(CodecError::Truncated {
            offset: 0,
            needed: from_end,
            len: self.data.len(),
        })?;
        let mut at = ByteReader::at(self.data, start);
        at.u16()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // -----------------------------------------------------------------------
    // Fixed layouts
    // -----------------------------------------------------------------------

    #[test]
    fn numbers_are_big_endian() {
        let mut w = ByteWriter::new();
        w.int(1);
        w.long(-2);
        w.float(1.5);
        let data = w.into_inner();
        assert_eq!(&data[..4], &[0, 0, 0, 1]);
        assert_eq!(&data[4..12], &(-2i64).to_be_bytes());
        let mut r = ByteReader::new(&data);
        assert_eq!(r.int().unwrap(), 1);
        assert_eq!(r.long().unwrap(), -2);
        assert_eq!(r.float().unwrap(), 1.5);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn string_length_sign_encodes_kind() {
        let mut w = ByteWriter::new();
        w.string("hé").unwrap();
        w.bytes(b"ab").unwrap();
        let data = w.into_inner();
        // "hé" is 3 UTF-8 bytes: length 3 + 1.
        assert_eq!(&data[..4], &4i32.to_be_bytes());
        assert_eq!(&data[7..11], &(-3i32).to_be_bytes());
        let mut r = ByteReader::new(&data);
        assert_eq!(r.string().unwrap(), StringField::Unicode("hé".into()));
        assert_eq!(r.string().unwrap(), StringField::Bytes(b"ab".to_vec()));
    }

    #[test]
    fn booleans_are_tri_state() {
        let mut w = ByteWriter::new();
        w.boolean(Some(false));
        w.boolean(Some(true));
        w.boolean(None);
        let data = w.into_inner();
        assert_eq!(data, vec![0, 1, 2]);
        let mut r = ByteReader::new(&data);
        assert_eq!(r.boolean().unwrap(), Some(false));
        assert_eq!(r.boolean().unwrap(), Some(true));
        assert_eq!(r.boolean().unwrap(), None);
    }

    #[test]
    fn oversized_fields_are_refused_before_writing() {
        let mut w = ByteWriter::new();
        let name = "n".repeat(usize::from(u16::MAX) + 2);
        assert!(matches!(
            w.symbol(&name),
            Err(CodecError::TooLong { field: "symbol", len: 65_537, max: 65_535 })
        ));
        assert!(matches!(
            w.count_u16(70_000, "lob count"),
            Err(CodecError::TooLong { field: "lob count", .. })
        ));
        assert!(w.is_empty());

        w.symbol(&name[..usize::from(u16::MAX)]).unwrap();
        let data = w.into_inner();
        assert_eq!(ByteReader::new(&data).symbol().unwrap().len(), 65_535);
    }

    #[test]
    fn reading_past_the_end_is_truncated() {
        let mut r = ByteReader::new(&[0, 1]);
        assert!(matches!(
            r.u32(),
            Err(CodecError::Truncated { offset: 0, needed: 4, len: 2 })
        ));
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    proptest! {
        #[test]
        fn unicode_strings_survive(s in ".*") {
            let mut w = ByteWriter::new();
            w.string(&s).unwrap();
            let data = w.into_inner();
            let mut r = ByteReader::new(&data);
            prop_assert_eq!(r.string().unwrap(), StringField::Unicode(s));
            prop_assert_eq!(r.remaining(), 0);
        }

        #[test]
        fn byte_strings_survive(b in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut w = ByteWriter::new();
            w.bytes(&b).unwrap();
            let data = w.into_inner();
            let mut r = ByteReader::new(&data);
            prop_assert_eq!(r.string().unwrap(), StringField::Bytes(b));
        }
    }
}
