//! Record layout constants and trailer access.
//!
//! A value record's data is laid out as
//!
//! ```text
//! [symbol: attribute name]          only in named records
//! [flag byte][type uuid]?           TYPED adds the 16-byte type id
//! [payload]
//! [trailer]
//! ```
//!
//! Literal trailers are `[lob uuid + indexed byte]* [index uuid]*
//! [u16 lob count][u16 index count]`. List and set reference trailers are
//! `[index block] [index uuid]* [u16 index count]`.

use vor_store::ValueRecord;
use vor_types::{IndexId, LobId, RefListId};

use crate::buffer::ByteReader;
use crate::error::{CodecError, CodecResult};

pub const TYPED: u8 = 0x01;
pub const VALUE: u8 = 0x02;
pub const REF: u8 = 0x04;
pub const SET: u8 = 0x08;
pub const SINGLE: u8 = 0x10;
pub const LIST: u8 = 0x20;
pub const DICT: u8 = 0x40;
pub const NONE: u8 = 0x80;

const CARDINALITY: u8 = SET | SINGLE | LIST | DICT | NONE;

const LOB_ENTRY: usize = 17;
const INDEX_ENTRY: usize = 16;

/// `|`-joined flag names, e.g. `VALUE|SINGLE|TYPED`.
pub fn flag_names(flags: u8) -> String {
    const NAMES: [(u8, &str); 8] = [
        (VALUE, "VALUE"),
        (REF, "REF"),
        (NONE, "NONE"),
        (SINGLE, "SINGLE"),
        (LIST, "LIST"),
        (SET, "SET"),
        (DICT, "DICT"),
        (TYPED, "TYPED"),
    ];
    let names: Vec<&str> = NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        format!("{flags:#04x}")
    } else {
        names.join("|")
    }
}

/// Exactly one cardinality bit must be set.
pub fn check_cardinality(flags: u8, name: &str) -> CodecResult<u8> {
    let card = flags & CARDINALITY;
    if card.count_ones() != 1 {
        return Err(CodecError::InvalidCardinality {
            name: name.to_string(),
            flags,
        });
    }
    Ok(card)
}

/// Whether a record starts with its attribute name: always in
/// self-describing items, and whenever no attribute id identifies it.
pub fn is_named(record: &ValueRecord, with_schema: bool) -> bool {
    with_schema || record.attr.is_none()
}

/// Skip the leading attribute-name symbol of a named record and return the
/// record flag byte with its offset.
pub fn record_flags(data: &[u8], named: bool) -> CodecResult<(usize, u8)> {
    let mut reader = ByteReader::new(data);
    if named {
        reader.symbol()?;
    }
    let offset = reader.position();
    Ok((offset, reader.u8()?))
}

/// Lobs and index ids listed in a literal record's trailer.
pub fn value_trailer(data: &[u8]) -> CodecResult<(Vec<(LobId, bool)>, Vec<IndexId>)> {
    let reader = ByteReader::new(data);
    let lob_count = reader.u16_at_end(4)? as usize;
    let index_count = reader.u16_at_end(2)? as usize;
    let start = data
        .len()
        .checked_sub(lob_count * LOB_ENTRY + index_count * INDEX_ENTRY + 4)
        .ok_or(CodecError::Truncated {
            offset: 0,
            needed: lob_count * LOB_ENTRY + index_count * INDEX_ENTRY + 4,
            len: data.len(),
        })?;
    let mut reader = ByteReader::at(data, start);
    let mut lobs = Vec::with_capacity(lob_count);
    for _ in 0..lob_count {
        let id = LobId::from_bytes(reader.uuid()?);
        let indexed = reader.boolean()? == Some(true);
        lobs.push((id, indexed));
    }
    let mut indexes = Vec::with_capacity(index_count);
    for _ in 0..index_count {
        indexes.push(IndexId::from_bytes(reader.uuid()?));
    }
    Ok((lobs, indexes))
}

/// Index ids listed in a list or set reference record's trailer.
pub fn ref_trailer(data: &[u8]) -> CodecResult<Vec<IndexId>> {
    let reader = ByteReader::new(data);
    let count = reader.u16_at_end(2)? as usize;
    let start = data
        .len()
        .checked_sub(count * INDEX_ENTRY + 2)
        .ok_or(CodecError::Truncated {
            offset: 0,
            needed: count * INDEX_ENTRY + 2,
            len: data.len(),
        })?;
    let mut reader = ByteReader::at(data, start);
    (0..count)
        .map(|_| Ok(IndexId::from_bytes(reader.uuid()?)))
        .collect()
}

/// The list ids a reference record points at: one for a list, one per key
/// for a dict, none otherwise.
pub fn ref_lists(data: &[u8], named: bool) -> CodecResult<Vec<RefListId>> {
    let (offset, flags) = record_flags(data, named)?;
    let mut reader = ByteReader::at(data, offset + 1);
    if flags & REF == 0 {
        return Ok(Vec::new());
    }
    if flags & LIST != 0 {
        return Ok(vec![RefListId::from_bytes(reader.uuid()?)]);
    }
    if flags & DICT != 0 {
        let count = reader.u32()?;
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            reader.string()?;
            ids.push(RefListId::from_bytes(reader.uuid()?));
        }
        return Ok(ids);
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteWriter;

    #[test]
    fn flag_names_are_readable() {
        assert_eq!(flag_names(VALUE | SINGLE | TYPED), "VALUE|SINGLE|TYPED");
        assert_eq!(flag_names(REF | NONE), "REF|NONE");
        assert_eq!(flag_names(0), "0x00");
    }

    #[test]
    fn cardinality_must_be_unique() {
        assert_eq!(check_cardinality(VALUE | LIST, "x").unwrap(), LIST);
        assert!(matches!(
            check_cardinality(VALUE | LIST | SET, "x"),
            Err(CodecError::InvalidCardinality { .. })
        ));
        assert!(check_cardinality(VALUE, "x").is_err());
    }

    #[test]
    fn value_trailer_reads_from_the_end() {
        let lob = LobId::new();
        let index = IndexId::new();
        let mut w = ByteWriter::new();
        w.u8(VALUE | SINGLE);
        w.uuid(lob.as_bytes());
        w.boolean(Some(true));
        // trailer
        w.uuid(lob.as_bytes());
        w.boolean(Some(true));
        w.uuid(index.as_bytes());
        w.u16(1);
        w.u16(1);
        let data = w.into_inner();
        let (lobs, indexes) = value_trailer(&data).unwrap();
        assert_eq!(lobs, vec![(lob, true)]);
        assert_eq!(indexes, vec![index]);
    }

    #[test]
    fn short_trailer_is_truncated() {
        assert!(matches!(
            value_trailer(&[0, 9, 0, 0]),
            Err(CodecError::Truncated { .. })
        ));
        assert!(ref_trailer(&[1]).is_err());
    }
}
