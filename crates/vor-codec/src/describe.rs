//! Human-readable dumps of value records.

use std::fmt::Write;

use vor_store::ValueRecord;

use crate::buffer::ByteReader;
use crate::format::{flag_names, is_named};

const ROW: usize = 16;

/// Flag names, attribute and a hex dump of `record`.
pub fn describe_record(record: &ValueRecord, with_schema: bool) -> String {
    let mut out = String::new();
    let named = is_named(record, with_schema);
    match &record.attr {
        Some(attr) => {
            let _ = writeln!(out, "attr:   {attr}");
        }
        None => out.push_str("attr:   -\n"),
    }
    let mut r = ByteReader::new(&record.data);
    if named {
        match r.symbol() {
            Ok(name) => {
                let _ = writeln!(out, "name:   {name}");
            }
            Err(e) => {
                let _ = writeln!(out, "name:   <{e}>");
            }
        }
    }
    match r.u8() {
        Ok(flags) => {
            let _ = writeln!(out, "flags:  {} ({flags:#04x})", flag_names(flags));
        }
        Err(e) => {
            let _ = writeln!(out, "flags:  <{e}>");
        }
    }
    let _ = writeln!(out, "vflags: {:#04x}", record.flags.bits());
    let _ = writeln!(out, "size:   {} bytes", record.data.len());
    for (row, chunk) in record.data.chunks(ROW).enumerate() {
        let _ = writeln!(out, "{:06x}  {}", row * ROW, hex::encode(chunk));
    }
    out
}
