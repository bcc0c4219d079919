//! Binary value-record codec for the versioned object repository.
//!
//! Every persisted attribute is one immutable value record: a flag byte, an
//! optional attribute name and type id, the payload and a trailer listing
//! the lobs and list indexes the record points at. The codec is the only
//! reader and writer of this format.
//!
//! # Key Types
//!
//! - [`ItemWriter`] -- writes the dirty attributes of an item as a new version
//! - [`ValueReader`] -- decodes one value record
//! - [`ItemReader`] -- rebuilds an item from its item record
//! - [`AfterLoadHook`] -- kind and parent lookups deferred to the end of a load
//! - [`ItemPurger`] -- removes records no kept version can reach
//!
//! # Format
//!
//! | flag | bit |
//! |------|-----|
//! | `TYPED` | `0x01` |
//! | `VALUE` | `0x02` |
//! | `REF` | `0x04` |
//! | `SET` | `0x08` |
//! | `SINGLE` | `0x10` |
//! | `LIST` | `0x20` |
//! | `DICT` | `0x40` |
//! | `NONE` | `0x80` |
//!
//! Numbers are fixed-width big-endian. Strings carry an `i32` length whose
//! sign tells unicode (positive) from bytes (negative).

pub mod buffer;
pub mod describe;
pub mod error;
pub mod format;
pub mod purger;
pub mod reader;
pub mod writer;

#[cfg(test)]
mod fixture;

pub use describe::describe_record;
pub use error::{CodecError, CodecResult};
pub use purger::{ItemPurger, PurgeStats};
pub use reader::{
    run_after_load_hooks, AfterLoadHook, Decoded, DecodedValue, ItemReader, RefPayload, ValueReader,
};
pub use writer::{ItemWriter, WriteOptions, WriteStats};
