use vor_item::ItemError;
use vor_schema::SchemaError;
use vor_store::StoreError;
use vor_types::ItemId;

/// Errors from encoding and decoding value records.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// An item record could not be turned back into an item.
    #[error("failed to load item {item}: {reason}")]
    Load { item: ItemId, reason: String },

    /// One value record of an item could not be decoded.
    #[error("failed to load {item}.{name}: {reason}")]
    LoadValue {
        item: ItemId,
        name: String,
        reason: String,
    },

    /// The flag byte names no cardinality, or more than one.
    #[error("invalid cardinality flags {flags:#04x} in {name}")]
    InvalidCardinality { name: String, flags: u8 },

    /// The record ended before a field could be read.
    #[error("record truncated: needed {needed} bytes at offset {offset}, {len} available")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    /// A length or count does not fit its field.
    #[error("{field} of {len} exceeds the encodable maximum {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("invalid UTF-8 in string field at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// `Nil` means "no value" and is never written.
    #[error("attempt to persist Nil for {name}")]
    PersistNil { name: String },

    /// The backend refused a value record.
    #[error("failed to save {item}.{name}")]
    SaveValue {
        item: ItemId,
        name: String,
        #[source]
        source: StoreError,
    },

    /// An attribute marked unchanged has no value id in the previous record.
    #[error("unchanged value for {item}.{name} not found in previous record")]
    MissingUnchangedValue { item: ItemId, name: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Item(#[from] ItemError),
}

pub type CodecResult<T> = Result<T, CodecError>;
