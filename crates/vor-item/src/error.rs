use vor_schema::SchemaError;
use vor_types::{Cardinality, ItemId, ViewId};

/// Errors from item, value and reference operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ItemError {
    /// The attribute holds no value.
    #[error("item {item} has no value for {name}")]
    NoValue { item: ItemId, name: String },

    /// The item is not in this view's cache and could not be loaded.
    #[error("no such item: {0}")]
    NoSuchItem(ItemId),

    /// A literal is not recognized by the attribute's declared type.
    #[error("type mismatch on {item}.{name}: {detail}")]
    TypeMismatch {
        item: ItemId,
        name: String,
        detail: String,
    },

    /// The stored container shape does not match the declared cardinality.
    #[error("cardinality mismatch on {item}.{name}: declared {expected}, found {actual}")]
    CardinalityMismatch {
        item: ItemId,
        name: String,
        expected: Cardinality,
        actual: String,
    },

    /// A reference points at an item that does not exist.
    #[error("dangling reference {item}.{name} -> {target}")]
    DanglingRef {
        item: ItemId,
        name: String,
        target: ItemId,
    },

    /// A value used where a reference was expected, or the reverse.
    #[error("bad reference {item}.{name}: {reason}")]
    BadRef {
        item: ItemId,
        name: String,
        reason: String,
    },

    /// A reference across views outside of an import.
    #[error("item {item} belongs to view {actual}, not {expected}")]
    ViewMismatch {
        item: ItemId,
        expected: ViewId,
        actual: ViewId,
    },

    /// A reference list alias is already used by another entry.
    #[error("alias {alias} already names {existing}")]
    AliasTaken { alias: String, existing: ItemId },

    /// A replayed list operation contradicts a change already made here.
    #[error("list operation on {key} does not apply: {detail}")]
    ListReplay { key: ItemId, detail: String },

    /// The item source failed.
    #[error("failed to load item {item}: {reason}")]
    Load { item: ItemId, reason: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

pub type ItemResult<T> = Result<T, ItemError>;
