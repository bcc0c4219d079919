use std::fmt;

use vor_codec::CodecError;
use vor_item::ItemError;
use vor_schema::SchemaError;
use vor_store::StoreError;
use vor_types::ItemId;

/// Why a merge was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MergeReason {
    /// The change set does not fit the item it is applied to.
    Bug,
    /// Both sides renamed the item.
    Rename,
    /// Both sides moved the item.
    Move,
    /// The merged name is taken by a sibling.
    Name,
    /// Both sides changed a literal and nothing resolved it.
    Value,
    /// Both sides changed a reference in incompatible ways.
    Ref,
    /// Both sides changed the kind.
    Kind,
    /// One side deleted the item, the other changed it.
    Change,
}

impl MergeReason {
    /// Stable numeric code.
    pub fn code(self) -> u8 {
        match self {
            Self::Bug => 0,
            Self::Rename => 1,
            Self::Move => 2,
            Self::Name => 3,
            Self::Value => 4,
            Self::Ref => 5,
            Self::Kind => 6,
            Self::Change => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bug => "BUG",
            Self::Rename => "RENAME",
            Self::Move => "MOVE",
            Self::Name => "NAME",
            Self::Value => "VALUE",
            Self::Ref => "REF",
            Self::Kind => "KIND",
            Self::Change => "CHANGE",
        }
    }
}

impl fmt::Display for MergeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from collecting and applying changes.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// The two sides cannot be reconciled automatically.
    #[error("merge conflict {reason} on {item}.{name}: {detail}")]
    Conflict {
        reason: MergeReason,
        item: ItemId,
        name: String,
        detail: String,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl MergeError {
    pub fn conflict(
        reason: MergeReason,
        item: ItemId,
        name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            reason,
            item,
            name: name.into(),
            detail: detail.into(),
        }
    }

    /// The conflict reason, if this is a conflict.
    pub fn reason(&self) -> Option<MergeReason> {
        match self {
            Self::Conflict { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

pub type MergeResult<T> = Result<T, MergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_print_their_code_name() {
        assert_eq!(MergeReason::Value.to_string(), "VALUE");
        assert_eq!(MergeReason::Change.code(), 7);
        let err = MergeError::conflict(MergeReason::Ref, ItemId::from_u128(1), "friend", "both changed");
        assert!(err.to_string().contains("REF"));
        assert!(err.to_string().contains(".friend"));
        assert_eq!(err.reason(), Some(MergeReason::Ref));
    }
}
