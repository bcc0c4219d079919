use crate::id::{ItemId, KindId};
use crate::value::AttrValue;
use crate::Version;

/// One attribute that two views changed to different values since they
/// diverged. Handed to merge callbacks and item merge hooks.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeConflict {
    pub item: ItemId,
    pub kind: Option<KindId>,
    pub name: String,
    /// The version both sides started from.
    pub base_version: Version,
    /// The version carrying the other side's change.
    pub remote_version: Version,
    pub local: AttrValue,
    pub remote: AttrValue,
}

/// What a merge callback decided.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Store exactly this value.
    Value(AttrValue),
    /// Defer to the item's own merge hook.
    Default,
}
