use serde::{Deserialize, Serialize};
use vor_types::{AttrId, ItemId, ItemStatus, KindId, ValueFlags, ValueId, Version};

/// One persisted value: the codec's bytes plus the attribute they belong to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    /// `None` for values of items without a kind (bootstrap items).
    pub attr: Option<AttrId>,
    pub flags: ValueFlags,
    pub data: Vec<u8>,
}

/// The state of one item at one version.
///
/// `values` lists every persisted attribute, literal and reference alike, in
/// the order they were written. An attribute that did not change keeps the
/// value id of the previous version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item: ItemId,
    pub version: Version,
    pub kind: Option<KindId>,
    pub status: ItemStatus,
    pub parent: Option<ItemId>,
    pub name: Option<String>,
    /// Name of the composite item class the item was created with.
    pub class: Option<String>,
    pub values: Vec<(String, ValueId)>,
    /// Names whose value records were written in this version.
    pub dirties: Vec<String>,
}

impl ItemRecord {
    /// The value id stored for `name`, if any.
    pub fn value_id(&self, name: &str) -> Option<ValueId> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn is_deleted(&self) -> bool {
        self.status.contains(ItemStatus::DELETED)
    }
}

/// One element of a reference list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefListEntry {
    pub key: ItemId,
    pub alias: Option<String>,
}

/// A reference list as of one version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefListRecord {
    pub entries: Vec<RefListEntry>,
}

/// Where an indexed term was seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextPosting {
    pub item: ItemId,
    pub attr: Option<AttrId>,
    pub version: Version,
}
