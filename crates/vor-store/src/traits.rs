use vor_types::{AttrId, IndexId, ItemId, LobId, RefListId, ValueId, Version};

use crate::error::StoreResult;
use crate::record::{ItemRecord, RefListRecord, TextPosting, ValueRecord};

/// Value records keyed by value id.
pub trait ValueStore: Send + Sync {
    /// Read a value record. Returns `Ok(None)` if it does not exist.
    fn load_value(&self, id: &ValueId) -> StoreResult<Option<ValueRecord>>;

    /// Write a value record and return the number of bytes stored.
    fn save_value(&self, id: ValueId, record: ValueRecord) -> StoreResult<usize>;

    /// Remove a value record. Returns `true` if it existed.
    fn purge_value(&self, id: &ValueId) -> StoreResult<bool>;
}

/// Item records keyed by (item, version).
pub trait ItemStore: Send + Sync {
    fn save_item(&self, record: ItemRecord) -> StoreResult<()>;

    /// The latest record of `id` at or below `version`.
    fn load_item(&self, id: &ItemId, version: Version) -> StoreResult<Option<ItemRecord>>;

    /// Every version at which `id` has a record, ascending.
    fn item_versions(&self, id: &ItemId) -> StoreResult<Vec<Version>>;

    /// Remove the record of `id` written at exactly `version`.
    fn purge_item(&self, id: &ItemId, version: Version) -> StoreResult<Option<ItemRecord>>;

    /// The live child of `parent` called `name` as of `version`.
    fn find_child(&self, parent: &ItemId, name: &str, version: Version)
        -> StoreResult<Option<ItemId>>;

    /// Items with a record written in `(after, upto]`, with their latest
    /// version in that range.
    fn changed_items(&self, after: Version, upto: Version) -> StoreResult<Vec<(ItemId, Version)>>;

    /// Every item with at least one record.
    fn all_items(&self) -> StoreResult<Vec<ItemId>>;
}

/// Reference list snapshots keyed by (list, version).
pub trait RefStore: Send + Sync {
    fn save_ref_list(&self, id: RefListId, version: Version, record: RefListRecord)
        -> StoreResult<()>;

    /// The latest snapshot of `id` at or below `version`.
    fn load_ref_list(&self, id: &RefListId, version: Version) -> StoreResult<Option<RefListRecord>>;

    /// Remove every snapshot older than the one visible at `keep`.
    /// Returns the number removed.
    fn purge_ref_list(&self, id: &RefListId, keep: Version) -> StoreResult<usize>;

    /// Remove every snapshot of `id`. Returns the number removed.
    fn drop_ref_list(&self, id: &RefListId) -> StoreResult<usize>;
}

/// Opaque large objects.
pub trait LobStore: Send + Sync {
    fn save_lob(&self, id: LobId, data: &[u8]) -> StoreResult<()>;

    fn load_lob(&self, id: &LobId) -> StoreResult<Option<Vec<u8>>>;

    fn purge_lob(&self, id: &LobId) -> StoreResult<bool>;
}

/// Reference list index snapshots keyed by (index, version).
pub trait IndexStore: Send + Sync {
    fn save_index(&self, id: IndexId, version: Version, data: Vec<u8>) -> StoreResult<()>;

    /// The latest snapshot of `id` at or below `version`.
    fn load_index(&self, id: &IndexId, version: Version) -> StoreResult<Option<Vec<u8>>>;

    /// Remove every snapshot older than the one visible at `keep`.
    fn purge_index(&self, id: &IndexId, keep: Version) -> StoreResult<usize>;

    /// Remove every snapshot of `id`. Returns the number removed.
    fn drop_index(&self, id: &IndexId) -> StoreResult<usize>;
}

/// Full-text sink. Receives the text of indexed attributes as they are
/// written; never consulted by the codec on read.
pub trait TextIndex: Send + Sync {
    fn index_value(
        &self,
        item: ItemId,
        attr: Option<AttrId>,
        version: Version,
        text: &str,
    ) -> StoreResult<()>;

    /// Index text read from a stream (the bytes of a lob).
    fn index_reader(
        &self,
        item: ItemId,
        attr: Option<AttrId>,
        version: Version,
        reader: &mut dyn std::io::Read,
    ) -> StoreResult<()> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        self.index_value(item, attr, version, &String::from_utf8_lossy(&buf))
    }

    /// Postings for `term` at or below `version`.
    fn search(&self, term: &str, version: Version) -> StoreResult<Vec<TextPosting>>;
}

/// Version allocation for commits.
///
/// A commit reserves `base + 1` with [`begin_commit`](Self::begin_commit),
/// writes its records under that version, then either publishes or aborts.
/// Readers never see a version before it is published.
pub trait VersionControl: Send + Sync {
    fn current_version(&self) -> StoreResult<Version>;

    /// Reserve the next version for a commit based on `base`.
    ///
    /// Fails with [`StoreError::VersionConflict`](crate::StoreError::VersionConflict)
    /// when `base` is not the current version or another commit is pending.
    fn begin_commit(&self, base: Version) -> StoreResult<Version>;

    fn publish(&self, version: Version) -> StoreResult<()>;

    /// Drop the pending commit and every item record written under it.
    fn abort_commit(&self, version: Version) -> StoreResult<()>;
}

/// Everything the repository needs from persistence.
pub trait Backend:
    ValueStore + ItemStore + RefStore + LobStore + IndexStore + TextIndex + VersionControl
{
}

impl<T> Backend for T where
    T: ValueStore + ItemStore + RefStore + LobStore + IndexStore + TextIndex + VersionControl
{
}
