use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vor_types::{AttrId, IndexId, ItemId, LobId, RefListId, ValueId, Version};

use crate::error::{StoreError, StoreResult};
use crate::record::{ItemRecord, RefListRecord, TextPosting, ValueRecord};
use crate::traits::{IndexStore, ItemStore, LobStore, RefStore, TextIndex, ValueStore, VersionControl};

/// The full content of an in-memory backend. Serialized as-is into
/// snapshot files.
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    pub(crate) values: HashMap<ValueId, ValueRecord>,
    pub(crate) items: HashMap<ItemId, BTreeMap<Version, ItemRecord>>,
    pub(crate) ref_lists: HashMap<RefListId, BTreeMap<Version, RefListRecord>>,
    pub(crate) lobs: HashMap<LobId, Vec<u8>>,
    pub(crate) indexes: HashMap<IndexId, BTreeMap<Version, Vec<u8>>>,
    pub(crate) text: BTreeMap<String, BTreeSet<TextPosting>>,
    pub(crate) current: Version,
    #[serde(skip)]
    pub(crate) pending: Option<Version>,
}

/// In-memory backend.
///
/// Intended for tests, embedding and the snapshot file format. All tables
/// live behind one `RwLock`; records are cloned on read and write.
pub struct InMemoryBackend {
    pub(crate) tables: RwLock<Tables>,
}

impl InMemoryBackend {
    /// Create a new empty backend at version 0.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    pub(crate) fn from_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Number of value records.
    pub fn value_count(&self) -> usize {
        self.tables.read().expect("lock poisoned").values.len()
    }

    /// Number of item records across all versions.
    pub fn item_record_count(&self) -> usize {
        self.tables
            .read()
            .expect("lock poisoned")
            .items
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    /// Number of stored lobs.
    pub fn lob_count(&self) -> usize {
        self.tables.read().expect("lock poisoned").lobs.len()
    }

    /// Number of reference lists with at least one snapshot.
    pub fn ref_list_count(&self) -> usize {
        self.tables.read().expect("lock poisoned").ref_lists.len()
    }

    /// Number of list indexes with at least one snapshot.
    pub fn index_count(&self) -> usize {
        self.tables.read().expect("lock poisoned").indexes.len()
    }

    /// Total bytes across all value records and lobs.
    pub fn total_bytes(&self) -> u64 {
        let tables = self.tables.read().expect("lock poisoned");
        let values: usize = tables.values.values().map(|r| r.data.len()).sum();
        let lobs: usize = tables.lobs.values().map(Vec::len).sum();
        (values + lobs) as u64
    }

    /// Every value id, sorted.
    pub fn all_value_ids(&self) -> Vec<ValueId> {
        let tables = self.tables.read().expect("lock poisoned");
        let mut ids: Vec<ValueId> = tables.values.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn latest_at<T>(versions: &BTreeMap<Version, T>, version: Version) -> Option<&T> {
    versions.range(..=version).next_back().map(|(_, v)| v)
}

fn purge_before<T>(versions: &mut BTreeMap<Version, T>, keep: Version) -> usize {
    let Some(visible) = versions.range(..=keep).next_back().map(|(v, _)| *v) else {
        return 0;
    };
    let stale: Vec<Version> = versions.range(..visible).map(|(v, _)| *v).collect();
    for v in &stale {
        versions.remove(v);
    }
    stale.len()
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl ValueStore for InMemoryBackend {
    fn load_value(&self, id: &ValueId) -> StoreResult<Option<ValueRecord>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.values.get(id).cloned())
    }

    fn save_value(&self, id: ValueId, record: ValueRecord) -> StoreResult<usize> {
        let size = record.data.len();
        let mut tables = self.tables.write().expect("lock poisoned");
        tables.values.insert(id, record);
        Ok(size)
    }

    fn purge_value(&self, id: &ValueId) -> StoreResult<bool> {
        let mut tables = self.tables.write().expect("lock poisoned");
        Ok(tables.values.remove(id).is_some())
    }
}

impl ItemStore for InMemoryBackend {
    fn save_item(&self, record: ItemRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        tables
            .items
            .entry(record.item)
            .or_default()
            .insert(record.version, record);
        Ok(())
    }

    fn load_item(&self, id: &ItemId, version: Version) -> StoreResult<Option<ItemRecord>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .items
            .get(id)
            .and_then(|versions| latest_at(versions, version))
            .cloned())
    }

    fn item_versions(&self, id: &ItemId) -> StoreResult<Vec<Version>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .items
            .get(id)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default())
    }

    fn purge_item(&self, id: &ItemId, version: Version) -> StoreResult<Option<ItemRecord>> {
        let mut tables = self.tables.write().expect("lock poisoned");
        let Some(versions) = tables.items.get_mut(id) else {
            return Ok(None);
        };
        let removed = versions.remove(&version);
        if versions.is_empty() {
            tables.items.remove(id);
        }
        Ok(removed)
    }

    fn find_child(
        &self,
        parent: &ItemId,
        name: &str,
        version: Version,
    ) -> StoreResult<Option<ItemId>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.items.values().find_map(|versions| {
            latest_at(versions, version)
                .filter(|r| {
                    !r.is_deleted()
                        && r.parent.as_ref() == Some(parent)
                        && r.name.as_deref() == Some(name)
                })
                .map(|r| r.item)
        }))
    }

    fn changed_items(&self, after: Version, upto: Version) -> StoreResult<Vec<(ItemId, Version)>> {
        if upto <= after {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().expect("lock poisoned");
        let mut changed: Vec<(ItemId, Version)> = tables
            .items
            .iter()
            .filter_map(|(id, versions)| {
                versions
                    .range(after + 1..=upto)
                    .next_back()
                    .map(|(v, _)| (*id, *v))
            })
            .collect();
        changed.sort();
        Ok(changed)
    }

    fn all_items(&self) -> StoreResult<Vec<ItemId>> {
        let tables = self.tables.read().expect("lock poisoned");
        let mut ids: Vec<ItemId> = tables.items.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

impl RefStore for InMemoryBackend {
    fn save_ref_list(
        &self,
        id: RefListId,
        version: Version,
        record: RefListRecord,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        tables.ref_lists.entry(id).or_default().insert(version, record);
        Ok(())
    }

    fn load_ref_list(&self, id: &RefListId, version: Version) -> StoreResult<Option<RefListRecord>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .ref_lists
            .get(id)
            .and_then(|versions| latest_at(versions, version))
            .cloned())
    }

    fn purge_ref_list(&self, id: &RefListId, keep: Version) -> StoreResult<usize> {
        let mut tables = self.tables.write().expect("lock poisoned");
        Ok(tables
            .ref_lists
            .get_mut(id)
            .map_or(0, |versions| purge_before(versions, keep)))
    }

    fn drop_ref_list(&self, id: &RefListId) -> StoreResult<usize> {
        let mut tables = self.tables.write().expect("lock poisoned");
        Ok(tables.ref_lists.remove(id).map_or(0, |versions| versions.len()))
    }
}

impl LobStore for InMemoryBackend {
    fn save_lob(&self, id: LobId, data: &[u8]) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        tables.lobs.entry(id).or_insert_with(|| data.to_vec());
        Ok(())
    }

    fn load_lob(&self, id: &LobId) -> StoreResult<Option<Vec<u8>>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.lobs.get(id).cloned())
    }

    fn purge_lob(&self, id: &LobId) -> StoreResult<bool> {
        let mut tables = self.tables.write().expect("lock poisoned");
        Ok(tables.lobs.remove(id).is_some())
    }
}

impl IndexStore for InMemoryBackend {
    fn save_index(&self, id: IndexId, version: Version, data: Vec<u8>) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        tables.indexes.entry(id).or_default().insert(version, data);
        Ok(())
    }

    fn load_index(&self, id: &IndexId, version: Version) -> StoreResult<Option<Vec<u8>>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .indexes
            .get(id)
            .and_then(|versions| latest_at(versions, version))
            .cloned())
    }

    fn purge_index(&self, id: &IndexId, keep: Version) -> StoreResult<usize> {
        let mut tables = self.tables.write().expect("lock poisoned");
        Ok(tables
            .indexes
            .get_mut(id)
            .map_or(0, |versions| purge_before(versions, keep)))
    }

    fn drop_index(&self, id: &IndexId) -> StoreResult<usize> {
        let mut tables = self.tables.write().expect("lock poisoned");
        Ok(tables.indexes.remove(id).map_or(0, |versions| versions.len()))
    }
}

impl TextIndex for InMemoryBackend {
    fn index_value(
        &self,
        item: ItemId,
        attr: Option<AttrId>,
        version: Version,
        text: &str,
    ) -> StoreResult<()> {
        let posting = TextPosting {
            item,
            attr,
            version,
        };
        let mut tables = self.tables.write().expect("lock poisoned");
        for term in tokenize(text) {
            tables.text.entry(term).or_default().insert(posting);
        }
        Ok(())
    }

    fn search(&self, term: &str, version: Version) -> StoreResult<Vec<TextPosting>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .text
            .get(&term.to_lowercase())
            .map(|postings| {
                postings
                    .iter()
                    .filter(|p| p.version <= version)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl VersionControl for InMemoryBackend {
    fn current_version(&self) -> StoreResult<Version> {
        Ok(self.tables.read().expect("lock poisoned").current)
    }

    fn begin_commit(&self, base: Version) -> StoreResult<Version> {
        let mut tables = self.tables.write().expect("lock poisoned");
        if tables.current != base || tables.pending.is_some() {
            return Err(StoreError::VersionConflict {
                base,
                current: tables.pending.unwrap_or(tables.current),
            });
        }
        let version = base + 1;
        tables.pending = Some(version);
        debug!(version, "commit started");
        Ok(version)
    }

    fn publish(&self, version: Version) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        if tables.pending != Some(version) {
            return Err(StoreError::NoPendingCommit(version));
        }
        tables.pending = None;
        tables.current = version;
        debug!(version, "version published");
        Ok(())
    }

    fn abort_commit(&self, version: Version) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        if tables.pending != Some(version) {
            return Err(StoreError::NoPendingCommit(version));
        }
        tables.pending = None;
        for versions in tables.items.values_mut() {
            versions.remove(&version);
        }
        tables.items.retain(|_, versions| !versions.is_empty());
        for versions in tables.ref_lists.values_mut() {
            versions.remove(&version);
        }
        for versions in tables.indexes.values_mut() {
            versions.remove(&version);
        }
        debug!(version, "commit aborted");
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read().expect("lock poisoned");
        f.debug_struct("InMemoryBackend")
            .field("version", &tables.current)
            .field("value_count", &tables.values.len())
            .field("item_count", &tables.items.len())
            .finish()
    }
}
