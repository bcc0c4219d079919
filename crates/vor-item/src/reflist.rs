//! Ordered reference lists with aliases and secondary indexes.

use std::collections::{HashMap, HashSet};

use vor_store::{RefListEntry, RefListRecord};
use vor_types::{IndexId, ItemId, RefListId};

use crate::error::{ItemError, ItemResult};
use crate::refs::ItemRef;

/// One element of a [`RefList`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefEntry {
    pub key: ItemRef,
    pub alias: Option<String>,
}

/// How a secondary index orders its keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// List order.
    Numeric,
    /// Ascending by the string form of an attribute of each target.
    Attribute(String),
}

impl IndexKind {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Numeric => 0,
            Self::Attribute(_) => 1,
        }
    }
}

/// A named secondary index over a reference list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListIndex {
    pub id: IndexId,
    pub name: String,
    pub kind: IndexKind,
    pub order: Vec<ItemId>,
}

impl ListIndex {
    /// The key order as stored in the index table: 16 bytes per key.
    pub fn order_bytes(&self) -> Vec<u8> {
        self.order.iter().flat_map(|id| *id.as_bytes()).collect()
    }

    /// Inverse of [`order_bytes`](Self::order_bytes). Trailing partial
    /// chunks are ignored.
    pub fn order_from_bytes(data: &[u8]) -> Vec<ItemId> {
        data.chunks_exact(16)
            .map(|chunk| {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(chunk);
                ItemId::from_bytes(bytes)
            })
            .collect()
    }

    /// Zero-based position of `key` in this index.
    pub fn position(&self, key: &ItemId) -> Option<usize> {
        self.order.iter().position(|k| k == key)
    }
}

/// One structural change to a reference list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListOp {
    Insert {
        key: ItemId,
        after: Option<ItemId>,
        alias: Option<String>,
    },
    Remove {
        key: ItemId,
    },
    Place {
        key: ItemId,
        after: Option<ItemId>,
    },
    Alias {
        key: ItemId,
        alias: Option<String>,
    },
}

/// An ordered reference collection with unique keys.
///
/// Keys may carry an alias, unique within the list. The list has its own
/// identity: it is persisted separately from the value record that points
/// at it, one snapshot per version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefList {
    pub id: RefListId,
    entries: Vec<RefEntry>,
    indexes: Vec<ListIndex>,
    dirty: bool,
}

impl RefList {
    pub fn new() -> Self {
        Self::with_id(RefListId::new())
    }

    pub fn with_id(id: RefListId) -> Self {
        Self {
            id,
            entries: Vec::new(),
            indexes: Vec::new(),
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self, key: &ItemId) -> Option<usize> {
        self.entries.iter().position(|e| e.key.id() == *key)
    }

    pub fn contains(&self, key: &ItemId) -> bool {
        self.position(key).is_some()
    }

    pub fn entries(&self) -> &[RefEntry] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<ItemId> {
        self.entries.iter().map(|e| e.key.id()).collect()
    }

    pub fn first(&self) -> Option<ItemId> {
        self.entries.first().map(|e| e.key.id())
    }

    pub fn last(&self) -> Option<ItemId> {
        self.entries.last().map(|e| e.key.id())
    }

    pub fn next(&self, key: &ItemId) -> Option<ItemId> {
        let pos = self.position(key)?;
        self.entries.get(pos + 1).map(|e| e.key.id())
    }

    pub fn previous(&self, key: &ItemId) -> Option<ItemId> {
        let pos = self.position(key)?;
        pos.checked_sub(1)
            .and_then(|p| self.entries.get(p))
            .map(|e| e.key.id())
    }

    /// Add `key` at the end. Returns `false` if it was already present.
    pub fn append(&mut self, key: ItemRef, alias: Option<String>) -> ItemResult<bool> {
        let after = self.last();
        self.insert_after(key, after.as_ref(), alias)
    }

    /// Insert `key` after `after`, or first when `after` is `None`.
    /// An `after` that is not in the list appends.
    pub fn insert_after(
        &mut self,
        key: ItemRef,
        after: Option<&ItemId>,
        alias: Option<String>,
    ) -> ItemResult<bool> {
        if self.contains(&key.id()) {
            return Ok(false);
        }
        if let Some(alias) = &alias {
            self.check_alias(alias, &key.id())?;
        }
        let pos = match after {
            None => 0,
            Some(after) => self.position(after).map_or(self.entries.len(), |p| p + 1),
        };
        self.entries.insert(pos, RefEntry { key, alias });
        self.dirty = true;
        Ok(true)
    }

    pub fn remove(&mut self, key: &ItemId) -> bool {
        match self.position(key) {
            Some(pos) => {
                self.entries.remove(pos);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Move `key` after `after` (first when `None`).
    pub fn place(&mut self, key: &ItemId, after: Option<&ItemId>) -> bool {
        if after == Some(key) {
            return false;
        }
        let Some(pos) = self.position(key) else {
            return false;
        };
        let entry = self.entries.remove(pos);
        let target = match after {
            None => 0,
            Some(after) => self.position(after).map_or(self.entries.len(), |p| p + 1),
        };
        self.entries.insert(target, entry);
        self.dirty = true;
        true
    }

    pub fn set_alias(&mut self, key: &ItemId, alias: Option<String>) -> ItemResult<()> {
        if let Some(alias) = &alias {
            self.check_alias(alias, key)?;
        }
        if let Some(pos) = self.position(key) {
            self.entries[pos].alias = alias;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn alias_of(&self, key: &ItemId) -> Option<&str> {
        self.position(key)
            .and_then(|pos| self.entries[pos].alias.as_deref())
    }

    /// The key registered under `alias`.
    pub fn get_by_alias(&self, alias: &str) -> Option<ItemId> {
        self.entries
            .iter()
            .find(|e| e.alias.as_deref() == Some(alias))
            .map(|e| e.key.id())
    }

    /// The live reference registered under `alias`, with its load state.
    pub fn resolve_alias(&self, alias: &str) -> Option<ItemRef> {
        self.entries
            .iter()
            .find(|e| e.alias.as_deref() == Some(alias))
            .map(|e| e.key)
    }

    fn check_alias(&self, alias: &str, key: &ItemId) -> ItemResult<()> {
        match self.get_by_alias(alias) {
            Some(existing) if existing != *key => Err(ItemError::AliasTaken {
                alias: alias.to_string(),
                existing,
            }),
            _ => Ok(()),
        }
    }

    /// Remove every entry, returning the removed keys in order.
    pub fn clear(&mut self) -> Vec<ItemId> {
        let keys = self.keys();
        if !keys.is_empty() {
            self.dirty = true;
        }
        self.entries.clear();
        keys
    }

    /// Entries counted, or only entries whose target is loaded.
    pub fn ref_count(&self, loaded: bool) -> usize {
        self.entries
            .iter()
            .filter(|e| !loaded || e.key.is_loaded())
            .count()
    }

    /// Update the load state of every entry pointing at `id`.
    pub fn set_loaded(&mut self, id: &ItemId, loaded: bool) {
        for entry in self.entries.iter_mut().filter(|e| e.key.id() == *id) {
            entry.key = entry.key.with_loaded(loaded);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    // -----------------------------------------------------------------------
    // Indexes
    // -----------------------------------------------------------------------

    /// Add a named secondary index; re-adding a name replaces its kind.
    pub fn add_index(&mut self, name: impl Into<String>, kind: IndexKind) -> IndexId {
        let name = name.into();
        if let Some(existing) = self.indexes.iter_mut().find(|i| i.name == name) {
            existing.kind = kind;
            self.dirty = true;
            return existing.id;
        }
        let id = IndexId::new();
        self.indexes.push(ListIndex {
            id,
            name,
            kind,
            order: Vec::new(),
        });
        self.dirty = true;
        id
    }

    /// Restore an index read from the store.
    pub fn restore_index(&mut self, index: ListIndex) {
        self.indexes.retain(|i| i.name != index.name);
        self.indexes.push(index);
    }

    pub fn index(&self, name: &str) -> Option<&ListIndex> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn indexes(&self) -> &[ListIndex] {
        &self.indexes
    }

    /// Recompute every index. `sort_key` returns the string form of an
    /// attribute of a target; targets without one sort first.
    pub fn reindex(&mut self, sort_key: &dyn Fn(&ItemId, &str) -> Option<String>) {
        let keys = self.keys();
        for index in &mut self.indexes {
            index.order = match &index.kind {
                IndexKind::Numeric => keys.clone(),
                IndexKind::Attribute(attr) => {
                    let mut keyed: Vec<(Option<String>, ItemId)> =
                        keys.iter().map(|k| (sort_key(k, attr), *k)).collect();
                    keyed.sort();
                    keyed.into_iter().map(|(_, k)| k).collect()
                }
            };
        }
    }

    // -----------------------------------------------------------------------
    // Persistence and deltas
    // -----------------------------------------------------------------------

    pub fn to_record(&self) -> RefListRecord {
        RefListRecord {
            entries: self
                .entries
                .iter()
                .map(|e| RefListEntry {
                    key: e.key.id(),
                    alias: e.alias.clone(),
                })
                .collect(),
        }
    }

    /// A clean list from a stored snapshot; every key starts unresolved.
    pub fn from_record(id: RefListId, record: &RefListRecord) -> Self {
        Self {
            id,
            entries: record
                .entries
                .iter()
                .map(|e| RefEntry {
                    key: ItemRef::Unresolved(e.key),
                    alias: e.alias.clone(),
                })
                .collect(),
            indexes: Vec::new(),
            dirty: false,
        }
    }

    /// The operations that turn `base` into `head`.
    ///
    /// Removals come first; insertions and placements follow in `head`
    /// order so every `after` anchor exists when replayed.
    pub fn diff(base: &RefListRecord, head: &RefListRecord) -> Vec<ListOp> {
        let base_keys: HashSet<ItemId> = base.entries.iter().map(|e| e.key).collect();
        let head_keys: HashSet<ItemId> = head.entries.iter().map(|e| e.key).collect();
        let base_prev: HashMap<ItemId, Option<ItemId>> = predecessors(base);
        let base_alias: HashMap<ItemId, Option<&String>> = base
            .entries
            .iter()
            .map(|e| (e.key, e.alias.as_ref()))
            .collect();

        let mut ops: Vec<ListOp> = base
            .entries
            .iter()
            .filter(|e| !head_keys.contains(&e.key))
            .map(|e| ListOp::Remove { key: e.key })
            .collect();

        // Predecessors among surviving keys only, so a removal alone does
        // not read as a move.
        let survivors = RefListRecord {
            entries: base
                .entries
                .iter()
                .filter(|e| head_keys.contains(&e.key))
                .cloned()
                .collect(),
        };
        let survivor_prev = predecessors(&survivors);

        let mut after: Option<ItemId> = None;
        for entry in &head.entries {
            if !base_keys.contains(&entry.key) {
                ops.push(ListOp::Insert {
                    key: entry.key,
                    after,
                    alias: entry.alias.clone(),
                });
            } else {
                let moved = survivor_prev.get(&entry.key) != Some(&after)
                    && base_prev.get(&entry.key) != Some(&after);
                if moved {
                    ops.push(ListOp::Place {
                        key: entry.key,
                        after,
                    });
                }
                if base_alias.get(&entry.key).copied().flatten() != entry.alias.as_ref() {
                    ops.push(ListOp::Alias {
                        key: entry.key,
                        alias: entry.alias.clone(),
                    });
                }
            }
            after = Some(entry.key);
        }
        ops
    }

    /// Replay `ops` in order.
    ///
    /// An operation whose effect is already in place counts as applied:
    /// removing an absent key, or inserting a key that is present under the
    /// same alias. Any other operation that cannot apply stops the replay
    /// with [`ItemError::ListReplay`]; earlier operations stay applied.
    /// Returns the number of operations that changed the list.
    pub fn apply(&mut self, ops: &[ListOp]) -> ItemResult<usize> {
        let mut applied = 0;
        for op in ops {
            let changed = match op {
                ListOp::Insert { key, after, alias } => {
                    if self.contains(key) {
                        if self.alias_of(key) != alias.as_deref() {
                            return Err(replay_error(*key, "already present under another alias"));
                        }
                        false
                    } else {
                        self.insert_after(ItemRef::Unresolved(*key), after.as_ref(), alias.clone())
                            .map_err(|e| replay_error(*key, &e.to_string()))?
                    }
                }
                ListOp::Remove { key } => self.remove(key),
                ListOp::Place { key, after } => {
                    if !self.contains(key) {
                        return Err(replay_error(*key, "moved but no longer present"));
                    }
                    self.place(key, after.as_ref())
                }
                ListOp::Alias { key, alias } => {
                    if !self.contains(key) {
                        return Err(replay_error(*key, "aliased but no longer present"));
                    }
                    if self.alias_of(key) == alias.as_deref() {
                        false
                    } else {
                        self.set_alias(key, alias.clone())
                            .map_err(|e| replay_error(*key, &e.to_string()))?;
                        true
                    }
                }
            };
            if changed {
                applied += 1;
            }
        }
        Ok(applied)
    }
}

impl Default for RefList {
    fn default() -> Self {
        Self::new()
    }
}

fn replay_error(key: ItemId, detail: &str) -> ItemError {
    ItemError::ListReplay {
        key,
        detail: detail.to_string(),
    }
}

fn predecessors(record: &RefListRecord) -> HashMap<ItemId, Option<ItemId>> {
    let mut prev = None;
    let mut out = HashMap::new();
    for entry in &record.entries {
        out.insert(entry.key, prev);
        prev = Some(entry.key);
    }
    out
}
