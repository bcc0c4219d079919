use std::collections::BTreeSet;
use std::fmt;

use vor_types::ItemId;

/// An unordered reference collection.
///
/// Persisted as a string (`Set(uuid, uuid, ...)`) inside its value record
/// rather than as a separate list. Concurrent changes merge commutatively
/// with [`merge`](Self::merge).
#[derive(Clone, Debug, Default)]
pub struct RefSet {
    members: BTreeSet<ItemId>,
    loaded: BTreeSet<ItemId>,
}

impl RefSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ItemId, loaded: bool) -> bool {
        if loaded {
            self.loaded.insert(id);
        }
        self.members.insert(id)
    }

    pub fn remove(&mut self, id: &ItemId) -> bool {
        self.loaded.remove(id);
        self.members.remove(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemId> {
        self.members.iter()
    }

    pub fn clear(&mut self) -> Vec<ItemId> {
        self.loaded.clear();
        std::mem::take(&mut self.members).into_iter().collect()
    }

    pub fn set_loaded(&mut self, id: &ItemId, loaded: bool) {
        if !self.members.contains(id) {
            return;
        }
        if loaded {
            self.loaded.insert(*id);
        } else {
            self.loaded.remove(id);
        }
    }

    pub fn ref_count(&self, loaded: bool) -> usize {
        if loaded {
            self.loaded.len()
        } else {
            self.members.len()
        }
    }

    /// Three-way merge: keep local membership, add what `remote` added
    /// since `base`, drop what it removed.
    pub fn merge(&mut self, base: &RefSet, remote: &RefSet) {
        for added in remote.members.difference(&base.members) {
            self.members.insert(*added);
        }
        for removed in base.members.difference(&remote.members) {
            self.remove(removed);
        }
    }

    /// Parse the persisted form.
    pub fn parse(repr: &str) -> Option<Self> {
        let inner = repr.strip_prefix("Set(")?.strip_suffix(')')?;
        let mut set = Self::new();
        for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            set.members.insert(part.parse().ok()?);
        }
        Some(set)
    }
}

impl PartialEq for RefSet {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}

impl Eq for RefSet {}

impl fmt::Display for RefSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.members.iter().map(|id| id.to_string()).collect();
        write!(f, "Set({})", parts.join(", "))
    }
}

impl FromIterator<ItemId> for RefSet {
    fn from_iter<I: IntoIterator<Item = ItemId>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
            loaded: BTreeSet::new(),
        }
    }
}
