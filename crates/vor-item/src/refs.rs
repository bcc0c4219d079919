use std::collections::{BTreeMap, HashMap};

use vor_hash::{combine, ContentHasher};
use vor_types::{Cardinality, ItemId, ValueFlags};

use crate::reflist::RefList;
use crate::refset::RefSet;

/// A pointer to another item.
///
/// All cross-item links are item ids; the view's arena owns the items.
/// `Resolved` records that the target was in the arena when last checked,
/// `Unresolved` that it still has to be loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemRef {
    Unresolved(ItemId),
    Resolved(ItemId),
}

impl ItemRef {
    pub fn id(&self) -> ItemId {
        match self {
            Self::Unresolved(id) | Self::Resolved(id) => *id,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn with_loaded(self, loaded: bool) -> Self {
        if loaded {
            Self::Resolved(self.id())
        } else {
            Self::Unresolved(self.id())
        }
    }
}

/// A reference collection keyed by string, each key holding a sub-list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefDict {
    pub lists: BTreeMap<String, RefList>,
}

impl RefDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&RefList> {
        self.lists.get(key)
    }

    /// The sub-list for `key`, created on first use.
    pub fn entry(&mut self, key: &str) -> &mut RefList {
        self.lists.entry(key.to_string()).or_default()
    }

    /// The key of the sub-list holding `id`.
    pub fn key_of(&self, id: &ItemId) -> Option<&str> {
        self.lists
            .iter()
            .find(|(_, list)| list.contains(id))
            .map(|(k, _)| k.as_str())
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.key_of(id).is_some()
    }

    pub fn remove(&mut self, id: &ItemId) -> bool {
        self.lists.values_mut().any(|list| list.remove(id))
    }

    pub fn keys(&self) -> Vec<ItemId> {
        self.lists.values().flat_map(|l| l.keys()).collect()
    }

    pub fn clear(&mut self) -> Vec<ItemId> {
        self.lists.values_mut().flat_map(|l| l.clear()).collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.lists.values().any(RefList::is_dirty)
    }
}

/// The content of one reference attribute.
///
/// Cardinality is fixed by the attribute declaration: a slot goes from
/// absent to `Single` or to one collection variant, and back to absent on
/// removal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefSlot {
    /// A stored null reference.
    None,
    Single(ItemRef),
    List(RefList),
    Dict(RefDict),
    Set(RefSet),
}

impl RefSlot {
    /// An empty slot of the given cardinality.
    pub fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::Single => Self::None,
            Cardinality::List => Self::List(RefList::new()),
            Cardinality::Dict => Self::Dict(RefDict::new()),
            Cardinality::Set => Self::Set(RefSet::new()),
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            Self::None | Self::Single(_) => Cardinality::Single,
            Self::List(_) => Cardinality::List,
            Self::Dict(_) => Cardinality::Dict,
            Self::Set(_) => Cardinality::Set,
        }
    }

    /// Every referenced item id, in collection order.
    pub fn targets(&self) -> Vec<ItemId> {
        match self {
            Self::None => Vec::new(),
            Self::Single(r) => vec![r.id()],
            Self::List(list) => list.keys(),
            Self::Dict(dict) => dict.keys(),
            Self::Set(set) => set.iter().copied().collect(),
        }
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        match self {
            Self::None => false,
            Self::Single(r) => r.id() == *id,
            Self::List(list) => list.contains(id),
            Self::Dict(dict) => dict.contains(id),
            Self::Set(set) => set.contains(id),
        }
    }

    /// 1 for a single reference; the member count for collections. With
    /// `loaded`, only references whose target is in the arena count.
    pub fn ref_count(&self, loaded: bool) -> usize {
        match self {
            Self::None => 0,
            Self::Single(r) => usize::from(!loaded || r.is_loaded()),
            Self::List(list) => list.ref_count(loaded),
            Self::Dict(dict) => dict.lists.values().map(|l| l.ref_count(loaded)).sum(),
            Self::Set(set) => set.ref_count(loaded),
        }
    }

    pub fn set_loaded(&mut self, id: &ItemId, loaded: bool) {
        match self {
            Self::None => {}
            Self::Single(r) => {
                if r.id() == *id {
                    *r = r.with_loaded(loaded);
                }
            }
            Self::List(list) => list.set_loaded(id, loaded),
            Self::Dict(dict) => {
                for list in dict.lists.values_mut() {
                    list.set_loaded(id, loaded);
                }
            }
            Self::Set(set) => set.set_loaded(id, loaded),
        }
    }

    fn content_hash(&self) -> u64 {
        let ids = |h: u64, keys: Vec<ItemId>| {
            keys.iter()
                .fold(h, |h, id| combine(h, ContentHasher::VALUE.hash(id.as_bytes())))
        };
        match self {
            Self::None => ContentHasher::VALUE.hash(b"none"),
            Self::Single(r) => ContentHasher::VALUE.hash(r.id().as_bytes()),
            Self::List(list) => ids(ContentHasher::VALUE.hash(b"list"), list.keys()),
            Self::Set(set) => ids(ContentHasher::VALUE.hash(b"set"), set.iter().copied().collect()),
            Self::Dict(dict) => dict.lists.iter().fold(
                ContentHasher::VALUE.hash(b"dict"),
                |h, (k, list)| ids(combine(h, ContentHasher::NAME.hash_str(k)), list.keys()),
            ),
        }
    }
}

/// The reference attributes of one item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct References {
    slots: HashMap<String, RefSlot>,
    flags: HashMap<String, ValueFlags>,
}

impl References {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&RefSlot> {
        self.slots.get(name)
    }

    /// Mutable access; marks the slot dirty.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut RefSlot> {
        if self.slots.contains_key(name) {
            self.mark_dirty(name);
        }
        self.slots.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn set(&mut self, name: &str, slot: RefSlot) -> Option<RefSlot> {
        self.mark_dirty(name);
        self.slots.insert(name.to_string(), slot)
    }

    pub fn set_loaded(&mut self, name: &str, slot: RefSlot, flags: ValueFlags) {
        self.slots.insert(name.to_string(), slot);
        if flags == ValueFlags::NONE {
            self.flags.remove(name);
        } else {
            self.flags.insert(name.to_string(), flags);
        }
    }

    /// Drop a slot the store no longer has: no dirty bit.
    pub fn remove_loaded(&mut self, name: &str) -> Option<RefSlot> {
        self.flags.remove(name);
        self.slots.remove(name)
    }

    /// Remove `target` from `name` as a mirror of a change already made in
    /// the store. Leaves dirty state as it was.
    pub fn unload_target(&mut self, name: &str, target: &ItemId) -> bool {
        let Some(slot) = self.slots.get_mut(name) else {
            return false;
        };
        if matches!(slot, RefSlot::Single(r) if r.id() == *target) {
            *slot = RefSlot::None;
            return true;
        }
        match slot {
            RefSlot::List(list) => {
                let dirty = list.is_dirty();
                let removed = list.remove(target);
                if !dirty {
                    list.clear_dirty();
                }
                removed
            }
            RefSlot::Dict(dict) => {
                let dirty: Vec<bool> = dict.lists.values().map(RefList::is_dirty).collect();
                let removed = dict.remove(target);
                for (list, was) in dict.lists.values_mut().zip(dirty) {
                    if !was {
                        list.clear_dirty();
                    }
                }
                removed
            }
            RefSlot::Set(set) => set.remove(target),
            _ => false,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<RefSlot> {
        let prior = self.slots.remove(name);
        if prior.is_some() {
            self.mark_dirty(name);
        }
        prior
    }

    pub fn flags(&self, name: &str) -> ValueFlags {
        self.flags.get(name).copied().unwrap_or_default()
    }

    pub fn set_flag(&mut self, name: &str, flag: ValueFlags) {
        self.flags.entry(name.to_string()).or_default().insert(flag);
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.flags(name).contains(ValueFlags::DIRTY)
    }

    pub fn is_transient(&self, name: &str) -> bool {
        self.flags(name).contains(ValueFlags::TRANSIENT)
    }

    pub fn dirty_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .flags
            .iter()
            .filter(|(_, f)| f.contains(ValueFlags::DIRTY))
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Clear dirty bits on names and on the collections themselves.
    pub fn clear_dirty(&mut self) {
        for flags in self.flags.values_mut() {
            flags.remove(ValueFlags::DIRTY);
        }
        let slots = &self.slots;
        self.flags
            .retain(|name, flags| *flags != ValueFlags::NONE && slots.contains_key(name));
        for slot in self.slots.values_mut() {
            match slot {
                RefSlot::List(list) => list.clear_dirty(),
                RefSlot::Dict(dict) => {
                    for list in dict.lists.values_mut() {
                        list.clear_dirty();
                    }
                }
                _ => {}
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RefSlot)> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut RefSlot)> {
        self.slots.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total references held, see [`RefSlot::ref_count`].
    pub fn ref_count(&self, loaded: bool) -> usize {
        self.slots.values().map(|s| s.ref_count(loaded)).sum()
    }

    /// Degrade or upgrade every pointer at `id`.
    pub fn set_target_loaded(&mut self, id: &ItemId, loaded: bool) {
        for slot in self.slots.values_mut() {
            slot.set_loaded(id, loaded);
        }
    }

    /// Order-independent hash over persisted references.
    pub fn hash_values(&self) -> u64 {
        self.names()
            .iter()
            .filter(|name| !self.is_transient(name))
            .fold(0, |hash, name| {
                combine(
                    hash,
                    combine(
                        ContentHasher::NAME.hash_str(name),
                        self.slots[name.as_str()].content_hash(),
                    ),
                )
            })
    }

    fn mark_dirty(&mut self, name: &str) {
        self.set_flag(name, ValueFlags::DIRTY);
    }
}
