use vor_hash::combine;
use vor_types::{AttrValue, ItemId, ItemStatus, KindId, Version, ViewId};

use crate::error::{ItemError, ItemResult};
use crate::refs::{References, RefSlot};
use crate::values::Values;

/// An addressable, versioned object.
///
/// An item owns exactly one [`Values`] and one [`References`]; both live and
/// die with it. Items are owned by the [`ItemCache`](crate::ItemCache) of
/// one view and point at each other by id only.
#[derive(Clone, Debug)]
pub struct Item {
    pub id: ItemId,
    /// The version this item was loaded at or last committed as.
    pub version: Version,
    /// `None` only for bootstrap items.
    pub kind: Option<KindId>,
    pub parent: Option<ItemId>,
    pub name: Option<String>,
    pub status: ItemStatus,
    pub view: ViewId,
    /// Name of the composite item class, recorded with the item.
    pub class: Option<String>,
    pub values: Values,
    pub references: References,
}

impl Item {
    /// A fresh item with status `NEW`.
    pub fn new(view: ViewId, kind: Option<KindId>) -> Self {
        Self::with_id(ItemId::new(), view, kind, ItemStatus::NEW)
    }

    pub fn with_id(id: ItemId, view: ViewId, kind: Option<KindId>, status: ItemStatus) -> Self {
        Self {
            id,
            version: 0,
            kind,
            parent: None,
            name: None,
            status,
            view,
            class: None,
            values: Values::new(),
            references: References::new(),
        }
    }

    /// The literal stored under `name`.
    pub fn value(&self, name: &str) -> ItemResult<&AttrValue> {
        self.values.get(name).ok_or_else(|| ItemError::NoValue {
            item: self.id,
            name: name.to_string(),
        })
    }

    /// The reference slot stored under `name`.
    pub fn reference(&self, name: &str) -> ItemResult<&RefSlot> {
        self.references.get(name).ok_or_else(|| ItemError::NoValue {
            item: self.id,
            name: name.to_string(),
        })
    }

    /// The target of a single reference, if set.
    pub fn single_ref(&self, name: &str) -> Option<ItemId> {
        match self.references.get(name) {
            Some(RefSlot::Single(r)) => Some(r.id()),
            _ => None,
        }
    }

    pub fn has_value(&self, name: &str) -> bool {
        self.values.contains(name) || self.references.contains(name)
    }

    pub fn is_new(&self) -> bool {
        self.status.contains(ItemStatus::NEW)
    }

    pub fn is_deleted(&self) -> bool {
        self.status.contains(ItemStatus::DELETED)
    }

    pub fn is_dirty(&self) -> bool {
        self.status.is_dirty()
    }

    /// Mutations on `NODIRTY` items leave no trace.
    pub fn is_tracked(&self) -> bool {
        !self.status.contains(ItemStatus::NODIRTY)
    }

    /// Set dirty bits unless the item is `NODIRTY`.
    pub fn mark(&mut self, bits: ItemStatus) {
        if self.is_tracked() {
            self.status.insert(bits);
        }
    }

    pub fn set_kind(&mut self, kind: Option<KindId>) {
        if self.kind != kind {
            self.kind = kind;
            self.mark(ItemStatus::KDIRTY);
        }
    }

    pub fn set_placement(&mut self, parent: Option<ItemId>, name: Option<String>) {
        if self.parent != parent || self.name != name {
            self.parent = parent;
            self.name = name;
            self.mark(ItemStatus::PDIRTY);
        }
    }

    /// Attribute names with pending changes, literals and references alike.
    pub fn dirty_names(&self) -> Vec<String> {
        let mut names = self.values.dirty_names();
        names.extend(self.references.dirty_names());
        names.sort();
        names.dedup();
        names
    }

    /// Forget every pending change. Called once a commit is published.
    pub fn clear_dirty(&mut self) {
        self.status.remove(ItemStatus::DIRTY | ItemStatus::NEW | ItemStatus::MERGED);
        self.values.clear_dirty();
        self.references.clear_dirty();
    }

    /// Order-independent hash over every persisted attribute.
    pub fn hash_values(&self) -> u64 {
        combine(self.values.hash_values(), self.references.hash_values())
    }
}
