//! The per-view item arena.
//!
//! [`ItemCache`] owns every loaded item of one view. Items point at each
//! other by id; the cache is what keeps bidirectional references
//! consistent: setting `a.name = b` also installs `b.other_name -> a`, both
//! in memory, before any observer hears about either side.
//!
//! Items that are not in the arena are fetched on demand through an
//! [`ItemSource`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};
use vor_schema::{Aspect, AspectValue, Attribute, CopyPolicy, Schema, SchemaError};
use vor_types::{
    AttrValue, Cardinality, ItemId, ItemStatus, KindId, Value, ValueFlags, ViewId,
};

use crate::error::{ItemError, ItemResult};
use crate::item::Item;
use crate::observer::{ChangeEvent, ChangeObserver, ChangeOp};
use crate::refs::{ItemRef, RefSlot};

/// Lazy loader for items missing from the arena.
pub trait ItemSource {
    /// The item as of the caller's view version, or `Ok(None)` if it does
    /// not exist there.
    fn fetch(&self, id: &ItemId) -> ItemResult<Option<Item>>;
}

/// A source with nothing behind it: every item must already be cached.
#[derive(Clone, Copy, Debug, Default)]
pub struct Detached;

impl ItemSource for Detached {
    fn fetch(&self, _id: &ItemId) -> ItemResult<Option<Item>> {
        Ok(None)
    }
}

/// The items of one view, keyed by id.
pub struct ItemCache {
    view: ViewId,
    schema: Arc<Schema>,
    items: HashMap<ItemId, Item>,
    observers: Vec<Arc<dyn ChangeObserver>>,
    verify: bool,
    pending: Vec<ChangeEvent>,
}

impl ItemCache {
    pub fn new(view: ViewId, schema: Arc<Schema>) -> Self {
        Self {
            view,
            schema,
            items: HashMap::new(),
            observers: Vec::new(),
            verify: false,
            pending: Vec::new(),
        }
    }

    pub fn view(&self) -> ViewId {
        self.view
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Check every assignment against the schema.
    pub fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ChangeObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &ItemId) -> Option<&mut Item> {
        self.items.get_mut(id)
    }

    pub fn item(&self, id: &ItemId) -> ItemResult<&Item> {
        self.items.get(id).ok_or(ItemError::NoSuchItem(*id))
    }

    fn item_mut(&mut self, id: &ItemId) -> ItemResult<&mut Item> {
        self.items.get_mut(id).ok_or(ItemError::NoSuchItem(*id))
    }

    /// Cached item ids, sorted.
    pub fn ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.items.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Ids of items with pending changes, sorted.
    pub fn dirty_items(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self
            .items
            .values()
            .filter(|i| i.is_dirty())
            .map(|i| i.id)
            .collect();
        ids.sort();
        ids
    }

    /// The kind of a cached item.
    pub fn kind_of(&self, id: &ItemId) -> Option<KindId> {
        self.items.get(id).and_then(|i| i.kind)
    }

    // -----------------------------------------------------------------------
    // Arena membership
    // -----------------------------------------------------------------------

    /// Add or replace an item of this view.
    pub fn insert_item(&mut self, mut item: Item) -> ItemResult<()> {
        if item.view != self.view {
            return Err(ItemError::ViewMismatch {
                item: item.id,
                expected: self.view,
                actual: item.view,
            });
        }
        let id = item.id;
        for target in all_targets(&item) {
            if self.items.contains_key(&target) {
                item.references.set_target_loaded(&target, true);
            }
        }
        for other in self.items.values_mut() {
            other.references.set_target_loaded(&id, true);
        }
        self.items.insert(id, item);
        Ok(())
    }

    /// Adopt an item from another view.
    pub fn import_item(&mut self, mut item: Item) -> ItemResult<()> {
        debug!(item = %item.id, from = %item.view, to = %self.view, "importing item");
        item.view = self.view;
        self.insert_item(item)
    }

    /// Make sure `id` is in the arena, fetching it from `source` if needed.
    pub fn ensure_loaded(&mut self, source: &dyn ItemSource, id: &ItemId) -> ItemResult<()> {
        if self.items.contains_key(id) {
            return Ok(());
        }
        match source.fetch(id)? {
            Some(item) => self.insert_item(item),
            None => Err(ItemError::NoSuchItem(*id)),
        }
    }

    /// Evict a clean item. References to it degrade to unresolved ids; the
    /// relationships themselves stay. Returns `false` if the item is absent
    /// or has pending changes.
    pub fn unload_item(&mut self, id: &ItemId) -> bool {
        match self.items.get(id) {
            Some(item) if !item.is_dirty() => {}
            _ => return false,
        }
        self.items.remove(id);
        for other in self.items.values_mut() {
            other.references.set_target_loaded(id, false);
        }
        debug!(item = %id, "item unloaded");
        true
    }

    /// Load every target of `owner.name` and mark them resolved.
    pub fn resolve(
        &mut self,
        source: &dyn ItemSource,
        owner: &ItemId,
        name: &str,
    ) -> ItemResult<Vec<ItemId>> {
        let targets = self.item(owner)?.reference(name)?.targets();
        for target in &targets {
            self.ensure_loaded(source, target)
                .map_err(|e| dangling(e, *owner, name, *target))?;
        }
        if let Some(slot) = self.item_mut(owner)?.references.get_mut(name) {
            for target in &targets {
                slot.set_loaded(target, true);
            }
        }
        Ok(targets)
    }

    pub fn ref_count(&self, owner: &ItemId, loaded: bool) -> ItemResult<usize> {
        Ok(self.item(owner)?.references.ref_count(loaded))
    }

    pub fn hash_values(&self, id: &ItemId) -> ItemResult<u64> {
        Ok(self.item(id)?.hash_values())
    }

    /// One aspect of `id.name` per the item's kind. Kindless items have
    /// no declarations.
    pub fn attribute_aspect(
        &self,
        id: &ItemId,
        name: &str,
        aspect: Aspect,
    ) -> ItemResult<Option<AspectValue>> {
        match self.item(id)?.kind {
            Some(kind) => Ok(self.schema.get_attribute_aspect(&kind, name, aspect)?),
            None => Ok(None),
        }
    }

    /// Whether `id.name` may be assigned. Anything goes on kindless items.
    pub fn is_attribute_modifiable(&self, id: &ItemId, name: &str) -> ItemResult<bool> {
        match self.item(id)?.kind {
            Some(kind) => Ok(self.schema.is_attribute_modifiable(&kind, name)?),
            None => Ok(true),
        }
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create an item of `kind` with its kind's initial values applied.
    pub fn new_item(
        &mut self,
        source: &dyn ItemSource,
        kind: Option<KindId>,
        parent: Option<ItemId>,
        name: Option<String>,
    ) -> ItemResult<ItemId> {
        let mut item = Item::new(self.view, kind);
        item.parent = parent;
        item.name = name;
        let id = item.id;

        let initial = match kind {
            Some(k) => {
                item.class = Some(self.schema.item_class(&k)?.name.clone());
                Some(self.schema.initial_values(&k)?)
            }
            None => None,
        };
        if let (Some(k), Some(initial)) = (kind, &initial) {
            for (attr_name, value) in &initial.values {
                match self.schema.get_attribute(&k, attr_name, true)? {
                    Some(attr) => {
                        item.values.set(attr_name, attr.conform(value.clone()));
                        apply_value_flags(&mut item, attr_name, &attr);
                    }
                    None => {
                        item.values.set(attr_name, value.clone());
                    }
                }
            }
            item.mark(ItemStatus::VDIRTY);
        }
        self.insert_item(item)?;

        if let Some(initial) = initial {
            let mut linked = Ok(());
            'refs: for (attr_name, value) in &initial.refs {
                for target in value.values().filter_map(Value::as_item) {
                    linked = self.link_initial(source, id, attr_name, target);
                    if linked.is_err() {
                        break 'refs;
                    }
                }
            }
            self.settle(linked)?;
        } else {
            self.fire_pending();
        }
        debug!(item = %id, kind = ?kind, "item created");
        Ok(id)
    }

    fn link_initial(
        &mut self,
        source: &dyn ItemSource,
        owner: ItemId,
        name: &str,
        target: ItemId,
    ) -> ItemResult<()> {
        let (attr, _) = self.ref_attribute(&owner, name)?;
        if attr.cardinality == Cardinality::Single {
            self.set_ref_inner(source, owner, name, Some(target))
        } else {
            self.add_ref_inner(source, owner, name, target, None).map(|_| ())
        }
    }

    // -----------------------------------------------------------------------
    // Literal values
    // -----------------------------------------------------------------------

    /// Store a literal. Storing [`AttrValue::Nil`] removes it.
    pub fn set_value(
        &mut self,
        owner: &ItemId,
        name: &str,
        value: AttrValue,
    ) -> ItemResult<Option<AttrValue>> {
        let kind = self.item(owner)?.kind;
        let attr = match kind {
            Some(k) => Some(self.declared(&k, name)?),
            None => None,
        };
        if let (Some(k), Some(attr)) = (kind, &attr) {
            if self.schema.get_other_name(&k, name)?.is_some() {
                return Err(ItemError::BadRef {
                    item: *owner,
                    name: name.to_string(),
                    reason: "reference attribute assigned a literal".into(),
                });
            }
            if self.verify && !value.is_nil() {
                self.verify_literal(owner, name, attr, &value)?;
            }
        }
        let value = match &attr {
            Some(attr) => attr.conform(value),
            None => value,
        };
        let item = self.item_mut(owner)?;
        let prior = item.values.set(name, value);
        if let Some(attr) = &attr {
            apply_value_flags(item, name, attr);
        }
        item.mark(ItemStatus::VDIRTY);
        self.queue(*owner, ChangeOp::Set, name, false);
        self.fire_pending();
        Ok(prior)
    }

    fn verify_literal(
        &self,
        owner: &ItemId,
        name: &str,
        attr: &Attribute,
        value: &AttrValue,
    ) -> ItemResult<()> {
        if value.cardinality() != Some(attr.cardinality) {
            return Err(ItemError::CardinalityMismatch {
                item: *owner,
                name: name.to_string(),
                expected: attr.cardinality,
                actual: value
                    .cardinality()
                    .map_or("nil".to_string(), |c| c.to_string()),
            });
        }
        if let Some(type_id) = &attr.type_id {
            let kind_of = |id: &ItemId| self.kind_of(id);
            for v in value.values() {
                self.schema
                    .resolve_type(Some(type_id), v, &kind_of)
                    .map_err(|e| ItemError::TypeMismatch {
                        item: *owner,
                        name: name.to_string(),
                        detail: e.to_string(),
                    })?;
            }
        }
        Ok(())
    }

    /// Remove a literal or a reference. For references every peer's
    /// back-reference is severed; collections are emptied member by member.
    pub fn remove_value(
        &mut self,
        source: &dyn ItemSource,
        owner: &ItemId,
        name: &str,
    ) -> ItemResult<()> {
        let item = self.item_mut(owner)?;
        if item.values.remove(name).is_some() {
            item.mark(ItemStatus::VDIRTY);
            self.queue(*owner, ChangeOp::Remove, name, false);
            self.fire_pending();
            return Ok(());
        }
        let targets = self.item(owner)?.reference(name)?.targets();
        let other_name = match self.ref_attribute(owner, name) {
            Ok((_, other_name)) => Some(other_name),
            Err(e) => {
                warn!(item = %owner, name, error = %e, "removing reference without inverse");
                None
            }
        };
        if let Some(other_name) = other_name {
            for target in targets {
                self.unlink(source, target, &other_name, *owner)?;
            }
        }
        let item = self.item_mut(owner)?;
        item.references.remove(name);
        item.mark(ItemStatus::RDIRTY);
        self.queue(*owner, ChangeOp::Remove, name, false);
        self.fire_pending();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // References
    // -----------------------------------------------------------------------

    /// Point the single reference `owner.name` at `other`, or clear it.
    ///
    /// The previous target loses its back-reference first; if `other`
    /// already points back at some third item, that link is severed too.
    /// The forward link is installed, then the backward one; if the latter
    /// fails the forward link and the previous target are restored.
    pub fn set_ref(
        &mut self,
        source: &dyn ItemSource,
        owner: &ItemId,
        name: &str,
        other: Option<ItemId>,
    ) -> ItemResult<()> {
        let result = self.set_ref_inner(source, *owner, name, other);
        self.settle(result)
    }

    fn set_ref_inner(
        &mut self,
        source: &dyn ItemSource,
        owner: ItemId,
        name: &str,
        other: Option<ItemId>,
    ) -> ItemResult<()> {
        let (attr, other_name) = self.ref_attribute(&owner, name)?;
        if attr.cardinality != Cardinality::Single {
            return Err(ItemError::CardinalityMismatch {
                item: owner,
                name: name.to_string(),
                expected: attr.cardinality,
                actual: Cardinality::Single.to_string(),
            });
        }
        let current = self.item(&owner)?.single_ref(name);
        if current.is_some() && current == other {
            return Ok(());
        }
        if let Some(target) = other {
            self.ensure_loaded(source, &target)
                .map_err(|e| dangling(e, owner, name, target))?;
            if self.verify {
                self.verify_target(&owner, name, &attr, target)?;
            }
        }

        if let Some(old) = current {
            self.unlink(source, old, &other_name, owner)?;
        }

        let Some(target) = other else {
            let item = self.item_mut(&owner)?;
            item.references.remove(name);
            item.mark(ItemStatus::RDIRTY);
            self.queue(owner, ChangeOp::Remove, name, false);
            return Ok(());
        };

        let item = self.item_mut(&owner)?;
        item.references
            .set(name, RefSlot::Single(ItemRef::Resolved(target)));
        item.mark(ItemStatus::RDIRTY);

        if let Err(e) = self.link(source, target, &other_name, owner, None) {
            warn!(item = %owner, name, target = %target, error = %e, "back-reference failed, rolling back");
            let item = self.item_mut(&owner)?;
            item.references.remove(name);
            if let Some(old) = current {
                item.references
                    .set(name, RefSlot::Single(ItemRef::Resolved(old)));
                self.link(source, old, &other_name, owner, None)?;
            }
            return Err(e);
        }
        self.queue(owner, ChangeOp::Set, name, false);
        Ok(())
    }

    /// Add `other` to the collection `owner.name`. For lists `key` is the
    /// entry's alias; for dicts it is the dict key and required. Returns
    /// `false` if `other` was already a member.
    pub fn add_ref(
        &mut self,
        source: &dyn ItemSource,
        owner: &ItemId,
        name: &str,
        other: ItemId,
        key: Option<&str>,
    ) -> ItemResult<bool> {
        let result = self.add_ref_inner(source, *owner, name, other, key);
        self.settle(result)
    }

    fn add_ref_inner(
        &mut self,
        source: &dyn ItemSource,
        owner: ItemId,
        name: &str,
        other: ItemId,
        key: Option<&str>,
    ) -> ItemResult<bool> {
        let (attr, other_name) = self.ref_attribute(&owner, name)?;
        if !attr.cardinality.is_collection() {
            return Err(ItemError::CardinalityMismatch {
                item: owner,
                name: name.to_string(),
                expected: attr.cardinality,
                actual: "collection".into(),
            });
        }
        self.ensure_loaded(source, &other)
            .map_err(|e| dangling(e, owner, name, other))?;
        if self.verify {
            self.verify_target(&owner, name, &attr, other)?;
        }

        let slot = self.slot_mut(&owner, name, attr.cardinality)?;
        let inserted = insert_member(slot, other, key).map_err(|e| match e {
            InsertError::Item(e) => e,
            InsertError::MissingKey => ItemError::BadRef {
                item: owner,
                name: name.to_string(),
                reason: "dict reference needs a key".into(),
            },
        })?;
        if !inserted {
            return Ok(false);
        }
        self.item_mut(&owner)?.mark(ItemStatus::RDIRTY);

        if let Err(e) = self.link(source, other, &other_name, owner, None) {
            warn!(item = %owner, name, target = %other, error = %e, "back-reference failed, rolling back");
            self.detach_ref(&owner, name, &other)?;
            return Err(e);
        }
        self.queue(owner, ChangeOp::Add, name, true);
        Ok(true)
    }

    /// Remove `other` from `owner.name` and sever its back-reference.
    /// Returns `false` if it was not referenced.
    pub fn remove_ref(
        &mut self,
        source: &dyn ItemSource,
        owner: &ItemId,
        name: &str,
        other: &ItemId,
    ) -> ItemResult<bool> {
        let result = self.remove_ref_inner(source, *owner, name, *other);
        self.settle(result)
    }

    fn remove_ref_inner(
        &mut self,
        source: &dyn ItemSource,
        owner: ItemId,
        name: &str,
        other: ItemId,
    ) -> ItemResult<bool> {
        let (_, other_name) = self.ref_attribute(&owner, name)?;
        if !self.detach_ref(&owner, name, &other)? {
            return Ok(false);
        }
        self.unlink(source, other, &other_name, owner)?;
        Ok(true)
    }

    /// Remove the pointer at `target` from `owner.name` without touching
    /// `target`. Used to drop one side of a link whose other side is gone.
    pub fn detach_ref(&mut self, owner: &ItemId, name: &str, target: &ItemId) -> ItemResult<bool> {
        let Some(item) = self.items.get_mut(owner) else {
            return Ok(false);
        };
        let single = matches!(
            item.references.get(name),
            Some(RefSlot::Single(r)) if r.id() == *target
        );
        let member = item.references.get(name).is_some_and(|s| s.contains(target));
        let removed = if single {
            item.references.remove(name);
            true
        } else if member {
            match item.references.get_mut(name) {
                Some(RefSlot::List(list)) => list.remove(target),
                Some(RefSlot::Dict(dict)) => dict.remove(target),
                Some(RefSlot::Set(set)) => set.remove(target),
                _ => false,
            }
        } else {
            false
        };
        if removed {
            item.mark(ItemStatus::RDIRTY);
            let collection = item
                .references
                .get(name)
                .is_some_and(|s| s.cardinality().is_collection());
            self.queue(*owner, ChangeOp::Remove, name, collection);
        }
        Ok(removed)
    }

    /// Install `owner` in `peer.peer_attr`.
    fn link(
        &mut self,
        source: &dyn ItemSource,
        peer: ItemId,
        peer_attr: &str,
        owner: ItemId,
        key: Option<&str>,
    ) -> ItemResult<()> {
        self.ensure_loaded(source, &peer)?;
        let (attr, back) = self.ref_attribute(&peer, peer_attr)?;
        if attr.cardinality == Cardinality::Single {
            let displaced = self.item(&peer)?.single_ref(peer_attr);
            if displaced == Some(owner) {
                return Ok(());
            }
            if let Some(displaced) = displaced {
                // The peer pointed back at a third item; that item's forward
                // link to the peer goes away.
                if self.ensure_loaded(source, &displaced).is_ok() {
                    self.detach_ref(&displaced, &back, &peer)?;
                }
            }
            let item = self.item_mut(&peer)?;
            item.references
                .set(peer_attr, RefSlot::Single(ItemRef::Resolved(owner)));
            item.mark(ItemStatus::RDIRTY);
            self.queue(peer, ChangeOp::Set, peer_attr, false);
            return Ok(());
        }

        let dict_key = match key {
            Some(k) => k.to_string(),
            None => self
                .items
                .get(&owner)
                .and_then(|i| i.name.clone())
                .unwrap_or_else(|| owner.to_string()),
        };
        let slot = self.slot_mut(&peer, peer_attr, attr.cardinality)?;
        let inserted = match slot {
            RefSlot::Dict(_) => insert_member(slot, owner, Some(&dict_key)),
            _ => insert_member(slot, owner, None),
        }
        .map_err(|e| match e {
            InsertError::Item(e) => e,
            InsertError::MissingKey => ItemError::BadRef {
                item: peer,
                name: peer_attr.to_string(),
                reason: "dict reference needs a key".into(),
            },
        })?;
        if inserted {
            self.item_mut(&peer)?.mark(ItemStatus::RDIRTY);
            self.queue(peer, ChangeOp::Add, peer_attr, true);
        }
        Ok(())
    }

    /// Remove `owner` from `peer.peer_attr`. A peer that no longer exists
    /// has nothing to sever.
    fn unlink(
        &mut self,
        source: &dyn ItemSource,
        peer: ItemId,
        peer_attr: &str,
        owner: ItemId,
    ) -> ItemResult<()> {
        match self.ensure_loaded(source, &peer) {
            Ok(()) => {}
            Err(ItemError::NoSuchItem(_)) => {
                warn!(item = %owner, peer = %peer, "peer missing while unlinking");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.detach_ref(&peer, peer_attr, &owner)?;
        Ok(())
    }

    /// The slot `owner.name`, created empty if absent.
    fn slot_mut(
        &mut self,
        owner: &ItemId,
        name: &str,
        cardinality: Cardinality,
    ) -> ItemResult<&mut RefSlot> {
        let item = self.item_mut(owner)?;
        if let Some(existing) = item.references.get(name) {
            if existing.cardinality() != cardinality {
                return Err(ItemError::CardinalityMismatch {
                    item: *owner,
                    name: name.to_string(),
                    expected: cardinality,
                    actual: existing.cardinality().to_string(),
                });
            }
        } else {
            item.references.set(name, RefSlot::empty(cardinality));
        }
        item.references
            .get_mut(name)
            .ok_or_else(|| ItemError::NoValue {
                item: *owner,
                name: name.to_string(),
            })
    }

    /// The declaration of reference attribute `name` on `owner`'s kind and
    /// its inverse name.
    fn ref_attribute(&self, owner: &ItemId, name: &str) -> ItemResult<(Attribute, String)> {
        let kind = self.item(owner)?.kind.ok_or_else(|| ItemError::BadRef {
            item: *owner,
            name: name.to_string(),
            reason: "item has no kind".into(),
        })?;
        let attr = self.declared(&kind, name)?;
        let other_name = self.schema.get_other_name(&kind, name)?.ok_or_else(|| {
            SchemaError::UndefinedOtherName {
                kind: self.schema.kind_path(&kind),
                name: name.to_string(),
            }
        })?;
        Ok((attr, other_name))
    }

    fn declared(&self, kind: &KindId, name: &str) -> ItemResult<Attribute> {
        self.schema
            .get_attribute(kind, name, true)?
            .ok_or_else(|| {
                ItemError::Schema(SchemaError::NoSuchAttribute {
                    kind: self.schema.kind_path(kind),
                    name: name.to_string(),
                })
            })
    }

    fn verify_target(
        &self,
        owner: &ItemId,
        name: &str,
        attr: &Attribute,
        target: ItemId,
    ) -> ItemResult<()> {
        if let Some(type_id) = &attr.type_id {
            let kind_of = |id: &ItemId| self.kind_of(id);
            if !self
                .schema
                .recognizes(type_id, &Value::SingleRef(target), &kind_of)
            {
                return Err(ItemError::TypeMismatch {
                    item: *owner,
                    name: name.to_string(),
                    detail: format!("{target} is not of the declared kind"),
                });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Deletion and copy
    // -----------------------------------------------------------------------

    /// Mark an item deleted, severing every bidirectional reference it
    /// holds. Cached children are deleted with it.
    pub fn delete_item(&mut self, source: &dyn ItemSource, id: &ItemId) -> ItemResult<()> {
        self.ensure_loaded(source, id)?;
        let children: Vec<ItemId> = self
            .items
            .values()
            .filter(|i| i.parent == Some(*id) && !i.is_deleted())
            .map(|i| i.id)
            .collect();
        for child in children {
            self.delete_item(source, &child)?;
        }
        for name in self.item(id)?.references.names() {
            self.remove_value(source, id, &name)?;
        }
        let item = self.item_mut(id)?;
        item.status.insert(ItemStatus::DELETED);
        item.status.insert(ItemStatus::VDIRTY | ItemStatus::RDIRTY);
        debug!(item = %id, "item deleted");
        Ok(())
    }

    /// Copy an item, applying each attribute's copy policy.
    ///
    /// `copies` maps originals to their copies; references to an item
    /// already copied in this operation point at its copy, which also makes
    /// cascades terminate on cycles. With `Copy`/`Link` the copy shares its
    /// peers, so a single-valued inverse on a peer moves to the copy.
    pub fn copy_item(
        &mut self,
        source: &dyn ItemSource,
        id: &ItemId,
        parent: Option<ItemId>,
        name: Option<String>,
        copies: &mut HashMap<ItemId, ItemId>,
    ) -> ItemResult<ItemId> {
        if let Some(copy) = copies.get(id) {
            return Ok(*copy);
        }
        self.ensure_loaded(source, id)?;
        let original = self.item(id)?.clone();
        let schema = self.schema.clone();
        let policy = |attr_name: &str| -> CopyPolicy {
            original
                .kind
                .and_then(|k| schema.get_attribute(&k, attr_name, true).ok().flatten())
                .map(|a| a.copy_policy)
                .unwrap_or_default()
        };

        let mut copy = Item::new(self.view, original.kind);
        copy.parent = parent;
        copy.name = name;
        copy.class = original.class.clone();
        copy.values = original.values.copy_filtered(|n| {
            policy(n) != CopyPolicy::Remove
                && !original.values.flags(n).contains(ValueFlags::NOINHERIT)
        });
        for attr_name in copy.values.names() {
            if let Some(AttrValue::Single(Value::SingleRef(target))) = copy.values.get(&attr_name) {
                if let Some(mapped) = copies.get(target).copied() {
                    copy.values
                        .set(&attr_name, AttrValue::Single(Value::SingleRef(mapped)));
                }
            }
        }
        copy.mark(ItemStatus::VDIRTY);
        let copy_id = copy.id;
        copies.insert(*id, copy_id);
        self.insert_item(copy)?;

        for ref_name in original.references.names() {
            let ref_policy = policy(&ref_name);
            if ref_policy == CopyPolicy::Remove {
                continue;
            }
            let Some(slot) = original.references.get(&ref_name) else {
                continue;
            };
            let members: Vec<(ItemId, Option<String>)> = match slot {
                RefSlot::None => Vec::new(),
                RefSlot::Single(r) => vec![(r.id(), None)],
                RefSlot::List(list) => list
                    .entries()
                    .iter()
                    .map(|e| (e.key.id(), e.alias.clone()))
                    .collect(),
                RefSlot::Dict(dict) => dict
                    .lists
                    .iter()
                    .flat_map(|(k, list)| list.keys().into_iter().map(|id| (id, Some(k.clone()))))
                    .collect(),
                RefSlot::Set(set) => set.iter().map(|id| (*id, None)).collect(),
            };
            for (target, key) in members {
                let target = match copies.get(&target) {
                    Some(mapped) => *mapped,
                    None if ref_policy == CopyPolicy::Cascade => {
                        let peer = self.item(&target).ok().map(|p| (p.parent, p.name.clone()));
                        let (peer_parent, peer_name) = peer.unwrap_or((None, None));
                        self.copy_item(source, &target, peer_parent, peer_name, copies)?
                    }
                    None => target,
                };
                if slot.cardinality() == Cardinality::Single {
                    self.set_ref(source, &copy_id, &ref_name, Some(target))?;
                } else {
                    self.add_ref(source, &copy_id, &ref_name, target, key.as_deref())?;
                }
            }
        }
        debug!(item = %id, copy = %copy_id, "item copied");
        Ok(copy_id)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Validate every cached item. Problems are logged; the result is
    /// `true` only if none were found.
    pub fn check(&mut self, source: &dyn ItemSource, repair: bool) -> bool {
        let mut ok = true;
        for id in self.ids() {
            ok &= self.check_item(source, &id, repair);
        }
        ok
    }

    /// Validate one item's values and references.
    ///
    /// Values are checked against their declarations. Each reference must
    /// resolve, its inverse must be declared on the peer, and the peer must
    /// point back; with `repair` a missing back-reference is reinstalled.
    pub fn check_item(&mut self, source: &dyn ItemSource, id: &ItemId, repair: bool) -> bool {
        let Some(item) = self.items.get_mut(id) else {
            return true;
        };
        let (kind, status) = (item.kind, item.status);
        let mut values = std::mem::take(&mut item.values);
        let schema = self.schema.clone();
        let items = &self.items;
        let kind_of = |id: &ItemId| items.get(id).and_then(|i| i.kind);
        let mut ok = values.check(*id, kind, status, &schema, &kind_of, repair);
        if let Some(item) = self.items.get_mut(id) {
            item.values = values;
        }

        let Some(kind) = kind else {
            return ok;
        };
        let slots: Vec<(String, Vec<ItemId>)> = match self.items.get(id) {
            Some(item) => item
                .references
                .names()
                .into_iter()
                .filter_map(|n| item.references.get(&n).map(|s| (n, s.targets())))
                .collect(),
            None => return ok,
        };
        for (name, targets) in slots {
            let other_name = match schema.get_other_name(&kind, &name) {
                Ok(Some(other)) => other,
                Ok(None) => {
                    error!(item = %id, name = %name, "reference attribute has no otherName");
                    ok = false;
                    continue;
                }
                Err(e) => {
                    error!(item = %id, name = %name, error = %e, "reference attribute not declared");
                    ok = false;
                    continue;
                }
            };
            for target in targets {
                if let Err(e) = self.ensure_loaded(source, &target) {
                    error!(item = %id, name = %name, target = %target, error = %e, "dangling reference");
                    ok = false;
                    continue;
                }
                if let Err(e) = self.ref_attribute(&target, &other_name) {
                    error!(
                        item = %id,
                        name = %name,
                        target = %target,
                        other_name = %other_name,
                        error = %e,
                        "otherName not declared on peer kind"
                    );
                    ok = false;
                    continue;
                }
                let points_back = self
                    .items
                    .get(&target)
                    .and_then(|peer| peer.references.get(&other_name))
                    .is_some_and(|slot| slot.contains(id));
                if points_back {
                    continue;
                }
                error!(
                    item = %id,
                    name = %name,
                    target = %target,
                    other_name = %other_name,
                    "peer does not reference back"
                );
                ok = false;
                if repair {
                    match self.link(source, target, &other_name, *id, None) {
                        Ok(()) => warn!(item = %id, target = %target, "back-reference repaired"),
                        Err(e) => error!(item = %id, target = %target, error = %e, "repair failed"),
                    }
                }
            }
        }
        self.fire_pending();
        ok
    }

    // -----------------------------------------------------------------------
    // Commit boundary
    // -----------------------------------------------------------------------

    pub fn clear_dirty(&mut self, id: &ItemId) {
        if let Some(item) = self.items.get_mut(id) {
            item.clear_dirty();
        }
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    fn queue(&mut self, item: ItemId, op: ChangeOp, name: &str, collection: bool) {
        if self.items.get(&item).is_some_and(Item::is_tracked) {
            self.pending.push(ChangeEvent {
                item,
                op,
                name: name.to_string(),
                collection,
            });
        }
    }

    fn fire_pending(&mut self) {
        for event in std::mem::take(&mut self.pending) {
            for observer in &self.observers {
                if event.collection {
                    observer.notify_change(event.item, event.op, &event.name);
                } else {
                    observer.fire_changes(event.item, event.op, &event.name);
                }
            }
        }
    }

    /// Fire queued notifications on success; drop them on failure.
    fn settle<T>(&mut self, result: ItemResult<T>) -> ItemResult<T> {
        if result.is_ok() {
            self.fire_pending();
        } else {
            self.pending.clear();
        }
        result
    }
}

impl std::fmt::Debug for ItemCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemCache")
            .field("view", &self.view)
            .field("items", &self.items.len())
            .field("observers", &self.observers.len())
            .field("verify", &self.verify)
            .finish()
    }
}

enum InsertError {
    Item(ItemError),
    MissingKey,
}

fn insert_member(slot: &mut RefSlot, id: ItemId, key: Option<&str>) -> Result<bool, InsertError> {
    match slot {
        RefSlot::List(list) => list
            .append(ItemRef::Resolved(id), key.map(str::to_string))
            .map_err(InsertError::Item),
        RefSlot::Set(set) => Ok(set.insert(id, true)),
        RefSlot::Dict(dict) => {
            let key = key.ok_or(InsertError::MissingKey)?;
            if dict.contains(&id) {
                return Ok(false);
            }
            dict.entry(key)
                .append(ItemRef::Resolved(id), None)
                .map_err(InsertError::Item)
        }
        RefSlot::None | RefSlot::Single(_) => Ok(false),
    }
}

fn apply_value_flags(item: &mut Item, name: &str, attr: &Attribute) {
    if !attr.persisted {
        item.values.set_flag(name, ValueFlags::TRANSIENT);
    }
    if attr.indexed {
        item.values.set_flag(name, ValueFlags::INDEXED);
    }
}

fn all_targets(item: &Item) -> Vec<ItemId> {
    item.references
        .iter()
        .flat_map(|(_, slot)| slot.targets())
        .collect()
}

fn dangling(e: ItemError, item: ItemId, name: &str, target: ItemId) -> ItemError {
    match e {
        ItemError::NoSuchItem(_) => ItemError::DanglingRef {
            item,
            name: name.to_string(),
            target,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use vor_schema::BuiltinType;

    struct Fixture {
        cache: ItemCache,
        person: KindId,
        group: KindId,
    }

    /// Person.friend <-> Person.friendOf (single/single),
    /// Group.members <-> Person.groups (list/set),
    /// Person.title (string literal).
    fn fixture() -> Fixture {
        let schema = Arc::new(Schema::new());
        let person = schema.define_kind("//Person", &[]).unwrap();
        let group = schema.define_kind("//Group", &[]).unwrap();
        schema
            .add_attribute(person, Attribute::reference("friend", Cardinality::Single, "friendOf"))
            .unwrap();
        schema
            .add_attribute(person, Attribute::reference("friendOf", Cardinality::Single, "friend"))
            .unwrap();
        schema
            .add_attribute(person, Attribute::reference("groups", Cardinality::Set, "members"))
            .unwrap();
        schema
            .add_attribute(
                person,
                Attribute::single("title", BuiltinType::String.type_id())
                    .with_initial_value("untitled"),
            )
            .unwrap();
        schema
            .add_attribute(person, Attribute::single("scratch", BuiltinType::String.type_id()).transient())
            .unwrap();
        schema
            .add_attribute(person, Attribute::single("total", BuiltinType::Long.type_id()))
            .unwrap();
        schema
            .add_attribute(group, Attribute::reference("members", Cardinality::List, "groups"))
            .unwrap();
        Fixture {
            cache: ItemCache::new(ViewId::new(), schema),
            person,
            group,
        }
    }

    impl Fixture {
        fn person(&mut self) -> ItemId {
            self.cache
                .new_item(&Detached, Some(self.person), None, None)
                .unwrap()
        }

        fn group(&mut self) -> ItemId {
            self.cache
                .new_item(&Detached, Some(self.group), None, None)
                .unwrap()
        }
    }

    // -----------------------------------------------------------------------
    // Creation and literals
    // -----------------------------------------------------------------------

    #[test]
    fn new_item_applies_initial_values() {
        let mut f = fixture();
        let a = f.person();
        let item = f.cache.item(&a).unwrap();
        assert_eq!(item.value("title").unwrap(), &AttrValue::from("untitled"));
        assert!(item.is_new());
        assert_eq!(item.class.as_deref(), Some("Item"));
    }

    #[test]
    fn transient_attributes_get_flagged() {
        let mut f = fixture();
        let a = f.person();
        f.cache
            .set_value(&a, "scratch", AttrValue::from("x"))
            .unwrap();
        assert!(f.cache.item(&a).unwrap().values.is_transient("scratch"));
    }

    #[test]
    fn literal_on_reference_attribute_is_bad_ref() {
        let mut f = fixture();
        let a = f.person();
        let err = f
            .cache
            .set_value(&a, "friend", AttrValue::from("x"))
            .unwrap_err();
        assert!(matches!(err, ItemError::BadRef { .. }));
    }

    #[test]
    fn undeclared_attribute_is_schema_error() {
        let mut f = fixture();
        let a = f.person();
        let err = f.cache.set_value(&a, "nope", AttrValue::from(1)).unwrap_err();
        assert!(matches!(
            err,
            ItemError::Schema(SchemaError::NoSuchAttribute { .. })
        ));
    }

    #[test]
    fn verify_mode_rejects_mismatches() {
        let mut f = fixture();
        f.cache.set_verify(true);
        let a = f.person();
        assert!(matches!(
            f.cache.set_value(&a, "title", AttrValue::from(3)),
            Err(ItemError::TypeMismatch { .. })
        ));
        assert!(matches!(
            f.cache.set_value(&a, "title", AttrValue::List(vec![])),
            Err(ItemError::CardinalityMismatch { .. })
        ));
    }

    #[test]
    fn integers_set_on_long_attributes_are_widened() {
        let mut f = fixture();
        let a = f.person();
        f.cache.set_value(&a, "total", Value::Int(7).into()).unwrap();
        assert_eq!(
            f.cache.item(&a).unwrap().value("total").unwrap(),
            &AttrValue::from(Value::Long(7))
        );
    }

    #[test]
    fn aspects_come_from_the_item_kind() {
        let mut f = fixture();
        let a = f.person();
        assert_eq!(
            f.cache.attribute_aspect(&a, "groups", Aspect::OtherName).unwrap(),
            Some(AspectValue::Name("members".into()))
        );
        assert_eq!(
            f.cache.attribute_aspect(&a, "scratch", Aspect::Persisted).unwrap(),
            Some(AspectValue::Flag(false))
        );
        assert!(f.cache.is_attribute_modifiable(&a, "title").unwrap());
        assert!(!f.cache.is_attribute_modifiable(&a, "nope").unwrap());

        let bare = f.cache.new_item(&Detached, None, None, None).unwrap();
        assert_eq!(f.cache.attribute_aspect(&bare, "title", Aspect::Type).unwrap(), None);
        assert!(f.cache.is_attribute_modifiable(&bare, "anything").unwrap());
    }

    // -----------------------------------------------------------------------
    // Bidirectional references
    // -----------------------------------------------------------------------

    #[test]
    fn single_refs_stay_bidirectional() {
        let mut f = fixture();
        let (a, b) = (f.person(), f.person());
        f.cache.set_ref(&Detached, &a, "friend", Some(b)).unwrap();
        assert_eq!(f.cache.item(&b).unwrap().single_ref("friendOf"), Some(a));

        f.cache.set_ref(&Detached, &a, "friend", None).unwrap();
        assert_eq!(f.cache.item(&b).unwrap().single_ref("friendOf"), None);
        assert!(!f.cache.item(&a).unwrap().has_value("friend"));
    }

    #[test]
    fn retargeting_severs_old_and_displaced_links() {
        let mut f = fixture();
        let (a, b, c) = (f.person(), f.person(), f.person());
        f.cache.set_ref(&Detached, &a, "friend", Some(b)).unwrap();
        // c takes b: b.friendOf moves to c, so a.friend must go.
        f.cache.set_ref(&Detached, &c, "friend", Some(b)).unwrap();
        assert_eq!(f.cache.item(&b).unwrap().single_ref("friendOf"), Some(c));
        assert_eq!(f.cache.item(&a).unwrap().single_ref("friend"), None);

        // c moves on to a: b is released.
        f.cache.set_ref(&Detached, &c, "friend", Some(a)).unwrap();
        assert_eq!(f.cache.item(&b).unwrap().single_ref("friendOf"), None);
        assert_eq!(f.cache.item(&a).unwrap().single_ref("friendOf"), Some(c));
    }

    #[test]
    fn collections_stay_bidirectional() {
        let mut f = fixture();
        let g = f.group();
        let (a, b) = (f.person(), f.person());
        assert!(f.cache.add_ref(&Detached, &g, "members", a, None).unwrap());
        assert!(f.cache.add_ref(&Detached, &g, "members", b, Some("second")).unwrap());
        assert!(!f.cache.add_ref(&Detached, &g, "members", a, None).unwrap());

        match f.cache.item(&a).unwrap().references.get("groups") {
            Some(RefSlot::Set(set)) => assert!(set.contains(&g)),
            other => panic!("unexpected slot {other:?}"),
        }
        match f.cache.item(&g).unwrap().references.get("members") {
            Some(RefSlot::List(list)) => {
                assert_eq!(list.keys(), vec![a, b]);
                assert_eq!(list.get_by_alias("second"), Some(b));
            }
            other => panic!("unexpected slot {other:?}"),
        }

        assert!(f.cache.remove_ref(&Detached, &g, "members", &a).unwrap());
        assert!(!f.cache.item(&a).unwrap().references.get("groups").unwrap().contains(&g));
    }

    #[test]
    fn removing_a_collection_unlinks_every_member() {
        let mut f = fixture();
        let g = f.group();
        let (a, b) = (f.person(), f.person());
        f.cache.add_ref(&Detached, &g, "members", a, None).unwrap();
        f.cache.add_ref(&Detached, &g, "members", b, None).unwrap();
        f.cache.remove_value(&Detached, &g, "members").unwrap();
        for p in [a, b] {
            let slot = f.cache.item(&p).unwrap().references.get("groups").unwrap();
            assert!(!slot.contains(&g));
        }
    }

    #[test]
    fn missing_target_is_dangling() {
        let mut f = fixture();
        let a = f.person();
        let err = f
            .cache
            .set_ref(&Detached, &a, "friend", Some(ItemId::new()))
            .unwrap_err();
        assert!(matches!(err, ItemError::DanglingRef { .. }));
        assert!(!f.cache.item(&a).unwrap().has_value("friend"));
    }

    #[test]
    fn failed_back_reference_rolls_back() {
        let mut f = fixture();
        let (a, b) = (f.person(), f.person());
        // A group has no "friendOf", so the backward link cannot be made.
        let g = f.group();
        f.cache.set_ref(&Detached, &a, "friend", Some(b)).unwrap();
        let err = f.cache.set_ref(&Detached, &a, "friend", Some(g)).unwrap_err();
        assert!(matches!(err, ItemError::Schema(_)));
        assert_eq!(f.cache.item(&a).unwrap().single_ref("friend"), Some(b));
        assert_eq!(f.cache.item(&b).unwrap().single_ref("friendOf"), Some(a));
        assert!(!f.cache.item(&g).unwrap().has_value("friendOf"));
    }

    #[test]
    fn view_mismatch_requires_import() {
        let mut f = fixture();
        let foreign = Item::new(ViewId::new(), Some(f.person));
        let id = foreign.id;
        assert!(matches!(
            f.cache.insert_item(foreign.clone()),
            Err(ItemError::ViewMismatch { .. })
        ));
        f.cache.import_item(foreign).unwrap();
        assert_eq!(f.cache.item(&id).unwrap().view, f.cache.view());
    }

    // -----------------------------------------------------------------------
    // Loading and unloading
    // -----------------------------------------------------------------------

    struct OneItem(Item);

    impl ItemSource for OneItem {
        fn fetch(&self, id: &ItemId) -> ItemResult<Option<Item>> {
            Ok((self.0.id == *id).then(|| self.0.clone()))
        }
    }

    #[test]
    fn unload_degrades_and_source_reloads() {
        let mut f = fixture();
        let (a, b) = (f.person(), f.person());
        f.cache.set_ref(&Detached, &a, "friend", Some(b)).unwrap();
        for id in [a, b] {
            f.cache.clear_dirty(&id);
        }
        assert_eq!(f.cache.ref_count(&a, true).unwrap(), 1);

        let b_item = f.cache.item(&b).unwrap().clone();
        assert!(f.cache.unload_item(&b));
        assert_eq!(f.cache.ref_count(&a, true).unwrap(), 0);
        assert_eq!(f.cache.ref_count(&a, false).unwrap(), 1);
        assert_eq!(
            f.cache.item(&a).unwrap().references.get("friend"),
            Some(&RefSlot::Single(ItemRef::Unresolved(b)))
        );

        let source = OneItem(b_item);
        assert_eq!(f.cache.resolve(&source, &a, "friend").unwrap(), vec![b]);
        assert_eq!(f.cache.ref_count(&a, true).unwrap(), 1);
    }

    #[test]
    fn dirty_items_are_not_unloaded() {
        let mut f = fixture();
        let a = f.person();
        assert!(!f.cache.unload_item(&a));
    }

    // -----------------------------------------------------------------------
    // Delete, copy, check
    // -----------------------------------------------------------------------

    #[test]
    fn delete_severs_references() {
        let mut f = fixture();
        let (a, b) = (f.person(), f.person());
        let g = f.group();
        f.cache.set_ref(&Detached, &a, "friend", Some(b)).unwrap();
        f.cache.add_ref(&Detached, &g, "members", a, None).unwrap();
        f.cache.delete_item(&Detached, &a).unwrap();

        assert!(f.cache.item(&a).unwrap().is_deleted());
        assert_eq!(f.cache.item(&b).unwrap().single_ref("friendOf"), None);
        assert!(!f.cache.item(&g).unwrap().references.get("members").unwrap().contains(&a));
    }

    #[test]
    fn copy_links_collections_and_cascades() {
        let mut f = fixture();
        let g = f.group();
        let a = f.person();
        f.cache.set_value(&a, "title", AttrValue::from("A")).unwrap();
        f.cache.add_ref(&Detached, &g, "members", a, None).unwrap();

        let mut copies = HashMap::new();
        let g2 = f
            .cache
            .copy_item(&Detached, &g, None, Some("copy".into()), &mut copies)
            .unwrap();
        // Default policy links: the copy shares the member.
        let members = f.cache.item(&g2).unwrap().references.get("members").unwrap().targets();
        assert_eq!(members, vec![a]);
        assert!(f.cache.item(&a).unwrap().references.get("groups").unwrap().contains(&g2));
        assert_eq!(copies.get(&g), Some(&g2));
    }

    #[test]
    fn copy_cascade_copies_peers() {
        let schema = Arc::new(Schema::new());
        let folder = schema.define_kind("//Folder", &[]).unwrap();
        schema
            .add_attribute(
                folder,
                Attribute::reference("children", Cardinality::List, "container")
                    .with_copy_policy(CopyPolicy::Cascade),
            )
            .unwrap();
        schema
            .add_attribute(folder, Attribute::reference("container", Cardinality::Single, "children"))
            .unwrap();
        let mut cache = ItemCache::new(ViewId::new(), schema);
        let root = cache.new_item(&Detached, Some(folder), None, None).unwrap();
        let child = cache.new_item(&Detached, Some(folder), None, None).unwrap();
        cache.add_ref(&Detached, &root, "children", child, None).unwrap();

        let mut copies = HashMap::new();
        let root2 = cache.copy_item(&Detached, &root, None, None, &mut copies).unwrap();
        let child2 = copies[&child];
        assert_ne!(child2, child);
        assert_eq!(
            cache.item(&root2).unwrap().references.get("children").unwrap().targets(),
            vec![child2]
        );
        assert_eq!(cache.item(&child2).unwrap().single_ref("container"), Some(root2));
        // The original pair is untouched.
        assert_eq!(cache.item(&child).unwrap().single_ref("container"), Some(root));
    }

    #[test]
    fn check_finds_and_repairs_broken_back_references() {
        let mut f = fixture();
        let (a, b) = (f.person(), f.person());
        f.cache.set_ref(&Detached, &a, "friend", Some(b)).unwrap();
        assert!(f.cache.check(&Detached, false));

        f.cache
            .get_mut(&b)
            .unwrap()
            .references
            .remove("friendOf");
        assert!(!f.cache.check(&Detached, false));
        assert!(!f.cache.check(&Detached, true));
        assert_eq!(f.cache.item(&b).unwrap().single_ref("friendOf"), Some(a));
        assert!(f.cache.check(&Detached, false));
    }

    #[test]
    fn check_reports_dangling_targets() {
        let mut f = fixture();
        let a = f.person();
        f.cache.get_mut(&a).unwrap().references.set(
            "friend",
            RefSlot::Single(ItemRef::Unresolved(ItemId::new())),
        );
        assert!(!f.cache.check(&Detached, true));
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    #[test]
    fn notifications_fire_for_both_sides() {
        let mut f = fixture();
        let observer = Arc::new(RecordingObserver::new());
        f.cache.add_observer(observer.clone());
        let (a, b) = (f.person(), f.person());
        observer.clear();

        f.cache.set_ref(&Detached, &a, "friend", Some(b)).unwrap();
        let events = observer.events();
        assert!(events.iter().any(|e| e.item == a && e.name == "friend"));
        assert!(events.iter().any(|e| e.item == b && e.name == "friendOf"));
    }

    #[test]
    fn nodirty_items_fire_nothing() {
        let mut f = fixture();
        let observer = Arc::new(RecordingObserver::new());
        f.cache.add_observer(observer.clone());
        let a = f.person();
        f.cache.get_mut(&a).unwrap().status = ItemStatus::NODIRTY;
        observer.clear();
        f.cache.set_value(&a, "title", AttrValue::from("quiet")).unwrap();
        assert!(observer.events().is_empty());
        assert!(!f.cache.item(&a).unwrap().is_dirty());
    }

    #[test]
    fn failed_operations_fire_nothing() {
        let mut f = fixture();
        let observer = Arc::new(RecordingObserver::new());
        f.cache.add_observer(observer.clone());
        let a = f.person();
        observer.clear();
        let _ = f.cache.set_ref(&Detached, &a, "friend", Some(ItemId::new()));
        assert!(observer.events().is_empty());
    }
}
