//! Applying another view's changes to a locally modified item.
//!
//! An attribute changed only remotely is taken over as if it had been
//! loaded. An attribute changed on both sides to the same value needs
//! nothing. Otherwise the collection kinds merge structurally and literals
//! go to the merge callback, then to the item's merge hook. Anything left
//! is a [`MergeError`]: a merge never picks a side on its own.

use std::sync::Arc;

use tracing::{debug, info, warn};
use vor_item::{Item, ItemCache, ItemRef, ItemResult, ListOp, RefDict, RefList, RefSlot};
use vor_schema::Schema;
use vor_store::Backend;
use vor_types::{
    AttrValue, ItemId, ItemStatus, MergeConflict, RefListId, Resolution, ValueFlags, ValueSet,
    Version,
};

use crate::changes::{collect_changes, AttributeChange, ChangeKind, ChangeSet, ItemChange};
use crate::error::{MergeError, MergeReason, MergeResult};

/// Decides literal conflicts.
pub type MergeCallback<'a> = &'a dyn Fn(&MergeConflict) -> Resolution;

/// A back-reference a merge left behind: `peer.name` still points at
/// `owner`, which no longer points back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DanglingRef {
    pub peer: ItemId,
    pub name: String,
    pub owner: ItemId,
}

/// What one merge did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Remote changes taken over.
    pub applied: usize,
    /// Conflicts settled by the callback or an item hook.
    pub resolved: usize,
    pub dangling: Vec<DanglingRef>,
}

impl MergeOutcome {
    pub fn add(&mut self, other: MergeOutcome) {
        self.applied += other.applied;
        self.resolved += other.resolved;
        self.dangling.extend(other.dangling);
    }
}

/// Collect the changes to `id` between `base` and `head` and apply them to
/// its cached copy.
pub fn merge_item(
    backend: &dyn Backend,
    cache: &mut ItemCache,
    id: &ItemId,
    base: Version,
    head: Version,
    ask: Option<MergeCallback<'_>>,
) -> MergeResult<MergeOutcome> {
    let schema = Arc::clone(cache.schema());
    let changes = collect_changes(backend, &schema, id, base, head)?;
    apply_changes(cache, &changes, ask)
}

/// Apply `changes` to the cached item they describe.
///
/// The item is only replaced once every change applied; a refused merge
/// leaves it as it was. On success the item is `MERGED` at the remote
/// version. Back-references this leaves on peers are returned, not yet
/// removed: see [`unlink_dangling`].
pub fn apply_changes(
    cache: &mut ItemCache,
    changes: &ChangeSet,
    ask: Option<MergeCallback<'_>>,
) -> MergeResult<MergeOutcome> {
    let schema = Arc::clone(cache.schema());
    let mut item = cache.item(&changes.item)?.clone();
    let mut merger = Merger {
        schema: &schema,
        cache: &*cache,
        changes,
        ask,
        outcome: MergeOutcome::default(),
    };
    merger.item_changes(&mut item)?;
    if !changes.is_deleted() {
        for change in &changes.changes {
            merger.attribute(&mut item, change)?;
        }
    }
    let outcome = merger.outcome;

    item.status.insert(ItemStatus::MERGED);
    item.version = changes.remote_version;
    let id = item.id;
    cache.insert_item(item)?;
    debug!(
        item = %id,
        base = changes.base_version,
        remote = changes.remote_version,
        applied = outcome.applied,
        resolved = outcome.resolved,
        "item merged"
    );
    Ok(outcome)
}

/// Remove the back-references named by `dangling` from cached peers
/// without dirtying them. Returns the number removed.
pub fn unlink_dangling(cache: &mut ItemCache, dangling: &[DanglingRef]) -> usize {
    let mut removed = 0;
    for d in dangling {
        let Some(peer) = cache.get_mut(&d.peer) else {
            continue;
        };
        if peer.references.unload_target(&d.name, &d.owner) {
            removed += 1;
        }
    }
    if removed > 0 {
        info!(removed, "dangling references unlinked");
    }
    removed
}

/// Three-way merge of literal sets: local membership plus what `remote`
/// added since `base`, minus what it removed.
pub fn merge_value_sets(local: &ValueSet, base: &ValueSet, remote: &ValueSet) -> ValueSet {
    let mut merged = local.clone();
    for value in remote.iter() {
        if !base.contains(value) {
            merged.insert(value.clone());
        }
    }
    for value in base.iter() {
        if !remote.contains(value) {
            merged.remove(value);
        }
    }
    merged
}

struct Merger<'a> {
    schema: &'a Schema,
    cache: &'a ItemCache,
    changes: &'a ChangeSet,
    ask: Option<MergeCallback<'a>>,
    outcome: MergeOutcome,
}

impl Merger<'_> {
    // -----------------------------------------------------------------------
    // Kind, placement and deletion
    // -----------------------------------------------------------------------

    fn item_changes(&mut self, item: &mut Item) -> MergeResult<()> {
        if item.is_deleted() {
            if self.changes.is_deleted() || self.changes.is_empty() {
                return Ok(());
            }
            return Err(MergeError::conflict(
                MergeReason::Change,
                item.id,
                "*",
                "deleted locally, changed remotely",
            ));
        }

        let changes = self.changes;
        let mut placed = false;
        for change in &changes.item_changes {
            match change {
                ItemChange::Deleted => self.deleted(item)?,
                ItemChange::Kind { base, remote } => {
                    if item.kind == *remote {
                        continue;
                    }
                    if item.kind != *base {
                        return Err(MergeError::conflict(
                            MergeReason::Kind,
                            item.id,
                            "kind",
                            format!("local {:?}, remote {:?}", item.kind, remote),
                        ));
                    }
                    item.kind = *remote;
                    self.outcome.applied += 1;
                }
                ItemChange::Parent { base, remote } => {
                    if item.parent == *remote {
                        continue;
                    }
                    if item.parent != *base {
                        return Err(MergeError::conflict(
                            MergeReason::Move,
                            item.id,
                            "parent",
                            format!("local {:?}, remote {:?}", item.parent, remote),
                        ));
                    }
                    item.parent = *remote;
                    placed = true;
                    self.outcome.applied += 1;
                }
                ItemChange::Name { base, remote } => {
                    if item.name == *remote {
                        continue;
                    }
                    if item.name != *base {
                        return Err(MergeError::conflict(
                            MergeReason::Rename,
                            item.id,
                            "name",
                            format!("local {:?}, remote {:?}", item.name, remote),
                        ));
                    }
                    item.name.clone_from(remote);
                    placed = true;
                    self.outcome.applied += 1;
                }
            }
        }
        if placed {
            self.check_name(item)?;
        }
        Ok(())
    }

    fn deleted(&mut self, item: &mut Item) -> MergeResult<()> {
        if item.is_dirty() {
            return Err(MergeError::conflict(
                MergeReason::Change,
                item.id,
                "*",
                "changed locally, deleted remotely",
            ));
        }
        for name in item.references.names() {
            if let Some(slot) = item.references.remove_loaded(&name) {
                self.unlinked(item, &name, slot.targets());
            }
        }
        for name in item.values.names() {
            item.values.remove_loaded(&name);
        }
        item.status.insert(ItemStatus::DELETED);
        self.outcome.applied += 1;
        Ok(())
    }

    /// Siblings may not share a name.
    fn check_name(&self, item: &Item) -> MergeResult<()> {
        let Some(name) = &item.name else {
            return Ok(());
        };
        let taken = self.cache.ids().into_iter().any(|id| {
            id != item.id
                && self.cache.get(&id).is_some_and(|other| {
                    !other.is_deleted()
                        && other.parent == item.parent
                        && other.name.as_ref() == Some(name)
                })
        });
        if taken {
            return Err(MergeError::conflict(
                MergeReason::Name,
                item.id,
                "name",
                format!("{name} is taken under {:?}", item.parent),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    fn attribute(&mut self, item: &mut Item, change: &AttributeChange) -> MergeResult<()> {
        let name = change.name.as_str();
        match &change.change {
            ChangeKind::Literal { base, remote } => {
                self.literal(item, name, change.flags, base, remote)
            }
            ChangeKind::Removed => self.removed(item, name),
            ChangeKind::SingleRef(target) => self.single_ref(item, name, change.flags, *target),
            ChangeKind::Set { base, remote } => {
                if !ref_dirty(item, name) {
                    item.references
                        .set_loaded(name, RefSlot::Set(remote.clone()), change.flags);
                } else if let Some(RefSlot::Set(local)) = item.references.get_mut(name) {
                    local.merge(base, remote);
                } else {
                    return Err(self.ref_conflict(item, name, "set changed remotely"));
                }
                self.outcome.applied += 1;
                Ok(())
            }
            ChangeKind::ListDelta { list, ops } => {
                let dirty = ref_dirty(item, name);
                let mut local = match item.references.get(name) {
                    Some(RefSlot::List(local)) => local.clone(),
                    Some(RefSlot::None) | None => RefList::with_id(*list),
                    Some(_) => return Err(self.shape_mismatch(item, name, "list")),
                };
                let applied = local
                    .apply(ops)
                    .map_err(|e| self.ref_conflict(item, name, &e.to_string()))?;
                if !dirty {
                    local.id = *list;
                }
                debug!(item = %item.id, name, ops = ops.len(), applied, "list delta replayed");
                self.store_collection(item, name, RefSlot::List(local), dirty, change.flags);
                Ok(())
            }
            ChangeKind::DictDelta(deltas) => {
                let dirty = ref_dirty(item, name);
                let mut local = match item.references.get(name) {
                    Some(RefSlot::Dict(local)) => local.clone(),
                    Some(RefSlot::None) | None => RefDict::new(),
                    Some(_) => return Err(self.shape_mismatch(item, name, "dict")),
                };
                for (key, (id, ops)) in deltas {
                    replay(&mut local, key, *id, ops, dirty)
                        .map_err(|e| self.ref_conflict(item, name, &format!("{key}: {e}")))?;
                }
                local.lists.retain(|_, list| !list.is_empty());
                self.store_collection(item, name, RefSlot::Dict(local), dirty, change.flags);
                Ok(())
            }
        }
    }

    fn literal(
        &mut self,
        item: &mut Item,
        name: &str,
        flags: ValueFlags,
        base: &AttrValue,
        remote: &AttrValue,
    ) -> MergeResult<()> {
        if !item.values.is_dirty(name) {
            item.values.set_loaded(name, remote.clone(), flags);
            self.outcome.applied += 1;
            return Ok(());
        }
        let local = item.values.get(name).cloned().unwrap_or(AttrValue::Nil);
        let local = self.conform(item, name, local)?;
        let remote = &self.conform(item, name, remote.clone())?;
        if local == *remote {
            item.values.set(name, local);
            return Ok(());
        }
        if let (AttrValue::Set(local), AttrValue::Set(remote)) = (&local, remote) {
            let base = match base {
                AttrValue::Set(base) => base.clone(),
                _ => ValueSet::new(),
            };
            item.values
                .set(name, AttrValue::Set(merge_value_sets(local, &base, remote)));
            self.outcome.applied += 1;
            return Ok(());
        }
        let value = self.resolve(item, name, local, remote.clone())?;
        let value = self.conform(item, name, value)?;
        item.values.set(name, value);
        self.outcome.resolved += 1;
        Ok(())
    }

    fn removed(&mut self, item: &mut Item, name: &str) -> MergeResult<()> {
        if item.references.contains(name) {
            if ref_dirty(item, name) {
                return Err(self.ref_conflict(item, name, "changed locally, removed remotely"));
            }
            if let Some(slot) = item.references.remove_loaded(name) {
                self.unlinked(item, name, slot.targets());
            }
            self.outcome.applied += 1;
            return Ok(());
        }
        if !item.values.is_dirty(name) {
            if item.values.remove_loaded(name).is_some() {
                self.outcome.applied += 1;
            }
            return Ok(());
        }
        let Some(local) = item.values.get(name).cloned() else {
            return Ok(());
        };
        let value = self.resolve(item, name, local, AttrValue::Nil)?;
        let value = self.conform(item, name, value)?;
        item.values.set(name, value);
        self.outcome.resolved += 1;
        Ok(())
    }

    fn single_ref(
        &mut self,
        item: &mut Item,
        name: &str,
        flags: ValueFlags,
        target: Option<ItemId>,
    ) -> MergeResult<()> {
        let local = match item.references.get(name) {
            Some(RefSlot::Single(r)) => Some(r.id()),
            _ => None,
        };
        if ref_dirty(item, name) {
            if local != target {
                return Err(self.ref_conflict(
                    item,
                    name,
                    &format!("local {local:?}, remote {target:?}"),
                ));
            }
            return Ok(());
        }
        if local == target {
            return Ok(());
        }
        if let Some(old) = local {
            self.unlinked(item, name, vec![old]);
        }
        let slot = match target {
            Some(t) => RefSlot::Single(ItemRef::Unresolved(t)),
            None => RefSlot::None,
        };
        item.references.set_loaded(name, slot, flags);
        self.outcome.applied += 1;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Ask the callback, then the item's merge hook.
    fn resolve(
        &self,
        item: &Item,
        name: &str,
        local: AttrValue,
        remote: AttrValue,
    ) -> MergeResult<AttrValue> {
        let conflict = MergeConflict {
            item: item.id,
            kind: item.kind,
            name: name.to_string(),
            base_version: self.changes.base_version,
            remote_version: self.changes.remote_version,
            local,
            remote,
        };
        if let Some(ask) = self.ask {
            if let Resolution::Value(value) = ask(&conflict) {
                return Ok(value);
            }
        }
        if let Some(kind) = &item.kind {
            if let Some(value) = self.schema.item_class(kind)?.on_item_merge(&conflict) {
                return Ok(value);
            }
        }
        Err(MergeError::conflict(
            MergeReason::Value,
            item.id,
            name,
            format!("local {:?}, remote {:?}", conflict.local, conflict.remote),
        ))
    }

    /// `value` as the attribute stores it.
    fn conform(&self, item: &Item, name: &str, value: AttrValue) -> MergeResult<AttrValue> {
        let Some(kind) = &item.kind else {
            return Ok(value);
        };
        Ok(match self.schema.get_attribute(kind, name, true)? {
            Some(attr) => attr.conform(value),
            None => value,
        })
    }

    fn store_collection(
        &mut self,
        item: &mut Item,
        name: &str,
        mut slot: RefSlot,
        dirty: bool,
        flags: ValueFlags,
    ) {
        if dirty {
            item.references.set(name, slot);
        } else {
            match &mut slot {
                RefSlot::List(list) => list.clear_dirty(),
                RefSlot::Dict(dict) => dict.lists.values_mut().for_each(RefList::clear_dirty),
                _ => {}
            }
            item.references.set_loaded(name, slot, flags);
        }
        self.outcome.applied += 1;
    }

    /// Queue the inverse side of `item.name -> targets` for cleanup.
    fn unlinked(&mut self, item: &Item, name: &str, targets: Vec<ItemId>) {
        let other_name = match &item.kind {
            Some(kind) => match self.schema.get_other_name(kind, name) {
                Ok(other_name) => other_name,
                Err(e) => {
                    warn!(item = %item.id, name, error = %e, "no inverse for merged reference");
                    None
                }
            },
            None => None,
        };
        let Some(other_name) = other_name else {
            return;
        };
        for peer in targets {
            self.outcome.dangling.push(DanglingRef {
                peer,
                name: other_name.clone(),
                owner: item.id,
            });
        }
    }

    fn ref_conflict(&self, item: &Item, name: &str, detail: &str) -> MergeError {
        MergeError::conflict(MergeReason::Ref, item.id, name, detail)
    }

    fn shape_mismatch(&self, item: &Item, name: &str, expected: &str) -> MergeError {
        MergeError::conflict(
            MergeReason::Bug,
            item.id,
            name,
            format!("remote {expected} over a local reference of another cardinality"),
        )
    }
}

fn ref_dirty(item: &Item, name: &str) -> bool {
    item.references.is_dirty(name)
        || match item.references.get(name) {
            Some(RefSlot::List(list)) => list.is_dirty(),
            Some(RefSlot::Dict(dict)) => dict.is_dirty(),
            _ => false,
        }
}

fn replay(
    dict: &mut RefDict,
    key: &str,
    id: RefListId,
    ops: &[ListOp],
    dirty: bool,
) -> ItemResult<()> {
    let list = dict
        .lists
        .entry(key.to_string())
        .or_insert_with(|| RefList::with_id(id));
    list.apply(ops)?;
    if !dirty {
        list.id = id;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Fixture;
    use proptest::prelude::*;
    use vor_item::RefSet;
    use vor_schema::ItemBehavior;
    use vor_types::Value;

    /// Commit `setup` as version 1, cache it, commit `remote` on top as
    /// version 2 and apply `local` to the cached copy.
    fn diverge(
        f: &Fixture,
        setup: impl FnOnce(&mut Item),
        remote: impl FnOnce(&mut Item),
        local: impl FnOnce(&mut Item),
    ) -> (ItemCache, ItemId, ChangeSet) {
        let mut item = f.item();
        setup(&mut item);
        f.commit(&mut item, 1);
        let mut cache = f.cache();
        f.load(&mut cache, &item.id, 1);
        remote(&mut item);
        f.commit(&mut item, 2);
        local(cache.get_mut(&item.id).unwrap());
        let changes = collect_changes(&f.backend, &f.schema, &item.id, 1, 2).unwrap();
        (cache, item.id, changes)
    }

    fn set_count(item: &mut Item, count: i32) {
        item.values.set("count", Value::Int(count).into());
        item.mark(ItemStatus::VDIRTY);
    }

    fn count(cache: &ItemCache, id: &ItemId) -> AttrValue {
        cache.get(id).unwrap().value("count").unwrap().clone()
    }

    fn no_conflict(_: &MergeConflict) -> Resolution {
        panic!("no conflict expected")
    }

    #[derive(Debug)]
    struct KeepRemote;

    impl ItemBehavior for KeepRemote {
        fn name(&self) -> &str {
            "KeepRemote"
        }

        fn on_item_merge(&self, conflict: &MergeConflict) -> Option<AttrValue> {
            Some(conflict.remote.clone())
        }
    }

    // -----------------------------------------------------------------------
    // Literals
    // -----------------------------------------------------------------------

    #[test]
    fn remote_only_change_is_taken_over_without_asking() {
        let f = Fixture::new();
        let (mut cache, id, changes) = diverge(
            &f,
            |i| set_count(i, 0),
            |i| set_count(i, 1),
            |i| {
                i.values.set("title", Value::from("local").into());
                i.mark(ItemStatus::VDIRTY);
            },
        );
        let outcome = apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.resolved, 0);

        let item = cache.get(&id).unwrap();
        assert_eq!(item.value("count").unwrap(), &AttrValue::from(Value::Int(1)));
        assert!(!item.values.is_dirty("count"));
        assert!(item.values.is_dirty("title"));
        assert!(item.status.contains(ItemStatus::MERGED));
        assert_eq!(item.version, 2);
    }

    #[test]
    fn same_change_on_both_sides_is_silent() {
        let f = Fixture::new();
        let (mut cache, id, changes) =
            diverge(&f, |i| set_count(i, 0), |i| set_count(i, 3), |i| set_count(i, 3));
        let outcome = apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap();
        assert_eq!(outcome, MergeOutcome::default());
        assert_eq!(count(&cache, &id), AttrValue::from(Value::Int(3)));
    }

    #[test]
    fn same_number_as_int_and_long_is_not_a_conflict() {
        let f = Fixture::new();
        let set_total = |i: &mut Item| {
            i.values.set("total", Value::Int(7).into());
            i.mark(ItemStatus::VDIRTY);
        };
        let (mut cache, id, changes) = diverge(&f, |i| set_count(i, 0), set_total, set_total);
        apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap();
        assert_eq!(
            cache.get(&id).unwrap().value("total").unwrap(),
            &AttrValue::from(Value::Long(7))
        );
    }

    #[test]
    fn unresolved_conflict_is_refused_and_leaves_the_item_alone() {
        let f = Fixture::new();
        let (mut cache, id, changes) =
            diverge(&f, |i| set_count(i, 0), |i| set_count(i, 1), |i| set_count(i, 2));
        let err = apply_changes(&mut cache, &changes, None).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Value));

        let item = cache.get(&id).unwrap();
        assert_eq!(count(&cache, &id), AttrValue::from(Value::Int(2)));
        assert!(!item.status.contains(ItemStatus::MERGED));
        assert_eq!(item.version, 1);
    }

    #[test]
    fn callback_answer_is_stored_exactly() {
        let f = Fixture::new();
        let (mut cache, id, changes) =
            diverge(&f, |i| set_count(i, 0), |i| set_count(i, 1), |i| set_count(i, 2));
        let seen = std::cell::RefCell::new(None);
        let ask = |c: &MergeConflict| {
            *seen.borrow_mut() = Some((c.local.clone(), c.remote.clone()));
            Resolution::Value(AttrValue::from(Value::Int(7)))
        };
        let outcome = apply_changes(&mut cache, &changes, Some(&ask)).unwrap();
        assert_eq!(outcome.resolved, 1);
        assert_eq!(
            seen.into_inner(),
            Some((AttrValue::from(Value::Int(2)), AttrValue::from(Value::Int(1))))
        );
        assert_eq!(count(&cache, &id), AttrValue::from(Value::Int(7)));
        assert!(cache.get(&id).unwrap().values.is_dirty("count"));
    }

    #[test]
    fn default_answer_defers_to_the_item_hook() {
        let f = Fixture::new();
        f.schema.set_behavior(f.note, Arc::new(KeepRemote)).unwrap();
        let (mut cache, id, changes) =
            diverge(&f, |i| set_count(i, 0), |i| set_count(i, 1), |i| set_count(i, 2));
        let ask = |_: &MergeConflict| Resolution::Default;
        apply_changes(&mut cache, &changes, Some(&ask)).unwrap();
        assert_eq!(count(&cache, &id), AttrValue::from(Value::Int(1)));
    }

    #[test]
    fn hook_alone_resolves_without_a_callback() {
        let f = Fixture::new();
        f.schema.set_behavior(f.note, Arc::new(KeepRemote)).unwrap();
        let (mut cache, id, changes) =
            diverge(&f, |i| set_count(i, 0), |i| set_count(i, 1), |i| set_count(i, 2));
        let outcome = apply_changes(&mut cache, &changes, None).unwrap();
        assert_eq!(outcome.resolved, 1);
        assert_eq!(count(&cache, &id), AttrValue::from(Value::Int(1)));
    }

    #[test]
    fn literal_sets_merge_three_way() {
        let f = Fixture::new();
        let labels = |vals: &[&str]| -> AttrValue {
            AttrValue::Set(vals.iter().map(|v| Value::from(*v)).collect())
        };
        let (mut cache, id, changes) = diverge(
            &f,
            |i| {
                i.values.set("labels", labels(&["a", "b"]));
            },
            |i| {
                i.values.set("labels", labels(&["a", "b", "c"]));
            },
            |i| {
                i.values.set("labels", labels(&["a"]));
                i.mark(ItemStatus::VDIRTY);
            },
        );
        apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap();
        assert_eq!(
            cache.get(&id).unwrap().value("labels").unwrap(),
            &labels(&["a", "c"])
        );
    }

    #[test]
    fn remote_removal_of_a_clean_value_drops_it() {
        let f = Fixture::new();
        let (mut cache, id, changes) = diverge(
            &f,
            |i| {
                i.values.set("title", Value::from("gone").into());
            },
            |i| {
                i.values.remove("title");
            },
            |i| set_count(i, 5),
        );
        apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap();
        let item = cache.get(&id).unwrap();
        assert!(!item.has_value("title"));
        assert!(!item.values.is_dirty("title"));
    }

    #[test]
    fn remote_removal_of_a_changed_value_is_a_conflict() {
        let f = Fixture::new();
        let (mut cache, _, changes) = diverge(
            &f,
            |i| {
                i.values.set("title", Value::from("a").into());
            },
            |i| {
                i.values.remove("title");
            },
            |i| {
                i.values.set("title", Value::from("b").into());
                i.mark(ItemStatus::VDIRTY);
            },
        );
        let ask = |c: &MergeConflict| {
            assert!(c.remote.is_nil());
            Resolution::Value(c.local.clone())
        };
        let outcome = apply_changes(&mut cache, &changes, Some(&ask)).unwrap();
        assert_eq!(outcome.resolved, 1);
    }

    // -----------------------------------------------------------------------
    // References
    // -----------------------------------------------------------------------

    #[test]
    fn single_ref_change_queues_the_old_peer_for_cleanup() {
        let f = Fixture::new();
        let mut old = f.item();
        let mut new = f.item();
        let mut item = f.item();
        let mut children = RefList::new();
        children
            .append(ItemRef::Unresolved(item.id), None)
            .unwrap();
        old.references.set("children", RefSlot::List(children));
        item.references
            .set("container", RefSlot::Single(ItemRef::Unresolved(old.id)));
        f.commit(&mut old, 1);
        f.commit(&mut new, 1);
        f.commit(&mut item, 1);

        let mut cache = f.cache();
        f.load(&mut cache, &old.id, 1);
        f.load(&mut cache, &item.id, 1);
        item.references
            .set("container", RefSlot::Single(ItemRef::Unresolved(new.id)));
        f.commit(&mut item, 2);
        set_count(cache.get_mut(&item.id).unwrap(), 1);

        let outcome = merge_item(&f.backend, &mut cache, &item.id, 1, 2, None).unwrap();
        assert_eq!(
            outcome.dangling,
            vec![DanglingRef {
                peer: old.id,
                name: "children".into(),
                owner: item.id,
            }]
        );
        assert_eq!(cache.get(&item.id).unwrap().single_ref("container"), Some(new.id));

        assert_eq!(unlink_dangling(&mut cache, &outcome.dangling), 1);
        let old = cache.get(&old.id).unwrap();
        assert!(!old.reference("children").unwrap().contains(&item.id));
        assert!(!old.is_dirty());
        assert!(old.references.dirty_names().is_empty());
    }

    #[test]
    fn conflicting_single_refs_are_refused() {
        let f = Fixture::new();
        let (a, b, c) = (ItemId::new(), ItemId::new(), ItemId::new());
        let (mut cache, _, changes) = diverge(
            &f,
            |i| {
                i.references
                    .set("container", RefSlot::Single(ItemRef::Unresolved(a)));
            },
            |i| {
                i.references
                    .set("container", RefSlot::Single(ItemRef::Unresolved(b)));
            },
            |i| {
                i.references
                    .set("container", RefSlot::Single(ItemRef::Unresolved(c)));
                i.mark(ItemStatus::RDIRTY);
            },
        );
        let err = apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Ref));
    }

    #[test]
    fn list_deltas_from_both_sides_combine() {
        let f = Fixture::new();
        let (x, y, z, w) = (ItemId::new(), ItemId::new(), ItemId::new(), ItemId::new());
        let append = |i: &mut Item, key: ItemId| {
            if let Some(RefSlot::List(list)) = i.references.get_mut("children") {
                list.append(ItemRef::Unresolved(key), None).unwrap();
            }
        };
        let (mut cache, id, changes) = diverge(
            &f,
            |i| {
                let mut list = RefList::new();
                list.append(ItemRef::Unresolved(x), None).unwrap();
                list.append(ItemRef::Unresolved(y), None).unwrap();
                i.references.set("children", RefSlot::List(list));
            },
            |i| append(i, z),
            |i| {
                append(i, w);
                i.mark(ItemStatus::RDIRTY);
            },
        );
        apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap();
        let Ok(RefSlot::List(list)) = cache.get(&id).unwrap().reference("children") else {
            panic!("expected a list");
        };
        assert_eq!(list.keys(), vec![x, y, z, w]);
        assert!(list.is_dirty());
    }

    #[test]
    fn remote_only_list_change_stays_clean() {
        let f = Fixture::new();
        let (x, y) = (ItemId::new(), ItemId::new());
        let (mut cache, id, changes) = diverge(
            &f,
            |i| {
                let mut list = RefList::new();
                list.append(ItemRef::Unresolved(x), None).unwrap();
                i.references.set("children", RefSlot::List(list));
            },
            |i| {
                if let Some(RefSlot::List(list)) = i.references.get_mut("children") {
                    list.remove(&x);
                    list.append(ItemRef::Unresolved(y), None).unwrap();
                }
            },
            |i| set_count(i, 1),
        );
        apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap();
        let item = cache.get(&id).unwrap();
        let Ok(RefSlot::List(list)) = item.reference("children") else {
            panic!("expected a list");
        };
        assert_eq!(list.keys(), vec![y]);
        assert!(!list.is_dirty());
        assert!(!item.references.is_dirty("children"));
    }

    fn children(cache: &ItemCache, id: &ItemId) -> RefList {
        match cache.get(id).unwrap().reference("children") {
            Ok(RefSlot::List(list)) => list.clone(),
            _ => panic!("expected a list"),
        }
    }

    fn alias(i: &mut Item, key: ItemId, alias: &str) {
        if let Some(RefSlot::List(list)) = i.references.get_mut("children") {
            list.set_alias(&key, Some(alias.into())).unwrap();
        }
    }

    #[test]
    fn same_alias_on_different_entries_is_refused() {
        let f = Fixture::new();
        let (x, y) = (ItemId::new(), ItemId::new());
        let (mut cache, id, changes) = diverge(
            &f,
            |i| {
                let mut list = RefList::new();
                list.append(ItemRef::Unresolved(x), None).unwrap();
                list.append(ItemRef::Unresolved(y), None).unwrap();
                i.references.set("children", RefSlot::List(list));
            },
            |i| alias(i, x, "first"),
            |i| {
                alias(i, y, "first");
                i.mark(ItemStatus::RDIRTY);
            },
        );
        let err = apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Ref));

        let list = children(&cache, &id);
        assert_eq!(list.get_by_alias("first"), Some(y));
        assert_eq!(list.alias_of(&x), None);
    }

    #[test]
    fn alias_of_a_locally_removed_entry_is_refused() {
        let f = Fixture::new();
        let (x, y) = (ItemId::new(), ItemId::new());
        let (mut cache, id, changes) = diverge(
            &f,
            |i| {
                let mut list = RefList::new();
                list.append(ItemRef::Unresolved(x), None).unwrap();
                list.append(ItemRef::Unresolved(y), None).unwrap();
                i.references.set("children", RefSlot::List(list));
            },
            |i| alias(i, x, "first"),
            |i| {
                if let Some(RefSlot::List(list)) = i.references.get_mut("children") {
                    list.remove(&x);
                }
                i.mark(ItemStatus::RDIRTY);
            },
        );
        let err = apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Ref));
        assert_eq!(children(&cache, &id).keys(), vec![y]);
    }

    #[test]
    fn dict_ops_on_locally_removed_entries_are_refused() {
        let f = Fixture::new();
        let x = ItemId::new();
        let (mut cache, _, changes) = diverge(
            &f,
            |i| {
                let mut dict = RefDict::new();
                dict.entry("top").append(ItemRef::Unresolved(x), None).unwrap();
                i.references.set("shelves", RefSlot::Dict(dict));
            },
            |i| {
                if let Some(RefSlot::Dict(dict)) = i.references.get_mut("shelves") {
                    dict.entry("top").set_alias(&x, Some("pinned".into())).unwrap();
                }
            },
            |i| {
                if let Some(RefSlot::Dict(dict)) = i.references.get_mut("shelves") {
                    dict.entry("top").remove(&x);
                }
                i.mark(ItemStatus::RDIRTY);
            },
        );
        let err = apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Ref));
    }

    #[test]
    fn ref_sets_merge_three_way() {
        let f = Fixture::new();
        let (a, b, c) = (ItemId::new(), ItemId::new(), ItemId::new());
        let (mut cache, id, changes) = diverge(
            &f,
            |i| {
                let mut set = RefSet::new();
                set.insert(a, false);
                set.insert(b, false);
                i.references.set("friends", RefSlot::Set(set));
            },
            |i| {
                if let Some(RefSlot::Set(set)) = i.references.get_mut("friends") {
                    set.insert(c, false);
                }
            },
            |i| {
                if let Some(RefSlot::Set(set)) = i.references.get_mut("friends") {
                    set.remove(&b);
                }
                i.mark(ItemStatus::RDIRTY);
            },
        );
        apply_changes(&mut cache, &changes, Some(&no_conflict)).unwrap();
        let slot = cache.get(&id).unwrap().reference("friends").unwrap();
        assert_eq!(slot.targets().len(), 2);
        assert!(slot.contains(&a));
        assert!(slot.contains(&c));
        assert!(!slot.contains(&b));
    }

    // -----------------------------------------------------------------------
    // Kind, placement and deletion
    // -----------------------------------------------------------------------

    #[test]
    fn kind_changed_on_both_sides_is_refused() {
        let f = Fixture::new();
        let (mut cache, _, changes) = diverge(
            &f,
            |_| {},
            |i| i.set_kind(Some(f.memo)),
            |i| i.set_kind(Some(f.letter)),
        );
        let err = apply_changes(&mut cache, &changes, None).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Kind));
    }

    #[test]
    fn remote_kind_change_is_taken_over() {
        let f = Fixture::new();
        let (mut cache, id, changes) =
            diverge(&f, |_| {}, |i| i.set_kind(Some(f.memo)), |i| set_count(i, 1));
        apply_changes(&mut cache, &changes, None).unwrap();
        assert_eq!(cache.get(&id).unwrap().kind, Some(f.memo));
    }

    #[test]
    fn placement_conflicts_name_their_reason() {
        let f = Fixture::new();
        let mut here = f.item();
        let mut there = f.item();
        f.commit(&mut here, 1);
        f.commit(&mut there, 1);

        let (mut cache, _, changes) = diverge(
            &f,
            |_| {},
            |i| i.set_placement(Some(here.id), None),
            |i| i.set_placement(Some(there.id), None),
        );
        let err = apply_changes(&mut cache, &changes, None).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Move));

        let (mut cache, _, changes) = diverge(
            &f,
            |_| {},
            |i| i.set_placement(None, Some("left".into())),
            |i| i.set_placement(None, Some("right".into())),
        );
        let err = apply_changes(&mut cache, &changes, None).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Rename));
    }

    #[test]
    fn merged_name_taken_by_a_sibling_is_refused() {
        let f = Fixture::new();
        let (mut cache, _, changes) = diverge(
            &f,
            |_| {},
            |i| i.set_placement(None, Some("taken".into())),
            |i| set_count(i, 1),
        );
        let mut sibling = Item::new(cache.view(), Some(f.note));
        sibling.name = Some("taken".into());
        cache.insert_item(sibling).unwrap();
        let err = apply_changes(&mut cache, &changes, None).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Name));
    }

    #[test]
    fn delete_against_change_is_refused_both_ways() {
        let f = Fixture::new();
        let (mut cache, _, changes) = diverge(
            &f,
            |i| set_count(i, 0),
            |i| i.status.insert(ItemStatus::DELETED),
            |i| set_count(i, 1),
        );
        let err = apply_changes(&mut cache, &changes, None).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Change));

        let (mut cache, _, changes) = diverge(
            &f,
            |i| set_count(i, 0),
            |i| set_count(i, 1),
            |i| i.status.insert(ItemStatus::DELETED | ItemStatus::VDIRTY),
        );
        let err = apply_changes(&mut cache, &changes, None).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Change));
    }

    #[test]
    fn remote_delete_of_a_clean_item_marks_it_deleted() {
        let f = Fixture::new();
        let (mut cache, id, changes) = diverge(
            &f,
            |i| set_count(i, 0),
            |i| i.status.insert(ItemStatus::DELETED),
            |_| {},
        );
        apply_changes(&mut cache, &changes, None).unwrap();
        let item = cache.get(&id).unwrap();
        assert!(item.is_deleted());
        assert!(item.values.is_empty());
    }

    // -----------------------------------------------------------------------
    // Value set merge
    // -----------------------------------------------------------------------

    fn value_set(members: &[u8]) -> ValueSet {
        members.iter().map(|m| Value::Int(i32::from(*m))).collect()
    }

    proptest! {
        #[test]
        fn value_set_merge_honors_both_sides(
            base in proptest::collection::vec(0u8..16, 0..8),
            local in proptest::collection::vec(0u8..16, 0..8),
            remote in proptest::collection::vec(0u8..16, 0..8),
        ) {
            let (b, l, r) = (value_set(&base), value_set(&local), value_set(&remote));
            let merged = merge_value_sets(&l, &b, &r);
            for v in r.iter().filter(|v| !b.contains(v)) {
                prop_assert!(merged.contains(v));
            }
            for v in b.iter().filter(|v| !r.contains(v)) {
                prop_assert!(!merged.contains(v));
            }
            for v in l.iter().filter(|v| !b.contains(v) || r.contains(v)) {
                prop_assert!(merged.contains(v));
            }
        }
    }
}
