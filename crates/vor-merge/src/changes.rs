//! What another view committed to an item between two versions.
//!
//! Changes are read from the store, never from a live item: the base and
//! head records are compared value id by value id, and only the attributes
//! whose ids differ are decoded.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use vor_codec::{CodecError, Decoded, RefPayload, ValueReader};
use vor_item::{ListOp, RefList, RefSet};
use vor_schema::Schema;
use vor_store::{Backend, ItemRecord, RefListRecord};
use vor_types::{AttrValue, ItemId, ItemStatus, KindId, RefListId, ValueFlags, ValueId, Version};

use crate::error::{MergeError, MergeReason, MergeResult};

/// A change to the item itself rather than to one attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemChange {
    Kind {
        base: Option<KindId>,
        remote: Option<KindId>,
    },
    Parent {
        base: Option<ItemId>,
        remote: Option<ItemId>,
    },
    Name {
        base: Option<String>,
        remote: Option<String>,
    },
    Deleted,
}

/// How one attribute changed.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeKind {
    /// A literal was set. `base` is `Nil` if the attribute was absent.
    Literal { base: AttrValue, remote: AttrValue },
    /// The attribute is gone.
    Removed,
    /// A single reference now points at this target, or at nothing.
    SingleRef(Option<ItemId>),
    Set { base: RefSet, remote: RefSet },
    /// Structural delta of a reference list.
    ListDelta { list: RefListId, ops: Vec<ListOp> },
    /// Per-key deltas of a reference dict.
    DictDelta(BTreeMap<String, (RefListId, Vec<ListOp>)>),
}

impl ChangeKind {
    pub fn is_reference(&self) -> bool {
        !matches!(self, Self::Literal { .. } | Self::Removed)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AttributeChange {
    pub name: String,
    /// Persisted flags of the remote value record.
    pub flags: ValueFlags,
    pub change: ChangeKind,
}

/// Everything that changed on one item between `base_version` and
/// `remote_version`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeSet {
    pub item: ItemId,
    pub base_version: Version,
    pub remote_version: Version,
    /// The item has no record at `base_version`.
    pub created: bool,
    pub item_changes: Vec<ItemChange>,
    pub changes: Vec<AttributeChange>,
}

impl ChangeSet {
    pub fn new(item: ItemId, base_version: Version, remote_version: Version) -> Self {
        Self {
            item,
            base_version,
            remote_version,
            created: false,
            item_changes: Vec::new(),
            changes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.item_changes.is_empty() && self.changes.is_empty()
    }

    pub fn is_deleted(&self) -> bool {
        self.item_changes.contains(&ItemChange::Deleted)
    }

    pub fn change(&self, name: &str) -> Option<&AttributeChange> {
        self.changes.iter().find(|c| c.name == name)
    }
}

/// Collect the changes made to `item` after `base` up to `head`.
pub fn collect_changes(
    backend: &dyn Backend,
    schema: &Schema,
    item: &ItemId,
    base: Version,
    head: Version,
) -> MergeResult<ChangeSet> {
    let remote = backend.load_item(item, head)?.ok_or_else(|| {
        MergeError::conflict(
            MergeReason::Bug,
            *item,
            "*",
            format!("no record at or below version {head}"),
        )
    })?;
    let original = backend.load_item(item, base)?;
    let mut set = ChangeSet::new(*item, base, head);

    let Some(original) = original else {
        set.created = true;
        let collector = Collector::new(backend, schema, base, head, &remote, None);
        for (name, id) in &remote.values {
            set.changes.push(collector.change(name, None, id)?);
        }
        debug!(item = %item, base, head, changes = set.changes.len(), "item created remotely");
        return Ok(set);
    };

    if remote.is_deleted() {
        if !original.is_deleted() {
            set.item_changes.push(ItemChange::Deleted);
        }
        return Ok(set);
    }
    if original.kind != remote.kind {
        set.item_changes.push(ItemChange::Kind {
            base: original.kind,
            remote: remote.kind,
        });
    }
    if original.parent != remote.parent {
        set.item_changes.push(ItemChange::Parent {
            base: original.parent,
            remote: remote.parent,
        });
    }
    if original.name != remote.name {
        set.item_changes.push(ItemChange::Name {
            base: original.name.clone(),
            remote: remote.name.clone(),
        });
    }

    let collector = Collector::new(backend, schema, base, head, &remote, Some(&original));
    for (name, id) in &remote.values {
        let base_id = original.value_id(name);
        if base_id == Some(*id) {
            continue;
        }
        set.changes.push(collector.change(name, base_id.as_ref(), id)?);
    }
    let kept: BTreeSet<&str> = remote.values.iter().map(|(n, _)| n.as_str()).collect();
    for (name, _) in &original.values {
        if !kept.contains(name.as_str()) {
            set.changes.push(AttributeChange {
                name: name.clone(),
                flags: ValueFlags::NONE,
                change: ChangeKind::Removed,
            });
        }
    }

    debug!(
        item = %item,
        base,
        head,
        item_changes = set.item_changes.len(),
        changes = set.changes.len(),
        "changes collected"
    );
    Ok(set)
}

struct Collector<'a> {
    backend: &'a dyn Backend,
    reader: ValueReader<'a>,
    item: ItemId,
    base: Version,
    head: Version,
    base_schema: bool,
    head_schema: bool,
}

impl<'a> Collector<'a> {
    fn new(
        backend: &'a dyn Backend,
        schema: &'a Schema,
        base: Version,
        head: Version,
        remote: &ItemRecord,
        original: Option<&ItemRecord>,
    ) -> Self {
        Self {
            backend,
            reader: ValueReader::new(backend, schema),
            item: remote.item,
            base,
            head,
            base_schema: original.is_some_and(|o| o.status.contains(ItemStatus::CORESCHEMA)),
            head_schema: remote.status.contains(ItemStatus::CORESCHEMA),
        }
    }

    fn change(&self, name: &str, base_id: Option<&ValueId>, id: &ValueId) -> MergeResult<AttributeChange> {
        let (flags, remote) = self.decode(name, id, self.head_schema, self.head)?;
        let base = match base_id {
            Some(base_id) => Some(self.decode(name, base_id, self.base_schema, self.base)?.1),
            None => None,
        };
        let change = match remote {
            Decoded::Literal(remote) => ChangeKind::Literal {
                base: match base {
                    Some(Decoded::Literal(v)) => v,
                    _ => AttrValue::Nil,
                },
                remote,
            },
            Decoded::Ref(payload) => {
                let base = match base {
                    Some(Decoded::Ref(p)) => Some(p),
                    _ => None,
                };
                self.ref_change(payload, base)?
            }
        };
        Ok(AttributeChange {
            name: name.to_string(),
            flags,
            change,
        })
    }

    fn decode(
        &self,
        name: &str,
        id: &ValueId,
        with_schema: bool,
        version: Version,
    ) -> MergeResult<(ValueFlags, Decoded)> {
        let record = self
            .backend
            .load_value(id)?
            .ok_or_else(|| CodecError::LoadValue {
                item: self.item,
                name: name.to_string(),
                reason: format!("value {id} not found"),
            })?;
        let decoded = self.reader.read(&record, with_schema, version)?;
        Ok((decoded.flags, decoded.value))
    }

    fn ref_change(&self, remote: RefPayload, base: Option<RefPayload>) -> MergeResult<ChangeKind> {
        Ok(match remote {
            RefPayload::None => ChangeKind::SingleRef(None),
            RefPayload::Single(target) => ChangeKind::SingleRef(Some(target)),
            RefPayload::Set(remote) => ChangeKind::Set {
                base: match base {
                    Some(RefPayload::Set(set)) => set,
                    _ => RefSet::new(),
                },
                remote,
            },
            RefPayload::List { id, .. } => {
                let base_list = match base {
                    Some(RefPayload::List { id: base_id, .. }) => Some(base_id),
                    _ => None,
                };
                ChangeKind::ListDelta {
                    list: id,
                    ops: self.list_delta(base_list, id)?,
                }
            }
            RefPayload::Dict(entries) => {
                let base_lists: BTreeMap<String, RefListId> = match base {
                    Some(RefPayload::Dict(base)) => base.into_iter().collect(),
                    _ => BTreeMap::new(),
                };
                let mut deltas = BTreeMap::new();
                for (key, id) in &base_lists {
                    if !entries.iter().any(|(k, _)| k == key) {
                        let before = self.backend.load_ref_list(id, self.base)?.unwrap_or_default();
                        let ops = RefList::diff(&before, &RefListRecord::default());
                        deltas.insert(key.clone(), (*id, ops));
                    }
                }
                for (key, id) in entries {
                    let ops = self.list_delta(base_lists.get(&key).copied(), id)?;
                    if !ops.is_empty() {
                        deltas.insert(key, (id, ops));
                    }
                }
                ChangeKind::DictDelta(deltas)
            }
        })
    }

    fn list_delta(&self, base: Option<RefListId>, head: RefListId) -> MergeResult<Vec<ListOp>> {
        let before = match base {
            Some(id) => self.backend.load_ref_list(&id, self.base)?.unwrap_or_default(),
            None => RefListRecord::default(),
        };
        let after = self
            .backend
            .load_ref_list(&head, self.head)?
            .unwrap_or_default();
        Ok(RefList::diff(&before, &after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Fixture;
    use vor_item::{ItemRef, RefSlot};
    use vor_types::Value;

    #[test]
    fn only_changed_values_are_collected() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("title", Value::from("a").into());
        item.values.set("count", Value::Int(1).into());
        f.commit(&mut item, 1);
        item.values.set("count", Value::Int(2).into());
        f.commit(&mut item, 2);

        let set = collect_changes(&f.backend, &f.schema, &item.id, 1, 2).unwrap();
        assert!(!set.created);
        assert!(set.item_changes.is_empty());
        assert_eq!(set.changes.len(), 1);
        assert_eq!(
            set.change("count").unwrap().change,
            ChangeKind::Literal {
                base: AttrValue::from(Value::Int(1)),
                remote: AttrValue::from(Value::Int(2)),
            }
        );
    }

    #[test]
    fn removed_attributes_and_placement_are_collected() {
        let f = Fixture::new();
        let mut parent = f.item();
        f.commit(&mut parent, 1);
        let mut item = f.item();
        item.values.set("title", Value::from("a").into());
        f.commit(&mut item, 1);

        item.values.remove("title");
        item.set_placement(Some(parent.id), Some("renamed".into()));
        item.set_kind(Some(f.memo));
        f.commit(&mut item, 2);

        let set = collect_changes(&f.backend, &f.schema, &item.id, 1, 2).unwrap();
        assert_eq!(set.change("title").unwrap().change, ChangeKind::Removed);
        assert!(set.item_changes.contains(&ItemChange::Parent {
            base: None,
            remote: Some(parent.id),
        }));
        assert!(set.item_changes.contains(&ItemChange::Name {
            base: None,
            remote: Some("renamed".into()),
        }));
        assert!(set.item_changes.contains(&ItemChange::Kind {
            base: Some(f.note),
            remote: Some(f.memo),
        }));
    }

    #[test]
    fn list_changes_are_structural_deltas() {
        let f = Fixture::new();
        let (x, y) = (ItemId::new(), ItemId::new());
        let mut item = f.item();
        let mut list = RefList::new();
        list.append(ItemRef::Unresolved(x), None).unwrap();
        let list_id = list.id;
        item.references.set("children", RefSlot::List(list));
        f.commit(&mut item, 1);
        if let Some(RefSlot::List(list)) = item.references.get_mut("children") {
            list.append(ItemRef::Unresolved(y), None).unwrap();
        }
        f.commit(&mut item, 2);

        let set = collect_changes(&f.backend, &f.schema, &item.id, 1, 2).unwrap();
        assert_eq!(
            set.change("children").unwrap().change,
            ChangeKind::ListDelta {
                list: list_id,
                ops: vec![ListOp::Insert {
                    key: y,
                    after: Some(x),
                    alias: None,
                }],
            }
        );
        assert!(set.change("children").unwrap().change.is_reference());
    }

    #[test]
    fn dict_deltas_cover_dropped_keys() {
        let f = Fixture::new();
        let (x, y) = (ItemId::new(), ItemId::new());
        let mut item = f.item();
        let mut dict = vor_item::RefDict::new();
        dict.entry("top").append(ItemRef::Unresolved(x), None).unwrap();
        dict.entry("low").append(ItemRef::Unresolved(y), None).unwrap();
        item.references.set("shelves", RefSlot::Dict(dict));
        f.commit(&mut item, 1);
        if let Some(RefSlot::Dict(dict)) = item.references.get_mut("shelves") {
            dict.lists.remove("low");
        }
        f.commit(&mut item, 2);

        let set = collect_changes(&f.backend, &f.schema, &item.id, 1, 2).unwrap();
        let ChangeKind::DictDelta(deltas) = &set.change("shelves").unwrap().change else {
            panic!("expected a dict delta");
        };
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas["low"].1, vec![ListOp::Remove { key: y }]);
    }

    #[test]
    fn item_created_after_base_is_all_changes() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("title", Value::from("a").into());
        f.commit(&mut item, 3);

        let set = collect_changes(&f.backend, &f.schema, &item.id, 1, 3).unwrap();
        assert!(set.created);
        assert_eq!(
            set.change("title").unwrap().change,
            ChangeKind::Literal {
                base: AttrValue::Nil,
                remote: AttrValue::from("a"),
            }
        );
    }

    #[test]
    fn deletion_hides_attribute_changes() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("title", Value::from("a").into());
        f.commit(&mut item, 1);
        item.status.insert(ItemStatus::DELETED);
        f.commit(&mut item, 2);

        let set = collect_changes(&f.backend, &f.schema, &item.id, 1, 2).unwrap();
        assert!(set.is_deleted());
        assert!(set.changes.is_empty());
    }

    #[test]
    fn missing_head_record_is_a_bug() {
        let f = Fixture::new();
        let err = collect_changes(&f.backend, &f.schema, &ItemId::new(), 0, 1).unwrap_err();
        assert_eq!(err.reason(), Some(MergeReason::Bug));
    }
}
