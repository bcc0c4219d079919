//! Value record decoding and item reconstitution.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use uuid::Uuid;
use vor_item::{
    IndexKind, Item, ItemCache, ItemError, ItemRef, ListIndex, RefDict, RefList, RefSet, RefSlot,
};
use vor_schema::{BuiltinType, Schema};
use vor_store::{Backend, ItemRecord, ValueRecord};
use vor_types::{
    AttrValue, IndexId, ItemId, ItemStatus, KindId, Lob, LobId, RefListId, TypeId, Value,
    ValueFlags, ValueSet, Version, ViewId,
};

use crate::buffer::{ByteReader, StringField};
use crate::error::{CodecError, CodecResult};
use crate::format::{check_cardinality, is_named, DICT, LIST, NONE, REF, SET, SINGLE, TYPED};

/// A reference record, before its lists are fetched.
#[derive(Clone, Debug, PartialEq)]
pub enum RefPayload {
    None,
    Single(ItemId),
    List {
        id: RefListId,
        other_name: Option<String>,
        indexes: Vec<ListIndex>,
    },
    Dict(Vec<(String, RefListId)>),
    Set(RefSet),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Literal(AttrValue),
    Ref(RefPayload),
}

/// One decoded value record.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedValue {
    pub name: String,
    pub flags: ValueFlags,
    pub value: Decoded,
}

/// Decodes single value records.
pub struct ValueReader<'a> {
    backend: &'a dyn Backend,
    schema: &'a Schema,
}

impl<'a> ValueReader<'a> {
    pub fn new(backend: &'a dyn Backend, schema: &'a Schema) -> Self {
        Self { backend, schema }
    }

    /// Decode `record`. `version` selects the list index snapshots to
    /// restore; `with_schema` is the owning item's `CORESCHEMA` bit.
    pub fn read(
        &self,
        record: &ValueRecord,
        with_schema: bool,
        version: Version,
    ) -> CodecResult<DecodedValue> {
        let attr = match &record.attr {
            Some(id) => match self.schema.attribute(id) {
                Ok(attr) => Some(attr),
                Err(e) if is_named(record, with_schema) => {
                    debug!(attr = %id, error = %e, "attribute unknown, using embedded name");
                    None
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        let mut r = ByteReader::new(&record.data);
        let name = if is_named(record, with_schema) {
            r.symbol()?
        } else {
            attr.as_ref().map(|a| a.name.clone()).unwrap_or_default()
        };
        let flags = r.u8()?;
        let card = check_cardinality(flags, &name)?;

        let value = if flags & REF != 0 {
            Decoded::Ref(self.read_ref(&mut r, flags, card, version, &name)?)
        } else {
            let declared = attr.as_ref().and_then(|a| a.type_id);
            Decoded::Literal(self.read_literal(&mut r, flags, card, declared, &name)?)
        };
        Ok(DecodedValue {
            name,
            flags: record.flags,
            value,
        })
    }

    // -----------------------------------------------------------------------
    // Literals
    // -----------------------------------------------------------------------

    fn read_literal(
        &self,
        r: &mut ByteReader<'_>,
        flags: u8,
        card: u8,
        declared: Option<TypeId>,
        name: &str,
    ) -> CodecResult<AttrValue> {
        if card == SINGLE {
            let builtin = self.element_type(r, flags, declared, name)?;
            return Ok(AttrValue::Single(read_payload(r, builtin)?));
        }
        // The container's own type id, when present, is its element type.
        let elem = if flags & TYPED != 0 {
            Some(TypeId::from_bytes(r.uuid()?))
        } else {
            declared
        };
        let count = r.u32()? as usize;
        match card {
            LIST => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.read_single(r, elem, name)?);
                }
                Ok(AttrValue::List(values))
            }
            SET => {
                let mut values = ValueSet::new();
                for _ in 0..count {
                    values.insert(self.read_single(r, elem, name)?);
                }
                Ok(AttrValue::Set(values))
            }
            DICT => {
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let key = match self.read_single(r, None, name)? {
                        Value::Str(key) => key,
                        other => {
                            return Err(CodecError::LoadValue {
                                item: ItemId::nil(),
                                name: name.to_string(),
                                reason: format!("dict key is {}, not a string", other.type_name()),
                            })
                        }
                    };
                    map.insert(key, self.read_single(r, elem, name)?);
                }
                Ok(AttrValue::Dict(map))
            }
            _ => Err(CodecError::InvalidCardinality {
                name: name.to_string(),
                flags,
            }),
        }
    }

    fn read_single(
        &self,
        r: &mut ByteReader<'_>,
        declared: Option<TypeId>,
        name: &str,
    ) -> CodecResult<Value> {
        let flags = r.u8()?;
        let builtin = self.element_type(r, flags, declared, name)?;
        read_payload(r, builtin)
    }

    /// The codec type of the value following `flags`: the embedded type id
    /// when there is one, else the declared type.
    fn element_type(
        &self,
        r: &mut ByteReader<'_>,
        flags: u8,
        declared: Option<TypeId>,
        name: &str,
    ) -> CodecResult<BuiltinType> {
        let type_id = if flags & TYPED != 0 {
            TypeId::from_bytes(r.uuid()?)
        } else {
            declared.ok_or_else(|| CodecError::LoadValue {
                item: ItemId::nil(),
                name: name.to_string(),
                reason: "value has neither an embedded nor a declared type".to_string(),
            })?
        };
        Ok(self.schema.decode_type(&type_id)?)
    }

    // -----------------------------------------------------------------------
    // References
    // -----------------------------------------------------------------------

    fn read_ref(
        &self,
        r: &mut ByteReader<'_>,
        flags: u8,
        card: u8,
        version: Version,
        name: &str,
    ) -> CodecResult<RefPayload> {
        match card {
            NONE => Ok(RefPayload::None),
            SINGLE => Ok(RefPayload::Single(ItemId::from_bytes(r.uuid()?))),
            LIST => {
                let id = RefListId::from_bytes(r.uuid()?);
                let other_name = if flags & TYPED != 0 {
                    Some(r.symbol()?).filter(|s| !s.is_empty())
                } else {
                    None
                };
                let indexes = self.read_indexes(r, version)?;
                Ok(RefPayload::List {
                    id,
                    other_name,
                    indexes,
                })
            }
            DICT => {
                let count = r.u32()? as usize;
                let mut lists = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = match r.string()? {
                        StringField::Unicode(s) => s,
                        StringField::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
                    };
                    lists.push((key, RefListId::from_bytes(r.uuid()?)));
                }
                Ok(RefPayload::Dict(lists))
            }
            SET => {
                let repr = match r.string()? {
                    StringField::Unicode(s) => s,
                    StringField::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
                };
                RefSet::parse(&repr)
                    .map(RefPayload::Set)
                    .ok_or_else(|| CodecError::LoadValue {
                        item: ItemId::nil(),
                        name: name.to_string(),
                        reason: format!("malformed set {repr:?}"),
                    })
            }
            _ => Err(CodecError::InvalidCardinality {
                name: name.to_string(),
                flags,
            }),
        }
    }

    fn read_indexes(&self, r: &mut ByteReader<'_>, version: Version) -> CodecResult<Vec<ListIndex>> {
        let count = r.u16()? as usize;
        let mut indexes = Vec::with_capacity(count);
        for _ in 0..count {
            let name = r.symbol()?;
            let tag = r.u8()?;
            let id = IndexId::from_bytes(r.uuid()?);
            let kind = match tag {
                0 => IndexKind::Numeric,
                _ => IndexKind::Attribute(r.symbol()?),
            };
            let order = self
                .backend
                .load_index(&id, version)?
                .map(|data| ListIndex::order_from_bytes(&data))
                .unwrap_or_default();
            indexes.push(ListIndex {
                id,
                name,
                kind,
                order,
            });
        }
        Ok(indexes)
    }
}

fn read_payload(r: &mut ByteReader<'_>, builtin: BuiltinType) -> CodecResult<Value> {
    Ok(match builtin {
        BuiltinType::None => Value::None,
        BuiltinType::Boolean => match r.boolean()? {
            Some(b) => Value::Bool(b),
            None => Value::None,
        },
        BuiltinType::Integer => Value::Int(r.int()?),
        BuiltinType::Long => Value::Long(r.long()?),
        BuiltinType::Float => Value::Float(r.float()?),
        BuiltinType::String | BuiltinType::Bytes => match r.string()? {
            StringField::Unicode(s) => Value::Str(s),
            StringField::Bytes(b) => Value::Bytes(b),
        },
        BuiltinType::Uuid => Value::Uuid(Uuid::from_bytes(r.uuid()?)),
        BuiltinType::SingleRef => Value::SingleRef(ItemId::from_bytes(r.uuid()?)),
        BuiltinType::Lob => {
            let id = LobId::from_bytes(r.uuid()?);
            let indexed = r.boolean()? == Some(true);
            Value::Lob(Lob::pointer(id, indexed))
        }
    })
}

// ---------------------------------------------------------------------------
// After-load hooks
// ---------------------------------------------------------------------------

/// Work deferred until every item of a load is in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AfterLoadHook {
    /// The item's kind was not in the schema when it was read.
    SetKind { item: ItemId, kind: KindId },
    /// The item's parent was not found when it was read.
    Move { item: ItemId, parent: ItemId },
    /// Run the item class's load behavior.
    OnLoad { item: ItemId, kind: KindId },
}

impl AfterLoadHook {
    pub fn item(&self) -> ItemId {
        match self {
            Self::SetKind { item, .. } | Self::Move { item, .. } | Self::OnLoad { item, .. } => {
                *item
            }
        }
    }

    fn run(
        &self,
        schema: &Schema,
        cache: &mut ItemCache,
        exists: &dyn Fn(&ItemId) -> bool,
    ) -> CodecResult<()> {
        let id = self.item();
        let item = cache.get_mut(&id).ok_or(ItemError::NoSuchItem(id))?;
        match self {
            Self::SetKind { kind, .. } => {
                if !schema.has_kind(kind) {
                    return Err(CodecError::Load {
                        item: id,
                        reason: format!("kind {kind} not found"),
                    });
                }
                item.kind = Some(*kind);
                schema.item_class(kind)?.on_item_load(id);
            }
            Self::Move { parent, .. } => {
                if !exists(parent) {
                    return Err(CodecError::Load {
                        item: id,
                        reason: format!("parent {parent} not found"),
                    });
                }
                item.parent = Some(*parent);
            }
            Self::OnLoad { kind, .. } => schema.item_class(kind)?.on_item_load(id),
        }
        Ok(())
    }
}

/// Run `hooks`. A hook that fails is retried once after all the others
/// ran; failing again is fatal.
pub fn run_after_load_hooks(
    hooks: Vec<AfterLoadHook>,
    schema: &Schema,
    cache: &mut ItemCache,
    exists: &dyn Fn(&ItemId) -> bool,
) -> CodecResult<()> {
    let mut retry = Vec::new();
    for hook in hooks {
        if let Err(e) = hook.run(schema, cache, exists) {
            debug!(item = %hook.item(), error = %e, "after-load hook deferred");
            retry.push(hook);
        }
    }
    for hook in retry {
        hook.run(schema, cache, exists)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Turns item records back into items.
pub struct ItemReader<'a> {
    backend: &'a dyn Backend,
    schema: &'a Schema,
}

impl<'a> ItemReader<'a> {
    pub fn new(backend: &'a dyn Backend, schema: &'a Schema) -> Self {
        Self { backend, schema }
    }

    /// Rebuild the item of `record` in `view`. Kind and parent lookups that
    /// cannot be satisfied yet are pushed onto `hooks`.
    pub fn read_item(
        &self,
        record: &ItemRecord,
        view: ViewId,
        hooks: &mut Vec<AfterLoadHook>,
    ) -> CodecResult<Item> {
        let id = record.item;
        let with_schema = record.status.contains(ItemStatus::CORESCHEMA);

        let mut kind = record.kind;
        if let Some(k) = record.kind {
            if !self.schema.has_kind(&k) {
                if !with_schema {
                    return Err(CodecError::Load {
                        item: id,
                        reason: format!("kind {k} not found"),
                    });
                }
                warn!(item = %id, kind = %k, "kind not loaded yet, deferring");
                hooks.push(AfterLoadHook::SetKind { item: id, kind: k });
                kind = None;
            } else if !self.schema.item_class(&k)?.is_empty() {
                hooks.push(AfterLoadHook::OnLoad { item: id, kind: k });
            }
        }

        let mut item = Item::with_id(id, view, kind, record.status);
        item.version = record.version;
        item.name = record.name.clone();
        item.class = record.class.clone();
        if let Some(parent) = record.parent {
            if self.backend.load_item(&parent, record.version)?.is_some() {
                item.parent = Some(parent);
            } else {
                hooks.push(AfterLoadHook::Move { item: id, parent });
            }
        }

        let values = ValueReader::new(self.backend, self.schema);
        for (name, value_id) in &record.values {
            let stored = self
                .backend
                .load_value(value_id)?
                .ok_or_else(|| CodecError::LoadValue {
                    item: id,
                    name: name.clone(),
                    reason: format!("value record {value_id} not found"),
                })?;
            let decoded = values
                .read(&stored, with_schema, record.version)
                .map_err(|e| load_value_error(id, name, e))?;
            match decoded.value {
                Decoded::Literal(value) => item.values.set_loaded(name, value, decoded.flags),
                Decoded::Ref(payload) => {
                    let slot = self
                        .ref_slot(payload, record.version)
                        .map_err(|e| load_value_error(id, name, e))?;
                    item.references.set_loaded(name, slot, decoded.flags);
                }
            }
        }

        debug!(item = %id, version = record.version, values = record.values.len(), "item read");
        Ok(item)
    }

    fn ref_slot(&self, payload: RefPayload, version: Version) -> CodecResult<RefSlot> {
        Ok(match payload {
            RefPayload::None => RefSlot::None,
            RefPayload::Single(target) => RefSlot::Single(ItemRef::Unresolved(target)),
            RefPayload::List { id, indexes, .. } => {
                let mut list = self.ref_list(id, version)?;
                for index in indexes {
                    list.restore_index(index);
                }
                RefSlot::List(list)
            }
            RefPayload::Dict(lists) => {
                let mut dict = RefDict::new();
                for (key, id) in lists {
                    dict.lists.insert(key, self.ref_list(id, version)?);
                }
                RefSlot::Dict(dict)
            }
            RefPayload::Set(set) => RefSlot::Set(set),
        })
    }

    fn ref_list(&self, id: RefListId, version: Version) -> CodecResult<RefList> {
        Ok(match self.backend.load_ref_list(&id, version)? {
            Some(record) => RefList::from_record(id, &record),
            None => RefList::with_id(id),
        })
    }
}

/// Attach the item and attribute to a decode failure. Store failures pass
/// through unchanged.
fn load_value_error(item: ItemId, name: &str, error: CodecError) -> CodecError {
    match error {
        e @ CodecError::Store(_) => e,
        CodecError::LoadValue { item: at, reason, .. } if at.is_nil() => CodecError::LoadValue {
            item,
            name: name.to_string(),
            reason,
        },
        e @ CodecError::LoadValue { .. } => e,
        other => CodecError::LoadValue {
            item,
            name: name.to_string(),
            reason: other.to_string(),
        },
    }
}
