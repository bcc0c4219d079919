//! Item and value record encoding.

use tracing::debug;
use vor_item::{IndexKind, Item, ItemError, RefList, RefSlot};
use vor_schema::{Attribute, BuiltinType, Schema, TypeDef};
use vor_store::{Backend, ItemRecord, ValueRecord};
use vor_types::{
    AttrValue, IndexId, ItemId, ItemStatus, KindId, LobId, TypeId, Value, ValueFlags, ValueId,
    Version,
};

use crate::buffer::ByteWriter;
use crate::error::{CodecError, CodecResult};
use crate::format::{DICT, LIST, NONE, REF, SET, SINGLE, TYPED, VALUE};

/// Knobs for [`ItemWriter`].
#[derive(Clone, Copy, Debug)]
pub struct WriteOptions {
    /// Items with `SCHEMA` status embed attribute names and type ids.
    pub self_describing: bool,
    /// Route values of indexed attributes to the full-text sink.
    pub index_text: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            self_describing: true,
            index_text: true,
        }
    }
}

/// What one [`ItemWriter::write_item`] call stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub values_written: usize,
    /// Unchanged attributes that point at the previous record's value.
    pub values_reused: usize,
    pub ref_lists: usize,
    pub lobs: usize,
    pub bytes: usize,
}

/// The attribute a record is being written for.
struct Target<'n> {
    item: ItemId,
    name: &'n str,
    version: Version,
}

/// Encodes items into value records and an item record.
///
/// Only dirty attributes get new value records; unchanged ones reuse the
/// previous record's value id, so write cost follows the change, not the
/// item size.
pub struct ItemWriter<'a> {
    backend: &'a dyn Backend,
    schema: &'a Schema,
    kind_of: &'a dyn Fn(&ItemId) -> Option<KindId>,
    options: WriteOptions,
    lobs: Vec<(LobId, bool)>,
    indexes: Vec<IndexId>,
    stats: WriteStats,
}

impl<'a> ItemWriter<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        schema: &'a Schema,
        kind_of: &'a dyn Fn(&ItemId) -> Option<KindId>,
        options: WriteOptions,
    ) -> Self {
        Self {
            backend,
            schema,
            kind_of,
            options,
            lobs: Vec::new(),
            indexes: Vec::new(),
            stats: WriteStats::default(),
        }
    }

    /// Whether `status` makes an item self-describing.
    pub fn with_schema(&self, status: ItemStatus) -> bool {
        status.contains(ItemStatus::CORESCHEMA)
            || (self.options.self_describing && status.contains(ItemStatus::SCHEMA))
    }

    /// Write `item` as of `version`.
    ///
    /// `previous` is the item's record at the version it was loaded at; new
    /// and merged items are written in full regardless.
    pub fn write_item(
        &mut self,
        item: &Item,
        version: Version,
        previous: Option<&ItemRecord>,
    ) -> CodecResult<WriteStats> {
        self.stats = WriteStats::default();
        let with_schema = self.with_schema(item.status);
        let full = item.status.intersects(ItemStatus::NEW | ItemStatus::MERGED) || item.version == 0;
        let previous = if full { None } else { previous };

        let mut status = item.status.saved();
        if with_schema {
            status.insert(ItemStatus::CORESCHEMA);
        }
        let mut record = ItemRecord {
            item: item.id,
            version,
            kind: item.kind,
            status,
            parent: item.parent,
            name: item.name.clone(),
            class: item.class.clone(),
            values: Vec::new(),
            dirties: Vec::new(),
        };

        if !item.is_deleted() {
            for name in item.values.names() {
                if item.values.is_transient(&name) {
                    continue;
                }
                let attr = self.attribute(item, &name)?;
                if attr.as_ref().is_some_and(|a| !a.persisted) {
                    continue;
                }
                let id = match previous {
                    Some(prev) if !item.values.is_dirty(&name) => self.unchanged(item, prev, &name)?,
                    _ => {
                        let value = item.values.get(&name).unwrap_or(&AttrValue::Nil);
                        let flags = item.values.flags(&name);
                        record.dirties.push(name.clone());
                        self.write_value(item, &name, value, flags, version, with_schema, attr.as_ref())?
                    }
                };
                record.values.push((name, id));
            }
            for name in item.references.names() {
                if item.references.is_transient(&name) {
                    continue;
                }
                let Some(slot) = item.references.get(&name) else {
                    continue;
                };
                let attr = self.attribute(item, &name)?;
                if attr.as_ref().is_some_and(|a| !a.persisted) {
                    continue;
                }
                let dirty = item.references.is_dirty(&name) || slot_dirty(slot);
                let id = match previous {
                    Some(prev) if !dirty => self.unchanged(item, prev, &name)?,
                    _ => {
                        let flags = item.references.flags(&name);
                        record.dirties.push(name.clone());
                        self.write_ref(item, &name, slot, flags, version, with_schema, attr.as_ref())?
                    }
                };
                record.values.push((name, id));
            }
            // Removed attributes.
            for name in item.dirty_names() {
                if record.value_id(&name).is_none() && !record.dirties.contains(&name) {
                    record.dirties.push(name);
                }
            }
        }

        debug!(
            item = %item.id,
            version,
            written = self.stats.values_written,
            reused = self.stats.values_reused,
            "item written"
        );
        self.backend.save_item(record)?;
        Ok(std::mem::take(&mut self.stats))
    }

    fn attribute(&self, item: &Item, name: &str) -> CodecResult<Option<Attribute>> {
        match item.kind {
            Some(kind) => Ok(self.schema.get_attribute(&kind, name, true)?),
            None => Ok(None),
        }
    }

    fn unchanged(&mut self, item: &Item, previous: &ItemRecord, name: &str) -> CodecResult<ValueId> {
        self.stats.values_reused += 1;
        previous
            .value_id(name)
            .ok_or_else(|| CodecError::MissingUnchangedValue {
                item: item.id,
                name: name.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Literal records
    // -----------------------------------------------------------------------

    /// Encode and save one literal attribute; returns the new value id.
    #[allow(clippy::too_many_arguments)]
    pub fn write_value(
        &mut self,
        item: &Item,
        name: &str,
        value: &AttrValue,
        flags: ValueFlags,
        version: Version,
        with_schema: bool,
        attr: Option<&Attribute>,
    ) -> CodecResult<ValueId> {
        if value.is_nil() {
            return Err(CodecError::PersistNil {
                name: name.to_string(),
            });
        }
        if let Some(attr) = attr {
            if value.cardinality() != Some(attr.cardinality) {
                return Err(ItemError::CardinalityMismatch {
                    item: item.id,
                    name: name.to_string(),
                    expected: attr.cardinality,
                    actual: value
                        .cardinality()
                        .map_or("nil".to_string(), |c| c.to_string()),
                }
                .into());
            }
        }
        self.lobs.clear();
        self.indexes.clear();
        let target = Target {
            item: item.id,
            name,
            version,
        };
        let attr_type = attr.and_then(|a| a.type_id);
        let indexed = attr.is_some_and(|a| a.indexed) || flags.contains(ValueFlags::INDEXED);

        let mut w = ByteWriter::new();
        if with_schema || attr.is_none() {
            w.symbol(name)?;
        }
        match value {
            AttrValue::Nil => {}
            AttrValue::Single(v) => self.write_single(&mut w, &target, v, with_schema, attr_type)?,
            AttrValue::List(values) => {
                let elem = self.write_type(&mut w, &target, VALUE | LIST, None, with_schema, attr_type)?.0;
                w.count_u32(values.len(), "element count")?;
                for v in values {
                    self.write_single(&mut w, &target, v, with_schema, elem)?;
                }
            }
            AttrValue::Set(values) => {
                let elem = self.write_type(&mut w, &target, VALUE | SET, None, with_schema, attr_type)?.0;
                w.count_u32(values.len(), "element count")?;
                for v in values.iter() {
                    self.write_single(&mut w, &target, v, with_schema, elem)?;
                }
            }
            AttrValue::Dict(map) => {
                let elem = self.write_type(&mut w, &target, VALUE | DICT, None, with_schema, attr_type)?.0;
                w.count_u32(map.len(), "element count")?;
                for (key, v) in map {
                    self.write_single(&mut w, &target, &Value::Str(key.clone()), false, None)?;
                    self.write_single(&mut w, &target, v, with_schema, elem)?;
                }
            }
        }

        if indexed && self.options.index_text {
            self.index_text(&target, attr.map(|a| a.id), value)?;
        }

        for (id, lob_indexed) in &self.lobs {
            w.uuid(id.as_bytes());
            w.boolean(Some(*lob_indexed));
        }
        for id in &self.indexes {
            w.uuid(id.as_bytes());
        }
        w.count_u16(self.lobs.len(), "lob count")?;
        w.count_u16(self.indexes.len(), "index count")?;

        let mut saved = flags.saved();
        if indexed {
            saved.insert(ValueFlags::INDEXED);
        }
        self.save(item.id, name, attr, saved, w)
    }

    fn save(
        &mut self,
        item: ItemId,
        name: &str,
        attr: Option<&Attribute>,
        flags: ValueFlags,
        w: ByteWriter,
    ) -> CodecResult<ValueId> {
        let id = ValueId::new();
        let record = ValueRecord {
            attr: attr.map(|a| a.id),
            flags,
            data: w.into_inner(),
        };
        let size = self
            .backend
            .save_value(id, record)
            .map_err(|source| CodecError::SaveValue {
                item,
                name: name.to_string(),
                source,
            })?;
        self.stats.values_written += 1;
        self.stats.bytes += size;
        Ok(id)
    }

    /// Write the flag byte, and the type id when the record must carry one.
    /// Returns the type elements are written with, and the codec type of
    /// `value` when one was given.
    ///
    /// Untyped and alias-typed values always embed the concrete type they
    /// resolved to. Declared concrete types are verified and embedded only
    /// in self-describing records.
    fn write_type(
        &self,
        w: &mut ByteWriter,
        target: &Target<'_>,
        flags: u8,
        value: Option<&Value>,
        with_schema: bool,
        attr_type: Option<TypeId>,
    ) -> CodecResult<(Option<TypeId>, Option<BuiltinType>)> {
        let Some(declared) = attr_type else {
            return Ok(match value {
                Some(v) => {
                    let t = BuiltinType::of_value(v);
                    header(w, flags, Some(t.type_id()));
                    (None, Some(t))
                }
                None => {
                    header(w, flags, None);
                    (None, None)
                }
            });
        };
        let alias = matches!(self.schema.type_def(&declared)?.def, TypeDef::Alias(_));
        match value {
            Some(v) => {
                let (resolved, builtin) = self
                    .schema
                    .resolve_type(Some(&declared), v, self.kind_of)
                    .map_err(|e| ItemError::TypeMismatch {
                        item: target.item,
                        name: target.name.to_string(),
                        detail: e.to_string(),
                    })?;
                let embedded = if alias {
                    Some(resolved)
                } else {
                    with_schema.then_some(declared)
                };
                header(w, flags, embedded);
                Ok((Some(declared), Some(builtin)))
            }
            None => {
                header(w, flags, (!alias && with_schema).then_some(declared));
                Ok((Some(declared), None))
            }
        }
    }

    fn write_single(
        &mut self,
        w: &mut ByteWriter,
        target: &Target<'_>,
        value: &Value,
        with_schema: bool,
        attr_type: Option<TypeId>,
    ) -> CodecResult<()> {
        let (_, builtin) = self.write_type(w, target, VALUE | SINGLE, Some(value), with_schema, attr_type)?;
        let builtin = builtin.unwrap_or_else(|| BuiltinType::of_value(value));
        let mismatch = || -> CodecError {
            ItemError::TypeMismatch {
                item: target.item,
                name: target.name.to_string(),
                detail: format!("{} cannot encode {}", builtin.name(), value.type_name()),
            }
            .into()
        };
        match (builtin, value) {
            (BuiltinType::None, Value::None) => {}
            (BuiltinType::Boolean, Value::Bool(b)) => w.boolean(Some(*b)),
            (BuiltinType::Boolean, Value::None) => w.boolean(None),
            (BuiltinType::Integer, Value::Int(i)) => w.int(*i),
            (BuiltinType::Long, Value::Long(l)) => w.long(*l),
            (BuiltinType::Long, Value::Int(i)) => w.long(i64::from(*i)),
            (BuiltinType::Float, Value::Float(f)) => w.float(*f),
            (BuiltinType::String, Value::Str(s)) => w.string(s)?,
            (BuiltinType::Bytes, Value::Bytes(b)) => w.bytes(b)?,
            (BuiltinType::Uuid, Value::Uuid(u)) => w.uuid(u.as_bytes()),
            (BuiltinType::SingleRef, Value::SingleRef(id)) => w.uuid(id.as_bytes()),
            (BuiltinType::Lob, Value::Lob(lob)) => {
                if let Some(data) = &lob.data {
                    self.backend.save_lob(lob.id, data)?;
                    self.stats.lobs += 1;
                }
                self.lobs.push((lob.id, lob.indexed));
                w.uuid(lob.id.as_bytes());
                w.boolean(Some(lob.indexed));
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }

    fn index_text(
        &self,
        target: &Target<'_>,
        attr: Option<vor_types::AttrId>,
        value: &AttrValue,
    ) -> CodecResult<()> {
        for v in value.values() {
            match v {
                Value::Str(text) => {
                    self.backend
                        .index_value(target.item, attr, target.version, text)?;
                }
                Value::Lob(lob) if lob.indexed => {
                    if let Some(data) = &lob.data {
                        let mut reader = data.as_slice();
                        self.backend
                            .index_reader(target.item, attr, target.version, &mut reader)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reference records
    // -----------------------------------------------------------------------

    /// Encode and save one reference attribute. List contents go to the ref
    /// table under `version`; the record keeps only the list's identity.
    #[allow(clippy::too_many_arguments)]
    pub fn write_ref(
        &mut self,
        item: &Item,
        name: &str,
        slot: &RefSlot,
        flags: ValueFlags,
        version: Version,
        with_schema: bool,
        attr: Option<&Attribute>,
    ) -> CodecResult<ValueId> {
        let mut w = ByteWriter::new();
        if with_schema || attr.is_none() {
            w.symbol(name)?;
        }
        match slot {
            RefSlot::None => w.u8(NONE | REF),
            RefSlot::Single(r) => {
                w.u8(SINGLE | REF);
                w.uuid(r.id().as_bytes());
            }
            RefSlot::List(list) => {
                w.u8(if with_schema { LIST | REF | TYPED } else { LIST | REF });
                w.uuid(list.id.as_bytes());
                if with_schema {
                    let other = match item.kind {
                        Some(kind) => self.schema.get_other_name(&kind, name)?,
                        None => None,
                    };
                    w.symbol(other.as_deref().unwrap_or(""))?;
                }
                self.save_list(list, version)?;
                self.write_indexes(&mut w, list, version)?;
            }
            RefSlot::Dict(dict) => {
                w.u8(DICT | REF);
                w.count_u32(dict.lists.len(), "dict size")?;
                for (key, list) in &dict.lists {
                    w.string(key)?;
                    w.uuid(list.id.as_bytes());
                    self.save_list(list, version)?;
                }
            }
            RefSlot::Set(set) => {
                w.u8(SET | REF);
                w.string(&set.to_string())?;
                w.u16(0);
                w.u16(0);
            }
        }
        self.save(item.id, name, attr, flags.saved(), w)
    }

    fn save_list(&mut self, list: &RefList, version: Version) -> CodecResult<()> {
        self.backend
            .save_ref_list(list.id, version, list.to_record())?;
        self.stats.ref_lists += 1;
        Ok(())
    }

    /// `[u16 count][name symbol, kind tag, index uuid, attribute symbol?]*`
    /// followed by the index uuids and their u16 count. Each index's key
    /// order goes to the index table under `version`.
    fn write_indexes(&mut self, w: &mut ByteWriter, list: &RefList, version: Version) -> CodecResult<()> {
        self.indexes.clear();
        w.count_u16(list.indexes().len(), "index count")?;
        for index in list.indexes() {
            w.symbol(&index.name)?;
            w.u8(index.kind.tag());
            w.uuid(index.id.as_bytes());
            if let IndexKind::Attribute(attr) = &index.kind {
                w.symbol(attr)?;
            }
            self.backend
                .save_index(index.id, version, index.order_bytes())?;
            self.indexes.push(index.id);
        }
        for id in &self.indexes {
            w.uuid(id.as_bytes());
        }
        w.count_u16(self.indexes.len(), "index count")?;
        Ok(())
    }
}

fn header(w: &mut ByteWriter, flags: u8, type_id: Option<TypeId>) {
    match type_id {
        Some(id) => {
            w.u8(flags | TYPED);
            w.uuid(id.as_bytes());
        }
        None => w.u8(flags),
    }
}

fn slot_dirty(slot: &RefSlot) -> bool {
    match slot {
        RefSlot::List(list) => list.is_dirty(),
        RefSlot::Dict(dict) => dict.is_dirty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Fixture;
    use crate::format::{record_flags, value_trailer};
    use vor_item::ItemRef;
    use vor_store::{ItemStore, LobStore, RefStore, TextIndex, ValueStore};
    use vor_types::Lob;

    fn value_record(f: &Fixture, item: &Item, version: Version, name: &str) -> ValueRecord {
        let id = f.record(&item.id, version).value_id(name).unwrap();
        f.backend.load_value(&id).unwrap().unwrap()
    }

    // -----------------------------------------------------------------------
    // Record layout
    // -----------------------------------------------------------------------

    #[test]
    fn declared_type_is_not_embedded_without_schema() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("count", Value::Int(7).into());
        f.write(&item, 1, None);

        let record = value_record(&f, &item, 1, "count");
        assert!(record.attr.is_some());
        let (offset, flags) = record_flags(&record.data, false).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(flags, VALUE | SINGLE);
        // flag + i32 + empty trailer
        assert_eq!(record.data.len(), 1 + 4 + 4);
    }

    #[test]
    fn self_describing_items_embed_name_and_type() {
        let f = Fixture::new();
        let mut item = f.item();
        item.status.insert(ItemStatus::SCHEMA);
        item.values.set("count", Value::Int(7).into());
        f.write(&item, 1, None);

        let saved = f.record(&item.id, 1);
        assert!(saved.status.contains(ItemStatus::CORESCHEMA));
        let record = value_record(&f, &item, 1, "count");
        let (offset, flags) = record_flags(&record.data, true).unwrap();
        assert_eq!(&record.data[..offset], &[0, 5, b'c', b'o', b'u', b'n', b't']);
        assert_eq!(flags, VALUE | SINGLE | TYPED);
        assert_eq!(
            &record.data[offset + 1..offset + 17],
            BuiltinType::Integer.type_id().as_bytes()
        );
    }

    #[test]
    fn oversized_names_fail_the_write() {
        let f = Fixture::new();
        let mut item = Item::new(f.view, None);
        let name = "n".repeat(65_537);
        item.values.set(&name, Value::Int(1).into());
        let err = f
            .try_write(&item, 1, None, WriteOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::TooLong { field: "symbol", len: 65_537, .. }
        ));
        assert!(f.backend.load_item(&item.id, 1).unwrap().is_none());
    }

    #[test]
    fn alias_types_always_embed_the_resolved_member() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("choice", Value::from("seven").into());
        f.write(&item, 1, None);

        let record = value_record(&f, &item, 1, "choice");
        assert_eq!(record.data[0], VALUE | SINGLE | TYPED);
        assert_eq!(&record.data[1..17], BuiltinType::String.type_id().as_bytes());
    }

    #[test]
    fn lobs_are_stored_aside_and_listed_in_the_trailer() {
        let f = Fixture::new();
        let mut item = f.item();
        let lob = Lob::new(b"large body".to_vec(), false);
        item.values.set("body", Value::Lob(lob.clone()).into());
        let stats = f.write(&item, 1, None);
        assert_eq!(stats.lobs, 1);

        let record = value_record(&f, &item, 1, "body");
        let (lobs, indexes) = value_trailer(&record.data).unwrap();
        assert_eq!(lobs, vec![(lob.id, false)]);
        assert!(indexes.is_empty());
        assert_eq!(f.backend.load_lob(&lob.id).unwrap().unwrap(), b"large body");
    }

    // -----------------------------------------------------------------------
    // Versioning
    // -----------------------------------------------------------------------

    #[test]
    fn unchanged_values_reuse_the_previous_record() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("title", Value::from("draft").into());
        item.values.set("count", Value::Int(1).into());
        let first = f.commit(&mut item, 1);
        assert_eq!(first.values_written, 2);

        item.values.set("count", Value::Int(2).into());
        let second = f.commit(&mut item, 2);
        assert_eq!(second.values_written, 1);
        assert_eq!(second.values_reused, 1);

        let v1 = f.record(&item.id, 1);
        let v2 = f.record(&item.id, 2);
        assert_eq!(v1.value_id("title"), v2.value_id("title"));
        assert_ne!(v1.value_id("count"), v2.value_id("count"));
        assert_eq!(v2.dirties, vec!["count".to_string()]);
    }

    #[test]
    fn unchanged_value_missing_from_previous_is_an_error() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("title", Value::from("draft").into());
        f.commit(&mut item, 1);

        let mut previous = f.record(&item.id, 1);
        previous.values.clear();
        let err = f
            .try_write(&item, 2, Some(&previous), WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, CodecError::MissingUnchangedValue { name, .. } if name == "title"));
    }

    #[test]
    fn removed_attributes_are_listed_as_dirty() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("title", Value::from("draft").into());
        item.values.set("count", Value::Int(1).into());
        f.commit(&mut item, 1);

        item.values.remove("count");
        f.commit(&mut item, 2);
        let v2 = f.record(&item.id, 2);
        assert!(v2.value_id("count").is_none());
        assert_eq!(v2.dirties, vec!["count".to_string()]);
    }

    #[test]
    fn deleted_items_have_no_values() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("title", Value::from("gone").into());
        f.commit(&mut item, 1);
        item.status.insert(ItemStatus::DELETED);
        f.commit(&mut item, 2);

        let v2 = f.record(&item.id, 2);
        assert!(v2.is_deleted());
        assert!(v2.values.is_empty());
    }

    #[test]
    fn transient_values_are_skipped() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("scratch", Value::from("not persisted").into());
        item.values.set("count", Value::Int(3).into());
        item.values.set_flag("count", ValueFlags::TRANSIENT);
        let stats = f.write(&item, 1, None);
        assert_eq!(stats.values_written, 0);
        assert!(f.record(&item.id, 1).values.is_empty());
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn declared_type_mismatch_is_refused() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("count", Value::from("seven").into());
        let err = f.try_write(&item, 1, None, WriteOptions::default()).unwrap_err();
        assert!(matches!(err, CodecError::Item(ItemError::TypeMismatch { .. })));
    }

    #[test]
    fn declared_cardinality_mismatch_is_refused() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("tags", Value::from("one").into());
        let err = f.try_write(&item, 1, None, WriteOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Item(ItemError::CardinalityMismatch { expected: vor_types::Cardinality::List, .. })
        ));
    }

    #[test]
    fn nil_is_never_written() {
        let f = Fixture::new();
        let item = f.item();
        let kind_of = |_: &ItemId| -> Option<KindId> { None };
        let mut writer = ItemWriter::new(&f.backend, &f.schema, &kind_of, WriteOptions::default());
        let err = writer
            .write_value(&item, "title", &AttrValue::Nil, ValueFlags::NONE, 1, false, None)
            .unwrap_err();
        assert!(matches!(err, CodecError::PersistNil { .. }));
    }

    // -----------------------------------------------------------------------
    // References and text
    // -----------------------------------------------------------------------

    #[test]
    fn ref_lists_are_saved_per_version() {
        let f = Fixture::new();
        let mut item = f.item();
        let child = ItemId::new();
        let mut list = RefList::new();
        list.append(ItemRef::Unresolved(child), Some("first".into())).unwrap();
        let list_id = list.id;
        item.references.set("children", RefSlot::List(list));
        let stats = f.commit(&mut item, 1);
        assert_eq!(stats.ref_lists, 1);

        let saved = f.backend.load_ref_list(&list_id, 1).unwrap().unwrap();
        assert_eq!(saved.entries.len(), 1);
        assert_eq!(saved.entries[0].key, child);
        assert_eq!(saved.entries[0].alias.as_deref(), Some("first"));
        assert!(f.backend.load_ref_list(&list_id, 0).unwrap().is_none());
    }

    #[test]
    fn indexed_text_reaches_the_sink() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("title", Value::from("Hello versioned world").into());
        f.write(&item, 1, None);
        let hits = f.backend.search("versioned", 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item, item.id);

        let record = value_record(&f, &item, 1, "title");
        assert!(record.flags.contains(ValueFlags::INDEXED));
    }

    #[test]
    fn text_indexing_can_be_disabled() {
        let f = Fixture::new();
        let mut item = f.item();
        item.values.set("title", Value::from("quiet").into());
        let options = WriteOptions {
            index_text: false,
            ..WriteOptions::default()
        };
        f.try_write(&item, 1, None, options).unwrap();
        assert!(f.backend.search("quiet", 1).unwrap().is_empty());
    }
}
