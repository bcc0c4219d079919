//! Shared schema and store for codec tests.

use vor_item::Item;
use vor_schema::{Attribute, BuiltinType, Schema, TypeDef};
use vor_store::{InMemoryBackend, ItemRecord, ItemStore};
use vor_types::{Cardinality, ItemId, KindId, Version, ViewId};

use crate::reader::{AfterLoadHook, ItemReader};
use crate::writer::{ItemWriter, WriteOptions, WriteStats};

pub struct Fixture {
    pub backend: InMemoryBackend,
    pub schema: Schema,
    pub note: KindId,
    pub view: ViewId,
}

impl Fixture {
    /// `//Note` with one attribute per codec shape.
    pub fn new() -> Self {
        let schema = Schema::new();
        let note = schema.define_kind("//Note", &[]).unwrap();
        let string = BuiltinType::String.type_id();
        let int_or_string = schema.define_type(
            "IntOrString",
            TypeDef::Alias(vec![BuiltinType::Integer.type_id(), string]),
        );
        let attrs = [
            Attribute::single("title", string).indexed(),
            Attribute::single("count", BuiltinType::Integer.type_id()),
            Attribute::single("body", BuiltinType::Lob.type_id()),
            Attribute::single("choice", int_or_string),
            Attribute::single("flag", BuiltinType::Boolean.type_id()),
            Attribute::single("total", BuiltinType::Long.type_id()),
            Attribute::single("scratch", string).transient(),
            Attribute::new("tags", Cardinality::List).with_type(string),
            Attribute::new("labels", Cardinality::Set),
            Attribute::new("props", Cardinality::Dict),
            Attribute::reference("children", Cardinality::List, "container"),
            Attribute::reference("container", Cardinality::Single, "children"),
            Attribute::reference("friends", Cardinality::Set, "friends"),
            Attribute::reference("shelves", Cardinality::Dict, "shelved"),
        ];
        for attr in attrs {
            schema.add_attribute(note, attr).unwrap();
        }
        Self {
            backend: InMemoryBackend::new(),
            schema,
            note,
            view: ViewId::new(),
        }
    }

    pub fn item(&self) -> Item {
        Item::new(self.view, Some(self.note))
    }

    pub fn write(&self, item: &Item, version: Version, previous: Option<&ItemRecord>) -> WriteStats {
        self.try_write(item, version, previous, WriteOptions::default())
            .unwrap()
    }

    pub fn try_write(
        &self,
        item: &Item,
        version: Version,
        previous: Option<&ItemRecord>,
        options: WriteOptions,
    ) -> crate::CodecResult<WriteStats> {
        let kind_of = |_: &ItemId| -> Option<KindId> { None };
        ItemWriter::new(&self.backend, &self.schema, &kind_of, options)
            .write_item(item, version, previous)
    }

    /// Write, then mark the item committed at `version`.
    pub fn commit(&self, item: &mut Item, version: Version) -> WriteStats {
        let previous = self.backend.load_item(&item.id, item.version).unwrap();
        let stats = self.write(item, version, previous.as_ref());
        item.clear_dirty();
        item.version = version;
        stats
    }

    pub fn record(&self, id: &ItemId, version: Version) -> ItemRecord {
        self.backend.load_item(id, version).unwrap().unwrap()
    }

    pub fn read(&self, id: &ItemId, version: Version) -> (Item, Vec<AfterLoadHook>) {
        let record = self.record(id, version);
        let mut hooks = Vec::new();
        let item = ItemReader::new(&self.backend, &self.schema)
            .read_item(&record, self.view, &mut hooks)
            .unwrap();
        (item, hooks)
    }
}
