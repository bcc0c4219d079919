//! Shared schema and store for merge tests.

use std::sync::Arc;

use vor_codec::{ItemReader, ItemWriter, WriteOptions};
use vor_item::{Item, ItemCache};
use vor_schema::{Attribute, BuiltinType, Schema};
use vor_store::{InMemoryBackend, ItemStore};
use vor_types::{Cardinality, ItemId, KindId, Version, ViewId};

pub struct Fixture {
    pub backend: InMemoryBackend,
    pub schema: Arc<Schema>,
    pub note: KindId,
    pub memo: KindId,
    pub letter: KindId,
}

impl Fixture {
    pub fn new() -> Self {
        let schema = Schema::new();
        let note = schema.define_kind("//Note", &[]).unwrap();
        let string = BuiltinType::String.type_id();
        let attrs = [
            Attribute::single("title", string),
            Attribute::single("count", BuiltinType::Integer.type_id()),
            Attribute::single("total", BuiltinType::Long.type_id()),
            Attribute::new("labels", Cardinality::Set).with_type(string),
            Attribute::reference("children", Cardinality::List, "container"),
            Attribute::reference("container", Cardinality::Single, "children"),
            Attribute::reference("friends", Cardinality::Set, "friends"),
            Attribute::reference("shelves", Cardinality::Dict, "shelved"),
            Attribute::reference("shelved", Cardinality::Single, "shelves"),
        ];
        for attr in attrs {
            schema.add_attribute(note, attr).unwrap();
        }
        let memo = schema.define_kind("//Memo", &[note]).unwrap();
        let letter = schema.define_kind("//Letter", &[note]).unwrap();
        Self {
            backend: InMemoryBackend::new(),
            schema: Arc::new(schema),
            note,
            memo,
            letter,
        }
    }

    /// A new note in a view nobody caches.
    pub fn item(&self) -> Item {
        Item::new(ViewId::new(), Some(self.note))
    }

    /// Write, then mark the item committed at `version`.
    pub fn commit(&self, item: &mut Item, version: Version) {
        let previous = self.backend.load_item(&item.id, item.version).unwrap();
        let kind_of = |_: &ItemId| -> Option<KindId> { None };
        ItemWriter::new(&self.backend, &self.schema, &kind_of, WriteOptions::default())
            .write_item(item, version, previous.as_ref())
            .unwrap();
        item.clear_dirty();
        item.version = version;
    }

    /// An empty cache for a new view.
    pub fn cache(&self) -> ItemCache {
        ItemCache::new(ViewId::new(), Arc::clone(&self.schema))
    }

    /// Load `id` as of `version` into `cache`.
    pub fn load(&self, cache: &mut ItemCache, id: &ItemId, version: Version) {
        let record = self.backend.load_item(id, version).unwrap().unwrap();
        let mut hooks = Vec::new();
        let item = ItemReader::new(&self.backend, &self.schema)
            .read_item(&record, cache.view(), &mut hooks)
            .unwrap();
        cache.insert_item(item).unwrap();
    }
}
