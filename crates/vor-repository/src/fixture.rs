//! Shared schema and repository for view tests.

use std::sync::Arc;

use vor_schema::{Attribute, BuiltinType, Schema};
use vor_store::InMemoryBackend;
use vor_types::{Cardinality, KindId};

use crate::config::RepositoryConfig;
use crate::repository::Repository;

pub struct Fixture {
    pub backend: Arc<InMemoryBackend>,
    pub repo: Repository,
    pub note: KindId,
    pub animal: KindId,
    pub dog: KindId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(RepositoryConfig::default())
    }

    /// `//Note` for values and references, `//Dog` overriding an
    /// attribute of `//Animal`.
    pub fn with_config(config: RepositoryConfig) -> Self {
        let schema = Schema::new();
        let string = BuiltinType::String.type_id();
        let note = schema.define_kind("//Note", &[]).unwrap();
        let attrs = [
            Attribute::single("title", string).indexed(),
            Attribute::single("count", BuiltinType::Integer.type_id()),
            Attribute::reference("children", Cardinality::List, "container"),
            Attribute::reference("container", Cardinality::Single, "children"),
            Attribute::reference("friend", Cardinality::Single, "friendOf"),
            Attribute::reference("friendOf", Cardinality::Single, "friend"),
            Attribute::reference("friends", Cardinality::Set, "friends"),
        ];
        for attr in attrs {
            schema.add_attribute(note, attr).unwrap();
        }
        let animal = schema.define_kind("//Animal", &[]).unwrap();
        schema
            .add_attribute(animal, Attribute::single("sound", string).with_initial_value("..."))
            .unwrap();
        let dog = schema.define_kind("//Dog", &[animal]).unwrap();
        schema
            .add_attribute(dog, Attribute::single("sound", string).with_initial_value("woof"))
            .unwrap();

        let backend = Arc::new(InMemoryBackend::new());
        let repo = Repository::new(backend.clone(), Arc::new(schema), config);
        Self {
            backend,
            repo,
            note,
            animal,
            dog,
        }
    }
}
