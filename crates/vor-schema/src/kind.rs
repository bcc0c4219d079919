use std::collections::BTreeMap;
use std::sync::Arc;

use vor_types::{AttrId, AttrValue, KindId};

use crate::behavior::ItemBehavior;

/// A schema descriptor: the attributes and inheritance of a set of items.
#[derive(Clone, Debug)]
pub struct Kind {
    pub id: KindId,
    pub path: String,
    /// Ordered; earlier super kinds win when two declare the same name.
    pub super_kinds: Vec<KindId>,
    pub sub_kinds: Vec<KindId>,
    /// Locally declared attributes, by alias.
    pub attributes: Vec<(String, AttrId)>,
    /// Per-kind overrides of attributes' inverse names.
    pub other_names: BTreeMap<String, String>,
    /// Set for generated mixin kinds: the paths of the combined kinds.
    pub mixins: Option<Vec<String>>,
    pub behavior: Option<Arc<dyn ItemBehavior>>,
}

impl Kind {
    pub(crate) fn new(path: String, super_kinds: Vec<KindId>) -> Self {
        Self {
            id: KindId::new(),
            path,
            super_kinds,
            sub_kinds: Vec::new(),
            attributes: Vec::new(),
            other_names: BTreeMap::new(),
            mixins: None,
            behavior: None,
        }
    }

    /// Mixin kinds are identified by structure, not by path.
    pub fn is_mixin(&self) -> bool {
        self.mixins.is_some()
    }

    pub fn local_attribute(&self, name: &str) -> Option<AttrId> {
        self.attributes
            .iter()
            .find(|(alias, _)| alias == name)
            .map(|(_, id)| *id)
    }

    /// The last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// One row of a kind's resolved attribute table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAttribute {
    pub name: String,
    pub attr: AttrId,
    /// The kind whose declaration won.
    pub kind: KindId,
    /// Declared on that kind, as opposed to a global attribute it aliases.
    pub local: bool,
}

/// A kind's initial values, split by whether the attribute is a reference.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InitialValues {
    pub values: Vec<(String, AttrValue)>,
    pub refs: Vec<(String, AttrValue)>,
}

impl InitialValues {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.refs.is_empty()
    }
}
