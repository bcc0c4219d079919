//! Loading items of a view from the store.

use std::cell::RefCell;
use std::fmt::Display;

use tracing::trace;
use vor_codec::{AfterLoadHook, ItemReader};
use vor_item::{Item, ItemError, ItemResult, ItemSource};
use vor_schema::Schema;
use vor_store::Backend;
use vor_types::{ItemId, Version, ViewId};

/// Reads items as of one version. After-load hooks raised while reading
/// are collected; the caller runs them once its operation is done.
pub(crate) struct StoreSource<'a> {
    backend: &'a dyn Backend,
    schema: &'a Schema,
    version: Version,
    view: ViewId,
    hooks: RefCell<Vec<AfterLoadHook>>,
}

impl<'a> StoreSource<'a> {
    pub(crate) fn new(backend: &'a dyn Backend, schema: &'a Schema, version: Version, view: ViewId) -> Self {
        Self {
            backend,
            schema,
            version,
            view,
            hooks: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn into_hooks(self) -> Vec<AfterLoadHook> {
        self.hooks.into_inner()
    }
}

impl ItemSource for StoreSource<'_> {
    fn fetch(&self, id: &ItemId) -> ItemResult<Option<Item>> {
        let record = self
            .backend
            .load_item(id, self.version)
            .map_err(|e| load_error(*id, e))?;
        let Some(record) = record.filter(|r| !r.is_deleted()) else {
            return Ok(None);
        };
        let item = ItemReader::new(self.backend, self.schema)
            .read_item(&record, self.view, &mut self.hooks.borrow_mut())
            .map_err(|e| load_error(*id, e))?;
        trace!(item = %id, version = self.version, "item loaded");
        Ok(Some(item))
    }
}

fn load_error(item: ItemId, e: impl Display) -> ItemError {
    ItemError::Load {
        item,
        reason: e.to_string(),
    }
}
