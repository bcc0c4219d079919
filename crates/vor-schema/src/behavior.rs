use std::fmt;
use std::sync::Arc;

use vor_types::{AttrValue, ItemId, MergeConflict};

/// Per-kind item behavior.
///
/// Kinds contribute capabilities instead of subclasses; an item's
/// [`ItemClass`] is the composition of the behaviors of its kind and all its
/// inherited super kinds.
pub trait ItemBehavior: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Resolve a merge conflict on one attribute. `None` declines.
    fn on_item_merge(&self, _conflict: &MergeConflict) -> Option<AttrValue> {
        None
    }

    /// Called after an item of this kind was loaded from the store.
    fn on_item_load(&self, _item: ItemId) {}
}

/// The composite behavior of a kind, linearized most-derived first.
#[derive(Clone, Debug)]
pub struct ItemClass {
    pub name: String,
    pub behaviors: Vec<Arc<dyn ItemBehavior>>,
}

impl ItemClass {
    /// Ask each behavior in order; the first answer wins.
    pub fn on_item_merge(&self, conflict: &MergeConflict) -> Option<AttrValue> {
        self.behaviors
            .iter()
            .find_map(|b| b.on_item_merge(conflict))
    }

    pub fn on_item_load(&self, item: ItemId) {
        for b in &self.behaviors {
            b.on_item_load(item);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}
