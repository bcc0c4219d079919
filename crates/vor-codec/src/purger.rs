//! Removal of superseded item versions.

use std::collections::HashSet;

use tracing::{debug, info};
use vor_store::{Backend, ItemRecord};
use vor_types::{IndexId, ItemId, ItemStatus, LobId, RefListId, ValueId, Version};

use crate::error::CodecResult;
use crate::format::{is_named, record_flags, ref_lists, ref_trailer, value_trailer, LIST, REF, SET};

/// What a purge removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub items: usize,
    pub values: usize,
    pub lobs: usize,
    pub ref_lists: usize,
    pub indexes: usize,
}

impl PurgeStats {
    pub fn add(&mut self, other: &PurgeStats) {
        self.items += other.items;
        self.values += other.values;
        self.lobs += other.lobs;
        self.ref_lists += other.ref_lists;
        self.indexes += other.indexes;
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything one value record points at outside itself.
#[derive(Default)]
struct Holdings {
    values: HashSet<ValueId>,
    lobs: HashSet<LobId>,
    indexes: HashSet<IndexId>,
    lists: HashSet<RefListId>,
}

/// Removes the records of an item that no version at or after a cutoff
/// can see.
pub struct ItemPurger<'a> {
    backend: &'a dyn Backend,
}

impl<'a> ItemPurger<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    /// Purge the versions of `item` superseded as of `keep_from`.
    ///
    /// The newest record at or below `keep_from` and every later record
    /// survive, together with every value, lob, index and list they reach.
    pub fn purge_item(&self, item: &ItemId, keep_from: Version) -> CodecResult<PurgeStats> {
        let versions = self.backend.item_versions(item)?;
        let Some(cut) = versions.iter().rposition(|v| *v <= keep_from) else {
            return Ok(PurgeStats::default());
        };
        let (old, kept) = versions.split_at(cut);

        let mut keep = Holdings::default();
        for version in kept {
            if let Some(record) = self.backend.load_item(item, *version)? {
                self.collect(&record, &mut keep)?;
            }
        }

        let mut stats = PurgeStats::default();
        let mut gone = Holdings::default();
        for version in old {
            let Some(record) = self.backend.purge_item(item, *version)? else {
                continue;
            };
            stats.items += 1;
            for (_, id) in &record.values {
                if keep.values.contains(id) || gone.values.contains(id) {
                    continue;
                }
                self.collect_value(&record, id, &mut gone)?;
            }
        }

        for id in &gone.values {
            if self.backend.purge_value(id)? {
                stats.values += 1;
            }
        }
        for id in gone.lobs.difference(&keep.lobs) {
            if self.backend.purge_lob(id)? {
                stats.lobs += 1;
            }
        }
        for id in &keep.lists {
            stats.ref_lists += self.backend.purge_ref_list(id, keep_from)?;
        }
        for id in gone.lists.difference(&keep.lists) {
            stats.ref_lists += self.backend.drop_ref_list(id)?;
        }
        for id in &keep.indexes {
            stats.indexes += self.backend.purge_index(id, keep_from)?;
        }
        for id in gone.indexes.difference(&keep.indexes) {
            stats.indexes += self.backend.drop_index(id)?;
        }

        if !stats.is_empty() {
            debug!(item = %item, keep_from, ?stats, "item purged");
        }
        Ok(stats)
    }

    /// Purge every item in the store.
    pub fn purge_all(&self, keep_from: Version) -> CodecResult<PurgeStats> {
        let mut total = PurgeStats::default();
        for item in self.backend.all_items()? {
            total.add(&self.purge_item(&item, keep_from)?);
        }
        info!(
            keep_from,
            items = total.items,
            values = total.values,
            lobs = total.lobs,
            "purge complete"
        );
        Ok(total)
    }

    fn collect(&self, record: &ItemRecord, into: &mut Holdings) -> CodecResult<()> {
        for (_, id) in &record.values {
            if !into.values.contains(id) {
                self.collect_value(record, id, into)?;
            }
        }
        Ok(())
    }

    fn collect_value(&self, owner: &ItemRecord, id: &ValueId, into: &mut Holdings) -> CodecResult<()> {
        into.values.insert(*id);
        let Some(value) = self.backend.load_value(id)? else {
            return Ok(());
        };
        let named = is_named(&value, owner.status.contains(ItemStatus::CORESCHEMA));
        let (_, flags) = record_flags(&value.data, named)?;
        if flags & REF == 0 {
            let (lobs, indexes) = value_trailer(&value.data)?;
            into.lobs.extend(lobs.into_iter().map(|(lob, _)| lob));
            into.indexes.extend(indexes);
            return Ok(());
        }
        into.lists.extend(ref_lists(&value.data, named)?);
        if flags & (LIST | SET) != 0 {
            into.indexes.extend(ref_trailer(&value.data)?);
        }
        Ok(())
    }
}
