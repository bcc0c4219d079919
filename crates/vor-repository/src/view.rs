//! A session's snapshot of the repository.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use vor_codec::{run_after_load_hooks, AfterLoadHook, ItemReader, ItemWriter};
use vor_item::{ChangeObserver, Item, ItemCache, ItemResult, ItemSource};
use vor_merge::{merge_item, unlink_dangling, DanglingRef, MergeCallback};
use vor_schema::{Aspect, AspectValue, Schema};
use vor_store::{Backend, StoreError};
use vor_types::{AttrValue, ItemId, KindId, Version, ViewId};

use crate::config::RepositoryConfig;
use crate::error::{RepositoryError, RepositoryResult};
use crate::source::StoreSource;

/// Commits that keep losing the race to other views give up after this
/// many merges.
pub const MAX_COMMIT_ATTEMPTS: usize = 8;

/// What one [`RepositoryView::commit`] stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// The version the view is at afterwards.
    pub version: Version,
    pub items: usize,
    pub values_written: usize,
    pub values_reused: usize,
    pub bytes: usize,
    /// Refreshes needed before the commit went through.
    pub merges: usize,
}

/// What one [`RepositoryView::refresh`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub version: Version,
    /// Dirty items reconciled with other views' commits.
    pub merged: usize,
    /// Clean items replaced by their newer records.
    pub reloaded: usize,
    /// Clean items dropped because they were deleted elsewhere.
    pub unloaded: usize,
    /// Back-references removed after merges.
    pub unlinked: usize,
}

/// The items one session sees, as of one version.
///
/// Reads load items lazily from the store at the view's version; changes
/// stay in the view until [`commit`](Self::commit). Other views' commits
/// become visible only at [`refresh`](Self::refresh) or commit.
pub struct RepositoryView {
    backend: Arc<dyn Backend>,
    schema: Arc<Schema>,
    config: RepositoryConfig,
    cache: ItemCache,
    version: Version,
    /// Back-references left by merges of a refresh that did not finish.
    pending_dangling: Vec<DanglingRef>,
}

impl RepositoryView {
    pub(crate) fn open(
        backend: Arc<dyn Backend>,
        schema: Arc<Schema>,
        config: RepositoryConfig,
        version: Version,
    ) -> Self {
        let mut cache = ItemCache::new(ViewId::new(), Arc::clone(&schema));
        cache.set_verify(config.verify);
        debug!(view = %cache.view(), version, "view opened");
        Self {
            backend,
            schema,
            config,
            cache,
            version,
            pending_dangling: Vec::new(),
        }
    }

    pub fn id(&self) -> ViewId {
        self.cache.view()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn cache(&self) -> &ItemCache {
        &self.cache
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ChangeObserver>) {
        self.cache.add_observer(observer);
    }

    pub fn has_changes(&self) -> bool {
        !self.cache.dirty_items().is_empty()
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// The item, loaded from the store if the view has not seen it yet.
    pub fn item(&mut self, id: &ItemId) -> RepositoryResult<&Item> {
        self.with_source(|cache, source| cache.ensure_loaded(source, id))?;
        Ok(self.cache.item(id)?)
    }

    pub fn value(&mut self, id: &ItemId, name: &str) -> RepositoryResult<AttrValue> {
        Ok(self.item(id)?.value(name)?.clone())
    }

    /// Load every target of `owner.name`.
    pub fn resolve(&mut self, owner: &ItemId, name: &str) -> RepositoryResult<Vec<ItemId>> {
        self.with_source(|cache, source| {
            cache.ensure_loaded(source, owner)?;
            cache.resolve(source, owner, name)
        })
    }

    /// The live child of `parent` called `name`. Uncommitted changes of
    /// this view take precedence over the store.
    pub fn find_child(&self, parent: &ItemId, name: &str) -> RepositoryResult<Option<ItemId>> {
        let cached = self.cache.ids().into_iter().find(|id| {
            self.cache.get(id).is_some_and(|item| {
                !item.is_deleted()
                    && item.parent == Some(*parent)
                    && item.name.as_deref() == Some(name)
            })
        });
        if cached.is_some() {
            return Ok(cached);
        }
        // A cached copy that does not match has been moved, renamed or
        // deleted in this view.
        Ok(self
            .backend
            .find_child(parent, name, self.version)?
            .filter(|id| !self.cache.contains(id)))
    }

    /// References held by `id`, when the repository keeps counts.
    pub fn ref_count(&mut self, id: &ItemId) -> RepositoryResult<Option<usize>> {
        if !self.config.ref_counted {
            return Ok(None);
        }
        self.item(id)?;
        Ok(Some(self.cache.ref_count(id, false)?))
    }

    pub fn attribute_aspect(
        &mut self,
        id: &ItemId,
        name: &str,
        aspect: Aspect,
    ) -> RepositoryResult<Option<AspectValue>> {
        self.item(id)?;
        Ok(self.cache.attribute_aspect(id, name, aspect)?)
    }

    pub fn is_attribute_modifiable(&mut self, id: &ItemId, name: &str) -> RepositoryResult<bool> {
        self.item(id)?;
        Ok(self.cache.is_attribute_modifiable(id, name)?)
    }

    /// The item as committed at `version`, outside this view.
    pub fn item_at(&self, id: &ItemId, version: Version) -> RepositoryResult<Option<Item>> {
        let current = self.backend.current_version()?;
        if version > current {
            return Err(RepositoryError::NoSuchVersion {
                requested: version,
                current,
            });
        }
        let Some(record) = self.backend.load_item(id, version)?.filter(|r| !r.is_deleted()) else {
            return Ok(None);
        };
        let mut hooks = Vec::new();
        let item = ItemReader::new(&*self.backend, &self.schema).read_item(
            &record,
            ViewId::new(),
            &mut hooks,
        )?;
        if hooks.is_empty() {
            return Ok(Some(item));
        }
        let mut scratch = ItemCache::new(item.view, Arc::clone(&self.schema));
        scratch.insert_item(item)?;
        let backend = &*self.backend;
        let exists = |parent: &ItemId| live_at(backend, parent, version);
        run_after_load_hooks(hooks, &self.schema, &mut scratch, &exists)?;
        Ok(scratch.get(id).cloned())
    }

    /// Drop a clean item from the view. It is loaded again on next use.
    pub fn unload(&mut self, id: &ItemId) -> bool {
        self.cache.unload_item(id)
    }

    // -----------------------------------------------------------------------
    // Changes
    // -----------------------------------------------------------------------

    pub fn new_item(
        &mut self,
        kind: Option<KindId>,
        parent: Option<ItemId>,
        name: Option<&str>,
    ) -> RepositoryResult<ItemId> {
        self.with_source(|cache, source| {
            if let Some(parent) = &parent {
                cache.ensure_loaded(source, parent)?;
            }
            cache.new_item(source, kind, parent, name.map(str::to_owned))
        })
    }

    pub fn set_value(
        &mut self,
        id: &ItemId,
        name: &str,
        value: impl Into<AttrValue>,
    ) -> RepositoryResult<Option<AttrValue>> {
        let value = value.into();
        self.with_source(|cache, source| {
            cache.ensure_loaded(source, id)?;
            cache.set_value(id, name, value)
        })
    }

    pub fn remove_value(&mut self, id: &ItemId, name: &str) -> RepositoryResult<()> {
        self.with_source(|cache, source| {
            cache.ensure_loaded(source, id)?;
            cache.remove_value(source, id, name)
        })
    }

    pub fn set_ref(
        &mut self,
        owner: &ItemId,
        name: &str,
        other: Option<ItemId>,
    ) -> RepositoryResult<()> {
        self.with_source(|cache, source| {
            cache.ensure_loaded(source, owner)?;
            cache.set_ref(source, owner, name, other)
        })
    }

    pub fn add_ref(
        &mut self,
        owner: &ItemId,
        name: &str,
        other: ItemId,
        key: Option<&str>,
    ) -> RepositoryResult<bool> {
        self.with_source(|cache, source| {
            cache.ensure_loaded(source, owner)?;
            cache.add_ref(source, owner, name, other, key)
        })
    }

    pub fn remove_ref(&mut self, owner: &ItemId, name: &str, other: &ItemId) -> RepositoryResult<bool> {
        self.with_source(|cache, source| {
            cache.ensure_loaded(source, owner)?;
            cache.remove_ref(source, owner, name, other)
        })
    }

    pub fn delete_item(&mut self, id: &ItemId) -> RepositoryResult<()> {
        self.with_source(|cache, source| cache.delete_item(source, id))
    }

    /// Copy `id` under `parent`, following each attribute's copy policy.
    pub fn copy_item(
        &mut self,
        id: &ItemId,
        parent: Option<ItemId>,
        name: Option<&str>,
    ) -> RepositoryResult<ItemId> {
        let mut copies = HashMap::new();
        self.with_source(|cache, source| {
            cache.copy_item(source, id, parent, name.map(str::to_owned), &mut copies)
        })
    }

    // -----------------------------------------------------------------------
    // Commit and refresh
    // -----------------------------------------------------------------------

    /// Write every dirty item as the next version.
    ///
    /// When other views committed since this one last synchronized, the
    /// view is refreshed first and its dirty items merged with theirs;
    /// `ask` settles literal conflicts. A refused merge fails the commit
    /// and leaves nothing written.
    pub fn commit(&mut self, ask: Option<MergeCallback<'_>>) -> RepositoryResult<CommitStats> {
        let mut merges = 0;
        for attempt in 0..MAX_COMMIT_ATTEMPTS {
            let dirty = self.cache.dirty_items();
            if dirty.is_empty() {
                return Ok(CommitStats {
                    version: self.version,
                    merges,
                    ..CommitStats::default()
                });
            }
            match self.backend.begin_commit(self.version) {
                Ok(version) => {
                    let mut stats = self.write(version, &dirty)?;
                    stats.merges = merges;
                    return Ok(stats);
                }
                Err(StoreError::VersionConflict { base, current }) => {
                    info!(view = %self.id(), base, current, attempt, "commit conflict, merging");
                    self.refresh(ask)?;
                    merges += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RepositoryError::CommitRetries(MAX_COMMIT_ATTEMPTS))
    }

    fn write(&mut self, version: Version, dirty: &[ItemId]) -> RepositoryResult<CommitStats> {
        let mut stats = CommitStats {
            version,
            ..CommitStats::default()
        };
        if let Err(e) = self.write_items(version, dirty, &mut stats) {
            warn!(version, error = %e, "commit failed, aborting");
            self.backend.abort_commit(version)?;
            return Err(e);
        }
        self.backend.publish(version)?;

        for id in dirty {
            self.cache.clear_dirty(id);
            let deleted = match self.cache.get_mut(id) {
                Some(item) => {
                    item.version = version;
                    item.is_deleted()
                }
                None => false,
            };
            if deleted {
                self.cache.unload_item(id);
            }
        }
        self.version = version;
        info!(
            view = %self.id(),
            version,
            items = stats.items,
            values = stats.values_written,
            reused = stats.values_reused,
            "committed"
        );
        Ok(stats)
    }

    fn write_items(
        &self,
        version: Version,
        dirty: &[ItemId],
        stats: &mut CommitStats,
    ) -> RepositoryResult<()> {
        let cache = &self.cache;
        let kind_of = |id: &ItemId| cache.kind_of(id);
        let mut writer =
            ItemWriter::new(&*self.backend, &self.schema, &kind_of, self.config.write_options());
        for id in dirty {
            let item = cache.item(id)?;
            let previous = match item.version {
                0 => None,
                v => self.backend.load_item(id, v)?,
            };
            let written = writer.write_item(item, version, previous.as_ref())?;
            stats.items += 1;
            stats.values_written += written.values_written;
            stats.values_reused += written.values_reused;
            stats.bytes += written.bytes;
        }
        Ok(())
    }

    /// Catch up with the versions other views committed.
    ///
    /// Dirty items are merged with the remote changes; clean items are
    /// reloaded or, if deleted elsewhere, dropped. A refused merge leaves
    /// the view at its old version.
    pub fn refresh(&mut self, ask: Option<MergeCallback<'_>>) -> RepositoryResult<RefreshStats> {
        let base = self.version;
        let head = self.backend.current_version()?;
        if head <= base {
            return Ok(RefreshStats {
                version: base,
                ..RefreshStats::default()
            });
        }
        let mut stats = RefreshStats {
            version: head,
            ..RefreshStats::default()
        };

        let mut dangling = std::mem::take(&mut self.pending_dangling);
        let hooks = match self.catch_up(base, head, ask, &mut stats, &mut dangling) {
            Ok(hooks) => hooks,
            Err(e) => {
                self.pending_dangling = dangling;
                return Err(e);
            }
        };
        stats.unlinked = unlink_dangling(&mut self.cache, &dangling);
        self.version = head;
        self.run_hooks(hooks)?;

        info!(
            view = %self.id(),
            base,
            head,
            merged = stats.merged,
            reloaded = stats.reloaded,
            unloaded = stats.unloaded,
            "view refreshed"
        );
        Ok(stats)
    }

    /// Merge dirty items and reload clean ones changed in `base..=head`,
    /// collecting the back-references the merges leave in `dangling`.
    fn catch_up(
        &mut self,
        base: Version,
        head: Version,
        ask: Option<MergeCallback<'_>>,
        stats: &mut RefreshStats,
        dangling: &mut Vec<DanglingRef>,
    ) -> RepositoryResult<Vec<AfterLoadHook>> {
        let mut reload = Vec::new();
        for (id, _) in self.backend.changed_items(base, head)? {
            match self.cache.get(&id).map(Item::is_dirty) {
                Some(true) => {
                    let outcome = merge_item(&*self.backend, &mut self.cache, &id, base, head, ask)?;
                    dangling.extend(outcome.dangling);
                    stats.merged += 1;
                }
                Some(false) => reload.push(id),
                None => {}
            }
        }

        let mut hooks = Vec::new();
        for id in reload {
            match self.backend.load_item(&id, head)?.filter(|r| !r.is_deleted()) {
                Some(record) => {
                    let item = ItemReader::new(&*self.backend, &self.schema).read_item(
                        &record,
                        self.cache.view(),
                        &mut hooks,
                    )?;
                    self.cache.insert_item(item)?;
                    stats.reloaded += 1;
                }
                None => {
                    if self.cache.unload_item(&id) {
                        stats.unloaded += 1;
                    }
                }
            }
        }
        Ok(hooks)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Load every item live at this version and validate the lot.
    ///
    /// Problems are logged, not raised; the result is `true` only if there
    /// were none. With `repair`, missing back-references are reinstalled
    /// as uncommitted changes.
    pub fn check(&mut self, repair: bool) -> RepositoryResult<bool> {
        let mut ok = true;
        for id in self.backend.all_items()? {
            if self.cache.contains(&id) || !live_at(&*self.backend, &id, self.version) {
                continue;
            }
            if let Err(e) = self.with_source(|cache, source| cache.ensure_loaded(source, &id)) {
                error!(item = %id, version = self.version, error = %e, "item does not load");
                ok = false;
            }
        }
        ok &= self.with_source(|cache, source| Ok(cache.check(source, repair)))?;
        info!(view = %self.id(), version = self.version, items = self.cache.len(), ok, "check complete");
        Ok(ok)
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Run `op` with a source reading at this view's version, then the
    /// after-load hooks of whatever it loaded.
    fn with_source<T>(
        &mut self,
        op: impl FnOnce(&mut ItemCache, &dyn ItemSource) -> ItemResult<T>,
    ) -> RepositoryResult<T> {
        let source = StoreSource::new(&*self.backend, &self.schema, self.version, self.cache.view());
        let result = op(&mut self.cache, &source);
        let hooks = source.into_hooks();
        self.run_hooks(hooks)?;
        Ok(result?)
    }

    fn run_hooks(&mut self, hooks: Vec<AfterLoadHook>) -> RepositoryResult<()> {
        if hooks.is_empty() {
            return Ok(());
        }
        let backend = &*self.backend;
        let version = self.version;
        let exists = |id: &ItemId| live_at(backend, id, version);
        run_after_load_hooks(hooks, &self.schema, &mut self.cache, &exists)?;
        Ok(())
    }
}

fn live_at(backend: &dyn Backend, id: &ItemId, version: Version) -> bool {
    matches!(backend.load_item(id, version), Ok(Some(r)) if !r.is_deleted())
}
