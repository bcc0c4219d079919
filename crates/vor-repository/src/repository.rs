use std::path::Path;
use std::sync::Arc;

use tracing::info;
use vor_codec::{ItemPurger, PurgeStats};
use vor_schema::Schema;
use vor_store::{Backend, InMemoryBackend, SnapshotInfo, TextPosting};
use vor_types::Version;

use crate::config::RepositoryConfig;
use crate::error::{RepositoryError, RepositoryResult};
use crate::view::RepositoryView;

/// One store and the schema its items are read with.
///
/// The repository itself holds no items: every session works through a
/// [`RepositoryView`] of its own, and views only meet in the store.
pub struct Repository {
    backend: Arc<dyn Backend>,
    schema: Arc<Schema>,
    config: RepositoryConfig,
}

impl Repository {
    pub fn new(backend: Arc<dyn Backend>, schema: Arc<Schema>, config: RepositoryConfig) -> Self {
        Self {
            backend,
            schema,
            config,
        }
    }

    /// An empty repository kept in memory.
    pub fn in_memory(schema: Arc<Schema>, config: RepositoryConfig) -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), schema, config)
    }

    /// Open a repository over the contents of a snapshot file.
    pub fn open_snapshot(
        path: &Path,
        schema: Arc<Schema>,
        config: RepositoryConfig,
    ) -> RepositoryResult<(Self, SnapshotInfo)> {
        let (backend, info) = InMemoryBackend::read_snapshot(path)?;
        info!(path = %path.display(), version = info.version, "snapshot opened");
        Ok((Self::new(Arc::new(backend), schema, config), info))
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn current_version(&self) -> RepositoryResult<Version> {
        Ok(self.backend.current_version()?)
    }

    /// A new view at the current version.
    pub fn view(&self) -> RepositoryResult<RepositoryView> {
        let version = self.current_version()?;
        Ok(self.open_view(version))
    }

    /// A new view at an earlier version.
    pub fn view_at(&self, version: Version) -> RepositoryResult<RepositoryView> {
        let current = self.current_version()?;
        if version > current {
            return Err(RepositoryError::NoSuchVersion {
                requested: version,
                current,
            });
        }
        Ok(self.open_view(version))
    }

    fn open_view(&self, version: Version) -> RepositoryView {
        RepositoryView::open(
            Arc::clone(&self.backend),
            Arc::clone(&self.schema),
            self.config.clone(),
            version,
        )
    }

    /// Validate every item live at the current version. See
    /// [`RepositoryView::check`].
    pub fn check(&self, repair: bool) -> RepositoryResult<bool> {
        self.view()?.check(repair)
    }

    /// Drop the records no version at or after `keep_from` can see.
    /// Views older than `keep_from` must not be used afterwards.
    pub fn purge(&self, keep_from: Version) -> RepositoryResult<PurgeStats> {
        let current = self.current_version()?;
        if keep_from > current {
            return Err(RepositoryError::NoSuchVersion {
                requested: keep_from,
                current,
            });
        }
        Ok(ItemPurger::new(&*self.backend).purge_all(keep_from)?)
    }

    /// Items whose indexed text contains `term`, as of the current version.
    pub fn search(&self, term: &str) -> RepositoryResult<Vec<TextPosting>> {
        let version = self.current_version()?;
        Ok(self.backend.search(term, version)?)
    }
}
