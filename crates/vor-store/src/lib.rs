//! Persistence backends for the versioned object repository.
//!
//! The store is append-only and versioned: every commit writes new item
//! records under a fresh version, and value records are immutable once
//! written. Nothing here interprets value bytes; the codec is the sole
//! reader and writer of that format.
//!
//! # Tables
//!
//! - [`ValueStore`] -- value records keyed by [`ValueId`](vor_types::ValueId)
//! - [`ItemStore`] -- item records keyed by (item, version)
//! - [`RefStore`] -- reference list snapshots keyed by (list, version)
//! - [`LobStore`] -- opaque large objects
//! - [`IndexStore`] -- reference list index snapshots keyed by (index, version)
//! - [`TextIndex`] -- full-text sink fed by indexed attributes
//!
//! All of them, plus version control, make up a [`Backend`].
//!
//! # Backends
//!
//! - [`InMemoryBackend`] -- `RwLock`-guarded tables, persistable as a
//!   single snapshot file (see [`snapshot`])
//!
//! # Design Rules
//!
//! 1. Records are immutable once written; a new version writes a new record.
//! 2. Readers see only published versions.
//! 3. At most one commit is pending at a time; it must start from the
//!    current version.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod record;
pub mod snapshot;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryBackend;
pub use record::{ItemRecord, RefListEntry, RefListRecord, TextPosting, ValueRecord};
pub use snapshot::{verify_snapshot, SnapshotInfo};
pub use traits::{Backend, IndexStore, ItemStore, LobStore, RefStore, TextIndex, ValueStore, VersionControl};
