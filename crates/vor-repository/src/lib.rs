//! Versioned object repository.
//!
//! A [`Repository`] pairs a store with a schema. Work happens in views:
//! each [`RepositoryView`] sees the repository as of one version, loads
//! items on demand and keeps its changes to itself until it commits. A
//! commit on top of a version other views have moved past merges first.
//!
//! # Key Types
//!
//! - [`Repository`] -- store, schema and configuration; hands out views
//! - [`RepositoryView`] -- one session's items at one version
//! - [`CommitStats`] / [`RefreshStats`] -- what a commit or refresh did
//! - [`RepositoryConfig`] -- settings, loadable from TOML
//! - [`RepositoryError`] -- every failure of the layers below, unified
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use vor_repository::{Repository, RepositoryConfig};
//! use vor_schema::{Attribute, BuiltinType, Schema};
//!
//! let schema = Schema::new();
//! let note = schema.define_kind("//Note", &[]).unwrap();
//! schema
//!     .add_attribute(note, Attribute::single("title", BuiltinType::String.type_id()))
//!     .unwrap();
//!
//! let repo = Repository::in_memory(Arc::new(schema), RepositoryConfig::default());
//! let mut view = repo.view().unwrap();
//! let id = view.new_item(Some(note), None, None).unwrap();
//! view.set_value(&id, "title", "Hello").unwrap();
//! assert_eq!(view.commit(None).unwrap().version, 1);
//! ```

pub mod config;
pub mod error;
pub mod repository;
mod source;
pub mod view;

#[cfg(test)]
mod fixture;

pub use config::RepositoryConfig;
pub use error::{RepositoryError, RepositoryResult};
pub use repository::Repository;
pub use view::{CommitStats, RefreshStats, RepositoryView, MAX_COMMIT_ATTEMPTS};
