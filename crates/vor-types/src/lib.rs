//! Foundation types for the versioned object repository (VOR).
//!
//! Every other VOR crate depends on `vor-types`. Nothing here performs I/O;
//! these are the plain data shapes that flow between the schema resolver,
//! the item cache, the binary codec and the merge engine.
//!
//! # Key Types
//!
//! - [`ItemId`], [`ValueId`], [`KindId`], [`AttrId`], [`TypeId`] -- 128-bit identifiers
//! - [`Version`] -- monotonically increasing commit number
//! - [`ItemStatus`] -- item status bitmask (NEW, DELETED, dirty bits, ...)
//! - [`ValueFlags`] -- per-attribute flags (DIRTY, TRANSIENT, ...)
//! - [`Cardinality`] -- single / list / set / dict
//! - [`Value`], [`AttrValue`] -- literals and literal containers
//! - [`MergeConflict`], [`Resolution`] -- the conflict surface handed to merge callbacks

pub mod cardinality;
pub mod conflict;
pub mod error;
pub mod id;
pub mod status;
pub mod value;

pub use cardinality::Cardinality;
pub use conflict::{MergeConflict, Resolution};
pub use error::TypeError;
pub use id::{AttrId, IndexId, ItemId, KindId, LobId, RefListId, TypeId, ValueId, ViewId};
pub use status::{ItemStatus, ValueFlags};
pub use value::{AttrValue, Lob, Value, ValueSet};

/// A committed repository version. Version `0` is the empty repository.
pub type Version = u64;
