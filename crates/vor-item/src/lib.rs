//! Items of the versioned object repository.
//!
//! An [`Item`] carries a kind, a place in the containment tree, literal
//! [`Values`] and bidirectional [`References`]. Items of one view live in an
//! [`ItemCache`] arena and point at each other by id; the cache keeps both
//! sides of every reference in step and loads missing peers on demand
//! through an [`ItemSource`].
//!
//! # Key Types
//!
//! - [`Item`] -- an addressable, versioned object
//! - [`Values`] / [`References`] -- per-item attribute containers
//! - [`RefSlot`] -- the content of one reference attribute
//! - [`RefList`] -- ordered, aliased, indexed reference collection
//! - [`RefSet`] -- unordered reference collection, merged three-way
//! - [`ItemCache`] -- the per-view arena enforcing bidirectionality
//! - [`ChangeObserver`] -- receiver of change notifications
//!
//! # Invariants
//!
//! 1. If `a.name` references `b`, then `b.other_name` references `a` once
//!    an operation returns.
//! 2. A failed operation leaves both sides as they were and fires nothing.
//! 3. Unloading an item degrades pointers to it; relationships survive.

pub mod cache;
pub mod error;
pub mod item;
pub mod observer;
pub mod refs;
pub mod reflist;
pub mod refset;
pub mod values;

pub use cache::{Detached, ItemCache, ItemSource};
pub use error::{ItemError, ItemResult};
pub use item::Item;
pub use observer::{ChangeEvent, ChangeObserver, ChangeOp, RecordingObserver};
pub use refs::{ItemRef, RefDict, RefSlot, References};
pub use reflist::{IndexKind, ListIndex, ListOp, RefEntry, RefList};
pub use refset::RefSet;
pub use values::Values;
