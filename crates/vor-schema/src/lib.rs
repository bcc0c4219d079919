//! Schema registry for the versioned object repository.
//!
//! A [`Schema`] is an explicit registry owned by a repository. It holds the
//! kinds (with their multiple-inheritance graph), attribute definitions and
//! literal types, and resolves attribute names across the inheritance graph
//! with per-kind caches.
//!
//! # Key Types
//!
//! - [`Schema`] -- the registry and resolver
//! - [`Kind`] -- a schema descriptor: attributes plus super kinds
//! - [`Attribute`] -- a named, typed, cardinality-bound slot
//! - [`AttrType`] / [`BuiltinType`] -- literal types and codec dispatch
//! - [`ItemBehavior`] / [`ItemClass`] -- per-kind capabilities, composed
//!   across super kinds
//!
//! # Caching
//!
//! Resolved attribute tables, negative lookups, the inherited super-kind
//! closure, initial values, item classes and structural hashes are cached per
//! kind. Every mutation flushes the caches of the affected kind and,
//! recursively, of all its sub kinds.

pub mod attribute;
pub mod behavior;
pub mod error;
pub mod kind;
pub mod schema;
pub mod types;

pub use attribute::{Aspect, AspectValue, Attribute, CopyPolicy};
pub use behavior::{ItemBehavior, ItemClass};
pub use error::{SchemaError, SchemaResult};
pub use kind::{InitialValues, Kind, ResolvedAttribute};
pub use schema::{Schema, MIXINS_PATH};
pub use types::{AttrType, BuiltinType, TypeDef};
