//! Structural hashing for the versioned object repository.
//!
//! Item content hashes and schema hashes are 64-bit values built from
//! domain-separated BLAKE3 digests. Composite hashes are folded with
//! [`combine`], which is order-dependent: callers sort their inputs (by
//! attribute name, for instance) whenever the result must not depend on
//! insertion order.

pub mod hasher;
pub mod value;

pub use hasher::{combine, ContentHasher};
pub use value::{hash_attr_value, hash_value};
