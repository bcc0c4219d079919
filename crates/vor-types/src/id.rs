use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh, time-ordered identifier (UUID v7).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// The all-zero identifier.
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Wrap an existing UUID.
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Build from a 128-bit constant. Used for well-known identifiers.
            pub const fn from_u128(v: u128) -> Self {
                Self(Uuid::from_u128(v))
            }

            /// Build from the 16 raw big-endian bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// The 16 raw bytes, in the order they are written to disk.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Short identifier (prefix plus first 8 hex characters).
            pub fn short_hex(&self) -> String {
                format!(concat!($prefix, ":{}"), hex::encode(&self.0.as_bytes()[..4]))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.short_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix(concat!($prefix, ":")).unwrap_or(s);
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| TypeError::InvalidHex(e.to_string()))
            }
        }
    };
}

define_id!(
    /// Identity of an item. Immutable for the lifetime of the item.
    ItemId,
    "item"
);
define_id!(
    /// Key of one persisted value record. A new record gets a new id.
    ValueId,
    "value"
);
define_id!(
    /// Identity of a kind in the schema registry.
    KindId,
    "kind"
);
define_id!(
    /// Identity of an attribute definition.
    AttrId,
    "attr"
);
define_id!(
    /// Identity of a literal type. Builtin types use fixed identifiers.
    TypeId,
    "type"
);
define_id!(
    /// Address of a large object in the lob store.
    LobId,
    "lob"
);
define_id!(
    /// Identity of a reference collection, stable across versions.
    RefListId,
    "refs"
);
define_id!(
    /// Identity of a secondary index over a reference list.
    IndexId,
    "index"
);
define_id!(
    /// Identity of one repository view (a session-scoped snapshot).
    ViewId,
    "view"
);
