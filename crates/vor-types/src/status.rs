use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Item status bitmask.
///
/// The low bits describe what the item is; the dirty bits record which part
/// of the item changed since it was last committed. Only [`ItemStatus::SAVEMASK`]
/// bits are persisted with an item record.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStatus(u32);

impl ItemStatus {
    pub const NONE: Self = Self(0);
    pub const NEW: Self = Self(0x0001);
    pub const MERGED: Self = Self(0x0002);
    pub const DELETED: Self = Self(0x0004);
    pub const SCHEMA: Self = Self(0x0008);
    pub const PINNED: Self = Self(0x0010);
    pub const CONTAINER: Self = Self(0x0020);
    pub const CORESCHEMA: Self = Self(0x0040);
    /// Mutations on this item do not dirty it and fire no notifications.
    pub const NODIRTY: Self = Self(0x0080);

    pub const VDIRTY: Self = Self(0x0100);
    pub const RDIRTY: Self = Self(0x0200);
    pub const KDIRTY: Self = Self(0x0400);
    pub const ADIRTY: Self = Self(0x0800);
    /// Parent or name changed.
    pub const PDIRTY: Self = Self(0x1000);

    pub const DIRTY: Self =
        Self(Self::VDIRTY.0 | Self::RDIRTY.0 | Self::KDIRTY.0 | Self::ADIRTY.0 | Self::PDIRTY.0);
    pub const SAVEMASK: Self =
        Self(Self::DELETED.0 | Self::SCHEMA.0 | Self::CONTAINER.0 | Self::CORESCHEMA.0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// `true` if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `true` if any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_dirty(self) -> bool {
        self.intersects(Self::DIRTY) || self.contains(Self::NEW)
    }

    /// The bits that are written with an item record.
    pub const fn saved(self) -> Self {
        Self(self.0 & Self::SAVEMASK.0)
    }
}

impl BitOr for ItemStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ItemStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(ItemStatus, &str)] = &[
            (ItemStatus::NEW, "NEW"),
            (ItemStatus::MERGED, "MERGED"),
            (ItemStatus::DELETED, "DELETED"),
            (ItemStatus::SCHEMA, "SCHEMA"),
            (ItemStatus::PINNED, "PINNED"),
            (ItemStatus::CONTAINER, "CONTAINER"),
            (ItemStatus::CORESCHEMA, "CORESCHEMA"),
            (ItemStatus::NODIRTY, "NODIRTY"),
            (ItemStatus::VDIRTY, "VDIRTY"),
            (ItemStatus::RDIRTY, "RDIRTY"),
            (ItemStatus::KDIRTY, "KDIRTY"),
            (ItemStatus::ADIRTY, "ADIRTY"),
            (ItemStatus::PDIRTY, "PDIRTY"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ItemStatus({})", set.join("|"))
    }
}

/// Per-attribute flags kept next to each stored value.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueFlags(u8);

impl ValueFlags {
    pub const NONE: Self = Self(0);
    pub const DIRTY: Self = Self(0x01);
    /// Never persisted, never hashed.
    pub const TRANSIENT: Self = Self(0x02);
    /// Routed to the full-text index on write.
    pub const INDEXED: Self = Self(0x04);
    /// Set locally; not inherited by copies.
    pub const NOINHERIT: Self = Self(0x08);

    pub const SAVEMASK: Self = Self(Self::INDEXED.0 | Self::NOINHERIT.0);
    pub const COPYMASK: Self = Self(Self::TRANSIENT.0 | Self::INDEXED.0);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn saved(self) -> Self {
        Self(self.0 & Self::SAVEMASK.0)
    }

    pub const fn copied(self) -> Self {
        Self(self.0 & Self::COPYMASK.0)
    }
}

impl BitOr for ValueFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ValueFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueFlags({:#04x})", self.0)
    }
}
