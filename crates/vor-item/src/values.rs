use std::collections::HashMap;

use tracing::{error, warn};
use vor_hash::{combine, hash_attr_value, ContentHasher};
use vor_schema::Schema;
use vor_types::{AttrValue, ItemId, ItemStatus, KindId, ValueFlags};

/// The literal attributes of one item.
///
/// Each name carries [`ValueFlags`]. Overwriting a value keeps its flags
/// and adds `DIRTY`; removing a value keeps the flags (with `DIRTY`) so the
/// next commit knows to drop it. Dirty bits are cleared only by
/// [`clear_dirty`](Self::clear_dirty) at a commit boundary.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Values {
    entries: HashMap<String, AttrValue>,
    flags: HashMap<String, ValueFlags>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AttrValue> {
        self.mark_dirty(name);
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Store `value` under `name` and mark it dirty. Storing
    /// [`AttrValue::Nil`] removes the value. Returns the previous value.
    pub fn set(&mut self, name: &str, value: AttrValue) -> Option<AttrValue> {
        self.mark_dirty(name);
        if value.is_nil() {
            return self.entries.remove(name);
        }
        self.entries.insert(name.to_string(), value)
    }

    /// Store a value read from the store: no dirty bit.
    pub fn set_loaded(&mut self, name: &str, value: AttrValue, flags: ValueFlags) {
        self.entries.insert(name.to_string(), value);
        if flags == ValueFlags::NONE {
            self.flags.remove(name);
        } else {
            self.flags.insert(name.to_string(), flags);
        }
    }

    /// Drop a value the store no longer has: no dirty bit.
    pub fn remove_loaded(&mut self, name: &str) -> Option<AttrValue> {
        self.flags.remove(name);
        self.entries.remove(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<AttrValue> {
        let prior = self.entries.remove(name);
        if prior.is_some() {
            self.mark_dirty(name);
        }
        prior
    }

    pub fn flags(&self, name: &str) -> ValueFlags {
        self.flags.get(name).copied().unwrap_or_default()
    }

    pub fn set_flag(&mut self, name: &str, flag: ValueFlags) {
        self.flags.entry(name.to_string()).or_default().insert(flag);
    }

    pub fn clear_flag(&mut self, name: &str, flag: ValueFlags) {
        if let Some(flags) = self.flags.get_mut(name) {
            flags.remove(flag);
        }
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.flags(name).contains(ValueFlags::DIRTY)
    }

    pub fn is_transient(&self, name: &str) -> bool {
        self.flags(name).contains(ValueFlags::TRANSIENT)
    }

    /// Names marked dirty, sorted. Includes removed names.
    pub fn dirty_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .flags
            .iter()
            .filter(|(_, f)| f.contains(ValueFlags::DIRTY))
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub fn clear_dirty(&mut self) {
        for flags in self.flags.values_mut() {
            flags.remove(ValueFlags::DIRTY);
        }
        let entries = &self.entries;
        self.flags
            .retain(|name, flags| *flags != ValueFlags::NONE && entries.contains_key(name));
    }

    /// Stored names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Order-independent content hash over persisted values.
    pub fn hash_values(&self) -> u64 {
        self.names()
            .iter()
            .filter(|name| !self.is_transient(name))
            .fold(0, |hash, name| {
                let value = &self.entries[name.as_str()];
                combine(
                    hash,
                    combine(ContentHasher::NAME.hash_str(name), hash_attr_value(value)),
                )
            })
    }

    /// A copy for a new item: flags reduced to the copy mask, every entry
    /// dirty, names rejected by `keep` left out.
    pub fn copy_filtered(&self, keep: impl Fn(&str) -> bool) -> Values {
        let mut copy = Values::new();
        for (name, value) in &self.entries {
            if !keep(name) {
                continue;
            }
            copy.entries.insert(name.clone(), value.clone());
            copy.flags
                .insert(name.clone(), self.flags(name).copied() | ValueFlags::DIRTY);
        }
        copy
    }

    /// Validate every value against its declaration on `kind`.
    ///
    /// Items with `SCHEMA` status are exempt. Each problem is logged; with
    /// `repair`, offending values are dropped. Returns `true` if nothing was
    /// wrong.
    pub fn check(
        &mut self,
        item: ItemId,
        kind: Option<KindId>,
        status: ItemStatus,
        schema: &Schema,
        kind_of: &dyn Fn(&ItemId) -> Option<KindId>,
        repair: bool,
    ) -> bool {
        let Some(kind) = kind else {
            return true;
        };
        if status.contains(ItemStatus::SCHEMA) {
            return true;
        }
        let mut ok = true;
        let mut broken = Vec::new();
        for name in self.names() {
            let value = &self.entries[name.as_str()];
            let attr = match schema.get_attribute(&kind, &name, true) {
                Ok(Some(attr)) => attr,
                Ok(None) => {
                    error!(item = %item, name = %name, "value for undeclared attribute");
                    ok = false;
                    continue;
                }
                Err(e) => {
                    error!(item = %item, name = %name, error = %e, "attribute lookup failed");
                    ok = false;
                    continue;
                }
            };
            if value.cardinality() != Some(attr.cardinality) {
                error!(
                    item = %item,
                    name = %name,
                    expected = %attr.cardinality,
                    actual = ?value.cardinality(),
                    "cardinality mismatch"
                );
                ok = false;
                broken.push(name);
                continue;
            }
            if let Some(type_id) = attr.type_id {
                if let Some(bad) = value
                    .values()
                    .find(|v| !schema.recognizes(&type_id, v, kind_of))
                {
                    error!(item = %item, name = %name, value = %bad, "value not recognized by type");
                    ok = false;
                    broken.push(name);
                }
            }
        }
        if repair {
            for name in broken {
                warn!(item = %item, name = %name, "dropping invalid value");
                self.remove(&name);
            }
        }
        ok
    }

    fn mark_dirty(&mut self, name: &str) {
        self.set_flag(name, ValueFlags::DIRTY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vor_schema::{Attribute, BuiltinType};
    use vor_types::{Cardinality, Value};

    // -----------------------------------------------------------------------
    // Flags
    // -----------------------------------------------------------------------

    #[test]
    fn set_marks_dirty_and_keeps_flags() {
        let mut v = Values::new();
        v.set_loaded("title", AttrValue::from("a"), ValueFlags::INDEXED);
        assert!(!v.is_dirty("title"));
        v.set("title", AttrValue::from("b"));
        assert!(v.is_dirty("title"));
        assert!(v.flags("title").contains(ValueFlags::INDEXED));
    }

    #[test]
    fn nil_removes() {
        let mut v = Values::new();
        v.set("a", AttrValue::from(1));
        v.clear_dirty();
        assert_eq!(v.set("a", AttrValue::Nil), Some(AttrValue::from(1)));
        assert!(!v.contains("a"));
        assert_eq!(v.dirty_names(), vec!["a".to_string()]);
    }

    #[test]
    fn clear_dirty_forgets_removed_names() {
        let mut v = Values::new();
        v.set("a", AttrValue::from(1));
        v.remove("a");
        v.clear_dirty();
        assert!(v.dirty_names().is_empty());
        assert_eq!(v.flags("a"), ValueFlags::NONE);
    }

    #[test]
    fn copy_keeps_copy_mask_only() {
        let mut v = Values::new();
        v.set_loaded("a", AttrValue::from(1), ValueFlags::NOINHERIT | ValueFlags::INDEXED);
        v.set_loaded("b", AttrValue::from(2), ValueFlags::NONE);
        let copy = v.copy_filtered(|name| name != "b");
        assert!(copy.contains("a"));
        assert!(!copy.contains("b"));
        assert_eq!(copy.flags("a"), ValueFlags::INDEXED | ValueFlags::DIRTY);
    }

    // -----------------------------------------------------------------------
    // Hashing
    // -----------------------------------------------------------------------

    #[test]
    fn hash_ignores_transient_values() {
        let mut a = Values::new();
        a.set("x", AttrValue::from(1));
        let mut b = a.clone();
        b.set("scratch", AttrValue::from("tmp"));
        b.set_flag("scratch", ValueFlags::TRANSIENT);
        assert_eq!(a.hash_values(), b.hash_values());
        b.set("x", AttrValue::from(2));
        assert_ne!(a.hash_values(), b.hash_values());
    }

    proptest! {
        #[test]
        fn hash_is_insertion_order_independent(
            entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..12)
        ) {
            let mut forward = Values::new();
            for (k, v) in &entries {
                forward.set(k, AttrValue::from(*v));
            }
            let mut backward = Values::new();
            for (k, v) in entries.iter().rev() {
                backward.set(k, AttrValue::from(*v));
            }
            prop_assert_eq!(forward.hash_values(), backward.hash_values());
        }
    }

    // -----------------------------------------------------------------------
    // Check
    // -----------------------------------------------------------------------

    fn schema_with_title() -> (Schema, KindId) {
        let schema = Schema::new();
        let k = schema.define_kind("//Note", &[]).unwrap();
        schema
            .add_attribute(k, Attribute::single("title", BuiltinType::String.type_id()))
            .unwrap();
        schema
            .add_attribute(
                k,
                Attribute::new("tags", Cardinality::List).with_type(BuiltinType::String.type_id()),
            )
            .unwrap();
        (schema, k)
    }

    #[test]
    fn check_accepts_valid_values() {
        let (schema, k) = schema_with_title();
        let mut v = Values::new();
        v.set("title", AttrValue::from("hi"));
        v.set("tags", AttrValue::List(vec![Value::from("a")]));
        assert!(v.check(ItemId::new(), Some(k), ItemStatus::NONE, &schema, &|_| None, false));
    }

    #[test]
    fn check_reports_and_repairs() {
        let (schema, k) = schema_with_title();
        let mut v = Values::new();
        v.set("title", AttrValue::from(3));
        v.set("tags", AttrValue::from("not a list"));
        let item = ItemId::new();
        assert!(!v.check(item, Some(k), ItemStatus::NONE, &schema, &|_| None, false));
        assert_eq!(v.len(), 2);
        assert!(!v.check(item, Some(k), ItemStatus::NONE, &schema, &|_| None, true));
        assert!(v.is_empty());
    }

    #[test]
    fn schema_items_are_exempt() {
        let (schema, k) = schema_with_title();
        let mut v = Values::new();
        v.set("title", AttrValue::from(3));
        assert!(v.check(ItemId::new(), Some(k), ItemStatus::SCHEMA, &schema, &|_| None, false));
    }
}
