use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};
use vor_hash::{combine, hash_attr_value, ContentHasher};
use vor_types::{AttrId, AttrValue, ItemId, KindId, TypeId, Value};

use crate::attribute::{Aspect, AspectValue, Attribute};
use crate::behavior::{ItemBehavior, ItemClass};
use crate::error::{SchemaError, SchemaResult};
use crate::kind::{InitialValues, Kind, ResolvedAttribute};
use crate::types::{AttrType, BuiltinType, TypeDef};

/// Namespace under which generated mixin kinds are registered.
pub const MIXINS_PATH: &str = "//Schema/Mixins";

struct SchemaState {
    kinds: HashMap<KindId, Kind>,
    paths: HashMap<String, KindId>,
    attributes: HashMap<AttrId, Attribute>,
    types: HashMap<TypeId, AttrType>,
    /// Structural hash -> generated mixin kind.
    mixins: HashMap<u64, KindId>,
}

impl SchemaState {
    fn kind(&self, id: &KindId) -> SchemaResult<&Kind> {
        self.kinds.get(id).ok_or(SchemaError::NoSuchKind(*id))
    }

    fn kind_mut(&mut self, id: &KindId) -> SchemaResult<&mut Kind> {
        self.kinds.get_mut(id).ok_or(SchemaError::NoSuchKind(*id))
    }

    fn attribute(&self, id: &AttrId) -> SchemaResult<&Attribute> {
        self.attributes
            .get(id)
            .ok_or(SchemaError::NoSuchAttributeId(*id))
    }

    fn path(&self, id: &KindId) -> String {
        self.kinds
            .get(id)
            .map_or_else(|| id.to_string(), |k| k.path.clone())
    }
}

#[derive(Default)]
struct KindCache {
    all_attributes: Option<Arc<BTreeMap<String, ResolvedAttribute>>>,
    inherited: HashMap<String, ResolvedAttribute>,
    not_found: HashSet<String>,
    inherited_super_kinds: Option<Arc<Vec<KindId>>>,
    initial_values: Option<Arc<InitialValues>>,
    item_class: Option<Arc<ItemClass>>,
    schema_hash: Option<u64>,
}

type Caches = HashMap<KindId, KindCache>;

/// The schema registry.
///
/// All methods take `&self`; definitions sit behind a `RwLock` and the
/// per-kind caches behind a `Mutex`. Locks are always taken in that order.
pub struct Schema {
    state: RwLock<SchemaState>,
    caches: Mutex<Caches>,
}

impl Schema {
    /// A schema holding only the builtin types.
    pub fn new() -> Self {
        let types = BuiltinType::ALL
            .into_iter()
            .map(|t| (t.type_id(), AttrType::builtin(t)))
            .collect();
        Self {
            state: RwLock::new(SchemaState {
                kinds: HashMap::new(),
                paths: HashMap::new(),
                attributes: HashMap::new(),
                types,
                mixins: HashMap::new(),
            }),
            caches: Mutex::new(HashMap::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Register a named type.
    pub fn define_type(&self, name: impl Into<String>, def: TypeDef) -> TypeId {
        let id = TypeId::new();
        let mut state = self.state.write().expect("lock poisoned");
        state.types.insert(
            id,
            AttrType {
                id,
                name: name.into(),
                def,
            },
        );
        id
    }

    /// Register a global attribute, not owned by any kind.
    pub fn define_attribute(&self, mut attr: Attribute) -> AttrId {
        attr.owner = None;
        let id = attr.id;
        let mut state = self.state.write().expect("lock poisoned");
        state.attributes.insert(id, attr);
        id
    }

    /// Register a kind at `path` inheriting from `super_kinds`, in order.
    pub fn define_kind(&self, path: impl Into<String>, super_kinds: &[KindId]) -> SchemaResult<KindId> {
        let path = path.into();
        let mut state = self.state.write().expect("lock poisoned");
        if state.paths.contains_key(&path) {
            return Err(SchemaError::DuplicatePath(path));
        }
        for (i, sup) in super_kinds.iter().enumerate() {
            state.kind(sup)?;
            if super_kinds[..i].contains(sup) {
                return Err(SchemaError::DuplicateSuperKind {
                    kind: path,
                    super_kind: state.path(sup),
                });
            }
        }
        let kind = Kind::new(path.clone(), super_kinds.to_vec());
        let id = kind.id;
        for sup in super_kinds {
            state.kind_mut(sup)?.sub_kinds.push(id);
        }
        state.paths.insert(path.clone(), id);
        state.kinds.insert(id, kind);
        debug!(kind = %id.short_hex(), path = %path, "kind defined");
        Ok(id)
    }

    /// Declare `attr` locally on `kind` under its own name.
    pub fn add_attribute(&self, kind: KindId, mut attr: Attribute) -> SchemaResult<AttrId> {
        let mut state = self.state.write().expect("lock poisoned");
        let k = state.kind(&kind)?;
        if k.local_attribute(&attr.name).is_some() {
            return Err(SchemaError::DuplicateAttribute {
                kind: k.path.clone(),
                name: attr.name,
            });
        }
        attr.owner = Some(kind);
        let id = attr.id;
        let alias = attr.name.clone();
        state.attributes.insert(id, attr);
        state.kind_mut(&kind)?.attributes.push((alias, id));
        self.flush_locked(&state, &kind, "attribute added");
        Ok(id)
    }

    /// Make an existing attribute visible on `kind` under `alias`.
    pub fn add_attribute_alias(
        &self,
        kind: KindId,
        alias: impl Into<String>,
        attr: AttrId,
    ) -> SchemaResult<()> {
        let alias = alias.into();
        let mut state = self.state.write().expect("lock poisoned");
        state.attribute(&attr)?;
        let k = state.kind(&kind)?;
        if k.local_attribute(&alias).is_some() {
            return Err(SchemaError::DuplicateAttribute {
                kind: k.path.clone(),
                name: alias,
            });
        }
        state.kind_mut(&kind)?.attributes.push((alias, attr));
        self.flush_locked(&state, &kind, "attribute alias added");
        Ok(())
    }

    /// Append `super_kind` to the super kinds of `kind`.
    pub fn add_super_kind(&self, kind: KindId, super_kind: KindId) -> SchemaResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let k = state.kind(&kind)?;
        state.kind(&super_kind)?;
        if k.super_kinds.contains(&super_kind) {
            return Err(SchemaError::DuplicateSuperKind {
                kind: k.path.clone(),
                super_kind: state.path(&super_kind),
            });
        }
        {
            let mut caches = self.caches.lock().expect("lock poisoned");
            let ancestors = inherited_super_kinds(&state, &mut caches, &super_kind)?;
            if super_kind == kind || ancestors.contains(&kind) {
                return Err(SchemaError::Cycle {
                    kind: state.path(&kind),
                    super_kind: state.path(&super_kind),
                });
            }
        }
        state.kind_mut(&kind)?.super_kinds.push(super_kind);
        state.kind_mut(&super_kind)?.sub_kinds.push(kind);
        self.flush_locked(&state, &kind, "super kind added");
        Ok(())
    }

    /// Replace an attribute's initial value.
    pub fn set_initial_value(&self, attr: AttrId, value: Option<AttrValue>) -> SchemaResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state
            .attributes
            .get_mut(&attr)
            .ok_or(SchemaError::NoSuchAttributeId(attr))?
            .initial_value = value;
        let declaring: Vec<KindId> = state
            .kinds
            .values()
            .filter(|k| k.attributes.iter().any(|(_, id)| *id == attr))
            .map(|k| k.id)
            .collect();
        for kind in &declaring {
            self.flush_locked(&state, kind, "initial value changed");
        }
        Ok(())
    }

    /// Override the inverse name of attribute `name` for items of `kind`.
    pub fn set_other_name(
        &self,
        kind: KindId,
        name: impl Into<String>,
        other_name: impl Into<String>,
    ) -> SchemaResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state
            .kind_mut(&kind)?
            .other_names
            .insert(name.into(), other_name.into());
        self.flush_locked(&state, &kind, "other name changed");
        Ok(())
    }

    /// Attach a behavior to `kind`.
    pub fn set_behavior(&self, kind: KindId, behavior: Arc<dyn ItemBehavior>) -> SchemaResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.kind_mut(&kind)?.behavior = Some(behavior);
        self.flush_locked(&state, &kind, "behavior changed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn kind(&self, id: &KindId) -> SchemaResult<Kind> {
        let state = self.state.read().expect("lock poisoned");
        state.kind(id).cloned()
    }

    pub fn kind_by_path(&self, path: &str) -> Option<KindId> {
        let state = self.state.read().expect("lock poisoned");
        state.paths.get(path).copied()
    }

    pub fn has_kind(&self, id: &KindId) -> bool {
        let state = self.state.read().expect("lock poisoned");
        state.kinds.contains_key(id)
    }

    pub fn kind_path(&self, id: &KindId) -> String {
        let state = self.state.read().expect("lock poisoned");
        state.path(id)
    }

    pub fn attribute(&self, id: &AttrId) -> SchemaResult<Attribute> {
        let state = self.state.read().expect("lock poisoned");
        state.attribute(id).cloned()
    }

    pub fn type_def(&self, id: &TypeId) -> SchemaResult<AttrType> {
        let state = self.state.read().expect("lock poisoned");
        state.types.get(id).cloned().ok_or(SchemaError::NoSuchType(*id))
    }

    /// Number of registered kinds, mixins included.
    pub fn kind_count(&self) -> usize {
        self.state.read().expect("lock poisoned").kinds.len()
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Resolve `name` on `kind`.
    ///
    /// Search order: the cached full table, the local declaration, the
    /// cached inherited table (including negative results), then the super
    /// kinds left to right, depth first. With `no_error`, a missing
    /// attribute is `Ok(None)` instead of [`SchemaError::NoSuchAttribute`].
    pub fn get_attribute(
        &self,
        kind: &KindId,
        name: &str,
        no_error: bool,
    ) -> SchemaResult<Option<Attribute>> {
        let state = self.state.read().expect("lock poisoned");
        let mut caches = self.caches.lock().expect("lock poisoned");
        match resolve_attribute(&state, &mut caches, kind, name)? {
            Some(entry) => Ok(Some(state.attribute(&entry.attr)?.clone())),
            None if no_error => Ok(None),
            None => Err(SchemaError::NoSuchAttribute {
                kind: state.path(kind),
                name: name.to_string(),
            }),
        }
    }

    /// The deduplicated attribute table of `kind`, sorted by name.
    ///
    /// Super kinds contribute first (earlier super kinds win), then local
    /// declarations override. `inherited = false` keeps only rows declared
    /// on `kind` itself; `local_only` / `global_only` filter on whether the
    /// winning declaration is owned by its kind.
    pub fn iter_attributes(
        &self,
        kind: &KindId,
        inherited: bool,
        local_only: bool,
        global_only: bool,
    ) -> SchemaResult<Vec<ResolvedAttribute>> {
        let state = self.state.read().expect("lock poisoned");
        let mut caches = self.caches.lock().expect("lock poisoned");
        let all = all_attributes(&state, &mut caches, kind)?;
        Ok(all
            .values()
            .filter(|e| inherited || e.kind == *kind)
            .filter(|e| !local_only || e.local)
            .filter(|e| !global_only || !e.local)
            .cloned()
            .collect())
    }

    /// Every ancestor of `kind`, linearized depth first, left to right.
    pub fn inherited_super_kinds(&self, kind: &KindId) -> SchemaResult<Vec<KindId>> {
        let state = self.state.read().expect("lock poisoned");
        let mut caches = self.caches.lock().expect("lock poisoned");
        Ok(inherited_super_kinds(&state, &mut caches, kind)?.to_vec())
    }

    pub fn is_kind_of(&self, kind: &KindId, other: &KindId) -> SchemaResult<bool> {
        let state = self.state.read().expect("lock poisoned");
        let mut caches = self.caches.lock().expect("lock poisoned");
        is_kind_of(&state, &mut caches, kind, other)
    }

    /// The inverse attribute name of `name` on `kind`: the kind's own
    /// override (searched up the hierarchy) or the attribute's declaration.
    pub fn get_other_name(&self, kind: &KindId, name: &str) -> SchemaResult<Option<String>> {
        let state = self.state.read().expect("lock poisoned");
        let mut caches = self.caches.lock().expect("lock poisoned");
        other_name(&state, &mut caches, kind, name)
    }

    /// One aspect of `name` as resolved on `kind`. The inverse name honours
    /// the kind's overrides, like [`get_other_name`](Self::get_other_name).
    pub fn get_attribute_aspect(
        &self,
        kind: &KindId,
        name: &str,
        aspect: Aspect,
    ) -> SchemaResult<Option<AspectValue>> {
        let Some(attr) = self.get_attribute(kind, name, false)? else {
            return Ok(None);
        };
        if aspect == Aspect::OtherName {
            return Ok(self.get_other_name(kind, name)?.map(AspectValue::Name));
        }
        Ok(attr.aspect(aspect))
    }

    /// Whether `name` is declared on `kind` and not read-only.
    pub fn is_attribute_modifiable(&self, kind: &KindId, name: &str) -> SchemaResult<bool> {
        Ok(self
            .get_attribute(kind, name, true)?
            .is_some_and(|attr| !attr.read_only))
    }

    /// Initial values of every attribute visible on `kind`, split into
    /// literals and references.
    pub fn initial_values(&self, kind: &KindId) -> SchemaResult<Arc<InitialValues>> {
        let state = self.state.read().expect("lock poisoned");
        let mut caches = self.caches.lock().expect("lock poisoned");
        if let Some(cached) = caches.get(kind).and_then(|c| c.initial_values.clone()) {
            return Ok(cached);
        }
        let all = all_attributes(&state, &mut caches, kind)?;
        let mut initial = InitialValues::default();
        for (name, entry) in all.iter() {
            let attr = state.attribute(&entry.attr)?;
            if let Some(value) = &attr.initial_value {
                if other_name(&state, &mut caches, kind, name)?.is_some() {
                    initial.refs.push((name.clone(), value.clone()));
                } else {
                    initial.values.push((name.clone(), value.clone()));
                }
            }
        }
        let initial = Arc::new(initial);
        caches.entry(*kind).or_default().initial_values = Some(initial.clone());
        Ok(initial)
    }

    /// Structural hash of `kind`.
    ///
    /// Combines the path hash (skipped for mixins, which are identified by
    /// structure), the super kinds' hashes and, for non-mixins, each local
    /// attribute's name and definition hash in name order.
    pub fn hash_item(&self, kind: &KindId) -> SchemaResult<u64> {
        let state = self.state.read().expect("lock poisoned");
        let mut caches = self.caches.lock().expect("lock poisoned");
        hash_item(&state, &mut caches, kind)
    }

    /// The mixin of `kind` with `others`: a kind whose super kinds are
    /// `kind` followed by `others`. Generated once per structural hash and
    /// reused afterwards.
    pub fn mixin(&self, kind: KindId, others: &[KindId]) -> SchemaResult<KindId> {
        let mut state = self.state.write().expect("lock poisoned");
        let mut caches = self.caches.lock().expect("lock poisoned");

        let mut supers = vec![kind];
        let direct = state.kind(&kind)?.super_kinds.clone();
        for other in others {
            state.kind(other)?;
            if supers.contains(other) || direct.contains(other) {
                return Err(SchemaError::DuplicateSuperKind {
                    kind: state.path(&kind),
                    super_kind: state.path(other),
                });
            }
            supers.push(*other);
        }

        let mut hash = hash_item(&state, &mut caches, &kind)?;
        for other in others {
            hash = combine(hash, hash_item(&state, &mut caches, other)?);
        }
        if let Some(existing) = state.mixins.get(&hash) {
            return Ok(*existing);
        }

        let path = format!("{MIXINS_PATH}/mixin_{hash:016x}");
        let mut mixin = Kind::new(path.clone(), supers.clone());
        mixin.mixins = Some(supers.iter().map(|k| state.path(k)).collect());
        let id = mixin.id;
        for sup in &supers {
            state.kind_mut(sup)?.sub_kinds.push(id);
        }
        state.paths.insert(path.clone(), id);
        state.kinds.insert(id, mixin);
        state.mixins.insert(hash, id);
        info!(kind = %id.short_hex(), path = %path, "mixin kind generated");
        Ok(id)
    }

    /// The composite behavior of `kind`: its own behavior followed by those
    /// of its inherited super kinds, each once. Cached until the next flush.
    pub fn item_class(&self, kind: &KindId) -> SchemaResult<Arc<ItemClass>> {
        let state = self.state.read().expect("lock poisoned");
        let mut caches = self.caches.lock().expect("lock poisoned");
        if let Some(cached) = caches.get(kind).and_then(|c| c.item_class.clone()) {
            return Ok(cached);
        }
        let mut chain = vec![*kind];
        chain.extend(inherited_super_kinds(&state, &mut caches, kind)?.iter().copied());

        let mut behaviors: Vec<Arc<dyn ItemBehavior>> = Vec::new();
        for k in &chain {
            if let Some(b) = &state.kind(k)?.behavior {
                if !behaviors.iter().any(|seen| same_behavior(seen, b)) {
                    behaviors.push(b.clone());
                }
            }
        }
        let name = match behaviors.as_slice() {
            [] => "Item".to_string(),
            [only] => only.name().to_string(),
            _ => format!("class_{:016x}", hash_item(&state, &mut caches, kind)?),
        };
        let class = Arc::new(ItemClass { name, behaviors });
        caches.entry(*kind).or_default().item_class = Some(class.clone());
        Ok(class)
    }

    /// Drop every cache of `kind` and, recursively, of its sub kinds.
    pub fn flush_caches(&self, kind: &KindId, reason: &str) {
        let state = self.state.read().expect("lock poisoned");
        self.flush_locked(&state, kind, reason);
    }

    fn flush_locked(&self, state: &SchemaState, kind: &KindId, reason: &str) {
        let mut caches = self.caches.lock().expect("lock poisoned");
        debug!(kind = %state.path(kind), reason, "flushing kind caches");
        flush(state, &mut caches, kind);
    }

    /// The kind in this schema matching `kind` of `other` by path.
    ///
    /// `Ok(None)` if no kind has that path here; an error if one does but
    /// its structural hash differs.
    pub fn find_match(&self, other: &Schema, kind: &KindId) -> SchemaResult<Option<KindId>> {
        let path = other.kind(kind)?.path;
        let Some(local) = self.kind_by_path(&path) else {
            return Ok(None);
        };
        let local_hash = self.hash_item(&local)?;
        let other_hash = other.hash_item(kind)?;
        if local_hash != other_hash {
            return Err(SchemaError::IncompatibleKinds {
                path,
                local: local_hash,
                other: other_hash,
            });
        }
        Ok(Some(local))
    }

    // -----------------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------------

    /// Pick the concrete type for writing `value` to an attribute typed
    /// `type_id`.
    ///
    /// Untyped attributes use runtime inspection; aliases use their first
    /// member that recognizes the value; kind types accept item pointers
    /// whose target (as reported by `kind_of`) is of that kind.
    pub fn resolve_type(
        &self,
        type_id: Option<&TypeId>,
        value: &Value,
        kind_of: &dyn Fn(&ItemId) -> Option<KindId>,
    ) -> SchemaResult<(TypeId, BuiltinType)> {
        let Some(type_id) = type_id else {
            let t = BuiltinType::of_value(value);
            return Ok((t.type_id(), t));
        };
        let state = self.state.read().expect("lock poisoned");
        let mut caches = self.caches.lock().expect("lock poisoned");
        resolve_type(&state, &mut caches, type_id, value, kind_of)
    }

    pub fn recognizes(
        &self,
        type_id: &TypeId,
        value: &Value,
        kind_of: &dyn Fn(&ItemId) -> Option<KindId>,
    ) -> bool {
        self.resolve_type(Some(type_id), value, kind_of).is_ok()
    }

    /// The codec dispatch for a type id read from a record or declared by
    /// an attribute.
    pub fn decode_type(&self, type_id: &TypeId) -> SchemaResult<BuiltinType> {
        if let Some(t) = BuiltinType::from_type_id(type_id) {
            return Ok(t);
        }
        let t = self.type_def(type_id)?;
        match t.def {
            TypeDef::Builtin(b) => Ok(b),
            TypeDef::Kind(_) => Ok(BuiltinType::SingleRef),
            TypeDef::Alias(_) => Err(SchemaError::AmbiguousType(t.name)),
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("Schema")
            .field("kinds", &state.kinds.len())
            .field("attributes", &state.attributes.len())
            .field("types", &state.types.len())
            .finish()
    }
}

fn same_behavior(a: &Arc<dyn ItemBehavior>, b: &Arc<dyn ItemBehavior>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn flush(state: &SchemaState, caches: &mut Caches, kind: &KindId) {
    caches.remove(kind);
    if let Some(k) = state.kinds.get(kind) {
        for sub in &k.sub_kinds {
            flush(state, caches, sub);
        }
    }
}

fn resolve_attribute(
    state: &SchemaState,
    caches: &mut Caches,
    kind_id: &KindId,
    name: &str,
) -> SchemaResult<Option<ResolvedAttribute>> {
    if let Some(all) = caches.get(kind_id).and_then(|c| c.all_attributes.clone()) {
        return Ok(all.get(name).cloned());
    }
    let kind = state.kind(kind_id)?;
    if let Some(attr) = kind.local_attribute(name) {
        return Ok(Some(ResolvedAttribute {
            name: name.to_string(),
            attr,
            kind: *kind_id,
            local: state.attribute(&attr)?.owner == Some(*kind_id),
        }));
    }
    if let Some(cache) = caches.get(kind_id) {
        if let Some(hit) = cache.inherited.get(name) {
            return Ok(Some(hit.clone()));
        }
        if cache.not_found.contains(name) {
            return Ok(None);
        }
    }
    for sup in &kind.super_kinds {
        if let Some(found) = resolve_attribute(state, caches, sup, name)? {
            caches
                .entry(*kind_id)
                .or_default()
                .inherited
                .insert(name.to_string(), found.clone());
            return Ok(Some(found));
        }
    }
    caches
        .entry(*kind_id)
        .or_default()
        .not_found
        .insert(name.to_string());
    Ok(None)
}

fn all_attributes(
    state: &SchemaState,
    caches: &mut Caches,
    kind_id: &KindId,
) -> SchemaResult<Arc<BTreeMap<String, ResolvedAttribute>>> {
    if let Some(all) = caches.get(kind_id).and_then(|c| c.all_attributes.clone()) {
        return Ok(all);
    }
    let kind = state.kind(kind_id)?;
    let mut table = BTreeMap::new();
    for sup in &kind.super_kinds {
        for (name, entry) in all_attributes(state, caches, sup)?.iter() {
            table.entry(name.clone()).or_insert_with(|| entry.clone());
        }
    }
    for (alias, attr) in &kind.attributes {
        table.insert(
            alias.clone(),
            ResolvedAttribute {
                name: alias.clone(),
                attr: *attr,
                kind: *kind_id,
                local: state.attribute(attr)?.owner == Some(*kind_id),
            },
        );
    }
    let table = Arc::new(table);
    caches.entry(*kind_id).or_default().all_attributes = Some(table.clone());
    Ok(table)
}

fn inherited_super_kinds(
    state: &SchemaState,
    caches: &mut Caches,
    kind_id: &KindId,
) -> SchemaResult<Arc<Vec<KindId>>> {
    if let Some(cached) = caches
        .get(kind_id)
        .and_then(|c| c.inherited_super_kinds.clone())
    {
        return Ok(cached);
    }
    let kind = state.kind(kind_id)?;
    let mut out: Vec<KindId> = Vec::new();
    for sup in &kind.super_kinds {
        if !out.contains(sup) {
            out.push(*sup);
        }
        for k in inherited_super_kinds(state, caches, sup)?.iter() {
            if !out.contains(k) {
                out.push(*k);
            }
        }
    }
    let out = Arc::new(out);
    caches.entry(*kind_id).or_default().inherited_super_kinds = Some(out.clone());
    Ok(out)
}

fn is_kind_of(
    state: &SchemaState,
    caches: &mut Caches,
    kind: &KindId,
    other: &KindId,
) -> SchemaResult<bool> {
    Ok(kind == other || inherited_super_kinds(state, caches, kind)?.contains(other))
}

fn other_name(
    state: &SchemaState,
    caches: &mut Caches,
    kind: &KindId,
    name: &str,
) -> SchemaResult<Option<String>> {
    let mut chain = vec![*kind];
    chain.extend(inherited_super_kinds(state, caches, kind)?.iter().copied());
    for k in &chain {
        if let Some(other) = state.kind(k)?.other_names.get(name) {
            return Ok(Some(other.clone()));
        }
    }
    let entry =
        resolve_attribute(state, caches, kind, name)?.ok_or_else(|| SchemaError::NoSuchAttribute {
            kind: state.path(kind),
            name: name.to_string(),
        })?;
    Ok(state.attribute(&entry.attr)?.other_name.clone())
}

fn attribute_hash(state: &SchemaState, attr: &Attribute) -> u64 {
    let mut buf = Vec::new();
    buf.extend_from_slice(attr.name.as_bytes());
    buf.push(0);
    buf.extend_from_slice(attr.cardinality.as_str().as_bytes());
    buf.push(0);
    if let Some(t) = attr.type_id.as_ref().and_then(|id| state.types.get(id)) {
        buf.extend_from_slice(t.name.as_bytes());
    }
    buf.push(0);
    if let Some(other) = &attr.other_name {
        buf.extend_from_slice(other.as_bytes());
    }
    buf.push(0);
    buf.push(u8::from(attr.persisted));
    buf.push(u8::from(attr.indexed));
    let hash = ContentHasher::ATTRIBUTE.hash(&buf);
    match &attr.initial_value {
        Some(v) => combine(hash, hash_attr_value(v)),
        None => hash,
    }
}

fn hash_item(state: &SchemaState, caches: &mut Caches, kind_id: &KindId) -> SchemaResult<u64> {
    if let Some(hash) = caches.get(kind_id).and_then(|c| c.schema_hash) {
        return Ok(hash);
    }
    let kind = state.kind(kind_id)?;
    let mut hash = if kind.is_mixin() {
        0
    } else {
        ContentHasher::PATH.hash_str(&kind.path)
    };
    for sup in &kind.super_kinds {
        hash = combine(hash, hash_item(state, caches, sup)?);
    }
    if !kind.is_mixin() {
        let mut locals: Vec<&(String, AttrId)> = kind.attributes.iter().collect();
        locals.sort_by(|a, b| a.0.cmp(&b.0));
        for (alias, attr) in locals {
            hash = combine(hash, ContentHasher::NAME.hash_str(alias));
            hash = combine(hash, attribute_hash(state, state.attribute(attr)?));
        }
    }
    caches.entry(*kind_id).or_default().schema_hash = Some(hash);
    Ok(hash)
}

fn resolve_type(
    state: &SchemaState,
    caches: &mut Caches,
    type_id: &TypeId,
    value: &Value,
    kind_of: &dyn Fn(&ItemId) -> Option<KindId>,
) -> SchemaResult<(TypeId, BuiltinType)> {
    let t = state.types.get(type_id).ok_or(SchemaError::NoSuchType(*type_id))?;
    let mismatch = || SchemaError::TypeMismatch {
        type_name: t.name.clone(),
        value: value.to_string(),
    };
    match &t.def {
        TypeDef::Builtin(b) if b.recognizes(value) => Ok((*type_id, *b)),
        TypeDef::Builtin(_) => Err(mismatch()),
        TypeDef::Alias(members) => {
            for member in members {
                if let Ok(found) = resolve_type(state, caches, member, value, kind_of) {
                    return Ok(found);
                }
            }
            Err(mismatch())
        }
        TypeDef::Kind(kind) => {
            let Value::SingleRef(item) = value else {
                return Err(mismatch());
            };
            match kind_of(item) {
                Some(k) if !is_kind_of(state, caches, &k, kind)? => Err(mismatch()),
                _ => Ok((*type_id, BuiltinType::SingleRef)),
            }
        }
    }
}
