use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cardinality::Cardinality;
use crate::error::TypeError;
use crate::id::{ItemId, LobId};

/// Pointer to a large object stored out of line.
///
/// Only the id and the indexed flag are part of a value record; the bytes
/// live in the lob store. `data` is populated when the lob was created in
/// this session (so the writer can store it) or after an explicit read.
#[derive(Clone, Serialize, Deserialize)]
pub struct Lob {
    pub id: LobId,
    pub indexed: bool,
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl Lob {
    /// A new lob with fresh identity holding `data`.
    pub fn new(data: Vec<u8>, indexed: bool) -> Self {
        Self {
            id: LobId::new(),
            indexed,
            data: Some(data),
        }
    }

    /// A pointer to an existing lob whose bytes have not been read.
    pub fn pointer(id: LobId, indexed: bool) -> Self {
        Self {
            id,
            indexed,
            data: None,
        }
    }
}

impl PartialEq for Lob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.indexed == other.indexed
    }
}

impl fmt::Debug for Lob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lob")
            .field("id", &self.id)
            .field("indexed", &self.indexed)
            .field("loaded", &self.data.is_some())
            .finish()
    }
}

/// A single literal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Stored null. Distinct from [`AttrValue::Nil`], which means "no value".
    None,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Lob(Lob),
    /// A literal pointer to an item, with no back-reference.
    SingleRef(ItemId),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Lob(_) => "lob",
            Self::SingleRef(_) => "singleref",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<ItemId> {
        match self {
            Self::SingleRef(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// `Int` as `Long`; anything else unchanged.
    pub fn widened(self) -> Self {
        match self {
            Self::Int(v) => Self::Long(i64::from(v)),
            other => other,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<ItemId> for Value {
    fn from(v: ItemId) -> Self {
        Self::SingleRef(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "b'{}'", hex::encode(b)),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Lob(l) => write!(f, "<lob {}>", l.id),
            Self::SingleRef(id) => write!(f, "<ref {id}>"),
        }
    }
}

/// An unordered collection of literals with set semantics.
///
/// Literals include floats, so membership is by equality rather than
/// hashing. Insertion order is kept for stable encoding; equality ignores it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValueSet(Vec<Value>);

impl ValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`; returns `false` if it was already present.
    pub fn insert(&mut self, value: Value) -> bool {
        if self.contains(&value) {
            return false;
        }
        self.0.push(value);
        true
    }

    pub fn remove(&mut self, value: &Value) -> bool {
        match self.0.iter().position(|v| v == value) {
            Some(pos) => {
                self.0.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.0.iter().any(|v| v == value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }
}

impl PartialEq for ValueSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.0.iter().all(|v| other.contains(v))
    }
}

impl FromIterator<Value> for ValueSet {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut set = Self::new();
        for v in iter {
            set.insert(v);
        }
        set
    }
}

/// The content of one literal attribute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    /// No value. Never persisted.
    Nil,
    Single(Value),
    List(Vec<Value>),
    Set(ValueSet),
    Dict(BTreeMap<String, Value>),
}

impl AttrValue {
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Every contained `Int` as `Long`.
    pub fn widened(self) -> Self {
        match self {
            Self::Nil => Self::Nil,
            Self::Single(v) => Self::Single(v.widened()),
            Self::List(vs) => Self::List(vs.into_iter().map(Value::widened).collect()),
            Self::Set(vs) => Self::Set(vs.0.into_iter().map(Value::widened).collect()),
            Self::Dict(map) => Self::Dict(map.into_iter().map(|(k, v)| (k, v.widened())).collect()),
        }
    }

    /// The container shape, or `None` for [`AttrValue::Nil`].
    pub fn cardinality(&self) -> Option<Cardinality> {
        match self {
            Self::Nil => None,
            Self::Single(_) => Some(Cardinality::Single),
            Self::List(_) => Some(Cardinality::List),
            Self::Set(_) => Some(Cardinality::Set),
            Self::Dict(_) => Some(Cardinality::Dict),
        }
    }

    /// Iterate over every contained literal.
    pub fn values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Self::Nil => Box::new(std::iter::empty()),
            Self::Single(v) => Box::new(std::iter::once(v)),
            Self::List(vs) => Box::new(vs.iter()),
            Self::Set(vs) => Box::new(vs.iter()),
            Self::Dict(map) => Box::new(map.values()),
        }
    }

    pub fn as_single(&self) -> Result<&Value, TypeError> {
        match self {
            Self::Single(v) => Ok(v),
            other => Err(TypeError::Mismatch {
                expected: "single",
                actual: other.shape_name(),
            }),
        }
    }

    fn shape_name(&self) -> &'static str {
        self.cardinality().map_or("nil", |c| c.as_str())
    }
}

impl From<Value> for AttrValue {
    fn from(v: Value) -> Self {
        Self::Single(v)
    }
}

macro_rules! single_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for AttrValue {
                fn from(v: $t) -> Self {
                    Self::Single(Value::from(v))
                }
            }
        )*
    };
}

single_from!(&str, String, i32, i64, f64, bool, Uuid, ItemId);
