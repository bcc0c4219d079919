use serde::{Deserialize, Serialize};
use vor_types::{KindId, TypeId, Value};

/// The literal types every schema starts with.
///
/// Each builtin has a fixed [`TypeId`], so self-describing records written by
/// one repository decode in any other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinType {
    None,
    Boolean,
    Integer,
    Long,
    Float,
    String,
    Bytes,
    Uuid,
    Lob,
    SingleRef,
}

const BUILTIN_BASE: u128 = 0x566f_5200_0000_4000_8000_0000_0000_0000;

impl BuiltinType {
    pub const ALL: [Self; 10] = [
        Self::None,
        Self::Boolean,
        Self::Integer,
        Self::Long,
        Self::Float,
        Self::String,
        Self::Bytes,
        Self::Uuid,
        Self::Lob,
        Self::SingleRef,
    ];

    pub fn type_id(self) -> TypeId {
        TypeId::from_u128(BUILTIN_BASE | (self as u128 + 1))
    }

    pub fn from_type_id(id: &TypeId) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.type_id() == *id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Boolean => "Boolean",
            Self::Integer => "Integer",
            Self::Long => "Long",
            Self::Float => "Float",
            Self::String => "String",
            Self::Bytes => "Bytes",
            Self::Uuid => "UUID",
            Self::Lob => "Lob",
            Self::SingleRef => "SingleRef",
        }
    }

    /// Runtime type inspection, used when an attribute declares no type.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::None => Self::None,
            Value::Bool(_) => Self::Boolean,
            Value::Int(_) => Self::Integer,
            Value::Long(_) => Self::Long,
            Value::Float(_) => Self::Float,
            Value::Str(_) => Self::String,
            Value::Bytes(_) => Self::Bytes,
            Value::Uuid(_) => Self::Uuid,
            Value::Lob(_) => Self::Lob,
            Value::SingleRef(_) => Self::SingleRef,
        }
    }

    /// Booleans are tri-state: they also accept a stored null.
    pub fn recognizes(self, value: &Value) -> bool {
        match (self, value) {
            (Self::Boolean, Value::None) => true,
            (Self::Long, Value::Int(_)) => true,
            _ => Self::of_value(value) == self,
        }
    }
}

/// How a type is defined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeDef {
    Builtin(BuiltinType),
    /// Any of the listed types; the first that recognizes a value is used.
    Alias(Vec<TypeId>),
    /// Item pointers whose target must be of the kind.
    Kind(KindId),
}

/// A named type in the schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrType {
    pub id: TypeId,
    pub name: String,
    pub def: TypeDef,
}

impl AttrType {
    pub fn builtin(t: BuiltinType) -> Self {
        Self {
            id: t.type_id(),
            name: t.name().to_string(),
            def: TypeDef::Builtin(t),
        }
    }
}
