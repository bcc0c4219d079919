use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vor_types::{AttrId, AttrValue, Cardinality, KindId, TypeId};

use crate::types::BuiltinType;

/// What copying an item does with an attribute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyPolicy {
    /// Duplicate literals; for references, point the copy at the same peers.
    #[default]
    Copy,
    /// References only: the copy shares the peers, like `Copy`.
    Link,
    /// References only: copy the peers too, then point at the copies.
    Cascade,
    /// Leave the attribute out of the copy.
    Remove,
}

impl CopyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Link => "link",
            Self::Cascade => "cascade",
            Self::Remove => "remove",
        }
    }
}

/// An attribute definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttrId,
    pub name: String,
    /// The kind this attribute was declared on; `None` for global attributes.
    pub owner: Option<KindId>,
    pub cardinality: Cardinality,
    /// `None` means untyped: values are dispatched by runtime inspection.
    pub type_id: Option<TypeId>,
    /// The inverse attribute on the peer, for bidirectional references.
    pub other_name: Option<String>,
    pub initial_value: Option<AttrValue>,
    pub persisted: bool,
    pub indexed: bool,
    pub required: bool,
    pub read_only: bool,
    pub copy_policy: CopyPolicy,
}

impl Attribute {
    pub fn new(name: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            id: AttrId::new(),
            name: name.into(),
            owner: None,
            cardinality,
            type_id: None,
            other_name: None,
            initial_value: None,
            persisted: true,
            indexed: false,
            required: false,
            read_only: false,
            copy_policy: CopyPolicy::Copy,
        }
    }

    /// A single-valued attribute of the given type.
    pub fn single(name: impl Into<String>, type_id: TypeId) -> Self {
        Self::new(name, Cardinality::Single).with_type(type_id)
    }

    /// A reference attribute whose inverse on the peer is `other_name`.
    pub fn reference(
        name: impl Into<String>,
        cardinality: Cardinality,
        other_name: impl Into<String>,
    ) -> Self {
        let mut attr = Self::new(name, cardinality);
        attr.other_name = Some(other_name.into());
        attr
    }

    pub fn with_type(mut self, type_id: TypeId) -> Self {
        self.type_id = Some(type_id);
        self
    }

    pub fn with_initial_value(mut self, value: impl Into<AttrValue>) -> Self {
        self.initial_value = Some(value.into());
        self
    }

    pub fn with_copy_policy(mut self, policy: CopyPolicy) -> Self {
        self.copy_policy = policy;
        self
    }

    pub fn transient(mut self) -> Self {
        self.persisted = false;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// `value` in the form it reads back as once stored: integers held by
    /// a `Long` attribute are widened.
    pub fn conform(&self, value: AttrValue) -> AttrValue {
        match self.type_id.as_ref().and_then(BuiltinType::from_type_id) {
            Some(BuiltinType::Long) => value.widened(),
            _ => value,
        }
    }

    /// Read one aspect of the definition.
    pub fn aspect(&self, aspect: Aspect) -> Option<AspectValue> {
        match aspect {
            Aspect::Type => self.type_id.map(AspectValue::Type),
            Aspect::Cardinality => Some(AspectValue::Cardinality(self.cardinality)),
            Aspect::OtherName => self.other_name.clone().map(AspectValue::Name),
            Aspect::InitialValue => self.initial_value.clone().map(AspectValue::Value),
            Aspect::Persisted => Some(AspectValue::Flag(self.persisted)),
            Aspect::Indexed => Some(AspectValue::Flag(self.indexed)),
            Aspect::Required => Some(AspectValue::Flag(self.required)),
            Aspect::ReadOnly => Some(AspectValue::Flag(self.read_only)),
            Aspect::CopyPolicy => Some(AspectValue::CopyPolicy(self.copy_policy)),
        }
    }
}

/// An introspectable facet of an attribute definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Aspect {
    Type,
    Cardinality,
    OtherName,
    InitialValue,
    Persisted,
    Indexed,
    Required,
    ReadOnly,
    CopyPolicy,
}

impl FromStr for Aspect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "type" => Ok(Self::Type),
            "cardinality" => Ok(Self::Cardinality),
            "otherName" => Ok(Self::OtherName),
            "initialValue" => Ok(Self::InitialValue),
            "persisted" => Ok(Self::Persisted),
            "indexed" => Ok(Self::Indexed),
            "required" => Ok(Self::Required),
            "readOnly" => Ok(Self::ReadOnly),
            "copyPolicy" => Ok(Self::CopyPolicy),
            other => Err(format!("unknown aspect: {other}")),
        }
    }
}

/// The value of an [`Aspect`].
#[derive(Clone, Debug, PartialEq)]
pub enum AspectValue {
    Type(TypeId),
    Cardinality(Cardinality),
    Name(String),
    Value(AttrValue),
    Flag(bool),
    CopyPolicy(CopyPolicy),
}

impl fmt::Display for AspectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(id) => write!(f, "{id}"),
            Self::Cardinality(c) => write!(f, "{c}"),
            Self::Name(n) => f.write_str(n),
            Self::Value(v) => write!(f, "{v:?}"),
            Self::Flag(b) => write!(f, "{b}"),
            Self::CopyPolicy(p) => f.write_str(p.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vor_types::Value;

    #[test]
    fn builder_defaults() {
        let a = Attribute::single("title", BuiltinType::String.type_id());
        assert!(a.persisted);
        assert!(!a.indexed);
        assert_eq!(a.cardinality, Cardinality::Single);
        assert_eq!(a.copy_policy, CopyPolicy::Copy);
    }

    #[test]
    fn long_attributes_widen_integers() {
        let total = Attribute::single("total", BuiltinType::Long.type_id());
        assert_eq!(total.conform(Value::Int(7).into()), AttrValue::from(Value::Long(7)));
        let count = Attribute::single("count", BuiltinType::Integer.type_id());
        assert_eq!(count.conform(Value::Int(7).into()), AttrValue::from(Value::Int(7)));
        let untyped = Attribute::new("any", Cardinality::Single);
        assert_eq!(untyped.conform(Value::Int(7).into()), AttrValue::from(Value::Int(7)));
    }

    #[test]
    fn aspects() {
        let a = Attribute::reference("friend", Cardinality::Single, "friendOf").transient();
        assert_eq!(
            a.aspect(Aspect::OtherName),
            Some(AspectValue::Name("friendOf".into()))
        );
        assert_eq!(a.aspect(Aspect::Persisted), Some(AspectValue::Flag(false)));
        assert_eq!(a.aspect(Aspect::Type), None);
    }

    #[test]
    fn aspect_names_parse() {
        assert_eq!("otherName".parse::<Aspect>(), Ok(Aspect::OtherName));
        assert!("colour".parse::<Aspect>().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let a = Attribute::single("count", BuiltinType::Integer.type_id())
            .with_initial_value(0)
            .with_copy_policy(CopyPolicy::Remove);
        let json = serde_json::to_string(&a).unwrap();
        let back: Attribute = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
