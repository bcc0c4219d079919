use vor_types::{AttrId, KindId, TypeId};

/// Errors from schema definition and resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The attribute is not declared on the kind or any of its super kinds.
    #[error("kind {kind} has no attribute named {name}")]
    NoSuchAttribute { kind: String, name: String },

    #[error("no such kind: {0}")]
    NoSuchKind(KindId),

    #[error("no such attribute: {0}")]
    NoSuchAttributeId(AttrId),

    #[error("no such type: {0}")]
    NoSuchType(TypeId),

    #[error("a kind already exists at {0}")]
    DuplicatePath(String),

    #[error("kind {kind} already declares attribute {name}")]
    DuplicateAttribute { kind: String, name: String },

    #[error("{super_kind} is already a super kind of {kind}")]
    DuplicateSuperKind { kind: String, super_kind: String },

    #[error("making {super_kind} a super kind of {kind} would create a cycle")]
    Cycle { kind: String, super_kind: String },

    /// A reference attribute whose inverse name is declared nowhere.
    #[error("attribute {name} on kind {kind} has no otherName")]
    UndefinedOtherName { kind: String, name: String },

    /// Same path in two schemas, different structure.
    #[error("kind {path} is incompatible: hash {local:#018x} does not match {other:#018x}")]
    IncompatibleKinds { path: String, local: u64, other: u64 },

    /// A value is not recognized by the declared type.
    #[error("type {type_name} does not recognize value {value}")]
    TypeMismatch { type_name: String, value: String },

    /// A type that cannot drive decoding without an embedded type id.
    #[error("type {0} cannot be decoded without an embedded type id")]
    AmbiguousType(String),
}

pub type SchemaResult<T> = Result<T, SchemaError>;
