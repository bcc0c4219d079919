use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Shape of an attribute's value container. Fixed at declaration time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Single,
    List,
    Set,
    Dict,
}

impl Cardinality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::List => "list",
            Self::Set => "set",
            Self::Dict => "dict",
        }
    }

    pub fn is_collection(&self) -> bool {
        !matches!(self, Self::Single)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cardinality {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "list" => Ok(Self::List),
            "set" => Ok(Self::Set),
            "dict" => Ok(Self::Dict),
            other => Err(TypeError::UnknownCardinality(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        for c in [
            Cardinality::Single,
            Cardinality::List,
            Cardinality::Set,
            Cardinality::Dict,
        ] {
            assert_eq!(c.to_string().parse::<Cardinality>().unwrap(), c);
        }
    }

    #[test]
    fn unknown_cardinality_is_rejected() {
        assert_eq!(
            "bag".parse::<Cardinality>(),
            Err(TypeError::UnknownCardinality("bag".into()))
        );
    }

    #[test]
    fn only_single_is_scalar() {
        assert!(!Cardinality::Single.is_collection());
        assert!(Cardinality::Dict.is_collection());
    }
}
