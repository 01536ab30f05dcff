// 📚 Reference Types - resolved from registries, attached by value
//
// Identifier types and attribute types carry a stable id (uuid) and a display
// name; configuration may point at either.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// TYPE REFERENCE
// ============================================================================

/// How configuration points at a registry type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRef {
    /// Resolve by display name (e.g. "Mother's Name")
    Name(String),

    /// Resolve by stable id (uuid)
    Id(String),
}

impl TypeRef {
    pub fn name(name: impl Into<String>) -> Self {
        TypeRef::Name(name.into())
    }

    pub fn id(id: impl Into<String>) -> Self {
        TypeRef::Id(id.into())
    }

    /// The raw lookup key, whichever kind it is
    pub fn key(&self) -> &str {
        match self {
            TypeRef::Name(key) | TypeRef::Id(key) => key,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Name(name) => write!(f, "name '{}'", name),
            TypeRef::Id(id) => write!(f, "uuid '{}'", id),
        }
    }
}

// ============================================================================
// REGISTRY TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierType {
    /// Stable id (uuid)
    pub id: String,
    pub name: String,
}

impl IdentifierType {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        IdentifierType {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn matches(&self, reference: &TypeRef) -> bool {
        match reference {
            TypeRef::Name(name) => self.name == *name,
            TypeRef::Id(id) => self.id == *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeType {
    /// Stable id (uuid)
    pub id: String,
    pub name: String,
}

impl AttributeType {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        AttributeType {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn matches(&self, reference: &TypeRef) -> bool {
        match reference {
            TypeRef::Name(name) => self.name == *name,
            TypeRef::Id(id) => self.id == *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
}

impl Location {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Location {
            id,
            name: name.into(),
        }
    }
}

// ============================================================================
// ISSUED IDENTIFIER FORMAT
// ============================================================================

/// Shape of identifiers minted by a sequence issuer: prefix + zero-padded number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierFormat {
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "default_width")]
    pub width: usize,
}

fn default_width() -> usize {
    6
}

impl IdentifierFormat {
    pub fn format(&self, sequence: u64) -> String {
        format!("{}{:0width$}", self.prefix, sequence, width = self.width)
    }
}

impl Default for IdentifierFormat {
    fn default() -> Self {
        IdentifierFormat {
            prefix: String::new(),
            width: default_width(),
        }
    }
}
