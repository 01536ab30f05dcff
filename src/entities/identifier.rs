// 🪪 Identifiers & Attributes - typed values attached to a candidate

use super::reference::{AttributeType, IdentifierType, Location};
use serde::{Deserialize, Serialize};

/// One identifier on a candidate.
///
/// Built by the identifier assigner; once attached to a
/// [`CandidateRecord`](super::CandidateRecord) it is only reachable through
/// shared references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub identifier_type: IdentifierType,
    pub value: String,
    pub location: Option<Location>,
    pub preferred: bool,
}

impl Identifier {
    pub fn new(identifier_type: IdentifierType, value: impl Into<String>) -> Self {
        Identifier {
            identifier_type,
            value: value.into(),
            location: None,
            preferred: false,
        }
    }

    /// Builder pattern: scope to a location
    pub fn at_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    /// Builder pattern: mark preferred
    pub fn preferred(mut self) -> Self {
        self.preferred = true;
        self
    }

    /// Identifiers are unique by type + value
    pub fn same_key(&self, other: &Identifier) -> bool {
        self.identifier_type.id == other.identifier_type.id && self.value == other.value
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub attribute_type: AttributeType,
    pub value: String,
}

impl Attribute {
    pub fn new(attribute_type: AttributeType, value: impl Into<String>) -> Self {
        Attribute {
            attribute_type,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_key_ignores_location_and_flag() {
        let hts = IdentifierType::new("id-hts", "HTS ID");
        let a = Identifier::new(hts.clone(), "HTS-1").preferred();
        let b = Identifier::new(hts.clone(), "HTS-1").at_location(Some(Location::new(3, "Clinic")));
        let c = Identifier::new(hts, "HTS-2");

        assert!(a.same_key(&b));
        assert!(!a.same_key(&c));
    }
}
