// 🏛️ Attribute Mapping - payload fields that become person attributes
//
// Each source names a payload field and the attribute type it fills, either by
// display name or by stable id. Resolution against the registry happens per
// pass; the table itself is configuration.

use crate::entities::TypeRef;
use serde::{Deserialize, Serialize};

/// Stable ids of the attribute types the default table points at
pub mod attribute_type_ids {
    pub const NEXT_OF_KIN_ADDRESS: &str = "b5c2765a-73c9-439e-92be-3b42724f02c6";
    pub const NEXT_OF_KIN_CONTACT: &str = "5c9f67cb-d133-45a6-a573-512b71b625a0";
    pub const NEXT_OF_KIN_NAME: &str = "29674853-1805-486c-a183-0b82ebb9ece3";
    pub const NEXT_OF_KIN_RELATIONSHIP: &str = "e83bf759-9ecf-4597-acb6-6ae92844c6f0";
    pub const TELEPHONE_CONTACT: &str = "86e70608-1486-4098-88e7-4324faf722f7";
    pub const EMAIL_ADDRESS: &str = "ad957d51-4ce2-4a49-be14-81dd6f71ef82";
    pub const ALTERNATE_PHONE_CONTACT: &str = "059491b4-fe25-4463-9b58-6b49de9b5ec5";
    pub const NEAREST_HEALTH_CENTER: &str = "8d87236c-c2cc-11de-8d13-0010c6dffd0f";
    pub const GUARDIAN_FIRST_NAME: &str = "c6cc624c-962c-41b4-95cd-8c13bf17ebce";
    pub const GUARDIAN_LAST_NAME: &str = "376a2d8d-f83e-4e6b-a4aa-2001256a6267";
}

pub const MOTHERS_NAME: &str = "Mother's Name";

// ============================================================================
// ATTRIBUTE SOURCE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSource {
    /// Payload field, e.g. "patient.phone_number"
    pub field: String,

    pub attribute_type: TypeRef,
}

// ============================================================================
// ATTRIBUTE MAPPING
// ============================================================================

/// Ordered table of attribute sources. Order is the order attributes are
/// attached and failures are reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMapping {
    sources: Vec<AttributeSource>,
}

impl AttributeMapping {
    pub fn new() -> Self {
        AttributeMapping {
            sources: Vec::new(),
        }
    }

    /// Builder pattern: attribute resolved by display name
    pub fn by_name(mut self, field: impl Into<String>, name: impl Into<String>) -> Self {
        self.sources.push(AttributeSource {
            field: field.into(),
            attribute_type: TypeRef::name(name),
        });
        self
    }

    /// Builder pattern: attribute resolved by stable id
    pub fn by_id(mut self, field: impl Into<String>, id: impl Into<String>) -> Self {
        self.sources.push(AttributeSource {
            field: field.into(),
            attribute_type: TypeRef::id(id),
        });
        self
    }

    pub fn sources(&self) -> &[AttributeSource] {
        &self.sources
    }

    pub fn get(&self, field: &str) -> Option<&AttributeSource> {
        self.sources.iter().find(|source| source.field == field)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Default for AttributeMapping {
    fn default() -> Self {
        use attribute_type_ids::*;

        AttributeMapping::new()
            .by_name("patient.mothers_name", MOTHERS_NAME)
            .by_id("patient.phone_number", TELEPHONE_CONTACT)
            .by_id("patient.nearest_health_center", NEAREST_HEALTH_CENTER)
            .by_id("patient.email_address", EMAIL_ADDRESS)
            .by_id("patient.guardian_first_name", GUARDIAN_FIRST_NAME)
            .by_id("patient.guardian_last_name", GUARDIAN_LAST_NAME)
            .by_id("patient.alternate_phone_contact", ALTERNATE_PHONE_CONTACT)
            .by_id("patient.next_of_kin_name", NEXT_OF_KIN_NAME)
            .by_id("patient.next_of_kin_relationship", NEXT_OF_KIN_RELATIONSHIP)
            .by_id("patient.next_of_kin_contact", NEXT_OF_KIN_CONTACT)
            .by_id("patient.next_of_kin_address", NEXT_OF_KIN_ADDRESS)
    }
}

// ============================================================================
// TESTS
// ============================================================================
