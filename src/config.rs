// ⚙️ Configuration - fixed names, mapping tables, policies
//
// Read-only for the lifetime of a handler. Loaded from JSON; every key is
// optional and falls back to the defaults below.

use crate::attributes::{attribute_type_ids, AttributeMapping, MOTHERS_NAME};
use crate::entities::{AddressMapping, AttributeType, IdentifierFormat, IdentifierType, Location, TypeRef};
use crate::parser::ParallelArrayPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DISCRIMINATOR: &str = "json-registration";
pub const PREFERRED_IDENTIFIER_TYPE: &str = "HTS ID";
pub const PRIMARY_IDENTIFIER_TYPE_ID: &str = "8d793bee-c2cc-11de-8d13-0010c6dffd0f";
pub const PRIMARY_IDENTIFIER_TYPE_NAME: &str = "OpenMRS ID";

// ============================================================================
// RECONCILER CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Queue records with this tag are routed to the registration handler
    pub discriminator: String,

    /// The one identifier type marked preferred (read from the medical record number)
    pub preferred_identifier_type: String,

    /// Type of the mandatory identifier minted by the issuer
    pub primary_identifier_type: TypeRef,

    /// Purpose string passed to the issuer
    pub issuer_purpose: String,

    /// Names match only when the edit distance is strictly below this
    pub max_name_edit_distance: usize,

    pub birth_date_formats: Vec<String>,

    pub parallel_array_policy: ParallelArrayPolicy,

    pub address_mapping: AddressMapping,

    pub attribute_mapping: AttributeMapping,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            discriminator: DISCRIMINATOR.to_string(),
            preferred_identifier_type: PREFERRED_IDENTIFIER_TYPE.to_string(),
            primary_identifier_type: TypeRef::id(PRIMARY_IDENTIFIER_TYPE_ID),
            issuer_purpose: "Registration".to_string(),
            max_name_edit_distance: 3,
            birth_date_formats: vec!["%Y-%m-%d".to_string(), "%d-%m-%Y".to_string()],
            parallel_array_policy: ParallelArrayPolicy::default(),
            address_mapping: AddressMapping::default(),
            attribute_mapping: AttributeMapping::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Load config from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse config JSON")
    }
}

// ============================================================================
// REFERENCE DATA (seed for registries)
// ============================================================================

/// Identifier types, attribute types and locations a registry starts with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceData {
    pub identifier_types: Vec<IdentifierType>,
    pub attribute_types: Vec<AttributeType>,
    pub locations: Vec<Location>,
    pub identifier_format: IdentifierFormat,
}

impl ReferenceData {
    /// Everything the default config points at, plus the fallback location
    pub fn defaults() -> Self {
        use attribute_type_ids::*;

        ReferenceData {
            identifier_types: vec![
                IdentifierType::new(PRIMARY_IDENTIFIER_TYPE_ID, PRIMARY_IDENTIFIER_TYPE_NAME),
                IdentifierType::new("hts-id", PREFERRED_IDENTIFIER_TYPE),
            ],
            attribute_types: vec![
                AttributeType::new("mothers-name", MOTHERS_NAME),
                AttributeType::new(TELEPHONE_CONTACT, "Telephone contact"),
                AttributeType::new(NEAREST_HEALTH_CENTER, "Health Center"),
                AttributeType::new(EMAIL_ADDRESS, "Email Address"),
                AttributeType::new(GUARDIAN_FIRST_NAME, "Guardian First Name"),
                AttributeType::new(GUARDIAN_LAST_NAME, "Guardian Last Name"),
                AttributeType::new(ALTERNATE_PHONE_CONTACT, "Alternate Phone Contact"),
                AttributeType::new(NEXT_OF_KIN_NAME, "Next of kin name"),
                AttributeType::new(NEXT_OF_KIN_RELATIONSHIP, "Next of kin relationship"),
                AttributeType::new(NEXT_OF_KIN_CONTACT, "Next of kin contact"),
                AttributeType::new(NEXT_OF_KIN_ADDRESS, "Next of kin address"),
            ],
            locations: vec![Location::new(1, "Unknown Location")],
            identifier_format: IdentifierFormat::default(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read reference data file: {:?}", path.as_ref()))?;

        serde_json::from_str(&content).context("Failed to parse reference data JSON")
    }
}

// ============================================================================
// TESTS
// ============================================================================
