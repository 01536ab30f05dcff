// 🏠 Address - canonical locality fields
//
// Several payload fields map onto this smaller set; the mapping itself lives
// in config (see `AddressMapping`). Later writes to a field replace earlier ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressField {
    /// County / district
    District,
    /// State / province / sub-county
    Province,
    Ward,
    /// City / village
    Village,
    /// address6
    Locality,
    /// address5
    SubLocality,
    /// address1
    Postal,
    /// address2
    Landmark,
}

impl AddressField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressField::District => "district",
            AddressField::Province => "province",
            AddressField::Ward => "ward",
            AddressField::Village => "village",
            AddressField::Locality => "locality",
            AddressField::SubLocality => "sub_locality",
            AddressField::Postal => "postal",
            AddressField::Landmark => "landmark",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address {
    fields: BTreeMap<AddressField, String>,
}

impl Address {
    pub fn new() -> Self {
        Address::default()
    }

    /// Last write wins. Empty values clear the field.
    pub fn set(&mut self, field: AddressField, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    pub fn get(&self, field: AddressField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ============================================================================
// ADDRESS MAPPING (payload field -> canonical field)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSource {
    pub field: String,
    pub target: AddressField,
}

/// Applied in order, so a later source overrides an earlier one on the same target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressMapping {
    sources: Vec<AddressSource>,
}

impl AddressMapping {
    pub fn new() -> Self {
        AddressMapping {
            sources: Vec::new(),
        }
    }

    /// Builder pattern: append a source
    pub fn with(mut self, field: impl Into<String>, target: AddressField) -> Self {
        self.sources.push(AddressSource {
            field: field.into(),
            target,
        });
        self
    }

    pub fn sources(&self) -> &[AddressSource] {
        &self.sources
    }

    /// Targets written by more than one source
    pub fn collisions(&self) -> Vec<AddressField> {
        let mut seen = BTreeMap::new();
        for source in &self.sources {
            *seen.entry(source.target).or_insert(0usize) += 1;
        }
        seen.into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(target, _)| target)
            .collect()
    }
}

impl Default for AddressMapping {
    /// County and ward both land in the district field; ward wins
    fn default() -> Self {
        AddressMapping::new()
            .with("patient.county", AddressField::District)
            .with("patient.sub_county", AddressField::Province)
            .with("patient.ward", AddressField::District)
            .with("patient.location", AddressField::Locality)
            .with("patient.sub_location", AddressField::SubLocality)
            .with("patient.village", AddressField::Village)
            .with("patient.postal_address", AddressField::Postal)
            .with("patient.landmark", AddressField::Landmark)
    }
}
