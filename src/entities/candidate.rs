// 🧍 Candidate Record - one registration, not yet persisted
//
// Identity vs value: the candidate has no permanent id. The store assigns one
// on create, and the correlation ledger remembers which temporary id it came from.

use super::address::Address;
use super::identifier::{Attribute, Identifier};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PERSON NAME
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub given_name: String,
    pub middle_name: String,
    pub family_name: String,
}

impl PersonName {
    pub fn new(
        given_name: impl Into<String>,
        middle_name: impl Into<String>,
        family_name: impl Into<String>,
    ) -> Self {
        PersonName {
            given_name: given_name.into(),
            middle_name: middle_name.into(),
            family_name: family_name.into(),
        }
    }

    /// Non-empty parts joined by a single space
    pub fn full_name(&self) -> String {
        self.parts().collect::<Vec<_>>().join(" ")
    }

    pub fn is_blank(&self) -> bool {
        self.parts().next().is_none()
    }

    fn parts(&self) -> impl Iterator<Item = &str> {
        [&self.given_name, &self.middle_name, &self.family_name]
            .into_iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
    }

    /// Lowercased non-empty parts, the keys a store indexes for name search
    pub fn search_keys(&self) -> Vec<String> {
        self.parts().map(str::to_lowercase).collect()
    }

    /// Store-side name search: any query token equal to, or a prefix of,
    /// any name part (case-insensitive)
    pub fn matches_query(&self, query: &str) -> bool {
        let keys = self.search_keys();

        search_tokens(query).any(|token| keys.iter().any(|key| key.starts_with(&token)))
    }
}

/// Lowercased whitespace-separated tokens of a name query
pub fn search_tokens(query: &str) -> impl Iterator<Item = String> + '_ {
    query.split_whitespace().map(str::to_lowercase)
}

// ============================================================================
// CANDIDATE RECORD
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// None for identifier-only registrations
    pub name: Option<PersonName>,
    pub birth_date: Option<NaiveDate>,
    pub birth_date_estimated: bool,
    /// Free text, compared case-insensitively
    pub sex: String,
    pub addresses: Vec<Address>,
    pub attributes: Vec<Attribute>,

    identifiers: Vec<Identifier>,
}

/// Why an identifier was not attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierRejection {
    /// Same type + value already attached
    DuplicateKey,
    /// Another identifier is already preferred
    SecondPreferred,
}

impl CandidateRecord {
    pub fn new() -> Self {
        CandidateRecord::default()
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    /// Attach an identifier, keeping (type, value) unique and at most one preferred
    pub fn add_identifier(&mut self, identifier: Identifier) -> Result<(), IdentifierRejection> {
        if self.identifiers.iter().any(|existing| existing.same_key(&identifier)) {
            return Err(IdentifierRejection::DuplicateKey);
        }

        if identifier.preferred && self.preferred_identifier().is_some() {
            return Err(IdentifierRejection::SecondPreferred);
        }

        self.identifiers.push(identifier);
        Ok(())
    }

    pub fn preferred_identifier(&self) -> Option<&Identifier> {
        self.identifiers.iter().find(|identifier| identifier.preferred)
    }

    /// Preferred identifier, else the first attached one
    pub fn lookup_identifier(&self) -> Option<&Identifier> {
        self.preferred_identifier().or_else(|| self.identifiers.first())
    }

    /// The name, unless absent or blank
    pub fn searchable_name(&self) -> Option<&PersonName> {
        self.name.as_ref().filter(|name| !name.is_blank())
    }

    /// Persistence needs at least one identifier
    pub fn is_persistable(&self) -> bool {
        !self.identifiers.is_empty()
    }
}

// ============================================================================
// STORED RECORD (search results)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIdentifier {
    pub type_name: String,
    pub value: String,
    pub preferred: bool,
}

/// An entity already in the record store, as returned by search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Permanent id assigned by the store
    pub id: String,
    pub name: Option<PersonName>,
    pub sex: String,
    pub birth_date: Option<NaiveDate>,
    pub identifiers: Vec<StoredIdentifier>,
}

impl StoredRecord {
    pub fn from_candidate(id: impl Into<String>, candidate: &CandidateRecord) -> Self {
        StoredRecord {
            id: id.into(),
            name: candidate.name.clone(),
            sex: candidate.sex.clone(),
            birth_date: candidate.birth_date,
            identifiers: candidate
                .identifiers()
                .iter()
                .map(|identifier| StoredIdentifier {
                    type_name: identifier.identifier_type.name.clone(),
                    value: identifier.value.clone(),
                    preferred: identifier.preferred,
                })
                .collect(),
        }
    }

    /// Value reported in duplicate failures: preferred, else first, else empty
    pub fn display_identifier(&self) -> &str {
        self.identifiers
            .iter()
            .find(|identifier| identifier.preferred)
            .or_else(|| self.identifiers.first())
            .map(|identifier| identifier.value.as_str())
            .unwrap_or("")
    }

    pub fn has_identifier_value(&self, value: &str) -> bool {
        self.identifiers.iter().any(|identifier| identifier.value == value)
    }
}

// ============================================================================
// CORRELATION ENTRY
// ============================================================================

/// Temporary (client) id → permanent (store) id. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub temporary_id: String,
    pub permanent_id: String,
    /// SHA-256 of the canonical payload that created the entity
    pub payload_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl CorrelationEntry {
    pub fn new(
        temporary_id: impl Into<String>,
        permanent_id: impl Into<String>,
        payload_fingerprint: impl Into<String>,
    ) -> Self {
        CorrelationEntry {
            temporary_id: temporary_id.into(),
            permanent_id: permanent_id.into(),
            payload_fingerprint: payload_fingerprint.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::IdentifierType;

    fn hts(value: &str) -> Identifier {
        Identifier::new(IdentifierType::new("id-hts", "HTS ID"), value)
    }

    #[test]
    fn test_full_name_skips_empty_parts() {
        let name = PersonName::new("Achieng", "", "Otieno");
        assert_eq!(name.full_name(), "Achieng Otieno");

        assert!(PersonName::new("", " ", "").is_blank());
    }

    #[test]
    fn test_name_query_matches_any_token_prefix() {
        let name = PersonName::new("John", "", "Smith");

        assert!(name.matches_query("Jon Smith"));
        assert!(name.matches_query("jo"));
        assert!(!name.matches_query("Jane Doe"));
        assert!(!name.matches_query(""));
    }

    #[test]
    fn test_identifiers_unique_by_type_and_value() {
        let mut candidate = CandidateRecord::new();

        assert!(candidate.add_identifier(hts("A-1")).is_ok());
        assert_eq!(
            candidate.add_identifier(hts("A-1")),
            Err(IdentifierRejection::DuplicateKey)
        );
        assert!(candidate.add_identifier(hts("A-2")).is_ok());
        assert_eq!(candidate.identifiers().len(), 2);
    }

    #[test]
    fn test_at_most_one_preferred() {
        let mut candidate = CandidateRecord::new();

        candidate.add_identifier(hts("A-1").preferred()).unwrap();
        assert_eq!(
            candidate.add_identifier(hts("A-2").preferred()),
            Err(IdentifierRejection::SecondPreferred)
        );
        assert_eq!(candidate.preferred_identifier().unwrap().value, "A-1");
    }

    #[test]
    fn test_lookup_identifier_falls_back_to_first() {
        let mut candidate = CandidateRecord::new();
        assert!(candidate.lookup_identifier().is_none());
        assert!(!candidate.is_persistable());

        candidate.add_identifier(hts("A-1")).unwrap();
        assert_eq!(candidate.lookup_identifier().unwrap().value, "A-1");
        assert!(candidate.is_persistable());
    }

    #[test]
    fn test_blank_name_is_not_a_name() {
        let mut candidate = CandidateRecord::new();
        assert!(candidate.searchable_name().is_none());

        candidate.name = Some(PersonName::default());
        assert!(candidate.searchable_name().is_none());

        candidate.name = Some(PersonName::new("", "", "Wanjiru"));
        assert_eq!(candidate.searchable_name().unwrap().family_name, "Wanjiru");
    }
}
