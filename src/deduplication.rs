// 🔍 Duplicate Resolver - find an existing record for the same person
// Two strategies: exact identifier match (no name), fuzzy demographic match (name present)

use crate::collaborators::{RecordStore, SearchQuery};
use crate::entities::{CandidateRecord, PersonName, StoredRecord};
use anyhow::Result;
use serde::{Deserialize, Serialize};

// ============================================================================
// MATCH STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStrategy {
    /// No name on the candidate: any record carrying its identifier value
    ExactIdentifier,

    /// Name present: same sex, same birth date, given and family names within edit distance
    FuzzyDemographic,
}

// ============================================================================
// DUPLICATE MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    /// The record already in the store
    pub existing: StoredRecord,

    /// Which strategy detected this match
    pub strategy: MatchStrategy,

    /// Human-readable reason
    pub reason: String,
}

// ============================================================================
// DUPLICATE RESOLVER
// ============================================================================

#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    /// Names match when the edit distance is strictly below this (default: 3)
    pub max_name_edit_distance: usize,

    /// Permanent id that must never be reported (the record a replay created)
    pub exclude_id: Option<String>,
}

impl DuplicateResolver {
    pub fn new() -> Self {
        DuplicateResolver {
            max_name_edit_distance: 3,
            exclude_id: None,
        }
    }

    pub fn with_max_name_edit_distance(mut self, distance: usize) -> Self {
        self.max_name_edit_distance = distance;
        self
    }

    /// Builder pattern: skip one stored record
    pub fn excluding(mut self, permanent_id: Option<String>) -> Self {
        self.exclude_id = permanent_id;
        self
    }

    /// Search the store and return the first qualifying record, in store order
    pub fn find_duplicate(
        &self,
        candidate: &CandidateRecord,
        store: &dyn RecordStore,
    ) -> Result<Option<DuplicateMatch>> {
        match candidate.searchable_name() {
            Some(name) => {
                let found = store.search(&SearchQuery::Name(name.full_name()))?;
                Ok(self.first_demographic_match(candidate, name, &found))
            }
            None => {
                let Some(identifier) = candidate.lookup_identifier() else {
                    return Ok(None);
                };
                let found = store.search(&SearchQuery::Identifier(identifier.value.clone()))?;
                Ok(self.first_identifier_match(&identifier.value, found))
            }
        }
    }

    fn is_excluded(&self, record: &StoredRecord) -> bool {
        self.exclude_id.as_deref() == Some(record.id.as_str())
    }

    /// Strategy 1: Exact Identifier
    /// Every returned record is a duplicate; no further comparison
    fn first_identifier_match(&self, value: &str, found: Vec<StoredRecord>) -> Option<DuplicateMatch> {
        found
            .into_iter()
            .find(|record| !self.is_excluded(record))
            .map(|existing| DuplicateMatch {
                reason: format!("identifier '{}' already registered", value),
                existing,
                strategy: MatchStrategy::ExactIdentifier,
            })
    }

    /// Strategy 2: Fuzzy Demographic
    /// All four predicates must hold; first record in search order wins
    fn first_demographic_match(
        &self,
        candidate: &CandidateRecord,
        name: &PersonName,
        found: &[StoredRecord],
    ) -> Option<DuplicateMatch> {
        for record in found {
            if self.is_excluded(record) {
                continue;
            }

            let Some(saved_name) = record.name.as_ref().filter(|n| !n.is_blank()) else {
                continue;
            };

            if record.sex.to_lowercase() != candidate.sex.to_lowercase() {
                continue;
            }

            // a missing birth date on either side never matches
            match (record.birth_date, candidate.birth_date) {
                (Some(saved), Some(unsaved)) if saved == unsaved => {}
                _ => continue,
            }

            let given_distance = name_distance(&saved_name.given_name, &name.given_name);
            let family_distance = name_distance(&saved_name.family_name, &name.family_name);

            if given_distance < self.max_name_edit_distance
                && family_distance < self.max_name_edit_distance
            {
                return Some(DuplicateMatch {
                    existing: record.clone(),
                    strategy: MatchStrategy::FuzzyDemographic,
                    reason: format!(
                        "same sex and birth date, given name distance {}, family name distance {}",
                        given_distance, family_distance
                    ),
                });
            }
        }

        None
    }
}

impl Default for DuplicateResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Levenshtein distance over lowercased names
pub fn name_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

// ============================================================================
// TESTS
// ============================================================================
