// 🧠 In-Memory Backend - every collaborator behind one set of locks
//
// Used by tests and by `validate` dry runs that should not open a database.
// Registries are seeded once from ReferenceData; patients and ledger entries
// live only as long as the backend.

use crate::collaborators::{
    AttributeTypeRegistry, CorrelationLedger, CreateOutcome, IdentifierIssuer,
    IdentifierTypeRegistry, LocationRegistry, RecordStore, SearchQuery,
};
use crate::config::ReferenceData;
use crate::entities::{
    AttributeType, CandidateRecord, CorrelationEntry, IdentifierFormat, IdentifierType, Location,
    StoredRecord,
};
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Default)]
struct PatientTable {
    /// Insertion order is search order
    records: Vec<StoredRecord>,
    by_correlation_id: HashMap<String, String>,
}

pub struct InMemoryBackend {
    identifier_types: Arc<RwLock<Vec<IdentifierType>>>,
    attribute_types: Arc<RwLock<Vec<AttributeType>>>,
    locations: Arc<RwLock<Vec<Location>>>,
    identifier_format: IdentifierFormat,
    sequences: Mutex<HashMap<String, u64>>,
    patients: RwLock<PatientTable>,
    ledger: RwLock<HashMap<String, CorrelationEntry>>,
}

fn poisoned(what: &str) -> anyhow::Error {
    anyhow!("{} lock poisoned", what)
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::from_reference(&ReferenceData::default())
    }

    pub fn from_reference(reference: &ReferenceData) -> Self {
        InMemoryBackend {
            identifier_types: Arc::new(RwLock::new(reference.identifier_types.clone())),
            attribute_types: Arc::new(RwLock::new(reference.attribute_types.clone())),
            locations: Arc::new(RwLock::new(reference.locations.clone())),
            identifier_format: reference.identifier_format.clone(),
            sequences: Mutex::new(HashMap::new()),
            patients: RwLock::new(PatientTable::default()),
            ledger: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// REGISTRIES
// ============================================================================

impl IdentifierIssuer for InMemoryBackend {
    fn issue(&self, identifier_type: &IdentifierType, _purpose: &str) -> Result<String> {
        let mut sequences = self.sequences.lock().map_err(|_| poisoned("sequence"))?;
        let next = sequences.entry(identifier_type.id.clone()).or_insert(0);
        *next += 1;
        Ok(self.identifier_format.format(*next))
    }
}

impl IdentifierTypeRegistry for InMemoryBackend {
    fn identifier_type_by_name(&self, name: &str) -> Result<Option<IdentifierType>> {
        let types = self.identifier_types.read().map_err(|_| poisoned("identifier types"))?;
        Ok(types.iter().find(|t| t.name == name).cloned())
    }

    fn identifier_type_by_id(&self, id: &str) -> Result<Option<IdentifierType>> {
        let types = self.identifier_types.read().map_err(|_| poisoned("identifier types"))?;
        Ok(types.iter().find(|t| t.id == id).cloned())
    }
}

impl AttributeTypeRegistry for InMemoryBackend {
    fn attribute_type_by_name(&self, name: &str) -> Result<Option<AttributeType>> {
        let types = self.attribute_types.read().map_err(|_| poisoned("attribute types"))?;
        Ok(types.iter().find(|t| t.name == name).cloned())
    }

    fn attribute_type_by_id(&self, id: &str) -> Result<Option<AttributeType>> {
        let types = self.attribute_types.read().map_err(|_| poisoned("attribute types"))?;
        Ok(types.iter().find(|t| t.id == id).cloned())
    }
}

impl LocationRegistry for InMemoryBackend {
    fn location(&self, location_id: i64) -> Result<Option<Location>> {
        let locations = self.locations.read().map_err(|_| poisoned("locations"))?;
        Ok(locations.iter().find(|l| l.id == location_id).cloned())
    }
}

// ============================================================================
// STORE + LEDGER
// ============================================================================

impl RecordStore for InMemoryBackend {
    fn search(&self, query: &SearchQuery) -> Result<Vec<StoredRecord>> {
        let patients = self.patients.read().map_err(|_| poisoned("patients"))?;

        let found = patients
            .records
            .iter()
            .filter(|record| match query {
                SearchQuery::Identifier(value) => record.has_identifier_value(value),
                SearchQuery::Name(text) => record
                    .name
                    .as_ref()
                    .map(|name| name.matches_query(text))
                    .unwrap_or(false),
            })
            .cloned()
            .collect();

        Ok(found)
    }

    fn create(&self, candidate: &CandidateRecord, correlation_id: &str) -> Result<CreateOutcome> {
        if !candidate.is_persistable() {
            bail!("candidate has no identifiers");
        }

        let mut patients = self.patients.write().map_err(|_| poisoned("patients"))?;

        if let Some(existing) = patients.by_correlation_id.get(correlation_id) {
            return Ok(CreateOutcome::AlreadyExists(existing.clone()));
        }

        let id = Uuid::new_v4().to_string();
        patients
            .records
            .push(StoredRecord::from_candidate(id.clone(), candidate));
        patients
            .by_correlation_id
            .insert(correlation_id.to_string(), id.clone());

        Ok(CreateOutcome::Created(id))
    }

    fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<String>> {
        let patients = self.patients.read().map_err(|_| poisoned("patients"))?;
        Ok(patients.by_correlation_id.get(correlation_id).cloned())
    }

    fn count(&self) -> Result<usize> {
        let patients = self.patients.read().map_err(|_| poisoned("patients"))?;
        Ok(patients.records.len())
    }
}

impl CorrelationLedger for InMemoryBackend {
    fn find(&self, temporary_id: &str) -> Result<Option<CorrelationEntry>> {
        let ledger = self.ledger.read().map_err(|_| poisoned("ledger"))?;
        Ok(ledger.get(temporary_id).cloned())
    }

    fn put(&self, entry: &CorrelationEntry) -> Result<()> {
        let mut ledger = self.ledger.write().map_err(|_| poisoned("ledger"))?;

        match ledger.get(&entry.temporary_id) {
            Some(existing) if existing.permanent_id != entry.permanent_id => bail!(
                "correlation id {} already maps to {}",
                entry.temporary_id,
                existing.permanent_id
            ),
            Some(_) => Ok(()),
            None => {
                ledger.insert(entry.temporary_id.clone(), entry.clone());
                Ok(())
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
