// 🔌 Collaborators - everything the core calls but does not own
//
// Issuer, registries, record store and correlation ledger are traits so the
// same reconciler runs against SQLite (`db`) or memory (`memory`).
// Errors are anyhow at this boundary; the core turns them into failures.

use crate::entities::{
    AttributeType, CandidateRecord, CorrelationEntry, IdentifierType, Location, StoredRecord,
    TypeRef,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// REFERENCE REGISTRIES
// ============================================================================

pub trait IdentifierIssuer: Send + Sync {
    /// Mint the next identifier value of the given type
    fn issue(&self, identifier_type: &IdentifierType, purpose: &str) -> Result<String>;
}

pub trait IdentifierTypeRegistry: Send + Sync {
    fn identifier_type_by_name(&self, name: &str) -> Result<Option<IdentifierType>>;
    fn identifier_type_by_id(&self, id: &str) -> Result<Option<IdentifierType>>;

    fn resolve_identifier_type(&self, reference: &TypeRef) -> Result<Option<IdentifierType>> {
        match reference {
            TypeRef::Name(name) => self.identifier_type_by_name(name),
            TypeRef::Id(id) => self.identifier_type_by_id(id),
        }
    }
}

pub trait AttributeTypeRegistry: Send + Sync {
    fn attribute_type_by_name(&self, name: &str) -> Result<Option<AttributeType>>;
    fn attribute_type_by_id(&self, id: &str) -> Result<Option<AttributeType>>;

    fn resolve_attribute_type(&self, reference: &TypeRef) -> Result<Option<AttributeType>> {
        match reference {
            TypeRef::Name(name) => self.attribute_type_by_name(name),
            TypeRef::Id(id) => self.attribute_type_by_id(id),
        }
    }
}

pub trait LocationRegistry: Send + Sync {
    fn location(&self, location_id: i64) -> Result<Option<Location>>;
}

// ============================================================================
// RECORD STORE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchQuery {
    /// Records carrying an identifier with exactly this value
    Identifier(String),

    /// Store-defined name match; results come back in store order
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(String),

    /// The correlation id was already used; carries the existing permanent id
    AlreadyExists(String),
}

impl CreateOutcome {
    pub fn permanent_id(&self) -> &str {
        match self {
            CreateOutcome::Created(id) | CreateOutcome::AlreadyExists(id) => id,
        }
    }
}

pub trait RecordStore: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<Vec<StoredRecord>>;

    /// Single create call. The correlation id is an idempotency key: a second
    /// create with the same id must not produce a second entity.
    fn create(&self, candidate: &CandidateRecord, correlation_id: &str) -> Result<CreateOutcome>;

    /// Permanent id of the record created under this correlation id, if any
    fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<String>>;

    fn count(&self) -> Result<usize>;
}

// ============================================================================
// CORRELATION LEDGER
// ============================================================================

pub trait CorrelationLedger: Send + Sync {
    fn find(&self, temporary_id: &str) -> Result<Option<CorrelationEntry>>;

    /// Entries are write-once; a conflicting put is an error
    fn put(&self, entry: &CorrelationEntry) -> Result<()>;
}

// ============================================================================
// BUNDLE
// ============================================================================

/// Every collaborator one handler needs
#[derive(Clone)]
pub struct Collaborators {
    pub issuer: Arc<dyn IdentifierIssuer>,
    pub identifier_types: Arc<dyn IdentifierTypeRegistry>,
    pub attribute_types: Arc<dyn AttributeTypeRegistry>,
    pub locations: Arc<dyn LocationRegistry>,
    pub store: Arc<dyn RecordStore>,
    pub ledger: Arc<dyn CorrelationLedger>,
}

impl Collaborators {
    /// One backend playing every role (SQLite database, in-memory backend)
    pub fn shared<B>(backend: Arc<B>) -> Self
    where
        B: IdentifierIssuer
            + IdentifierTypeRegistry
            + AttributeTypeRegistry
            + LocationRegistry
            + RecordStore
            + CorrelationLedger
            + 'static,
    {
        Collaborators {
            issuer: backend.clone(),
            identifier_types: backend.clone(),
            attribute_types: backend.clone(),
            locations: backend.clone(),
            store: backend.clone(),
            ledger: backend,
        }
    }
}
