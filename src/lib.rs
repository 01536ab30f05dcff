// Registration Intake - Core Library
// Reconciles inbound registration payloads against a record store,
// creating each entity at most once per correlation id.

pub mod error;
pub mod parser;
pub mod entities;
pub mod attributes;
pub mod config;
pub mod collaborators;
pub mod identifiers;
pub mod builder;
pub mod deduplication;
pub mod reconciliation;
pub mod dispatch;
pub mod memory;
pub mod db;

// Re-export commonly used types
pub use error::{Failure, FailureCause, FailureSet, Passed, ReferenceKind, Severity};
pub use parser::{fields, FieldPath, ParallelArrayPolicy, Payload, RawValue};
pub use entities::{
    Address, AddressField, AddressMapping, Attribute, AttributeType, CandidateRecord,
    CorrelationEntry, Identifier, IdentifierFormat, IdentifierType, Location, PersonName,
    StoredRecord, TypeRef,
};
pub use attributes::AttributeMapping;
pub use config::{ReconcilerConfig, ReferenceData};
pub use collaborators::{
    AttributeTypeRegistry, Collaborators, CorrelationLedger, CreateOutcome, IdentifierIssuer,
    IdentifierTypeRegistry, LocationRegistry, RecordStore, SearchQuery,
};
pub use identifiers::IdentifierAssigner;
pub use builder::CandidateBuilder;
pub use deduplication::{DuplicateMatch, DuplicateResolver, MatchStrategy};
pub use reconciliation::{Registration, RegistrationOutcome, RegistrationReconciler};
pub use dispatch::{DispatchError, HandlerOutcome, HandlerRegistry, QueueHandler, QueueRecord};
pub use memory::InMemoryBackend;
pub use db::{get_events_for_entity, insert_event, setup_database, Database, Event};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variables read by the binaries
pub mod env_vars {
    pub const DB_PATH: &str = "REGISTRATION_DB_PATH";
    pub const CONFIG: &str = "REGISTRATION_CONFIG";
    pub const BIND_ADDR: &str = "REGISTRATION_BIND_ADDR";

    pub const DEFAULT_DB_PATH: &str = "registrations.db";
    pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
}

/// Config from `REGISTRATION_CONFIG` when set, defaults otherwise
pub fn load_config_from_env() -> anyhow::Result<ReconcilerConfig> {
    match std::env::var(env_vars::CONFIG) {
        Ok(path) => {
            log::info!("Loading reconciler config from {}", path);
            ReconcilerConfig::from_file(path)
        }
        Err(_) => Ok(ReconcilerConfig::default()),
    }
}

/// Registry with the registration handler wired to one backend
pub fn registration_registry(
    config: ReconcilerConfig,
    collaborators: Collaborators,
) -> Result<HandlerRegistry, DispatchError> {
    let mut registry = HandlerRegistry::new();
    registry.register(std::sync::Arc::new(RegistrationReconciler::new(config, collaborators)))?;
    Ok(registry)
}
