// ⚖️ Registration Reconciler - one entity per logical submission
//
// validate: build candidate → assign identifiers → look for a duplicate. No writes.
// register: validate, then create-or-noop keyed by the payload's correlation id:
//   ledger hit      → replay, nothing created
//   ledger miss     → store.create(candidate, correlation id) → ledger.put(entry)
//
// The store treats the correlation id as an idempotency key. If a previous
// attempt persisted the entity but never reached the ledger, create answers
// AlreadyExists and this pass writes the missing ledger entry.

use crate::builder::CandidateBuilder;
use crate::collaborators::{Collaborators, CreateOutcome};
use crate::config::ReconcilerConfig;
use crate::deduplication::DuplicateResolver;
use crate::dispatch::{HandlerOutcome, QueueHandler, QueueRecord};
use crate::entities::{CandidateRecord, CorrelationEntry};
use crate::error::{Failure, FailureCause, FailureSet, Passed};
use crate::parser::{fields, Payload};
use serde::{Deserialize, Serialize};

// ============================================================================
// REGISTRATION OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegistrationOutcome {
    /// New entity persisted and correlation entry written
    Created { permanent_id: String },

    /// Correlation id already known; nothing written
    Replayed { permanent_id: String },

    /// Entity existed from an interrupted attempt; only the ledger entry was written
    Recovered { permanent_id: String },
}

impl RegistrationOutcome {
    pub fn permanent_id(&self) -> &str {
        match self {
            RegistrationOutcome::Created { permanent_id }
            | RegistrationOutcome::Replayed { permanent_id }
            | RegistrationOutcome::Recovered { permanent_id } => permanent_id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, RegistrationOutcome::Created { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub correlation_id: String,
    pub outcome: RegistrationOutcome,
}

impl Registration {
    pub fn summary(&self) -> String {
        match &self.outcome {
            RegistrationOutcome::Created { permanent_id } => {
                format!("{} registered as {}", self.correlation_id, permanent_id)
            }
            RegistrationOutcome::Replayed { permanent_id } => {
                format!("{} already registered as {} (no-op)", self.correlation_id, permanent_id)
            }
            RegistrationOutcome::Recovered { permanent_id } => {
                format!("{} recovered as {} (ledger repaired)", self.correlation_id, permanent_id)
            }
        }
    }
}

/// What a clean validate pass hands to persistence
#[derive(Debug, Clone)]
pub struct ValidatedRegistration {
    pub correlation_id: String,
    pub candidate: CandidateRecord,
    /// Present when this correlation id was registered before
    pub existing: Option<CorrelationEntry>,
    pub fingerprint: String,
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct RegistrationReconciler {
    config: ReconcilerConfig,
    collaborators: Collaborators,
}

impl RegistrationReconciler {
    pub fn new(config: ReconcilerConfig, collaborators: Collaborators) -> Self {
        RegistrationReconciler {
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Builder, assigner and resolver only; never touches the store's contents
    pub fn validate_registration(
        &self,
        queue_uuid: &str,
        payload: &Payload,
    ) -> Result<Passed<ValidatedRegistration>, FailureSet> {
        log::info!("Processing registration form data: {}", queue_uuid);

        let mut failures = FailureSet::new();
        let validated = self.run_validation(payload, &mut failures);

        log_pass_end(queue_uuid, "validation", &failures);
        failures.finish(validated)
    }

    /// Validate, then create the entity unless the correlation id is already known
    pub fn register(&self, queue_uuid: &str, payload: &Payload) -> Result<Passed<Registration>, FailureSet> {
        log::info!("Processing registration form data: {}", queue_uuid);

        let mut failures = FailureSet::new();
        let validated = self.run_validation(payload, &mut failures);

        if failures.has_failures() {
            log_pass_end(queue_uuid, "registration", &failures);
            return Err(failures);
        }

        let outcome = self.persist(&validated, &mut failures);
        log_pass_end(queue_uuid, "registration", &failures);

        match outcome {
            Some(outcome) => {
                let registration = Registration {
                    correlation_id: validated.correlation_id,
                    outcome,
                };
                log::info!("{}", registration.summary());
                failures.finish(registration)
            }
            None => Err(failures),
        }
    }

    fn run_validation(&self, payload: &Payload, failures: &mut FailureSet) -> ValidatedRegistration {
        let correlation_id = self.correlation_id(payload, failures);
        let existing = self.existing_entry(&correlation_id, failures);

        let candidate = CandidateBuilder::new(&self.config, &self.collaborators).build(payload, failures);

        // A replay must not find the entity it created itself
        let own_id = match &existing {
            Some(entry) => Some(entry.permanent_id.clone()),
            None => self.stored_without_ledger_entry(&correlation_id, failures),
        };

        self.check_duplicate(&correlation_id, own_id, &candidate, failures);

        ValidatedRegistration {
            correlation_id,
            candidate,
            existing,
            fingerprint: payload.fingerprint(),
        }
    }

    fn check_duplicate(
        &self,
        correlation_id: &str,
        own_id: Option<String>,
        candidate: &CandidateRecord,
        failures: &mut FailureSet,
    ) {
        let store = self.collaborators.store.as_ref();
        let resolver = DuplicateResolver::new()
            .with_max_name_edit_distance(self.config.max_name_edit_distance);

        let mut found = resolver.clone().excluding(own_id.clone()).find_duplicate(candidate, store);

        // A concurrent pass for the same correlation id may have stored the
        // entity after the lookup above; that record is ours, not a duplicate
        let stored_meanwhile = match (&found, &own_id) {
            (Ok(Some(duplicate)), None) if !correlation_id.is_empty() => store
                .find_by_correlation_id(correlation_id)
                .ok()
                .flatten()
                .filter(|stored_id| *stored_id == duplicate.existing.id),
            _ => None,
        };
        if let Some(stored_id) = stored_meanwhile {
            found = resolver.excluding(Some(stored_id)).find_duplicate(candidate, store);
        }

        match found {
            Ok(Some(duplicate)) => {
                log::warn!("Possible duplicate of {}: {}", duplicate.existing.id, duplicate.reason);
                failures.fatal(FailureCause::DuplicateCandidateFound {
                    existing_id: duplicate.existing.id.clone(),
                    identifier: duplicate.existing.display_identifier().to_string(),
                });
            }
            Ok(None) => {}
            Err(e) => failures.fatal(FailureCause::collaborator("record store", &e)),
        }
    }

    fn correlation_id(&self, payload: &Payload, failures: &mut FailureSet) -> String {
        match payload.read_string(&fields::CORRELATION_ID.into()) {
            Ok(id) if !id.is_empty() => id,
            Ok(_) => {
                failures.fatal(FailureCause::invalid(fields::CORRELATION_ID, "correlation id is required"));
                String::new()
            }
            Err(e) => {
                failures.fatal(e.into_cause());
                String::new()
            }
        }
    }

    fn existing_entry(&self, correlation_id: &str, failures: &mut FailureSet) -> Option<CorrelationEntry> {
        if correlation_id.is_empty() {
            return None;
        }

        self.collaborators
            .ledger
            .find(correlation_id)
            .unwrap_or_else(|e| {
                failures.fatal(FailureCause::collaborator("correlation ledger", &e));
                None
            })
    }

    fn stored_without_ledger_entry(&self, correlation_id: &str, failures: &mut FailureSet) -> Option<String> {
        if correlation_id.is_empty() {
            return None;
        }

        self.collaborators
            .store
            .find_by_correlation_id(correlation_id)
            .unwrap_or_else(|e| {
                failures.fatal(FailureCause::collaborator("record store", &e));
                None
            })
    }

    fn persist(&self, validated: &ValidatedRegistration, failures: &mut FailureSet) -> Option<RegistrationOutcome> {
        if let Some(entry) = &validated.existing {
            if entry.payload_fingerprint != validated.fingerprint {
                log::warn!(
                    "Replay of {} carries a different payload than the one that created {}",
                    validated.correlation_id,
                    entry.permanent_id
                );
            }
            return Some(RegistrationOutcome::Replayed {
                permanent_id: entry.permanent_id.clone(),
            });
        }

        let created = match self
            .collaborators
            .store
            .create(&validated.candidate, &validated.correlation_id)
        {
            Ok(created) => created,
            Err(e) => {
                log::error!("Failed to persist {}: {:#}", validated.correlation_id, e);
                failures.fatal(FailureCause::persistence(&e));
                return None;
            }
        };

        let entry = CorrelationEntry::new(
            validated.correlation_id.clone(),
            created.permanent_id(),
            validated.fingerprint.clone(),
        );

        if let Err(e) = self.collaborators.ledger.put(&entry) {
            log::error!("Failed to record correlation for {}: {:#}", validated.correlation_id, e);
            failures.fatal(FailureCause::persistence(&e));
            return None;
        }

        Some(match created {
            CreateOutcome::Created(permanent_id) => RegistrationOutcome::Created { permanent_id },
            CreateOutcome::AlreadyExists(permanent_id) => {
                log::warn!(
                    "{} was already stored as {}; correlation entry written now",
                    validated.correlation_id,
                    permanent_id
                );
                RegistrationOutcome::Recovered { permanent_id }
            }
        })
    }
}

fn log_pass_end(queue_uuid: &str, pass: &str, failures: &FailureSet) {
    if failures.has_failures() {
        log::info!(
            "{} of {} failed with {} cause(s)",
            pass,
            queue_uuid,
            failures.failures().count()
        );
    } else {
        log::info!(
            "{} of {} passed with {} warning(s)",
            pass,
            queue_uuid,
            failures.warnings().count()
        );
    }
}

// ============================================================================
// QUEUE HANDLER
// ============================================================================

impl QueueHandler for RegistrationReconciler {
    fn discriminator(&self) -> &str {
        &self.config.discriminator
    }

    fn validate(&self, record: &QueueRecord) -> Result<Vec<Failure>, FailureSet> {
        let payload = Payload::from_value(record.payload.clone());
        self.validate_registration(&record.uuid, &payload)
            .map(|passed| passed.warnings)
    }

    fn process(&self, record: &QueueRecord) -> Result<HandlerOutcome, FailureSet> {
        let payload = Payload::from_value(record.payload.clone());
        let passed = self.register(&record.uuid, &payload)?;

        Ok(HandlerOutcome {
            entity_id: passed.value.outcome.permanent_id().to_string(),
            created: passed.value.outcome.is_created(),
            warnings: passed.warnings,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
