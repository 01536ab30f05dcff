// 🪪 Identifier Assigner - preferred, primary and secondary identifiers
//
// Order of attachment: preferred (medical record number), primary (minted by
// the issuer), then secondaries from the parallel type/value arrays. Every
// identifier carries the encounter location when one is given.

use crate::collaborators::Collaborators;
use crate::config::ReconcilerConfig;
use crate::entities::{CandidateRecord, Identifier, IdentifierRejection, IdentifierType, Location, TypeRef};
use crate::error::{FailureCause, FailureSet, ReferenceKind};
use crate::parser::{fields, zip_parallel, ParallelArrayPolicy, Payload, RawValue};

pub struct IdentifierAssigner<'a> {
    config: &'a ReconcilerConfig,
    collaborators: &'a Collaborators,
}

impl<'a> IdentifierAssigner<'a> {
    pub fn new(config: &'a ReconcilerConfig, collaborators: &'a Collaborators) -> Self {
        IdentifierAssigner {
            config,
            collaborators,
        }
    }

    /// Attach every identifier the payload yields; failures accumulate
    pub fn assign(&self, payload: &Payload, candidate: &mut CandidateRecord, failures: &mut FailureSet) {
        let location = self.resolve_location(payload, failures);

        if let Some(identifier) = self.preferred_identifier(payload, failures) {
            attach(candidate, identifier.at_location(location.clone()), failures);
        }

        if let Some(identifier) = self.primary_identifier(failures) {
            attach(candidate, identifier.at_location(location.clone()), failures);
        }

        for identifier in self.secondary_identifiers(payload, failures) {
            attach(candidate, identifier.at_location(location.clone()), failures);
        }
    }

    // ========================================================================
    // LOCATION
    // ========================================================================

    /// No location id → None. A location id that does not parse or does not
    /// resolve is fatal for the pass.
    pub fn resolve_location(&self, payload: &Payload, failures: &mut FailureSet) -> Option<Location> {
        let raw = match payload.read_string(&fields::LOCATION_ID.into()) {
            Ok(raw) => raw,
            Err(e) => {
                failures.fatal(e.into_cause());
                return None;
            }
        };

        if raw.is_empty() {
            return None;
        }

        let Ok(location_id) = raw.parse::<i64>() else {
            failures.fatal(FailureCause::invalid(
                fields::LOCATION_ID,
                format!("'{}' is not a location id", raw),
            ));
            return None;
        };

        match self.collaborators.locations.location(location_id) {
            Ok(Some(location)) => Some(location),
            Ok(None) => {
                failures.fatal(FailureCause::unresolved(ReferenceKind::Location, raw));
                None
            }
            Err(e) => {
                failures.fatal(FailureCause::collaborator("location registry", &e));
                None
            }
        }
    }

    // ========================================================================
    // PREFERRED
    // ========================================================================

    fn preferred_identifier(&self, payload: &Payload, failures: &mut FailureSet) -> Option<Identifier> {
        let value = match payload.read_string(&fields::MEDICAL_RECORD_NUMBER.into()) {
            Ok(value) => value,
            Err(e) => {
                failures.non_fatal(e.into_cause());
                return None;
            }
        };

        let type_name = &self.config.preferred_identifier_type;
        self.typed_identifier(type_name, Some(value), fields::MEDICAL_RECORD_NUMBER, failures)
            .map(Identifier::preferred)
    }

    // ========================================================================
    // PRIMARY
    // ========================================================================

    /// Always minted; the store refuses a candidate without it
    fn primary_identifier(&self, failures: &mut FailureSet) -> Option<Identifier> {
        let reference = &self.config.primary_identifier_type;

        let identifier_type = match self.collaborators.identifier_types.resolve_identifier_type(reference) {
            Ok(Some(identifier_type)) => identifier_type,
            Ok(None) => {
                failures.fatal(FailureCause::unresolved(ReferenceKind::IdentifierType, reference.key()));
                return None;
            }
            Err(e) => {
                failures.fatal(FailureCause::collaborator("identifier type registry", &e));
                return None;
            }
        };

        match self
            .collaborators
            .issuer
            .issue(&identifier_type, &self.config.issuer_purpose)
        {
            Ok(value) => Some(Identifier::new(identifier_type, value)),
            Err(e) => {
                failures.fatal(FailureCause::collaborator("identifier issuer", &e));
                None
            }
        }
    }

    // ========================================================================
    // SECONDARY
    // ========================================================================

    fn secondary_identifiers(&self, payload: &Payload, failures: &mut FailureSet) -> Vec<Identifier> {
        let names = read_raw_or_record(payload, fields::OTHER_IDENTIFIER_TYPE, failures);
        let values = read_raw_or_record(payload, fields::OTHER_IDENTIFIER_VALUE, failures);

        let zipped = zip_parallel(names, values, self.config.parallel_array_policy);

        if let Some((names_len, values_len)) = zipped.mismatch {
            let cause = FailureCause::invalid(
                fields::OTHER_IDENTIFIER_VALUE,
                format!(
                    "{} identifier types paired with {} values",
                    names_len, values_len
                ),
            );
            match self.config.parallel_array_policy {
                ParallelArrayPolicy::Truncate => {
                    log::warn!("Secondary identifier arrays differ in length; using the first {}", names_len.min(values_len));
                    failures.soft(cause);
                }
                ParallelArrayPolicy::FailFast => failures.non_fatal(cause),
            }
        }

        zipped
            .pairs
            .into_iter()
            .filter_map(|(type_name, value)| {
                self.typed_identifier(&type_name, value, fields::OTHER_IDENTIFIER_VALUE, failures)
            })
            .collect()
    }

    /// Resolve a type by name and pair it with a value. Unresolved type or
    /// missing value is non-fatal; the identifier is dropped.
    fn typed_identifier(
        &self,
        type_name: &str,
        value: Option<String>,
        field: &str,
        failures: &mut FailureSet,
    ) -> Option<Identifier> {
        let identifier_type = self.resolve_by_name(type_name, failures)?;

        match value.filter(|value| !value.is_empty()) {
            Some(value) => Some(Identifier::new(identifier_type, value)),
            None => {
                failures.non_fatal(FailureCause::invalid(
                    field,
                    format!("Identifier value can't be null type: {}", type_name),
                ));
                None
            }
        }
    }

    fn resolve_by_name(&self, type_name: &str, failures: &mut FailureSet) -> Option<IdentifierType> {
        let reference = TypeRef::name(type_name);

        match self.collaborators.identifier_types.resolve_identifier_type(&reference) {
            Ok(Some(identifier_type)) => Some(identifier_type),
            Ok(None) => {
                failures.non_fatal(FailureCause::unresolved(ReferenceKind::IdentifierType, type_name));
                None
            }
            Err(e) => {
                failures.fatal(FailureCause::collaborator("identifier type registry", &e));
                None
            }
        }
    }
}

fn read_raw_or_record(payload: &Payload, field: &str, failures: &mut FailureSet) -> RawValue {
    payload.read_raw(&field.into()).unwrap_or_else(|e| {
        failures.non_fatal(e.into_cause());
        RawValue::Absent
    })
}

fn attach(candidate: &mut CandidateRecord, identifier: Identifier, failures: &mut FailureSet) {
    let description = format!("{} '{}'", identifier.identifier_type.name, identifier.value);

    match candidate.add_identifier(identifier) {
        Ok(()) => {}
        Err(IdentifierRejection::DuplicateKey) => {
            log::warn!("Dropping repeated identifier {}", description);
            failures.soft(FailureCause::invalid(
                "identifiers",
                format!("{} given more than once", description),
            ));
        }
        Err(IdentifierRejection::SecondPreferred) => {
            failures.non_fatal(FailureCause::invalid(
                "identifiers",
                format!("{} cannot be a second preferred identifier", description),
            ));
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReferenceData;
    use crate::error::Severity;
    use crate::memory::InMemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn reference() -> ReferenceData {
        let mut reference = ReferenceData::defaults();
        reference.identifier_types.push(IdentifierType::new("national-id", "National ID"));
        reference.identifier_types.push(IdentifierType::new("passport", "Passport"));
        reference.locations.push(Location::new(7, "Kisumu Clinic"));
        reference
    }

    fn run(config: &ReconcilerConfig, document: serde_json::Value) -> (CandidateRecord, FailureSet) {
        let collaborators = Collaborators::shared(Arc::new(InMemoryBackend::from_reference(&reference())));
        let assigner = IdentifierAssigner::new(config, &collaborators);

        let mut candidate = CandidateRecord::new();
        let mut failures = FailureSet::new();
        assigner.assign(&Payload::from_value(document), &mut candidate, &mut failures);
        (candidate, failures)
    }

    fn values(candidate: &CandidateRecord) -> Vec<&str> {
        candidate.identifiers().iter().map(|i| i.value.as_str()).collect()
    }

    #[test]
    fn test_assigns_preferred_primary_and_secondaries_in_order() {
        let (candidate, failures) = run(
            &ReconcilerConfig::default(),
            json!({
                "patient": {"patient.medical_record_number": "HTS-001"},
                "encounter": {"encounter.location_id": "7"},
                "observation": {
                    "other_identifier_type": ["National ID", "Passport"],
                    "other_identifier_value": ["12345678", "P-99"]
                }
            }),
        );

        assert!(failures.is_empty(), "{}", failures);
        assert_eq!(values(&candidate), vec!["HTS-001", "000001", "12345678", "P-99"]);
        assert_eq!(candidate.preferred_identifier().unwrap().value, "HTS-001");
        assert!(candidate
            .identifiers()
            .iter()
            .all(|i| i.location.as_ref().map(|l| l.id) == Some(7)));
    }

    #[test]
    fn test_no_location_id_means_no_location() {
        let (candidate, failures) = run(
            &ReconcilerConfig::default(),
            json!({"patient": {"patient.medical_record_number": "HTS-001"}}),
        );

        assert!(!failures.has_failures());
        assert!(candidate.identifiers().iter().all(|i| i.location.is_none()));
    }

    #[test]
    fn test_unknown_location_is_fatal() {
        let (_, failures) = run(
            &ReconcilerConfig::default(),
            json!({
                "patient": {"patient.medical_record_number": "HTS-001"},
                "encounter": {"encounter.location_id": 99}
            }),
        );

        assert!(failures.has_fatal());
        assert!(failures.contains(|cause| matches!(
            cause,
            FailureCause::MissingOrUnresolvedType { reference: ReferenceKind::Location, key } if key == "99"
        )));
    }

    #[test]
    fn test_unparseable_location_is_fatal() {
        let (_, failures) = run(
            &ReconcilerConfig::default(),
            json!({"encounter": {"encounter.location_id": "clinic-7"}}),
        );

        assert!(failures.has_fatal());
        assert!(failures.contains(|cause| matches!(cause, FailureCause::InvalidValue { .. })));
    }

    #[test]
    fn test_unresolved_secondary_type_keeps_the_rest() {
        let (candidate, failures) = run(
            &ReconcilerConfig::default(),
            json!({
                "patient": {"patient.medical_record_number": "HTS-001"},
                "observation": {
                    "other_identifier_type": ["Birth Certificate", "Passport"],
                    "other_identifier_value": ["BC-1", "P-99"]
                }
            }),
        );

        assert_eq!(failures.len(), 1);
        assert_eq!(failures.entries()[0].severity, Severity::NonFatal);
        assert!(values(&candidate).contains(&"P-99"));
        assert!(!values(&candidate).contains(&"BC-1"));
    }

    #[test]
    fn test_secondary_without_value_is_dropped() {
        let (candidate, failures) = run(
            &ReconcilerConfig::default(),
            json!({
                "patient": {"patient.medical_record_number": "HTS-001"},
                "observation": {
                    "other_identifier_type": "National ID"
                }
            }),
        );

        assert!(failures.has_failures());
        assert!(!failures.has_fatal());
        assert_eq!(values(&candidate), vec!["HTS-001", "000001"]);
    }

    #[test]
    fn test_missing_medical_record_number_fails_without_preferred() {
        let (candidate, failures) = run(&ReconcilerConfig::default(), json!({"patient": {}}));

        assert!(failures.has_failures());
        assert!(!failures.has_fatal());
        assert!(candidate.preferred_identifier().is_none());
        assert_eq!(values(&candidate), vec!["000001"]);
    }

    #[test]
    fn test_parallel_array_mismatch_truncates_with_warning() {
        let (candidate, failures) = run(
            &ReconcilerConfig::default(),
            json!({
                "patient": {"patient.medical_record_number": "HTS-001"},
                "observation": {
                    "other_identifier_type": ["National ID", "Passport"],
                    "other_identifier_value": ["12345678"]
                }
            }),
        );

        assert!(!failures.has_failures());
        assert_eq!(failures.warnings().count(), 1);
        assert_eq!(values(&candidate), vec!["HTS-001", "000001", "12345678"]);
    }

    #[test]
    fn test_parallel_array_mismatch_fail_fast() {
        let config = ReconcilerConfig {
            parallel_array_policy: ParallelArrayPolicy::FailFast,
            ..ReconcilerConfig::default()
        };
        let (candidate, failures) = run(
            &config,
            json!({
                "patient": {"patient.medical_record_number": "HTS-001"},
                "observation": {
                    "other_identifier_type": ["National ID", "Passport"],
                    "other_identifier_value": ["12345678"]
                }
            }),
        );

        assert!(failures.has_failures());
        assert_eq!(values(&candidate), vec!["HTS-001", "000001"]);
    }

    #[test]
    fn test_repeated_secondary_is_a_warning() {
        let (candidate, failures) = run(
            &ReconcilerConfig::default(),
            json!({
                "patient": {"patient.medical_record_number": "HTS-001"},
                "observation": {
                    "other_identifier_type": ["Passport", "Passport"],
                    "other_identifier_value": ["P-99", "P-99"]
                }
            }),
        );

        assert!(!failures.has_failures());
        assert_eq!(failures.warnings().count(), 1);
        assert_eq!(values(&candidate), vec!["HTS-001", "000001", "P-99"]);
    }

    #[test]
    fn test_unresolved_primary_type_is_fatal() {
        let config = ReconcilerConfig {
            primary_identifier_type: TypeRef::id("no-such-type"),
            ..ReconcilerConfig::default()
        };
        let (candidate, failures) = run(&config, json!({"patient": {"patient.medical_record_number": "HTS-001"}}));

        assert!(failures.has_fatal());
        assert_eq!(values(&candidate), vec!["HTS-001"]);
    }
}
