// 🏗️ Candidate Builder - one payload in, one candidate record out
//
// Steps run in a fixed order and never short-circuit: identifiers, birth date,
// estimated flag, sex, name, addresses, attributes. A field that fails to
// extract degrades to its neutral value and leaves a soft failure behind.

use crate::collaborators::Collaborators;
use crate::config::ReconcilerConfig;
use crate::entities::{Address, Attribute, CandidateRecord, PersonName};
use crate::error::{FailureCause, FailureSet, ReferenceKind};
use crate::identifiers::IdentifierAssigner;
use crate::parser::{fields, FieldError, Payload};

pub struct CandidateBuilder<'a> {
    config: &'a ReconcilerConfig,
    collaborators: &'a Collaborators,
}

impl<'a> CandidateBuilder<'a> {
    pub fn new(config: &'a ReconcilerConfig, collaborators: &'a Collaborators) -> Self {
        CandidateBuilder {
            config,
            collaborators,
        }
    }

    pub fn build(&self, payload: &Payload, failures: &mut FailureSet) -> CandidateRecord {
        let mut candidate = CandidateRecord::new();

        IdentifierAssigner::new(self.config, self.collaborators).assign(payload, &mut candidate, failures);

        candidate.birth_date = soft_or_default(
            payload.read_date(&fields::BIRTH_DATE.into(), &self.config.birth_date_formats),
            failures,
        );
        candidate.birth_date_estimated =
            soft_or_default(payload.read_bool(&fields::BIRTH_DATE_ESTIMATED.into()), failures);
        candidate.sex = soft_or_default(payload.read_string(&fields::SEX.into()), failures);

        candidate.name = self.person_name(payload, failures);

        let address = self.address(payload, failures);
        if !address.is_empty() {
            candidate.addresses.push(address);
        }

        candidate.attributes = self.attributes(payload, failures);

        candidate
    }

    fn person_name(&self, payload: &Payload, failures: &mut FailureSet) -> Option<PersonName> {
        let given_name = soft_or_default(payload.read_string(&fields::GIVEN_NAME.into()), failures);
        let family_name = soft_or_default(payload.read_string(&fields::FAMILY_NAME.into()), failures);

        let middle_name = match payload.read_string(&fields::MIDDLE_NAME.into()) {
            Ok(middle_name) => middle_name,
            Err(e) => {
                log::warn!("Ignoring middle name: {}", e);
                failures.soft(e.into_cause());
                String::new()
            }
        };

        let name = PersonName::new(given_name, middle_name, family_name);
        (!name.is_blank()).then_some(name)
    }

    /// Sources are applied in table order; a later source overwrites an earlier
    /// one mapped to the same field, and an absent later source clears it
    fn address(&self, payload: &Payload, failures: &mut FailureSet) -> Address {
        let mut address = Address::new();

        for source in self.config.address_mapping.sources() {
            let value = soft_or_default(payload.read_string(&source.field.as_str().into()), failures);
            address.set(source.target, value);
        }

        address
    }

    fn attributes(&self, payload: &Payload, failures: &mut FailureSet) -> Vec<Attribute> {
        let mut attributes = Vec::new();

        for source in self.config.attribute_mapping.sources() {
            let attribute_type = match self
                .collaborators
                .attribute_types
                .resolve_attribute_type(&source.attribute_type)
            {
                Ok(Some(attribute_type)) => attribute_type,
                Ok(None) => {
                    failures.non_fatal(FailureCause::unresolved(
                        ReferenceKind::AttributeType,
                        source.attribute_type.key(),
                    ));
                    continue;
                }
                Err(e) => {
                    failures.fatal(FailureCause::collaborator("attribute type registry", &e));
                    continue;
                }
            };

            let value = soft_or_default(payload.read_string(&source.field.as_str().into()), failures);
            if value.is_empty() {
                log::debug!("No value for attribute {}", attribute_type.name);
                failures.soft(FailureCause::invalid(source.field.clone(), "no value given"));
                continue;
            }

            attributes.push(Attribute::new(attribute_type, value));
        }

        attributes
    }
}

fn soft_or_default<T: Default>(read: Result<T, FieldError>, failures: &mut FailureSet) -> T {
    read.unwrap_or_else(|e| {
        log::warn!("{}", e);
        failures.soft(e.into_cause());
        T::default()
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReferenceData;
    use crate::entities::{AddressField, AddressMapping, AttributeType};
    use crate::error::Severity;
    use crate::memory::InMemoryBackend;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Arc;

    fn build_with(
        config: &ReconcilerConfig,
        reference: &ReferenceData,
        document: serde_json::Value,
    ) -> (CandidateRecord, FailureSet) {
        let collaborators = Collaborators::shared(Arc::new(InMemoryBackend::from_reference(reference)));
        let mut failures = FailureSet::new();
        let candidate = CandidateBuilder::new(config, &collaborators)
            .build(&Payload::from_value(document), &mut failures);
        (candidate, failures)
    }

    fn build(document: serde_json::Value) -> (CandidateRecord, FailureSet) {
        build_with(&ReconcilerConfig::default(), &ReferenceData::defaults(), document)
    }

    #[test]
    fn test_builds_demographics() {
        let (candidate, failures) = build(json!({
            "patient": {
                "patient.medical_record_number": "HTS-001",
                "patient.given_name": "Achieng",
                "patient.family_name": "Otieno",
                "patient.birth_date": "1990-04-12",
                "patient.birthdate_estimated": true,
                "patient.sex": "F",
                "patient.phone_number": "0722000000"
            }
        }));

        assert!(!failures.has_failures(), "{}", failures);
        assert_eq!(candidate.name, Some(PersonName::new("Achieng", "", "Otieno")));
        assert_eq!(candidate.birth_date, NaiveDate::from_ymd_opt(1990, 4, 12));
        assert!(candidate.birth_date_estimated);
        assert_eq!(candidate.sex, "F");
        assert_eq!(candidate.identifiers().len(), 2);
        assert_eq!(candidate.attributes.len(), 1);
        assert_eq!(candidate.attributes[0].attribute_type.name, "Telephone contact");
    }

    #[test]
    fn test_bad_middle_name_degrades_and_continues() {
        let (candidate, failures) = build(json!({
            "patient": {
                "patient.medical_record_number": "HTS-001",
                "patient.given_name": "Achieng",
                "patient.middle_name": {"unexpected": "object"},
                "patient.family_name": "Otieno",
                "patient.sub_county": "Kisumu East"
            }
        }));

        assert!(!failures.has_failures());
        assert!(failures.contains(|cause| matches!(
            cause,
            FailureCause::InvalidValue { field, .. } if field == fields::MIDDLE_NAME
        )));
        assert_eq!(candidate.name.unwrap().middle_name, "");
        // steps after the name still ran
        assert_eq!(candidate.addresses[0].get(AddressField::Province), Some("Kisumu East"));
    }

    #[test]
    fn test_bad_birth_date_is_soft() {
        let (candidate, failures) = build(json!({
            "patient": {
                "patient.medical_record_number": "HTS-001",
                "patient.birth_date": "sometime in 1990"
            }
        }));

        assert!(!failures.has_failures());
        assert!(failures.contains(|cause| matches!(
            cause,
            FailureCause::InvalidValue { field, .. } if field == fields::BIRTH_DATE
        )));
        assert_eq!(candidate.birth_date, None);
    }

    #[test]
    fn test_identifier_only_record_has_no_name() {
        let (candidate, _) = build(json!({
            "patient": {"patient.medical_record_number": "HTS-001"}
        }));

        assert!(candidate.name.is_none());
        assert!(candidate.addresses.is_empty());
        assert!(candidate.is_persistable());
    }

    #[test]
    fn test_ward_overrides_county_in_default_mapping() {
        let (candidate, _) = build(json!({
            "patient": {
                "patient.medical_record_number": "HTS-001",
                "patient.county": "Kisumu",
                "patient.sub_county": "Kisumu East",
                "patient.ward": "Kolwa",
                "patient.landmark": "Near the market"
            }
        }));

        let address = &candidate.addresses[0];
        assert_eq!(address.get(AddressField::District), Some("Kolwa"));
        assert_eq!(address.get(AddressField::Province), Some("Kisumu East"));
        assert_eq!(address.get(AddressField::Landmark), Some("Near the market"));
    }

    #[test]
    fn test_absent_ward_clears_county_in_default_mapping() {
        let (candidate, _) = build(json!({
            "patient": {
                "patient.medical_record_number": "HTS-001",
                "patient.county": "Kisumu",
                "patient.village": "Lwala"
            }
        }));

        let address = &candidate.addresses[0];
        assert_eq!(address.get(AddressField::District), None);
        assert_eq!(address.get(AddressField::Village), Some("Lwala"));
    }

    #[test]
    fn test_county_alone_leaves_no_address() {
        let (candidate, _) = build(json!({
            "patient": {"patient.medical_record_number": "HTS-001", "patient.county": "Kisumu"}
        }));

        assert!(candidate.addresses.is_empty());
    }

    #[test]
    fn test_remapped_ward_keeps_county() {
        let config = ReconcilerConfig {
            address_mapping: AddressMapping::new()
                .with("patient.county", AddressField::District)
                .with("patient.ward", AddressField::Ward),
            ..ReconcilerConfig::default()
        };
        let (candidate, _) = build_with(
            &config,
            &ReferenceData::defaults(),
            json!({"patient": {"patient.county": "Kisumu", "patient.ward": "Kolwa"}}),
        );

        let address = &candidate.addresses[0];
        assert_eq!(address.get(AddressField::District), Some("Kisumu"));
        assert_eq!(address.get(AddressField::Ward), Some("Kolwa"));
    }

    #[test]
    fn test_unresolved_attribute_type_is_non_fatal() {
        let mut reference = ReferenceData::defaults();
        reference.attribute_types.retain(|t| t.name != "Mother's Name");

        let (candidate, failures) = build_with(
            &ReconcilerConfig::default(),
            &reference,
            json!({
                "patient": {
                    "patient.medical_record_number": "HTS-001",
                    "patient.mothers_name": "Akinyi",
                    "patient.email_address": "a@example.org"
                }
            }),
        );

        let failing: Vec<_> = failures.failures().collect();
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].severity, Severity::NonFatal);
        assert_eq!(candidate.attributes.len(), 1);
        assert_eq!(candidate.attributes[0].value, "a@example.org");
    }

    #[test]
    fn test_absent_attribute_values_are_dropped() {
        let reference = ReferenceData {
            attribute_types: vec![AttributeType::new("mothers-name", "Mother's Name")],
            ..ReferenceData::defaults()
        };
        let config = ReconcilerConfig {
            attribute_mapping: crate::attributes::AttributeMapping::new()
                .by_name("patient.mothers_name", "Mother's Name"),
            ..ReconcilerConfig::default()
        };

        let (candidate, failures) = build_with(
            &config,
            &reference,
            json!({"patient": {"patient.medical_record_number": "HTS-001"}}),
        );

        assert!(!failures.has_failures());
        assert_eq!(failures.warnings().count(), 1);
        assert!(candidate.attributes.is_empty());
    }
}
