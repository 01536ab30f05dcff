// 🧾 Failure Accumulator - every cause from one pass, raised together
// One FailureSet per validate/process call, never shared between records

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The pass cannot produce a persistable candidate
    Fatal,

    /// Processing continued, but the pass still fails at the end
    NonFatal,

    /// Degraded to a neutral value; reported as a warning only
    Soft,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::NonFatal => "non-fatal",
            Severity::Soft => "soft",
        }
    }

    /// Soft entries never fail a pass
    pub fn fails_pass(&self) -> bool {
        !matches!(self, Severity::Soft)
    }
}

// ============================================================================
// FAILURE CAUSES
// ============================================================================

/// What kind of reference data a lookup was after
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    IdentifierType,
    AttributeType,
    Location,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReferenceKind::IdentifierType => "identifier type",
            ReferenceKind::AttributeType => "person attribute type",
            ReferenceKind::Location => "location",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    #[error("Unable to find {reference} using '{key}'")]
    MissingOrUnresolvedType { reference: ReferenceKind, key: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Found a patient with similar characteristic: patientId = {existing_id} Identifier Id = {identifier}")]
    DuplicateCandidateFound { existing_id: String, identifier: String },

    #[error("Unable to persist registration: {reason}")]
    PersistenceFailure { reason: String },

    #[error("{collaborator} call failed: {reason}")]
    CollaboratorFailure { collaborator: String, reason: String },
}

impl FailureCause {
    pub fn unresolved(reference: ReferenceKind, key: impl Into<String>) -> Self {
        FailureCause::MissingOrUnresolvedType {
            reference,
            key: key.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FailureCause::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(error: &anyhow::Error) -> Self {
        FailureCause::PersistenceFailure {
            reason: format!("{:#}", error),
        }
    }

    pub fn collaborator(collaborator: impl Into<String>, error: &anyhow::Error) -> Self {
        FailureCause::CollaboratorFailure {
            collaborator: collaborator.into(),
            reason: format!("{:#}", error),
        }
    }
}

/// One accumulated entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub severity: Severity,
    pub cause: FailureCause,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity.as_str(), self.cause)
    }
}

// ============================================================================
// FAILURE SET (aggregate)
// ============================================================================

/// Ordered collection of every failure from one pass.
///
/// Stages append to it instead of returning early. At the end of the pass
/// [`FailureSet::finish`] turns it into either a success (carrying any soft
/// warnings) or the whole set as a single aggregate error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSet {
    entries: Vec<Failure>,
}

/// A value that made it through a pass, plus the soft warnings recorded on the way
#[derive(Debug, Clone)]
pub struct Passed<T> {
    pub value: T,
    pub warnings: Vec<Failure>,
}

impl FailureSet {
    pub fn new() -> Self {
        FailureSet {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, severity: Severity, cause: FailureCause) {
        self.entries.push(Failure { severity, cause });
    }

    pub fn fatal(&mut self, cause: FailureCause) {
        self.push(Severity::Fatal, cause);
    }

    pub fn non_fatal(&mut self, cause: FailureCause) {
        self.push(Severity::NonFatal, cause);
    }

    pub fn soft(&mut self, cause: FailureCause) {
        self.push(Severity::Soft, cause);
    }

    pub fn entries(&self) -> &[Failure] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that make the pass fail
    pub fn failures(&self) -> impl Iterator<Item = &Failure> {
        self.entries.iter().filter(|f| f.severity.fails_pass())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Failure> {
        self.entries.iter().filter(|f| !f.severity.fails_pass())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn has_fatal(&self) -> bool {
        self.entries.iter().any(|f| f.severity == Severity::Fatal)
    }

    pub fn contains(&self, predicate: impl Fn(&FailureCause) -> bool) -> bool {
        self.entries.iter().any(|f| predicate(&f.cause))
    }

    /// Close the pass: the whole set becomes the error if anything failed
    pub fn finish<T>(self, value: T) -> Result<Passed<T>, FailureSet> {
        if self.has_failures() {
            Err(self)
        } else {
            Ok(Passed {
                value,
                warnings: self.entries,
            })
        }
    }
}

impl fmt::Display for FailureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failing = self.failures().count();
        write!(f, "registration pass failed with {} cause(s)", failing)?;
        for (i, entry) in self.entries.iter().enumerate() {
            write!(f, "\n  {}. {}", i + 1, entry)?;
        }
        Ok(())
    }
}

impl std::error::Error for FailureSet {}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_passes() {
        let failures = FailureSet::new();
        let passed = failures.finish(42).unwrap();

        assert_eq!(passed.value, 42);
        assert!(passed.warnings.is_empty());
    }

    #[test]
    fn test_soft_entries_are_warnings_only() {
        let mut failures = FailureSet::new();
        failures.soft(FailureCause::invalid("patient.middle_name", "not a string"));

        assert!(!failures.has_failures());
        let passed = failures.finish("ok").unwrap();
        assert_eq!(passed.warnings.len(), 1);
    }

    #[test]
    fn test_non_fatal_entry_fails_pass() {
        let mut failures = FailureSet::new();
        failures.non_fatal(FailureCause::unresolved(ReferenceKind::IdentifierType, "Passport"));

        assert!(failures.has_failures());
        assert!(!failures.has_fatal());
        assert!(failures.finish(()).is_err());
    }

    #[test]
    fn test_aggregate_keeps_every_cause_in_order() {
        let mut failures = FailureSet::new();
        failures.non_fatal(FailureCause::unresolved(ReferenceKind::AttributeType, "Mother's Name"));
        failures.soft(FailureCause::invalid("patient.middle_name", "array"));
        failures.fatal(FailureCause::unresolved(ReferenceKind::Location, "99"));

        let aggregate = failures.finish(()).unwrap_err();

        assert_eq!(aggregate.len(), 3);
        assert_eq!(aggregate.failures().count(), 2);
        assert_eq!(aggregate.entries()[2].severity, Severity::Fatal);

        let rendered = aggregate.to_string();
        assert!(rendered.starts_with("registration pass failed with 2 cause(s)"));
        assert!(rendered.contains("Unable to find location using '99'"));
    }

    #[test]
    fn test_duplicate_message_names_existing_record() {
        let cause = FailureCause::DuplicateCandidateFound {
            existing_id: "p-1".to_string(),
            identifier: "HTS-001".to_string(),
        };

        assert_eq!(
            cause.to_string(),
            "Found a patient with similar characteristic: patientId = p-1 Identifier Id = HTS-001"
        );
    }
}
