// 📥 Payload Parser - typed reads from a semi-structured registration payload
//
// Paths are declarative. "patient.given_name" reads $['patient']['patient.given_name']
// and falls back to $['patient']['given_name']; "$['a']['b']" is taken literally.
// Absent fields read as neutral values, never as errors.

use crate::error::FailureCause;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

// ============================================================================
// PAYLOAD FIELD NAMES
// ============================================================================

pub mod fields {
    pub const MEDICAL_RECORD_NUMBER: &str = "patient.medical_record_number";
    pub const BIRTH_DATE: &str = "patient.birth_date";
    pub const BIRTH_DATE_ESTIMATED: &str = "patient.birthdate_estimated";
    pub const SEX: &str = "patient.sex";
    pub const GIVEN_NAME: &str = "patient.given_name";
    pub const MIDDLE_NAME: &str = "patient.middle_name";
    pub const FAMILY_NAME: &str = "patient.family_name";
    pub const CORRELATION_ID: &str = "patient.uuid";
    pub const LOCATION_ID: &str = "encounter.location_id";
    pub const OTHER_IDENTIFIER_TYPE: &str = "observation.other_identifier_type";
    pub const OTHER_IDENTIFIER_VALUE: &str = "observation.other_identifier_value";
}

// ============================================================================
// FIELD PATH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    /// Segment lists tried in order; the first one present wins
    alternatives: Vec<Vec<String>>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Self {
        let alternatives = if let Some(rest) = raw.strip_prefix('$') {
            vec![parse_bracket_segments(rest)]
        } else if let Some((section, key)) = raw.split_once('.') {
            vec![
                vec![section.to_string(), raw.to_string()],
                vec![section.to_string(), key.to_string()],
            ]
        } else {
            vec![vec![raw.to_string()]]
        };

        FieldPath {
            raw: raw.to_string(),
            alternatives,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl From<&str> for FieldPath {
    fn from(raw: &str) -> Self {
        FieldPath::parse(raw)
    }
}

/// "['patient']['patient.uuid']" -> ["patient", "patient.uuid"]
fn parse_bracket_segments(mut rest: &str) -> Vec<String> {
    let mut segments = Vec::new();

    while let Some(start) = rest.find("['") {
        let after = &rest[start + 2..];
        match after.find("']") {
            Some(end) => {
                segments.push(after[..end].to_string());
                rest = &after[end + 2..];
            }
            None => break,
        }
    }

    segments
}

// ============================================================================
// READ RESULTS
// ============================================================================

/// Raw read: a single scalar, or a list for multi-valued fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Absent,
    Scalar(String),
    List(Vec<String>),
}

impl RawValue {
    fn into_list(self) -> Vec<String> {
        match self {
            RawValue::Absent => Vec::new(),
            RawValue::Scalar(value) => vec![value],
            RawValue::List(values) => values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("{path}: expected {expected}, found {found}")]
    WrongShape {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{path}: cannot read '{value}' as {expected}")]
    Unparseable {
        path: String,
        value: String,
        expected: &'static str,
    },
}

impl FieldError {
    pub fn path(&self) -> &str {
        match self {
            FieldError::WrongShape { path, .. } | FieldError::Unparseable { path, .. } => path,
        }
    }

    pub fn into_cause(self) -> FailureCause {
        let field = self.path().to_string();
        FailureCause::invalid(field, self.to_string())
    }
}

// ============================================================================
// PAYLOAD
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    document: Value,
}

impl Payload {
    pub fn from_value(document: Value) -> Self {
        Payload { document }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let document: Value =
            serde_json::from_str(text).context("Failed to parse registration payload JSON")?;
        Ok(Payload { document })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// SHA-256 over the canonical (key-sorted) JSON text
    pub fn fingerprint(&self) -> String {
        let canonical = self.document.to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// First alternative that resolves to a non-null value
    fn lookup(&self, path: &FieldPath) -> Option<&Value> {
        path.alternatives.iter().find_map(|segments| {
            let mut current = &self.document;
            for segment in segments {
                current = current.get(segment.as_str())?;
            }
            (!current.is_null()).then_some(current)
        })
    }

    pub fn read_raw(&self, path: &FieldPath) -> Result<RawValue, FieldError> {
        let Some(value) = self.lookup(path) else {
            return Ok(RawValue::Absent);
        };

        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    if item.is_null() {
                        Ok(String::new())
                    } else {
                        scalar_text(item).ok_or_else(|| FieldError::WrongShape {
                            path: path.as_str().to_string(),
                            expected: "list of scalars",
                            found: shape(item),
                        })
                    }
                })
                .collect::<Result<Vec<_>, _>>()
                .map(RawValue::List),
            other => scalar_text(other)
                .map(RawValue::Scalar)
                .ok_or_else(|| FieldError::WrongShape {
                    path: path.as_str().to_string(),
                    expected: "scalar or list",
                    found: shape(other),
                }),
        }
    }

    /// Absent or null reads as ""
    pub fn read_string(&self, path: &FieldPath) -> Result<String, FieldError> {
        let Some(value) = self.lookup(path) else {
            return Ok(String::new());
        };

        scalar_text(value).ok_or_else(|| FieldError::WrongShape {
            path: path.as_str().to_string(),
            expected: "string",
            found: shape(value),
        })
    }

    /// Strings try each format in order, then RFC 3339. Numbers are epoch milliseconds.
    pub fn read_date(
        &self,
        path: &FieldPath,
        formats: &[String],
    ) -> Result<Option<NaiveDate>, FieldError> {
        let Some(value) = self.lookup(path) else {
            return Ok(None);
        };

        let unparseable = |text: String| FieldError::Unparseable {
            path: path.as_str().to_string(),
            value: text,
            expected: "date",
        };

        match value {
            Value::Number(number) => number
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(|dt| Some(dt.date_naive()))
                .ok_or_else(|| unparseable(number.to_string())),
            Value::String(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(None);
                }
                parse_date(text, formats)
                    .map(Some)
                    .ok_or_else(|| unparseable(text.to_string()))
            }
            other => Err(FieldError::WrongShape {
                path: path.as_str().to_string(),
                expected: "date",
                found: shape(other),
            }),
        }
    }

    /// Absent reads as false
    pub fn read_bool(&self, path: &FieldPath) -> Result<bool, FieldError> {
        let Some(value) = self.lookup(path) else {
            return Ok(false);
        };

        match value {
            Value::Bool(flag) => Ok(*flag),
            Value::Number(number) if number.as_i64() == Some(0) => Ok(false),
            Value::Number(number) if number.as_i64() == Some(1) => Ok(true),
            Value::String(text) => match text.trim().to_lowercase().as_str() {
                "" | "false" | "0" | "no" => Ok(false),
                "true" | "1" | "yes" => Ok(true),
                _ => Err(FieldError::Unparseable {
                    path: path.as_str().to_string(),
                    value: text.clone(),
                    expected: "boolean",
                }),
            },
            other => Err(FieldError::Unparseable {
                path: path.as_str().to_string(),
                value: other.to_string(),
                expected: "boolean",
            }),
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_date(text: &str, formats: &[String]) -> Option<NaiveDate> {
    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }

    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.date())
}

// ============================================================================
// PARALLEL ARRAYS (multi-valued fields)
// ============================================================================

/// What to do when a names list and a values list differ in length
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelArrayPolicy {
    /// Shorter length is authoritative
    #[default]
    Truncate,

    /// Pair nothing
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelPairs {
    /// (name, value); None when the value is absent or empty
    pub pairs: Vec<(String, Option<String>)>,

    /// (names length, values length) when they differ
    pub mismatch: Option<(usize, usize)>,
}

/// Pair names with values by position
pub fn zip_parallel(names: RawValue, values: RawValue, policy: ParallelArrayPolicy) -> ParallelPairs {
    let names = names.into_list();

    if values == RawValue::Absent {
        return ParallelPairs {
            pairs: names.into_iter().map(|name| (name, None)).collect(),
            mismatch: None,
        };
    }

    let values = values.into_list();
    let mismatch = (names.len() != values.len()).then_some((names.len(), values.len()));

    if mismatch.is_some() && policy == ParallelArrayPolicy::FailFast {
        return ParallelPairs {
            pairs: Vec::new(),
            mismatch,
        };
    }

    let pairs = names
        .into_iter()
        .zip(values)
        .map(|(name, value)| {
            let value = (!value.is_empty()).then_some(value);
            (name, value)
        })
        .collect();

    ParallelPairs { pairs, mismatch }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Payload {
        Payload::from_value(json!({
            "patient": {
                "patient.given_name": " Achieng ",
                "patient.birth_date": "1990-04-12",
                "patient.birthdate_estimated": "true",
                "patient.middle_name": ["not", "a", "name"],
                "patient.uuid": "abc-1"
            },
            "encounter": {
                "encounter.location_id": 7
            },
            "observation": {
                "other_identifier_type": ["National ID", "Passport"],
                "other_identifier_value": ["12345678", null]
            }
        }))
    }

    fn formats() -> Vec<String> {
        vec!["%Y-%m-%d".to_string()]
    }

    #[test]
    fn test_path_alternatives() {
        let p = payload();

        assert_eq!(p.read_string(&fields::GIVEN_NAME.into()).unwrap(), "Achieng");
        assert_eq!(p.read_string(&fields::LOCATION_ID.into()).unwrap(), "7");
        // observation keys are stored without the section prefix
        assert!(matches!(
            p.read_raw(&fields::OTHER_IDENTIFIER_TYPE.into()).unwrap(),
            RawValue::List(_)
        ));
    }

    #[test]
    fn test_bracket_path() {
        let p = payload();
        let path = FieldPath::parse("$['patient']['patient.uuid']");

        assert_eq!(p.read_string(&path).unwrap(), "abc-1");
    }

    #[test]
    fn test_absent_fields_are_neutral() {
        let p = payload();

        assert_eq!(p.read_string(&fields::FAMILY_NAME.into()).unwrap(), "");
        assert_eq!(p.read_date(&"patient.death_date".into(), &formats()).unwrap(), None);
        assert!(!p.read_bool(&"patient.dead".into()).unwrap());
        assert_eq!(p.read_raw(&"observation.missing".into()).unwrap(), RawValue::Absent);
    }

    #[test]
    fn test_wrong_shape_is_an_error() {
        let p = payload();
        let err = p.read_string(&fields::MIDDLE_NAME.into()).unwrap_err();

        assert_eq!(err.path(), fields::MIDDLE_NAME);
        assert!(err.to_string().contains("found array"));
    }

    #[test]
    fn test_read_date_formats() {
        let p = payload();
        let date = p.read_date(&fields::BIRTH_DATE.into(), &formats()).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(1990, 4, 12));

        let rfc = Payload::from_value(json!({"patient": {"patient.birth_date": "1990-04-12T00:00:00Z"}}));
        assert_eq!(
            rfc.read_date(&fields::BIRTH_DATE.into(), &formats()).unwrap(),
            NaiveDate::from_ymd_opt(1990, 4, 12)
        );

        let bad = Payload::from_value(json!({"patient": {"patient.birth_date": "12th of April"}}));
        assert!(bad.read_date(&fields::BIRTH_DATE.into(), &formats()).is_err());
    }

    #[test]
    fn test_read_bool_variants() {
        let p = payload();
        assert!(p.read_bool(&fields::BIRTH_DATE_ESTIMATED.into()).unwrap());

        let odd = Payload::from_value(json!({"patient": {"patient.birthdate_estimated": "maybe"}}));
        assert!(odd.read_bool(&fields::BIRTH_DATE_ESTIMATED.into()).is_err());
    }

    #[test]
    fn test_zip_parallel_equal_lengths() {
        let p = payload();
        let names = p.read_raw(&fields::OTHER_IDENTIFIER_TYPE.into()).unwrap();
        let values = p.read_raw(&fields::OTHER_IDENTIFIER_VALUE.into()).unwrap();

        let zipped = zip_parallel(names, values, ParallelArrayPolicy::Truncate);

        assert_eq!(zipped.mismatch, None);
        assert_eq!(
            zipped.pairs,
            vec![
                ("National ID".to_string(), Some("12345678".to_string())),
                ("Passport".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_zip_parallel_scalar() {
        let zipped = zip_parallel(
            RawValue::Scalar("National ID".to_string()),
            RawValue::Scalar("123".to_string()),
            ParallelArrayPolicy::FailFast,
        );

        assert_eq!(zipped.pairs, vec![("National ID".to_string(), Some("123".to_string()))]);
    }

    #[test]
    fn test_zip_parallel_mismatch_policies() {
        let names = RawValue::List(vec!["A".to_string(), "B".to_string(), "C".to_string()]);
        let values = RawValue::List(vec!["1".to_string(), "2".to_string()]);

        let truncated = zip_parallel(names.clone(), values.clone(), ParallelArrayPolicy::Truncate);
        assert_eq!(truncated.mismatch, Some((3, 2)));
        assert_eq!(truncated.pairs.len(), 2);

        let failed = zip_parallel(names, values, ParallelArrayPolicy::FailFast);
        assert_eq!(failed.mismatch, Some((3, 2)));
        assert!(failed.pairs.is_empty());
    }

    #[test]
    fn test_fingerprint_is_stable_and_order_independent() {
        let a = Payload::from_value(json!({"patient": {"a": 1, "b": 2}}));
        let b = Payload::from_value(json!({"patient": {"b": 2, "a": 1}}));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
