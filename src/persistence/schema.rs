//! Schema version detection and ordered, additive migrations
//!
//! Every migration step is a pure function over a JSON value that only adds
//! fields with safe defaults; nothing is deleted or reinterpreted.
//!
//! ```text
//! learner:   1.0 ──(+enhanced_samples, sample_count)──> 1.1 ──(+humidity)──> 1.2
//! document:  1.0 ──(+learning_data)──> 2.0 ──(+thermal_data)──> 2.1
//! ```

use std::fmt;

use serde_json::{Map, Value};

use crate::{Error, Result};

/// Learner sub-document schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LearnerSchemaVersion {
    /// Aggregate tables only
    V1_0,
    /// Adds raw enhanced samples
    V1_1,
    /// Adds humidity fields to samples
    V1_2,
}

impl LearnerSchemaVersion {
    /// Version written by this crate.
    pub const CURRENT: Self = Self::V1_2;

    /// Version string as persisted.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
            Self::V1_2 => "1.2",
        }
    }

    fn parse(version: &str) -> Option<Self> {
        match version {
            "1.0" => Some(Self::V1_0),
            "1.1" => Some(Self::V1_1),
            "1.2" => Some(Self::V1_2),
            _ => None,
        }
    }
}

impl fmt::Display for LearnerSchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level persisted document schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentSchemaVersion {
    /// Flat `learner_data`
    V1_0,
    /// `learning_data { engine_state, learner_data }`
    V2_0,
    /// Adds `thermal_data`
    V2_1,
}

impl DocumentSchemaVersion {
    /// Version written by this crate.
    pub const CURRENT: Self = Self::V2_1;

    /// Version string as persisted.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V2_0 => "2.0",
            Self::V2_1 => "2.1",
        }
    }

    fn parse(version: &str) -> Option<Self> {
        match version {
            "1.0" => Some(Self::V1_0),
            "2.0" => Some(Self::V2_0),
            "2.1" => Some(Self::V2_1),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentSchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn as_object(document: &Value) -> Result<&Map<String, Value>> {
    document
        .as_object()
        .ok_or_else(|| Error::InvalidDocument("expected a JSON object".to_string()))
}

fn explicit_version(object: &Map<String, Value>) -> Option<std::result::Result<&str, String>> {
    object.get("version").map(|v| match v {
        Value::String(s) => Ok(s.as_str()),
        other => Err(other.to_string()),
    })
}

/// Detect the learner schema version.
///
/// Uses the `version` field when present, otherwise sniffs by field presence.
///
/// # Errors
///
/// `UnsupportedVersion` for unknown version strings, `InvalidDocument` when
/// the value is not an object or nothing recognisable is present.
pub fn detect_learner_version(document: &Value) -> Result<LearnerSchemaVersion> {
    let object = as_object(document)?;
    match explicit_version(object) {
        Some(Ok(version)) => LearnerSchemaVersion::parse(version)
            .ok_or_else(|| Error::UnsupportedVersion(version.to_string())),
        Some(Err(raw)) => Err(Error::UnsupportedVersion(raw)),
        None => {
            if let Some(samples) = object.get("enhanced_samples") {
                let has_humidity = samples.as_array().is_some_and(|samples| {
                    samples.iter().any(|s| {
                        s.get("indoor_humidity").is_some() || s.get("outdoor_humidity").is_some()
                    })
                });
                Ok(if has_humidity {
                    LearnerSchemaVersion::V1_2
                } else {
                    LearnerSchemaVersion::V1_1
                })
            } else if object.contains_key("time_patterns") {
                Ok(LearnerSchemaVersion::V1_0)
            } else {
                Err(Error::InvalidDocument(
                    "learner data has neither version, samples nor patterns".to_string(),
                ))
            }
        }
    }
}

/// 1.0 → 1.1: add an empty sample list and the bookkeeping fields.
#[must_use]
pub fn migrate_learner_v1_0_to_v1_1(mut document: Value) -> Value {
    if let Some(object) = document.as_object_mut() {
        object
            .entry("enhanced_samples")
            .or_insert_with(|| Value::Array(Vec::new()));
        object.entry("sample_count").or_insert(Value::Null);
        object
            .entry("temp_correlation_data")
            .or_insert_with(|| Value::Array(Vec::new()));
        object
            .entry("power_state_patterns")
            .or_insert_with(|| Value::Object(Map::new()));
        object
            .entry("time_pattern_counts")
            .or_insert_with(|| Value::Object(Map::new()));
        object.insert("version".to_string(), Value::from("1.1"));
    }
    document
}

/// 1.1 → 1.2: add null humidity readings to every sample object.
#[must_use]
pub fn migrate_learner_v1_1_to_v1_2(mut document: Value) -> Value {
    if let Some(object) = document.as_object_mut() {
        if let Some(Value::Array(samples)) = object.get_mut("enhanced_samples") {
            for sample in samples.iter_mut().filter_map(Value::as_object_mut) {
                sample.entry("indoor_humidity").or_insert(Value::Null);
                sample.entry("outdoor_humidity").or_insert(Value::Null);
            }
        }
        object.insert("version".to_string(), Value::from("1.2"));
    }
    document
}

/// Bring a learner document up to [`LearnerSchemaVersion::CURRENT`].
///
/// Returns the migrated document and the version it started from.
///
/// # Errors
///
/// Any error from [`detect_learner_version`].
pub fn migrate_learner(document: Value) -> Result<(Value, LearnerSchemaVersion)> {
    let source = detect_learner_version(&document)?;
    let mut document = document;
    if source < LearnerSchemaVersion::V1_1 {
        document = migrate_learner_v1_0_to_v1_1(document);
    }
    if source < LearnerSchemaVersion::V1_2 {
        document = migrate_learner_v1_1_to_v1_2(document);
    }
    Ok((document, source))
}

/// Detect the top-level document schema version.
///
/// # Errors
///
/// `UnsupportedVersion` for unknown version strings, `InvalidDocument` when
/// the value is not an object or nothing recognisable is present.
pub fn detect_document_version(document: &Value) -> Result<DocumentSchemaVersion> {
    let object = as_object(document)?;
    match explicit_version(object) {
        Some(Ok(version)) => DocumentSchemaVersion::parse(version)
            .ok_or_else(|| Error::UnsupportedVersion(version.to_string())),
        Some(Err(raw)) => Err(Error::UnsupportedVersion(raw)),
        None => {
            if object.contains_key("thermal_data") {
                Ok(DocumentSchemaVersion::V2_1)
            } else if object.contains_key("learning_data") {
                Ok(DocumentSchemaVersion::V2_0)
            } else if object.contains_key("learner_data") {
                Ok(DocumentSchemaVersion::V1_0)
            } else {
                Err(Error::InvalidDocument(
                    "document has neither version nor learning data".to_string(),
                ))
            }
        }
    }
}

/// 1.0 → 2.0: wrap the flat learner data into `learning_data`.
///
/// The flat `learner_data` and `enable_learning` keys are left in place here
/// and dropped when the document is next written by
/// [`build_document`](super::codec::build_document).
#[must_use]
pub fn migrate_document_v1_0_to_v2_0(mut document: Value) -> Value {
    if let Some(object) = document.as_object_mut() {
        if !object.contains_key("learning_data") {
            let enable_learning = object
                .get("enable_learning")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let learner_data = object.get("learner_data").cloned().unwrap_or(Value::Null);
            object.insert(
                "learning_data".to_string(),
                serde_json::json!({
                    "engine_state": { "enable_learning": enable_learning },
                    "learner_data": learner_data,
                }),
            );
        }
        object.insert("version".to_string(), Value::from("2.0"));
    }
    document
}

/// 2.0 → 2.1: add an empty `thermal_data` slot.
#[must_use]
pub fn migrate_document_v2_0_to_v2_1(mut document: Value) -> Value {
    if let Some(object) = document.as_object_mut() {
        object.entry("thermal_data").or_insert(Value::Null);
        object.insert("version".to_string(), Value::from("2.1"));
    }
    document
}

/// Bring a document up to [`DocumentSchemaVersion::CURRENT`].
///
/// # Errors
///
/// Any error from [`detect_document_version`].
pub fn migrate_document(document: Value) -> Result<(Value, DocumentSchemaVersion)> {
    let source = detect_document_version(&document)?;
    let mut document = document;
    if source < DocumentSchemaVersion::V2_0 {
        document = migrate_document_v1_0_to_v2_0(document);
    }
    if source < DocumentSchemaVersion::V2_1 {
        document = migrate_document_v2_0_to_v2_1(document);
    }
    Ok((document, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_explicit_versions() {
        assert_eq!(detect_learner_version(&json!({"version": "1.0"})).unwrap(), LearnerSchemaVersion::V1_0);
        assert_eq!(detect_learner_version(&json!({"version": "1.2"})).unwrap(), LearnerSchemaVersion::V1_2);
        assert!(matches!(
            detect_learner_version(&json!({"version": "9.9"})),
            Err(Error::UnsupportedVersion(v)) if v == "9.9"
        ));
        assert!(matches!(
            detect_learner_version(&json!({"version": 1.1})),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_detect_by_field_presence() {
        assert_eq!(
            detect_learner_version(&json!({"time_patterns": {}})).unwrap(),
            LearnerSchemaVersion::V1_0
        );
        assert_eq!(
            detect_learner_version(&json!({"enhanced_samples": [{"predicted": 0.0}]})).unwrap(),
            LearnerSchemaVersion::V1_1
        );
        assert_eq!(
            detect_learner_version(&json!({"enhanced_samples": [{"indoor_humidity": 40.0}]})).unwrap(),
            LearnerSchemaVersion::V1_2
        );
        assert!(matches!(detect_learner_version(&json!({})), Err(Error::InvalidDocument(_))));
        assert!(matches!(detect_learner_version(&json!([1, 2])), Err(Error::InvalidDocument(_))));
    }

    #[test]
    fn test_learner_steps_are_additive() {
        let original = json!({"version": "1.0", "time_patterns": {"3": 1.25}, "custom": true});
        let (migrated, source) = migrate_learner(original).unwrap();
        assert_eq!(source, LearnerSchemaVersion::V1_0);
        assert_eq!(migrated["version"], "1.2");
        assert_eq!(migrated["time_patterns"]["3"], 1.25);
        assert_eq!(migrated["custom"], true);
        assert_eq!(migrated["enhanced_samples"], json!([]));
    }

    #[test]
    fn test_humidity_step_keeps_existing_values() {
        let doc = json!({"version": "1.1", "enhanced_samples": [
            {"predicted": 0.0},
            {"predicted": 1.0, "indoor_humidity": 55.0},
            "garbage"
        ]});
        let migrated = migrate_learner_v1_1_to_v1_2(doc);
        let samples = migrated["enhanced_samples"].as_array().unwrap();
        assert_eq!(samples[0]["indoor_humidity"], Value::Null);
        assert_eq!(samples[1]["indoor_humidity"], 55.0);
        assert_eq!(samples[2], "garbage");
    }

    #[test]
    fn test_document_migration_chain() {
        let v1 = json!({
            "version": "1.0",
            "entity_id": "climate.living_room",
            "last_updated": "2025-01-01T00:00:00+00:00",
            "learner_data": {"version": "1.0", "time_patterns": {}},
            "enable_learning": false
        });
        let (migrated, source) = migrate_document(v1).unwrap();
        assert_eq!(source, DocumentSchemaVersion::V1_0);
        assert_eq!(migrated["version"], "2.1");
        assert_eq!(migrated["learning_data"]["engine_state"]["enable_learning"], false);
        assert_eq!(migrated["learning_data"]["learner_data"]["version"], "1.0");
        assert_eq!(migrated["thermal_data"], Value::Null);
        assert!(migrated.get("learner_data").is_some());
    }

    #[test]
    fn test_document_unknown_version() {
        assert!(matches!(
            migrate_document(json!({"version": "3.0"})),
            Err(Error::UnsupportedVersion(_))
        ));
    }
}
