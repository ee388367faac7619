//! Encoding and decoding of learner, thermal and entity documents
//!
//! Decoding is lenient at the leaves and strict at the root: a malformed
//! sample or probe is skipped with a warning, while an unknown schema
//! version or a document without its required keys fails explicitly.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::schema::{self, DocumentSchemaVersion, LearnerSchemaVersion};
use crate::config::LearnerConfig;
use crate::learning::{
    OffsetLearner, PowerStatePattern, Sample, SampleStore, TemperatureCorrelation, HOURS_PER_DAY,
};
use crate::thermal::{
    ControlFlags, ProbeResult, ThermalModel, ThermalState, ThermalStateMachine,
};
use crate::{Error, Result};

/// Version string of the thermal snapshot layout.
pub const THERMAL_SNAPSHOT_VERSION: &str = "1.0";

// ============================================================================
// Learner
// ============================================================================

/// Learner state in the current (1.2) schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerSnapshot {
    /// Schema version, always `"1.2"` when written
    pub version: String,
    /// Smoothed offset per learned hour
    pub time_patterns: BTreeMap<u8, f64>,
    /// Observation count per learned hour
    pub time_pattern_counts: BTreeMap<u8, u32>,
    /// Outdoor-temperature correlation series, oldest first
    pub temp_correlation_data: Vec<TemperatureCorrelation>,
    /// Power-state running means
    pub power_state_patterns: BTreeMap<String, PowerStatePattern>,
    /// Raw samples, oldest first
    pub enhanced_samples: Vec<Sample>,
    /// Samples the learner represents
    pub sample_count: usize,
}

impl LearnerSnapshot {
    /// Serialise to a JSON value.
    ///
    /// # Errors
    ///
    /// `Serialization` if a value cannot be represented in JSON.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// What happened while loading a learner document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerLoadReport {
    /// Schema version the document was written in
    pub source_version: LearnerSchemaVersion,
    /// Samples accepted
    pub loaded_samples: usize,
    /// Malformed samples skipped
    pub skipped_samples: usize,
    /// Recorded `sample_count` disagreed with the samples and was replaced
    pub count_repaired: bool,
    /// Tables were rebuilt from the samples, because they were empty or
    /// because samples beyond `max_history` were dropped
    pub rebuilt_patterns: bool,
}

pub(crate) struct RestoredLearner {
    pub(crate) store: SampleStore,
    pub(crate) sample_count: usize,
    pub(crate) report: LearnerLoadReport,
}

/// Capture the store in the current learner schema.
#[must_use]
pub fn snapshot_learner(store: &SampleStore, sample_count: usize) -> LearnerSnapshot {
    let mut time_patterns = BTreeMap::new();
    let mut time_pattern_counts = BTreeMap::new();
    for (hour, (&offset, &count)) in store
        .time_patterns()
        .iter()
        .zip(store.time_pattern_counts())
        .enumerate()
    {
        if count > 0 {
            #[allow(clippy::cast_possible_truncation)]
            let hour = hour as u8;
            time_patterns.insert(hour, offset);
            time_pattern_counts.insert(hour, count);
        }
    }

    LearnerSnapshot {
        version: LearnerSchemaVersion::CURRENT.as_str().to_string(),
        time_patterns,
        time_pattern_counts,
        temp_correlation_data: store.temp_correlation().copied().collect(),
        power_state_patterns: store
            .power_state_patterns()
            .iter()
            .map(|(state, pattern)| (state.clone(), *pattern))
            .collect(),
        enhanced_samples: store.samples().cloned().collect(),
        sample_count,
    }
}

/// Rebuild a store from a learner document of any supported version.
pub(crate) fn restore_learner(document: &Value, config: &LearnerConfig) -> Result<RestoredLearner> {
    let (migrated, source_version) = schema::migrate_learner(document.clone())?;
    let object = migrated
        .as_object()
        .ok_or_else(|| Error::InvalidDocument("learner data is not an object".to_string()))?;

    let (time_patterns, time_pattern_counts) =
        parse_hour_tables(object.get("time_patterns"), object.get("time_pattern_counts"));
    let temp_correlation = parse_correlations(object.get("temp_correlation_data"));
    let power_state_patterns = parse_power_patterns(object.get("power_state_patterns"));
    let (samples, skipped_samples) = parse_samples(object.get("enhanced_samples"));

    let mut store = SampleStore::new(
        config.max_history,
        config.learning_rate,
        config.power_thresholds,
    );
    store.restore_tables(
        time_patterns,
        time_pattern_counts,
        temp_correlation,
        power_state_patterns,
    );
    let truncated_samples = store.restore_samples(samples);

    let recorded = object
        .get("sample_count")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok());

    let mut count_repaired = false;
    let sample_count = if source_version >= LearnerSchemaVersion::V1_1 {
        match recorded {
            Some(n) if n == store.len() => n,
            _ => {
                warn!(
                    recorded = ?recorded,
                    actual = store.len(),
                    "Repairing learner sample_count"
                );
                count_repaired = true;
                store.len()
            }
        }
    } else {
        // aggregate-only history: trust the record, else the table counts
        recorded
            .unwrap_or_else(|| time_pattern_counts.iter().map(|&c| c as usize).sum())
            .min(config.max_history)
    };

    let mut rebuilt_patterns = false;
    if store.tables_empty() && !store.is_empty() {
        warn!(samples = store.len(), "Learner tables empty, rebuilding from samples");
        store.rebuild_patterns_from_samples();
        rebuilt_patterns = true;
    } else if truncated_samples > 0 {
        warn!(
            dropped = truncated_samples,
            max_history = config.max_history,
            "Persisted samples exceed max_history, rebuilding tables from retained samples"
        );
        store.rebuild_patterns_from_samples();
        rebuilt_patterns = true;
    }

    Ok(RestoredLearner {
        report: LearnerLoadReport {
            source_version,
            loaded_samples: store.len(),
            skipped_samples,
            count_repaired,
            rebuilt_patterns,
        },
        store,
        sample_count,
    })
}

fn hour_key(key: &str) -> Option<usize> {
    key.trim()
        .parse::<usize>()
        .ok()
        .filter(|&h| h < HOURS_PER_DAY)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count_value(value: &Value) -> Option<u32> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f <= f64::from(u32::MAX))
                .map(|f| f.round() as u32)
        })
}

/// Hour entries keyed by hour string, or a 24-slot array.
fn hour_entries(value: Option<&Value>) -> Vec<(usize, &Value)> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(key, v)| {
                let hour = hour_key(key);
                if hour.is_none() {
                    warn!(key = %key, "Skipping time pattern with invalid hour");
                }
                hour.map(|h| (h, v))
            })
            .collect(),
        Some(Value::Array(values)) => values.iter().take(HOURS_PER_DAY).enumerate().collect(),
        _ => Vec::new(),
    }
}

fn parse_hour_tables(
    patterns: Option<&Value>,
    counts: Option<&Value>,
) -> ([f64; HOURS_PER_DAY], [u32; HOURS_PER_DAY]) {
    let mut offsets = [0.0; HOURS_PER_DAY];
    let mut has_offset = [false; HOURS_PER_DAY];
    for (hour, value) in hour_entries(patterns) {
        match value.as_f64().filter(|f| f.is_finite()) {
            Some(offset) => {
                offsets[hour] = offset;
                has_offset[hour] = true;
            }
            None if value.is_null() => {}
            None => warn!(hour, "Skipping non-numeric time pattern"),
        }
    }

    let mut table_counts = [0; HOURS_PER_DAY];
    let mut has_count = [false; HOURS_PER_DAY];
    for (hour, value) in hour_entries(counts) {
        if let Some(count) = count_value(value) {
            table_counts[hour] = count;
            has_count[hour] = true;
        }
    }

    for hour in 0..HOURS_PER_DAY {
        if !has_offset[hour] {
            table_counts[hour] = 0;
        } else if !has_count[hour] {
            // older documents carry offsets without counts
            table_counts[hour] = 1;
        } else if table_counts[hour] == 0 {
            offsets[hour] = 0.0;
        }
    }
    (offsets, table_counts)
}

fn parse_correlations(value: Option<&Value>) -> Vec<TemperatureCorrelation> {
    let Some(Value::Array(points)) = value else {
        return Vec::new();
    };
    points
        .iter()
        .filter_map(|point| {
            match serde_json::from_value::<TemperatureCorrelation>(point.clone()) {
                Ok(p) if p.outdoor_temp.is_finite() && p.offset.is_finite() => Some(p),
                _ => {
                    warn!(point = %point, "Skipping malformed temperature correlation");
                    None
                }
            }
        })
        .collect()
}

fn parse_power_patterns(value: Option<&Value>) -> FxHashMap<String, PowerStatePattern> {
    let Some(Value::Object(states)) = value else {
        return FxHashMap::default();
    };
    states
        .iter()
        .filter_map(|(state, pattern)| {
            let avg_offset = pattern.get("avg_offset").and_then(Value::as_f64);
            let count = pattern.get("count").and_then(count_value);
            match (avg_offset, count) {
                (Some(avg_offset), Some(count)) if avg_offset.is_finite() && count > 0 => {
                    Some((state.clone(), PowerStatePattern { avg_offset, count }))
                }
                _ => {
                    warn!(state = %state, "Skipping malformed power state pattern");
                    None
                }
            }
        })
        .collect()
}

fn parse_samples(value: Option<&Value>) -> (Vec<Sample>, usize) {
    let Some(Value::Array(raw)) = value else {
        return (Vec::new(), 0);
    };
    let mut samples = Vec::with_capacity(raw.len());
    let mut skipped = 0;
    for (index, entry) in raw.iter().enumerate() {
        match serde_json::from_value::<Sample>(entry.clone()) {
            Ok(sample) if sample.hour().is_some() && sample.is_finite() => samples.push(sample),
            Ok(_) => {
                warn!(index, "Skipping sample with unusable timestamp or readings");
                skipped += 1;
            }
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed sample");
                skipped += 1;
            }
        }
    }
    (samples, skipped)
}

// ============================================================================
// Thermal
// ============================================================================

/// Thermal model and state machine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalSnapshot {
    /// Layout version, [`THERMAL_SNAPSHOT_VERSION`]
    pub version: String,
    /// Cooling time constant (minutes)
    pub tau_cooling: f64,
    /// Warming time constant (minutes)
    pub tau_warming: f64,
    /// Probe history, oldest first
    #[serde(default)]
    pub probe_history: Vec<ProbeResult>,
    /// Controller state
    #[serde(default)]
    pub state: ThermalState,
    /// `(lower, upper)` comfort window
    pub operating_window: (f64, f64),
    /// Correction target
    #[serde(default)]
    pub learning_target: Option<f64>,
    /// Whether the offset learner is paused
    #[serde(default)]
    pub offset_learning_paused: bool,
    /// Start of the last probe cycle
    #[serde(default)]
    pub last_probe_time: Option<DateTime<Utc>>,
    /// Start of the last calibration cycle
    #[serde(default)]
    pub last_calibration_time: Option<DateTime<Utc>>,
}

impl ThermalSnapshot {
    /// Capture the current thermal state.
    #[must_use]
    pub fn capture(model: &ThermalModel, machine: &ThermalStateMachine) -> Self {
        let flags = machine.flags();
        Self {
            version: THERMAL_SNAPSHOT_VERSION.to_string(),
            tau_cooling: model.tau_cooling(),
            tau_warming: model.tau_warming(),
            probe_history: model.probe_history().iter().cloned().collect(),
            state: machine.state(),
            operating_window: machine.operating_window(),
            learning_target: flags.learning_target,
            offset_learning_paused: flags.offset_learning_paused,
            last_probe_time: flags.last_probe_time,
            last_calibration_time: flags.last_calibration_time,
        }
    }

    /// Parse a snapshot, skipping malformed probe entries.
    ///
    /// # Errors
    ///
    /// `UnsupportedVersion` for an unknown layout version, `InvalidDocument`
    /// when required fields are missing or non-finite.
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut value = value.clone();
        let object = value
            .as_object_mut()
            .ok_or_else(|| Error::InvalidDocument("thermal data is not an object".to_string()))?;

        match object.get("version").and_then(Value::as_str) {
            Some(THERMAL_SNAPSHOT_VERSION) | None => {}
            Some(other) => return Err(Error::UnsupportedVersion(other.to_string())),
        }
        object.insert("version".to_string(), Value::from(THERMAL_SNAPSHOT_VERSION));

        let probes = match object.remove("probe_history") {
            Some(Value::Array(entries)) => entries
                .into_iter()
                .filter_map(|entry| match serde_json::from_value::<ProbeResult>(entry) {
                    Ok(probe) if probe.tau_value.is_finite() => Some(probe),
                    _ => {
                        warn!("Skipping malformed probe result");
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        };

        let mut snapshot: Self = serde_json::from_value(value)
            .map_err(|e| Error::InvalidDocument(format!("thermal data: {e}")))?;
        snapshot.probe_history = probes;

        let (lower, upper) = snapshot.operating_window;
        if !(snapshot.tau_cooling.is_finite() && snapshot.tau_warming.is_finite()) {
            return Err(Error::InvalidDocument("thermal taus are not finite".to_string()));
        }
        if !(lower.is_finite() && upper.is_finite()) || lower > upper {
            return Err(Error::InvalidDocument(format!(
                "operating window is invalid: ({lower}, {upper})"
            )));
        }
        Ok(snapshot)
    }

    /// Write this snapshot into the live components.
    pub fn apply(self, model: &mut ThermalModel, machine: &mut ThermalStateMachine) {
        model.restore(self.tau_cooling, self.tau_warming, self.probe_history);
        machine.restore(
            self.state,
            self.operating_window,
            ControlFlags {
                offset_learning_paused: self.offset_learning_paused,
                learning_target: self.learning_target,
                last_probe_time: self.last_probe_time,
                last_calibration_time: self.last_calibration_time,
            },
        );
    }
}

/// Callbacks the codec uses to read and write thermal state it does not own.
///
/// Failures are caught and logged by the codec; they never abort a save or load.
pub trait ThermalDataHooks {
    /// Current thermal state, or `None` when there is nothing to persist.
    ///
    /// # Errors
    ///
    /// Any failure gathering the state.
    fn get_thermal_data(&self) -> anyhow::Result<Option<Value>>;

    /// Restore thermal state from a persisted value.
    ///
    /// # Errors
    ///
    /// Any failure interpreting the value.
    fn restore_thermal_data(&mut self, data: &Value) -> anyhow::Result<()>;
}

// ============================================================================
// Entity document
// ============================================================================

fn enabled() -> bool {
    true
}

/// Engine switches persisted alongside the learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    /// Whether learning is enabled for the entity
    #[serde(default = "enabled")]
    pub enable_learning: bool,
    /// Fields this version does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            enable_learning: true,
            extra: Map::new(),
        }
    }
}

/// Learning section of the entity document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningData {
    /// Engine switches
    #[serde(default)]
    pub engine_state: EngineState,
    /// Learner sub-document in any supported learner schema
    #[serde(default)]
    pub learner_data: Option<Value>,
    /// Fields this version does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Versioned per-entity container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedDocument {
    /// Document schema version
    pub version: String,
    /// Entity the document belongs to
    pub entity_id: String,
    /// RFC 3339 time of the last save
    pub last_updated: String,
    /// Learner state and switches
    pub learning_data: LearningData,
    /// Thermal snapshot
    #[serde(default)]
    pub thermal_data: Option<Value>,
    /// Top-level fields this version does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PersistedDocument {
    /// Empty document in the current schema.
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            version: DocumentSchemaVersion::CURRENT.as_str().to_string(),
            entity_id: entity_id.into(),
            last_updated: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            learning_data: LearningData::default(),
            thermal_data: None,
            extra: Map::new(),
        }
    }
}

/// What happened while applying a document to live components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentRestoreReport {
    /// Persisted learning switch
    pub enable_learning: bool,
    /// Learner load outcome, when learner data was present and accepted
    pub learner: Option<LearnerLoadReport>,
    /// Why learner data was rejected, if it was
    pub learner_error: Option<String>,
    /// Thermal hooks accepted the thermal data
    pub thermal_restored: bool,
}

/// Check the required keys and nesting of a current-schema document.
///
/// # Errors
///
/// `InvalidDocument` naming the first problem found.
pub fn validate_document_structure(document: &Value) -> Result<()> {
    fn invalid(what: &str) -> Error {
        Error::InvalidDocument(what.to_string())
    }

    let object = document.as_object().ok_or_else(|| invalid("document is not an object"))?;
    for key in ["version", "entity_id", "last_updated"] {
        if !object.get(key).is_some_and(Value::is_string) {
            return Err(Error::InvalidDocument(format!("missing string field '{key}'")));
        }
    }

    let learning = object
        .get("learning_data")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing object 'learning_data'"))?;
    let engine_state = learning
        .get("engine_state")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing object 'learning_data.engine_state'"))?;
    if !engine_state.get("enable_learning").is_some_and(Value::is_boolean) {
        return Err(invalid("missing boolean 'learning_data.engine_state.enable_learning'"));
    }
    if !learning
        .get("learner_data")
        .map_or(true, |v| v.is_null() || v.is_object())
    {
        return Err(invalid("'learning_data.learner_data' must be an object or null"));
    }
    if !object
        .get("thermal_data")
        .map_or(true, |v| v.is_null() || v.is_object())
    {
        return Err(invalid("'thermal_data' must be an object or null"));
    }
    Ok(())
}

/// Parse raw bytes and check the document structure.
///
/// Used by storage backends to validate a temporary artifact before it
/// replaces the primary.
///
/// # Errors
///
/// `Serialization` for invalid JSON, `InvalidDocument` for bad structure.
pub fn validate_document_bytes(bytes: &[u8]) -> Result<()> {
    let value: Value = serde_json::from_slice(bytes)?;
    validate_document_structure(&value)
}

/// Serialise a document to pretty JSON bytes.
///
/// # Errors
///
/// `Serialization` if the document cannot be represented in JSON.
pub fn encode_document(document: &PersistedDocument) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(document)?)
}

/// Migrate, validate and type a raw document for `expected_entity`.
///
/// # Errors
///
/// `UnsupportedVersion`, `InvalidDocument` or `EntityMismatch`.
pub fn decode_document(document: Value, expected_entity: &str) -> Result<PersistedDocument> {
    let (migrated, source) = schema::migrate_document(document)?;
    validate_document_structure(&migrated)?;
    let decoded: PersistedDocument = serde_json::from_value(migrated)
        .map_err(|e| Error::InvalidDocument(e.to_string()))?;
    if decoded.entity_id != expected_entity {
        return Err(Error::EntityMismatch {
            expected: expected_entity.to_string(),
            found: decoded.entity_id,
        });
    }
    if source != DocumentSchemaVersion::CURRENT {
        info!(
            entity_id = %decoded.entity_id,
            from = %source,
            to = %DocumentSchemaVersion::CURRENT,
            "Migrated persisted document"
        );
    }
    Ok(decoded)
}

/// Flat 1.x keys whose content migration copied into `learning_data`.
const SUPERSEDED_TOP_LEVEL_FIELDS: [&str; 2] = ["learner_data", "enable_learning"];

/// Assemble a current-schema document from live components.
///
/// A failing learner serialisation or thermal hook leaves the corresponding
/// section `null`; the document is still produced. Carried-over top-level
/// fields are kept except the flat 1.x learner keys, which would otherwise
/// shadow `learning_data` with stale copies.
#[must_use]
pub fn build_document(
    entity_id: &str,
    enable_learning: bool,
    learner: Option<&OffsetLearner>,
    hooks: Option<&dyn ThermalDataHooks>,
    mut extra: Map<String, Value>,
) -> PersistedDocument {
    for key in SUPERSEDED_TOP_LEVEL_FIELDS {
        if extra.remove(key).is_some() {
            debug!(entity_id, field = key, "Dropping superseded top-level field");
        }
    }

    let learner_data = learner.and_then(|learner| match learner.save().to_value() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(entity_id, error = %e, "Failed to serialise learner state");
            None
        }
    });

    let thermal_data = hooks.and_then(|hooks| match hooks.get_thermal_data() {
        Ok(data) => data,
        Err(e) => {
            warn!(entity_id, error = %e, "Thermal data callback failed during save");
            None
        }
    });

    let mut document = PersistedDocument::new(entity_id);
    document.learning_data.engine_state.enable_learning = enable_learning;
    document.learning_data.learner_data = learner_data;
    document.thermal_data = thermal_data;
    document.extra = extra;
    document
}

/// Push a decoded document into live components.
///
/// The learner is left untouched when its data is rejected; hook failures
/// are logged and reported, never propagated.
pub fn apply_document(
    document: &PersistedDocument,
    learner: &mut OffsetLearner,
    hooks: Option<&mut dyn ThermalDataHooks>,
) -> DocumentRestoreReport {
    let mut report = DocumentRestoreReport {
        enable_learning: document.learning_data.engine_state.enable_learning,
        ..DocumentRestoreReport::default()
    };

    if let Some(data) = document.learning_data.learner_data.as_ref() {
        match learner.load(data) {
            Ok(loaded) => report.learner = Some(loaded),
            Err(e) => {
                warn!(entity_id = %document.entity_id, error = %e, "Rejected persisted learner data");
                report.learner_error = Some(e.to_string());
            }
        }
    }

    if let (Some(hooks), Some(data)) = (hooks, document.thermal_data.as_ref()) {
        match hooks.restore_thermal_data(data) {
            Ok(()) => report.thermal_restored = true,
            Err(e) => {
                warn!(entity_id = %document.entity_id, error = %e, "Thermal data callback failed during load");
            }
        }
    }

    debug!(
        entity_id = %document.entity_id,
        learner = report.learner.is_some(),
        thermal = report.thermal_restored,
        "Applied persisted document"
    );
    report
}
