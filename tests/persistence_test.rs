//! Persistence: learner round-trips, schema migrations, storage backends

use offset_engine::config::LearnerConfig;
use offset_engine::coordinator::EntityCoordinator;
use offset_engine::learning::{hysteresis, Conditions, Observation, OffsetLearner};
use offset_engine::persistence::{
    decode_document, FileBackend, LearnerSchemaVersion, MemoryBackend, PersistedDocument,
    PersistenceManager, SaveOutcome, StorageBackend,
};
use offset_engine::thermal::{ProbeResult, Reading, ThermalState};
use offset_engine::Error;
use serde_json::{json, Value};

fn trained_learner() -> OffsetLearner {
    let mut learner = OffsetLearner::new(LearnerConfig::default()).unwrap();
    for i in 0..40 {
        let conditions = Conditions::new(21.0 + f64::from(i % 4), 23.5, if i % 5 == 0 { "heat" } else { "cool" })
            .outdoor(18.0 + f64::from(i % 15))
            .power(f64::from(i * 40))
            .hysteresis(if i % 2 == 0 { hysteresis::ACTIVE_PHASE } else { hysteresis::IDLE_STABLE_ZONE });
        learner
            .add_sample(
                Observation::new(0.2, 0.5 + f64::from(i % 7) * 0.2, conditions)
                    .at_hour(u32::try_from(i % 24).unwrap())
                    .humidity(Some(45.0), None),
            )
            .unwrap();
    }
    learner
}

fn legacy_sample(actual: f64, timestamp: &str) -> Value {
    json!({
        "predicted": 0.0,
        "actual": actual,
        "ac_temp": 22.0,
        "room_temp": 24.0,
        "outdoor_temp": 30.0,
        "mode": "cool",
        "power": 900.0,
        "timestamp": timestamp
    })
}

// ============================================================================
// Learner round-trip and migration
// ============================================================================

#[test]
fn test_save_load_reproduces_predictions() {
    let learner = trained_learner();
    let document = learner.save().to_value().unwrap();

    let mut restored = OffsetLearner::new(LearnerConfig::default()).unwrap();
    let report = restored.load(&document).unwrap();
    assert_eq!(report.source_version, LearnerSchemaVersion::V1_2);
    assert_eq!(report.skipped_samples, 0);
    assert!(!report.count_repaired);

    let queries = [
        Conditions::new(22.0, 23.5, "cool").outdoor(25.0).power(600.0),
        Conditions::new(24.0, 23.5, "heat").hysteresis(hysteresis::ACTIVE_PHASE),
        Conditions::new(19.0, 26.0, "dry"),
    ];
    for query in &queries {
        assert!((learner.predict(query) - restored.predict(query)).abs() < 1e-9);
    }
    for hour in [0, 7, 13, 23] {
        let a = learner.predict_offset(Some(27.0), hour, Some("moderate")).unwrap();
        let b = restored.predict_offset(Some(27.0), hour, Some("moderate")).unwrap();
        assert!((a.offset - b.offset).abs() < 1e-9);
        assert!((a.confidence - b.confidence).abs() < 1e-9);
    }
    assert_eq!(learner.get_learning_stats(), restored.get_learning_stats());
}

#[test]
fn test_load_v1_0_aggregate_only_document() {
    let document = json!({
        "version": "1.0",
        "time_patterns": {"8": 1.25, "18": -0.5},
        "time_pattern_counts": {"8": 12, "18": 4},
        "temp_correlation_data": [
            {"outdoor_temp": 20.0, "offset": 0.5},
            {"outdoor_temp": 30.0, "offset": 1.5}
        ],
        "power_state_patterns": {"high": {"avg_offset": 0.9, "count": 16}}
    });

    let mut learner = OffsetLearner::new(LearnerConfig::default()).unwrap();
    let report = learner.load(&document).unwrap();
    assert_eq!(report.source_version, LearnerSchemaVersion::V1_0);
    assert_eq!(learner.store().len(), 0);
    assert_eq!(learner.sample_count(), 16);

    let prediction = learner.predict_offset(Some(25.0), 8, Some("high")).unwrap();
    let expected = (1.25 * 1.0 + 1.0 * 0.8 + 0.9 * 0.6) / 2.4;
    assert!((prediction.offset - expected).abs() < 1e-9, "offset {}", prediction.offset);
}

#[test]
fn test_load_v1_1_gets_humidity_defaults() {
    let document = json!({
        "version": "1.1",
        "time_patterns": {},
        "time_pattern_counts": {},
        "temp_correlation_data": [],
        "power_state_patterns": {},
        "enhanced_samples": [
            legacy_sample(1.0, "2025-07-01T14:00:00+02:00"),
            legacy_sample(1.2, "2025-07-01T15:00:00+02:00")
        ],
        "sample_count": 2
    });

    let mut learner = OffsetLearner::new(LearnerConfig::default()).unwrap();
    let report = learner.load(&document).unwrap();
    assert_eq!(report.source_version, LearnerSchemaVersion::V1_1);
    assert!(report.rebuilt_patterns);
    assert!(learner.store().samples().all(|s| s.indoor_humidity.is_none()));
    assert!(learner
        .store()
        .samples()
        .all(|s| s.hysteresis_state == hysteresis::NO_POWER_SENSOR));

    // tables rebuilt from the samples, hour taken from the stored offset
    assert_eq!(learner.store().time_pattern_counts()[14], 1);
    assert_eq!(learner.store().time_pattern_counts()[15], 1);
    assert_eq!(learner.store().power_state_patterns()["high"].count, 2);
}

#[test]
fn test_malformed_samples_skipped_and_count_repaired() {
    let document = json!({
        "version": "1.2",
        "time_patterns": {"10": 1.0},
        "time_pattern_counts": {"10": 1},
        "enhanced_samples": [
            legacy_sample(1.0, "2025-07-01T10:00:00+00:00"),
            {"predicted": "oops"},
            legacy_sample(2.0, "not a timestamp"),
            42
        ],
        "sample_count": 999
    });

    let mut learner = OffsetLearner::new(LearnerConfig::default()).unwrap();
    let report = learner.load(&document).unwrap();
    assert_eq!(report.loaded_samples, 1);
    assert_eq!(report.skipped_samples, 3);
    assert!(report.count_repaired);
    assert!(!report.rebuilt_patterns);
    assert_eq!(learner.sample_count(), 1);
}

#[test]
fn test_naive_sample_timestamps_are_kept() {
    let document = json!({
        "version": "1.2",
        "enhanced_samples": [
            legacy_sample(1.0, "2025-06-01T10:00:00.123456"),
            legacy_sample(1.5, "2025-06-01T11:00:00")
        ],
        "sample_count": 2
    });

    let mut learner = OffsetLearner::new(LearnerConfig::default()).unwrap();
    let report = learner.load(&document).unwrap();
    assert_eq!(report.loaded_samples, 2);
    assert_eq!(report.skipped_samples, 0);
    assert!(report.rebuilt_patterns);
    assert_eq!(learner.store().time_pattern_counts()[10], 1);
    assert_eq!(learner.store().time_pattern_counts()[11], 1);
}

#[test]
fn test_load_into_smaller_history_rebuilds_tables() {
    let document = trained_learner().save().to_value().unwrap();

    let config = LearnerConfig { max_history: 10, ..LearnerConfig::default() };
    let mut learner = OffsetLearner::new(config).unwrap();
    let report = learner.load(&document).unwrap();
    assert_eq!(report.loaded_samples, 10);
    assert!(report.rebuilt_patterns);
    assert_eq!(learner.sample_count(), 10);

    let store = learner.store();
    let hours: u32 = store.time_pattern_counts().iter().sum();
    assert_eq!(hours, 10);
    let powered: u32 = store.power_state_patterns().values().map(|p| p.count).sum();
    assert_eq!(powered, 10);
    assert_eq!(store.temp_correlation().len(), 10);

    let mut rebuilt = store.clone();
    rebuilt.rebuild_patterns_from_samples();
    assert_eq!(store.time_patterns(), rebuilt.time_patterns());
    assert_eq!(store.power_state_patterns(), rebuilt.power_state_patterns());
}

#[test]
fn test_unknown_learner_version_leaves_learner_untouched() {
    let mut learner = trained_learner();
    let before = learner.get_learning_stats();

    let result = learner.load(&json!({"version": "4.0", "enhanced_samples": []}));
    assert!(matches!(result, Err(Error::UnsupportedVersion(v)) if v == "4.0"));
    assert_eq!(learner.get_learning_stats(), before);
}

// ============================================================================
// Documents
// ============================================================================

#[test]
fn test_v1_document_migrates_and_keeps_fields() {
    let legacy = json!({
        "version": "1.0",
        "entity_id": "climate.study",
        "last_updated": "2024-11-02T08:15:00",
        "learner_data": {"version": "1.0", "time_patterns": {"6": 0.75}},
        "enable_learning": false,
        "installer": "bob"
    });

    let document = decode_document(legacy, "climate.study").unwrap();
    assert_eq!(document.version, "2.1");
    assert!(!document.learning_data.engine_state.enable_learning);
    assert!(document.thermal_data.is_none());
    assert_eq!(document.extra["installer"], "bob");

    let mut coordinator = EntityCoordinator::builder("climate.study")
        .operating_window(20.0, 23.0)
        .build()
        .unwrap();
    let report = coordinator.restore_document(&document).unwrap();
    assert!(!coordinator.learning_enabled());
    assert!(!report.thermal_restored);
    let prediction = coordinator.learner().predict_offset(None, 6, None).unwrap();
    assert!((prediction.offset - 0.75).abs() < 1e-9);

    let resaved = serde_json::to_value(coordinator.snapshot_document()).unwrap();
    assert_eq!(resaved["installer"], "bob");
    assert_eq!(resaved["version"], "2.1");
    assert_eq!(resaved["learning_data"]["learner_data"]["version"], "1.2");
    assert_eq!(resaved["learning_data"]["engine_state"]["enable_learning"], false);
    // the flat 1.0 keys are not written back next to learning_data
    assert!(resaved.get("learner_data").is_none());
    assert!(resaved.get("enable_learning").is_none());
}

#[test]
fn test_unknown_document_version_is_rejected() {
    let document = json!({
        "version": "9.0",
        "entity_id": "climate.a",
        "last_updated": "2025-01-01T00:00:00+00:00"
    });
    assert!(matches!(
        decode_document(document, "climate.a"),
        Err(Error::UnsupportedVersion(_))
    ));
}

// ============================================================================
// Manager and backends
// ============================================================================

fn coordinator(entity_id: &str) -> EntityCoordinator {
    let mut coordinator = EntityCoordinator::builder(entity_id)
        .operating_window(21.0, 24.0)
        .build()
        .unwrap();
    coordinator
        .thermal_mut()
        .machine_mut()
        .set_last_probe_time(Some(chrono::Utc::now()));
    coordinator
}

#[tokio::test]
async fn test_file_backend_full_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(FileBackend::new(dir.path()));

    let mut original = coordinator("climate.living_room");
    original.tick(Reading::temperature(24.6));
    for _ in 0..5 {
        original
            .record_observation(Observation::new(0.0, 1.1, Conditions::new(22.0, 24.6, "cool")))
            .unwrap();
    }
    original.complete_probe(ProbeResult::new(110.0, 0.85, 1800, 0.9), true);

    let outcome = manager.save(&original.snapshot_document()).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Written);
    assert!(manager.backend().primary_path("climate.living_room").exists());

    let loaded = manager.load("climate.living_room").await.unwrap();
    let mut restored = coordinator("climate.living_room");
    let report = restored.restore_document(&loaded).unwrap();

    assert!(report.thermal_restored);
    assert_eq!(report.learner.unwrap().loaded_samples, 5);
    assert_eq!(restored.thermal().machine().state(), ThermalState::Correcting);
    assert_eq!(restored.thermal().model().get_probe_count(), 1);
    assert!(restored
        .thermal()
        .model()
        .probe_history()
        .iter()
        .all(|p| p.is_cooling == Some(true)));
    let query = Conditions::new(22.0, 24.6, "cool");
    assert!((restored.recommend_offset(&query) - original.recommend_offset(&query)).abs() < 1e-9);
}

#[tokio::test]
async fn test_second_save_creates_backup() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(FileBackend::new(dir.path()));
    let document = PersistedDocument::new("climate.a");

    manager.save(&document).await.unwrap();
    assert!(!manager.backend().backup_path("climate.a").exists());
    manager.save(&document).await.unwrap();
    assert!(manager.backend().backup_path("climate.a").exists());
}

#[tokio::test]
async fn test_invalid_document_never_replaces_primary() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(FileBackend::new(dir.path()));
    manager.save(&PersistedDocument::new("climate.a")).await.unwrap();

    // a document that serialises without its required learning section
    let result = manager
        .backend()
        .write_atomic(
            "climate.a",
            br#"{"version":"2.1"}"#.to_vec(),
            offset_engine::persistence::validate_document_bytes,
        )
        .await;
    assert!(matches!(result, Err(Error::InvalidDocument(_))));
    assert!(manager.load("climate.a").await.is_some());
}

#[tokio::test]
async fn test_load_other_entity_is_no_data() {
    let manager = PersistenceManager::new(MemoryBackend::new());
    let document = PersistedDocument::new("climate.a");
    manager.save(&document).await.unwrap();

    // stored under climate.b's key but claiming to be climate.a
    manager
        .backend()
        .insert_raw("climate.b", serde_json::to_vec(&document).unwrap());
    assert!(manager.load("climate.b").await.is_none());
    assert!(matches!(
        manager.try_load("climate.b").await,
        Err(Error::EntityMismatch { .. })
    ));
}

#[tokio::test]
async fn test_unknown_version_on_disk_is_no_data() {
    let manager = PersistenceManager::new(MemoryBackend::new());
    manager.backend().insert_raw(
        "climate.a",
        br#"{"version":"3.0","entity_id":"climate.a","last_updated":"x"}"#.to_vec(),
    );
    assert!(manager.load("climate.a").await.is_none());
}

#[tokio::test]
async fn test_missing_document_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let manager = PersistenceManager::new(FileBackend::new(dir.path().join("nested")));
    assert!(manager.load("climate.nowhere").await.is_none());
}

#[tokio::test]
async fn test_concurrent_saves_leave_valid_document() {
    let dir = tempfile::tempdir().unwrap();
    let manager = std::sync::Arc::new(PersistenceManager::new(FileBackend::new(dir.path())));

    let mut handles = Vec::new();
    for i in 0..16 {
        let mut document = PersistedDocument::new("climate.busy");
        document.extra.insert("writer".to_string(), json!(i));
        handles.push(manager.spawn_save(document));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let loaded = manager.load("climate.busy").await.unwrap();
    assert!(loaded.extra["writer"].is_number());
    let leftover_tmp = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.path().extension().is_some_and(|ext| ext == "tmp"));
    assert!(!leftover_tmp);
}
