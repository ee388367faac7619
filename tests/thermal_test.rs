//! Thermal model: drift prediction, tau estimation, probe history, confidence

use chrono::{Duration, Utc};
use offset_engine::config::ThermalConfig;
use offset_engine::thermal::{
    ProbeResult, ThermalModel, MAX_PROBE_HISTORY_SIZE, TAU_MAX_CLAMP, TAU_MIN_CLAMP,
};

fn model() -> ThermalModel {
    ThermalModel::new(ThermalConfig::default()).unwrap()
}

#[test]
fn test_drift_approaches_outdoor() {
    let model = model();
    let start = model.predict_drift(22.0, 32.0, 0.0, true);
    let one_tau = model.predict_drift(22.0, 32.0, model.tau_cooling(), true);
    let long = model.predict_drift(22.0, 32.0, 10_000.0, true);

    assert!((start - 22.0).abs() < 1e-12);
    // 1 - e^-1 of the way after one time constant
    assert!((one_tau - (22.0 + 10.0 * (1.0 - (-1.0f64).exp()))).abs() < 1e-9);
    assert!((long - 32.0).abs() < 1e-6);
}

#[test]
fn test_drift_uses_direction_specific_tau() {
    let model = model();
    let cooling = model.predict_drift(22.0, 32.0, 60.0, true);
    let warming = model.predict_drift(22.0, 32.0, 60.0, false);
    // tau_warming (150) is slower than tau_cooling (90)
    assert!(cooling > warming);
}

#[test]
fn test_history_capped_at_75_with_fifo_eviction() {
    let mut model = model();
    let base = Utc::now();
    model.update_tau_at(ProbeResult::new(30.0, 1.0, 1800, 0.9).at(base), true, base);
    for i in 1..=MAX_PROBE_HISTORY_SIZE {
        let at = base + Duration::minutes(i64::try_from(i).unwrap());
        model.update_tau_at(ProbeResult::new(200.0, 1.0, 1800, 0.9).at(at), true, at);
    }

    assert_eq!(model.get_probe_count(), MAX_PROBE_HISTORY_SIZE);
    // the 30-minute outlier was the oldest and is gone
    assert!(model.probe_history().iter().all(|p| (p.tau_value - 200.0).abs() < 1e-12));
    assert!((model.tau_cooling() - 200.0).abs() < 1e-9);
}

#[test]
fn test_tau_always_clamped() {
    let fast = model().update_tau(ProbeResult::new(5.0, 1.0, 600, 0.5), true);
    assert!((fast - TAU_MIN_CLAMP).abs() < 1e-12);

    let slow = model().update_tau(ProbeResult::new(9_999.0, 1.0, 600, 0.5), false);
    assert!((slow - TAU_MAX_CLAMP).abs() < 1e-12);

    let mut model = model();
    model.update_tau(ProbeResult::new(f64::INFINITY, 1.0, 600, 0.5), true);
    model.update_tau(ProbeResult::new(-50.0, 1.0, 600, 0.5), false);
    for tau in [model.tau_cooling(), model.tau_warming()] {
        assert!((TAU_MIN_CLAMP..=TAU_MAX_CLAMP).contains(&tau), "tau {tau}");
    }
}

#[test]
fn test_cooling_probes_leave_warming_tau_alone() {
    let mut model = model();
    let now = Utc::now();
    let warming = model.tau_warming();
    for i in 0..20 {
        let at = now - Duration::hours(i);
        model.update_tau_at(ProbeResult::new(45.0, 0.9, 1800, 0.9).at(at), true, now);
    }
    assert!((model.tau_warming() - warming).abs() < 1e-12);
    assert!((model.tau_cooling() - 45.0).abs() < 1e-9);
    assert!(model.probe_history().iter().all(|p| p.is_cooling == Some(true)));

    // a single warming probe sets the warming constant on its own
    let tau = model.update_tau_at(ProbeResult::new(210.0, 0.9, 1800, 0.9).at(now), false, now);
    assert!((tau - 210.0).abs() < 1e-9, "tau {tau}");
}

#[test]
fn test_recent_probes_dominate() {
    let mut model = model();
    let now = Utc::now();
    model.update_tau_at(ProbeResult::new(60.0, 1.0, 1800, 0.9).at(now - Duration::days(120)), true, now);
    model.update_tau_at(ProbeResult::new(180.0, 1.0, 1800, 0.9).at(now), true, now);

    // 0.98^120 ≈ 0.089, so the recent probe carries ~92% of the weight
    let tau = model.tau_cooling();
    assert!(tau > 165.0 && tau < 180.0, "tau {tau}");
}

#[test]
fn test_confidence_requires_thirty_probes() {
    let mut model = model();
    for _ in 0..15 {
        model.update_tau(ProbeResult::new(100.0, 0.8, 1800, 0.9), true);
    }
    assert!((model.get_confidence() - 0.4).abs() < 1e-9);

    for _ in 0..30 {
        model.update_tau(ProbeResult::new(100.0, 0.8, 1800, 0.9), true);
    }
    assert!((model.get_confidence() - 0.8).abs() < 1e-9);
}

#[test]
fn test_invalid_config_rejected() {
    let config = ThermalConfig {
        recency_decay_per_day: 1.5,
        ..ThermalConfig::default()
    };
    assert!(ThermalModel::new(config).is_err());
}
