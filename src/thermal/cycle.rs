//! Time-bounded measurement cycle used by probing and calibration

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::ProbeCycleConfig;

/// Taus above this count as slow-responding spaces (minutes).
pub const SLOW_RESPONSE_TAU: f64 = 150.0;
const HIGH_POWER_FACTOR: f64 = 0.75;
const SLOW_RESPONSE_FACTOR: f64 = 1.5;

/// Adaptive probe length: shortened for high-power systems, lengthened for
/// slow-responding spaces, clamped to the configured bounds.
#[must_use]
pub fn plan_probe_duration(config: &ProbeCycleConfig, power_watts: Option<f64>, tau: f64) -> Duration {
    let mut secs = config.base_duration.as_secs_f64();
    if power_watts.is_some_and(|w| w >= config.high_power_watts) {
        secs *= HIGH_POWER_FACTOR;
    }
    if tau > SLOW_RESPONSE_TAU {
        secs *= SLOW_RESPONSE_FACTOR;
    }
    let secs = secs.clamp(
        config.min_duration.as_secs_f64(),
        config.max_duration.as_secs_f64(),
    );
    Duration::from_secs_f64(secs)
}

/// A running (or idle) cycle. All state is cycle-local and cleared on
/// completion or cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementCycle {
    running: Option<(DateTime<Utc>, Duration)>,
}

impl MeasurementCycle {
    /// Idle cycle.
    #[must_use]
    pub const fn new() -> Self {
        Self { running: None }
    }

    /// Start timing.
    pub fn start(&mut self, now: DateTime<Utc>, duration: Duration) {
        self.running = Some((now, duration));
    }

    /// Whether a cycle is in progress.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start time of the running cycle.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.running.map(|(start, _)| start)
    }

    /// Planned length of the running cycle.
    #[must_use]
    pub fn planned(&self) -> Option<Duration> {
        self.running.map(|(_, duration)| duration)
    }

    /// Whether the running cycle has reached its planned length.
    #[must_use]
    pub fn is_complete(&self, now: DateTime<Utc>) -> bool {
        self.running.is_some_and(|(start, duration)| {
            chrono::Duration::from_std(duration).is_ok_and(|d| now - start >= d)
        })
    }

    /// Stop and clear; returns the start time if a cycle was running.
    pub fn cancel(&mut self) -> Option<DateTime<Utc>> {
        self.running.take().map(|(start, _)| start)
    }
}
