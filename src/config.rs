//! Engine configuration
//!
//! Values arrive already validated by the host in normal operation, but every
//! section still exposes `validate()` so that constructors can reject bad
//! input with an explicit error instead of clamping it.
//!
//! ```rust
//! use offset_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "learner": { "max_history": 500 } }"#)?;
//! assert_eq!(config.learner.max_history, 500);
//! assert!((config.learner.learning_rate - 0.1).abs() < f64::EPSILON);
//! # Ok::<(), offset_engine::Error>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default bound on stored samples.
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Default exponential smoothing factor for the hour-of-day table.
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;

/// Power draw thresholds (watts) used to label a sample's power state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerThresholds {
    /// Below this the unit is considered idle
    pub idle: f64,
    /// Below this (and above idle) the unit runs low
    pub min: f64,
    /// Below this (and above min) the unit runs moderate; above is high
    pub max: f64,
}

impl Default for PowerThresholds {
    fn default() -> Self {
        Self {
            idle: 50.0,
            min: 100.0,
            max: 250.0,
        }
    }
}

impl PowerThresholds {
    /// Label a power reading.
    #[must_use]
    pub fn classify(&self, watts: f64) -> &'static str {
        if watts < self.idle {
            "idle"
        } else if watts < self.min {
            "low"
        } else if watts < self.max {
            "moderate"
        } else {
            "high"
        }
    }

    fn validate(&self) -> Result<()> {
        let ordered = self.idle >= 0.0 && self.idle <= self.min && self.min <= self.max;
        if !ordered {
            return Err(Error::InvalidConfig(format!(
                "power thresholds must satisfy 0 <= idle <= min <= max (got {}/{}/{})",
                self.idle, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Offset learner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Maximum number of raw samples kept (FIFO eviction)
    pub max_history: usize,
    /// Smoothing factor for the hour-of-day pattern, `0 < r <= 1`
    pub learning_rate: f64,
    /// Thresholds used to label power states
    pub power_thresholds: PowerThresholds,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            learning_rate: DEFAULT_LEARNING_RATE,
            power_thresholds: PowerThresholds::default(),
        }
    }
}

impl LearnerConfig {
    /// Validate ranges.
    ///
    /// # Errors
    ///
    /// `InvalidLearningRate` when the rate is outside `(0, 1]`,
    /// `InvalidConfig` for a zero history bound or unordered thresholds.
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(Error::InvalidLearningRate(self.learning_rate));
        }
        if self.max_history == 0 {
            return Err(Error::InvalidConfig("max_history must be > 0".to_string()));
        }
        self.power_thresholds.validate()
    }
}

/// Passive thermal model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    /// Initial cooling time constant in minutes
    pub tau_cooling: f64,
    /// Initial warming time constant in minutes
    pub tau_warming: f64,
    /// Per-day weight multiplier applied to older probes
    pub recency_decay_per_day: f64,
    /// Probes needed before confidence reaches the raw average
    pub confidence_required_samples: usize,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            tau_cooling: 90.0,
            tau_warming: 150.0,
            recency_decay_per_day: 0.98,
            confidence_required_samples: 30,
        }
    }
}

impl ThermalConfig {
    /// Validate ranges.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for non-positive time constants, a decay outside
    /// `(0, 1]` or a zero sample requirement.
    pub fn validate(&self) -> Result<()> {
        if !(self.tau_cooling > 0.0 && self.tau_warming > 0.0) {
            return Err(Error::InvalidConfig(
                "tau_cooling and tau_warming must be positive".to_string(),
            ));
        }
        if !(self.recency_decay_per_day > 0.0 && self.recency_decay_per_day <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "recency_decay_per_day must be in (0, 1] (got {})",
                self.recency_decay_per_day
            )));
        }
        if self.confidence_required_samples == 0 {
            return Err(Error::InvalidConfig(
                "confidence_required_samples must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Probe cycle duration policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeCycleConfig {
    /// Shortest allowed cycle
    #[serde(with = "duration_minutes")]
    pub min_duration: Duration,
    /// Longest allowed cycle
    #[serde(with = "duration_minutes")]
    pub max_duration: Duration,
    /// Cycle length before adaptive scaling
    #[serde(with = "duration_minutes")]
    pub base_duration: Duration,
    /// Systems drawing at least this much are shortened
    pub high_power_watts: f64,
}

impl Default for ProbeCycleConfig {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_secs(5 * 60),
            max_duration: Duration::from_secs(60 * 60),
            base_duration: Duration::from_secs(30 * 60),
            high_power_watts: 3000.0,
        }
    }
}

/// Stability detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Time span the readings must cover
    #[serde(with = "duration_minutes")]
    pub window: Duration,
    /// Largest allowed spread of temperatures inside the window (°C)
    pub max_range: f64,
    /// Minimum readings inside the window
    pub min_readings: usize,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30 * 60),
            max_range: 0.1,
            min_readings: 3,
        }
    }
}

/// Thermal state machine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    /// Inner buffer applied on both window edges before leaving CORRECTING
    pub hysteresis_buffer: f64,
    /// Model confidence below which DRIFTING starts a probe
    pub probe_confidence_threshold: f64,
    /// Minimum time between probe cycles
    #[serde(with = "duration_minutes")]
    pub min_probe_interval: Duration,
    /// Probe cycle policy
    pub probe_cycle: ProbeCycleConfig,
    /// Length of a calibration cycle
    #[serde(with = "duration_minutes")]
    pub calibration_duration: Duration,
    /// Minimum time between calibration cycles
    #[serde(with = "duration_minutes")]
    pub min_calibration_interval: Duration,
    /// Stability detection
    pub stability: StabilityConfig,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            hysteresis_buffer: 0.2,
            probe_confidence_threshold: 0.3,
            min_probe_interval: Duration::from_secs(12 * 60 * 60),
            probe_cycle: ProbeCycleConfig::default(),
            calibration_duration: Duration::from_secs(20 * 60),
            min_calibration_interval: Duration::from_secs(24 * 60 * 60),
            stability: StabilityConfig::default(),
        }
    }
}

impl StateMachineConfig {
    /// Validate ranges.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a negative buffer, a threshold outside `[0, 1]`,
    /// or probe bounds outside 5–60 minutes.
    pub fn validate(&self) -> Result<()> {
        if !(self.hysteresis_buffer >= 0.0 && self.hysteresis_buffer.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "hysteresis_buffer must be >= 0 (got {})",
                self.hysteresis_buffer
            )));
        }
        if !(0.0..=1.0).contains(&self.probe_confidence_threshold) {
            return Err(Error::InvalidConfig(format!(
                "probe_confidence_threshold must be in [0, 1] (got {})",
                self.probe_confidence_threshold
            )));
        }
        let cycle = &self.probe_cycle;
        let five = Duration::from_secs(5 * 60);
        let sixty = Duration::from_secs(60 * 60);
        if cycle.min_duration < five
            || cycle.max_duration > sixty
            || cycle.min_duration > cycle.max_duration
        {
            return Err(Error::InvalidConfig(
                "probe cycle bounds must satisfy 5min <= min <= max <= 60min".to_string(),
            ));
        }
        if self.stability.min_readings == 0 {
            return Err(Error::InvalidConfig(
                "stability.min_readings must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Offset learner section
    pub learner: LearnerConfig,
    /// Thermal model section
    pub thermal: ThermalConfig,
    /// State machine section
    pub state_machine: StateMachineConfig,
}

impl EngineConfig {
    /// Parse from JSON, filling absent fields with defaults, then validate.
    ///
    /// # Errors
    ///
    /// `Serialization` for malformed JSON, otherwise the first validation error.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// The first validation error found.
    pub fn validate(&self) -> Result<()> {
        self.learner.validate()?;
        self.thermal.validate()?;
        self.state_machine.validate()
    }
}

/// Serde helper storing a `Duration` as fractional minutes.
mod duration_minutes {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() / 60.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let minutes = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(minutes * 60.0).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_learning_rate_range() {
        let mut config = LearnerConfig::default();
        config.learning_rate = 0.0;
        assert!(matches!(config.validate(), Err(Error::InvalidLearningRate(_))));
        config.learning_rate = 1.5;
        assert!(matches!(config.validate(), Err(Error::InvalidLearningRate(_))));
        config.learning_rate = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_power_classification() {
        let thresholds = PowerThresholds::default();
        assert_eq!(thresholds.classify(10.0), "idle");
        assert_eq!(thresholds.classify(75.0), "low");
        assert_eq!(thresholds.classify(200.0), "moderate");
        assert_eq!(thresholds.classify(1200.0), "high");
    }

    #[test]
    fn test_minutes_in_json() {
        let config = EngineConfig::from_json_str(
            r#"{ "state_machine": { "min_probe_interval": 90, "probe_cycle": { "base_duration": 15 } } }"#,
        )
        .unwrap();
        assert_eq!(config.state_machine.min_probe_interval, Duration::from_secs(90 * 60));
        assert_eq!(config.state_machine.probe_cycle.base_duration, Duration::from_secs(15 * 60));
        assert_eq!(config.state_machine.probe_cycle.max_duration, Duration::from_secs(60 * 60));
    }

    #[test]
    fn test_probe_bounds_rejected() {
        let mut config = StateMachineConfig::default();
        config.probe_cycle.max_duration = Duration::from_secs(2 * 60 * 60);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
