//! Offset Learner - online offset prediction from observed outcomes
//!
//! Two prediction strategies share one [`SampleStore`]:
//!
//! - [`OffsetLearner::predict`]: similarity-weighted nearest neighbours over
//!   the raw samples.
//! - [`OffsetLearner::predict_offset`]: the pattern path combining the
//!   hour-of-day table, the outdoor-temperature correlation series and the
//!   power-state averages, each with its own confidence.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info};

use super::similarity::similarity;
use super::store::{SampleStore, TemperatureCorrelation, HOURS_PER_DAY};
use super::{Conditions, Observation};
use crate::config::LearnerConfig;
use crate::persistence::codec::{self, LearnerLoadReport, LearnerSnapshot};
use crate::{Error, Result};

/// Weight of the hour-of-day component.
pub const TIME_PATTERN_WEIGHT: f64 = 1.0;
/// Weight of the outdoor-temperature component.
pub const TEMPERATURE_WEIGHT: f64 = 0.8;
/// Weight of the power-state component.
pub const POWER_STATE_WEIGHT: f64 = 0.6;

/// Observations per hour needed for full time-pattern confidence.
const TIME_PATTERN_FULL_COUNT: f64 = 50.0;
/// Correlation points needed for full temperature confidence.
const TEMPERATURE_FULL_COUNT: f64 = 15.0;
/// Observations per power state needed for full confidence.
const POWER_STATE_FULL_COUNT: f64 = 30.0;
/// Multi-component agreement boost.
const AGREEMENT_BOOST: f64 = 1.5;

/// Samples needed for full maturity in the accuracy blend.
const MATURITY_FULL_COUNT: f64 = 50.0;
/// Distinct condition buckets needed for full diversity.
const DIVERSITY_FULL_COUNT: f64 = 10.0;
/// Error sensitivity of the accuracy factor, `exp(-k * mae)`.
const ACCURACY_DECAY: f64 = 1.5;
const ACCURACY_WEIGHT: f64 = 0.7;
const MATURITY_WEIGHT: f64 = 0.2;
const DIVERSITY_WEIGHT: f64 = 0.1;
/// Below this accuracy factor the blended score may not exceed [`INACCURATE_CAP`].
const ACCURACY_CAP_THRESHOLD: f64 = 0.7;
const INACCURATE_CAP: f64 = 0.8;

/// Result of the pattern-based prediction path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffsetPrediction {
    /// Weight-normalised offset
    pub offset: f64,
    /// Combined confidence in `[0, 1]`
    pub confidence: f64,
    /// Human-readable list of contributing components
    pub reason: String,
}

/// Learning progress summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LearningStats {
    /// Samples represented by the learner
    pub samples_collected: usize,
    /// Learned hour slots plus learned power states
    pub patterns_learned: usize,
    /// Accuracy-dominant confidence blend in `[0, 1]`
    pub avg_accuracy: f64,
}

/// Online learner for setpoint offsets.
#[derive(Debug, Clone)]
pub struct OffsetLearner {
    config: LearnerConfig,
    store: SampleStore,
    sample_count: usize,
}

impl OffsetLearner {
    /// Create a learner.
    ///
    /// # Errors
    ///
    /// `InvalidLearningRate` or `InvalidConfig` when the configuration is out of range.
    pub fn new(config: LearnerConfig) -> Result<Self> {
        config.validate()?;
        let store = SampleStore::new(
            config.max_history,
            config.learning_rate,
            config.power_thresholds,
        );
        Ok(Self {
            config,
            store,
            sample_count: 0,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// Underlying sample store.
    #[must_use]
    pub const fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Number of samples the learner represents.
    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Record an observed outcome.
    ///
    /// # Errors
    ///
    /// `InvalidHour` when the observation pins an hour outside `0..=23`;
    /// `Other` for non-finite readings. Nothing is recorded on error.
    pub fn add_sample(&mut self, observation: Observation) -> Result<()> {
        let sample = observation.into_sample()?;
        debug!(
            predicted = sample.predicted,
            actual = sample.actual,
            mode = %sample.mode,
            "Adding offset sample"
        );
        self.store.push(sample)?;
        self.sample_count = (self.sample_count + 1).min(self.config.max_history);
        Ok(())
    }

    /// Similarity-weighted estimate of the correct offset.
    ///
    /// Returns `0.0` when no samples exist.
    #[must_use]
    pub fn predict(&self, query: &Conditions) -> f64 {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for sample in self.store.samples() {
            let weight = similarity(sample, query);
            if weight > 0.0 {
                weighted = sample.actual.mul_add(weight, weighted);
                total += weight;
            }
        }
        if total > 0.0 {
            weighted / total
        } else {
            0.0
        }
    }

    /// Pattern-based prediction for an hour of day.
    ///
    /// # Errors
    ///
    /// `InvalidHour` when `hour` is outside `0..=23`.
    pub fn predict_offset(
        &self,
        outdoor_temp: Option<f64>,
        hour: u32,
        power_state: Option<&str>,
    ) -> Result<OffsetPrediction> {
        if hour as usize >= HOURS_PER_DAY {
            return Err(Error::InvalidHour(hour));
        }

        // (offset, weight, confidence, label)
        let mut components: Vec<(f64, f64, f64, String)> = Vec::with_capacity(3);

        let count = self.store.time_pattern_counts()[hour as usize];
        if count > 0 {
            components.push((
                self.store.time_patterns()[hour as usize],
                TIME_PATTERN_WEIGHT,
                (f64::from(count) / TIME_PATTERN_FULL_COUNT).min(1.0),
                format!("time pattern (hour {hour})"),
            ));
        }

        if let Some(outdoor) = outdoor_temp {
            if let Some(offset) = interpolate_nearest(self.store.temp_correlation(), outdoor) {
                #[allow(clippy::cast_precision_loss)]
                let history = self.store.temp_correlation().len() as f64;
                components.push((
                    offset,
                    TEMPERATURE_WEIGHT,
                    (history / TEMPERATURE_FULL_COUNT).min(1.0),
                    "temperature correlation".to_string(),
                ));
            }
        }

        if let Some(state) = power_state {
            if let Some(pattern) = self.store.power_state_patterns().get(state) {
                components.push((
                    pattern.avg_offset,
                    POWER_STATE_WEIGHT,
                    (f64::from(pattern.count) / POWER_STATE_FULL_COUNT).min(1.0),
                    format!("power state '{state}'"),
                ));
            }
        }

        if components.is_empty() {
            return Ok(OffsetPrediction {
                offset: 0.0,
                confidence: 0.0,
                reason: "no learned patterns".to_string(),
            });
        }

        let total_weight: f64 = components.iter().map(|c| c.1).sum();
        let offset = components.iter().map(|c| c.0 * c.1).sum::<f64>() / total_weight;

        #[allow(clippy::cast_precision_loss)]
        let n = components.len() as f64;
        let log_sum: f64 = components.iter().map(|c| c.2.max(f64::MIN_POSITIVE).ln()).sum();
        let mut confidence = (log_sum / n).exp();
        if components.len() > 1 {
            confidence = (confidence * AGREEMENT_BOOST).min(1.0);
        }

        let labels: Vec<&str> = components.iter().map(|c| c.3.as_str()).collect();
        Ok(OffsetPrediction {
            offset,
            confidence: confidence.clamp(0.0, 1.0),
            reason: format!("learned from {}", labels.join(", ")),
        })
    }

    /// Learning progress and confidence.
    #[must_use]
    pub fn get_learning_stats(&self) -> LearningStats {
        let hours_learned = self
            .store
            .time_pattern_counts()
            .iter()
            .filter(|&&c| c > 0)
            .count();
        LearningStats {
            samples_collected: self.sample_count,
            patterns_learned: hours_learned + self.store.power_state_patterns().len(),
            avg_accuracy: self.accuracy_blend(),
        }
    }

    /// Shorthand for `get_learning_stats().avg_accuracy`.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.accuracy_blend()
    }

    /// Forget everything.
    pub fn reset_learning(&mut self) {
        self.store.clear();
        self.sample_count = 0;
        info!("Offset learning reset");
    }

    /// Recompute the aggregate tables from the raw samples.
    pub fn rebuild_patterns_from_samples(&mut self) -> super::store::RebuildReport {
        self.store.rebuild_patterns_from_samples()
    }

    /// Serialise to the current (1.2) learner schema.
    #[must_use]
    pub fn save(&self) -> LearnerSnapshot {
        codec::snapshot_learner(&self.store, self.sample_count)
    }

    /// Restore from a learner document of any supported schema version.
    ///
    /// Older versions are migrated in place. Malformed samples are skipped,
    /// a wrong `sample_count` is repaired and empty tables are rebuilt from
    /// the raw samples when possible. The learner is left untouched on error.
    ///
    /// # Errors
    ///
    /// `UnsupportedVersion` for unknown schema versions and `InvalidDocument`
    /// when the document cannot be interpreted at all.
    pub fn load(&mut self, document: &serde_json::Value) -> Result<LearnerLoadReport> {
        let restored = codec::restore_learner(document, &self.config)?;
        self.store = restored.store;
        self.sample_count = restored.sample_count;
        info!(
            version = %restored.report.source_version,
            samples = self.store.len(),
            skipped = restored.report.skipped_samples,
            "Loaded offset learner state"
        );
        Ok(restored.report)
    }

    fn accuracy_blend(&self) -> f64 {
        let n = self.store.len();
        if n == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = n as f64;

        let mae = self.store.samples().map(super::Sample::error).sum::<f64>() / count;
        let accuracy = (-ACCURACY_DECAY * mae).exp();
        let maturity = (count / MATURITY_FULL_COUNT).min(1.0);

        let buckets: HashSet<(&str, &str, i64, Option<i64>)> = self
            .store
            .samples()
            .map(|s| {
                (
                    s.mode.as_str(),
                    s.hysteresis_state.as_str(),
                    bucket(s.room_temp, 1.0),
                    s.outdoor_temp.map(|t| bucket(t, 5.0)),
                )
            })
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let diversity = (buckets.len() as f64 / DIVERSITY_FULL_COUNT).min(1.0);

        let mut score = ACCURACY_WEIGHT.mul_add(
            accuracy,
            MATURITY_WEIGHT.mul_add(maturity, DIVERSITY_WEIGHT * diversity),
        );
        if accuracy < ACCURACY_CAP_THRESHOLD {
            score = score.min(INACCURATE_CAP);
        }
        score.clamp(0.0, 1.0)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn bucket(value: f64, width: f64) -> i64 {
    (value / width).floor() as i64
}

/// Two-point interpolation (or extrapolation) through the two correlation
/// points whose outdoor temperatures are nearest the query.
fn interpolate_nearest<'a>(
    points: impl Iterator<Item = &'a TemperatureCorrelation>,
    outdoor: f64,
) -> Option<f64> {
    let mut best: Option<(f64, &TemperatureCorrelation)> = None;
    let mut second: Option<(f64, &TemperatureCorrelation)> = None;
    for point in points {
        let distance = (point.outdoor_temp - outdoor).abs();
        match best {
            Some((d, _)) if distance >= d => {
                if second.map_or(true, |(d2, _)| distance < d2) {
                    second = Some((distance, point));
                }
            }
            _ => {
                second = best;
                best = Some((distance, point));
            }
        }
    }

    let ((_, a), (_, b)) = (best?, second?);
    let span = b.outdoor_temp - a.outdoor_temp;
    if span.abs() < 1e-6 {
        return Some((a.offset + b.offset) / 2.0);
    }
    let slope = (b.offset - a.offset) / span;
    Some(slope.mul_add(outdoor - a.outdoor_temp, a.offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learner() -> OffsetLearner {
        OffsetLearner::new(LearnerConfig::default()).unwrap()
    }

    fn obs(predicted: f64, actual: f64, hour: u32) -> Observation {
        Observation::new(predicted, actual, Conditions::new(22.0, 24.0, "cool")).at_hour(hour)
    }

    #[test]
    fn test_predict_empty_is_zero() {
        let learner = learner();
        assert_eq!(learner.predict(&Conditions::new(22.0, 24.0, "cool")), 0.0);
    }

    #[test]
    fn test_predict_prefers_similar_samples() {
        let mut learner = learner();
        for _ in 0..10 {
            learner
                .add_sample(Observation::new(0.0, 2.0, Conditions::new(22.0, 24.0, "cool")))
                .unwrap();
            learner
                .add_sample(Observation::new(0.0, -1.0, Conditions::new(30.0, 30.0, "heat")))
                .unwrap();
        }
        let near_cool = learner.predict(&Conditions::new(22.0, 24.0, "cool"));
        let near_heat = learner.predict(&Conditions::new(30.0, 30.0, "heat"));
        assert!(near_cool > 1.5, "got {near_cool}");
        assert!(near_heat < -0.5, "got {near_heat}");
    }

    #[test]
    fn test_interpolation_between_points() {
        let points = [
            TemperatureCorrelation { outdoor_temp: 20.0, offset: 1.0 },
            TemperatureCorrelation { outdoor_temp: 30.0, offset: 2.0 },
            TemperatureCorrelation { outdoor_temp: 0.0, offset: -5.0 },
        ];
        let value = interpolate_nearest(points.iter(), 25.0).unwrap();
        assert!((value - 1.5).abs() < 1e-9);

        // extrapolation beyond the nearest pair
        let value = interpolate_nearest(points.iter(), 35.0).unwrap();
        assert!((value - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_interpolation_needs_two_points() {
        let points = [TemperatureCorrelation { outdoor_temp: 20.0, offset: 1.0 }];
        assert!(interpolate_nearest(points.iter(), 25.0).is_none());
    }

    #[test]
    fn test_predict_offset_single_component_not_boosted() {
        let mut learner = learner();
        for _ in 0..25 {
            learner.add_sample(obs(0.0, 1.0, 9)).unwrap();
        }
        let prediction = learner.predict_offset(None, 9, None).unwrap();
        assert!((prediction.offset - 1.0).abs() < 1e-9);
        assert!((prediction.confidence - 0.5).abs() < 1e-9);
        assert!(prediction.reason.contains("time pattern"));
    }

    #[test]
    fn test_predict_offset_combines_components() {
        let mut learner = learner();
        for i in 0..30 {
            let conditions = Conditions::new(22.0, 24.0, "cool")
                .outdoor(25.0 + f64::from(i % 5))
                .power(1200.0);
            learner
                .add_sample(Observation::new(0.0, 1.0, conditions).at_hour(15))
                .unwrap();
        }
        let prediction = learner.predict_offset(Some(27.0), 15, Some("high")).unwrap();
        assert!((prediction.offset - 1.0).abs() < 1e-9);
        // gm(0.6, 1.0, 1.0) * 1.5 capped at 1
        assert!((prediction.confidence - 1.0).abs() < 1e-9);
        assert!(prediction.reason.contains("power state 'high'"));
    }

    #[test]
    fn test_predict_offset_without_patterns() {
        let prediction = learner().predict_offset(Some(20.0), 3, Some("idle")).unwrap();
        assert_eq!(prediction.offset, 0.0);
        assert_eq!(prediction.confidence, 0.0);
    }

    #[test]
    fn test_hour_range_errors() {
        let mut learner = learner();
        assert!(matches!(learner.add_sample(obs(0.0, 0.0, 24)), Err(Error::InvalidHour(24))));
        assert!(matches!(learner.predict_offset(None, 99, None), Err(Error::InvalidHour(99))));
        assert_eq!(learner.sample_count(), 0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut learner = learner();
        learner
            .add_sample(Observation::new(0.0, 1.0, Conditions::new(22.0, 24.0, "cool").power(90.0)))
            .unwrap();
        learner.reset_learning();
        assert_eq!(learner.sample_count(), 0);
        assert!(learner.store().is_empty());
        assert!(learner.store().tables_empty());
        assert_eq!(learner.get_learning_stats().avg_accuracy, 0.0);
    }
}
