//! Sample Store - bounded raw history plus derived pattern tables
//!
//! The raw samples are the single source of truth. The hour-of-day table,
//! the outdoor-temperature correlation series and the power-state averages
//! are caches over the same observations and can always be rebuilt with
//! [`SampleStore::rebuild_patterns_from_samples`].
//!
//! ## Eviction
//!
//! Samples are evicted FIFO once `max_history` is exceeded. The correlation
//! series drops its oldest point, and the hour slot and power state the
//! evicted observation fed are replayed from the retained samples. After any
//! sequence of pushes the tables equal what a rebuild would produce.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Sample;
use crate::config::PowerThresholds;
use crate::{Error, Result};

/// Number of hour slots in the time-of-day table.
pub const HOURS_PER_DAY: usize = 24;

/// One point of the outdoor-temperature correlation series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureCorrelation {
    /// Outdoor temperature when observed
    pub outdoor_temp: f64,
    /// Correct offset at that temperature
    pub offset: f64,
}

/// Running mean of offsets observed in one power state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerStatePattern {
    /// Mean offset
    pub avg_offset: f64,
    /// Number of contributing observations
    pub count: u32,
}

/// Outcome of a pattern rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Samples folded into the tables
    pub applied: usize,
    /// Malformed samples skipped
    pub skipped: usize,
}

/// Bounded store of enhanced samples and their aggregate tables.
#[derive(Debug, Clone)]
pub struct SampleStore {
    max_history: usize,
    learning_rate: f64,
    power_thresholds: PowerThresholds,
    samples: VecDeque<Sample>,
    time_patterns: [f64; HOURS_PER_DAY],
    time_pattern_counts: [u32; HOURS_PER_DAY],
    temp_correlation: VecDeque<TemperatureCorrelation>,
    power_state_patterns: FxHashMap<String, PowerStatePattern>,
}

impl SampleStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(max_history: usize, learning_rate: f64, power_thresholds: PowerThresholds) -> Self {
        Self {
            max_history,
            learning_rate,
            power_thresholds,
            samples: VecDeque::with_capacity(max_history.min(4096)),
            time_patterns: [0.0; HOURS_PER_DAY],
            time_pattern_counts: [0; HOURS_PER_DAY],
            temp_correlation: VecDeque::new(),
            power_state_patterns: FxHashMap::default(),
        }
    }

    /// Maximum number of retained samples.
    #[must_use]
    pub const fn max_history(&self) -> usize {
        self.max_history
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no samples are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> impl ExactSizeIterator<Item = &Sample> + '_ {
        self.samples.iter()
    }

    /// Smoothed offset per hour of day.
    #[must_use]
    pub const fn time_patterns(&self) -> &[f64; HOURS_PER_DAY] {
        &self.time_patterns
    }

    /// Observation count per hour of day.
    #[must_use]
    pub const fn time_pattern_counts(&self) -> &[u32; HOURS_PER_DAY] {
        &self.time_pattern_counts
    }

    /// Outdoor-temperature correlation series, oldest first.
    pub fn temp_correlation(&self) -> impl ExactSizeIterator<Item = &TemperatureCorrelation> + '_ {
        self.temp_correlation.iter()
    }

    /// Power-state running means.
    #[must_use]
    pub const fn power_state_patterns(&self) -> &FxHashMap<String, PowerStatePattern> {
        &self.power_state_patterns
    }

    /// Power-state label for a reading, using the configured thresholds.
    #[must_use]
    pub fn power_state_label(&self, watts: f64) -> &'static str {
        self.power_thresholds.classify(watts)
    }

    /// True when every aggregate table is empty.
    #[must_use]
    pub fn tables_empty(&self) -> bool {
        self.time_pattern_counts.iter().all(|&c| c == 0)
            && self.temp_correlation.is_empty()
            && self.power_state_patterns.is_empty()
    }

    /// Append a sample and update the tables from it, evicting the oldest
    /// samples first when the store is full.
    ///
    /// # Errors
    ///
    /// `InvalidHour` when the sample's timestamp has no usable hour, and
    /// `Other` for non-finite readings. The store is untouched on error.
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        let hour = sample
            .hour()
            .ok_or_else(|| Error::Other(format!("unparseable timestamp {:?}", sample.timestamp)))?;
        if hour as usize >= HOURS_PER_DAY {
            return Err(Error::InvalidHour(hour));
        }
        if !sample.is_finite() {
            return Err(Error::Other("sample contains non-finite readings".to_string()));
        }

        // make room first so the correlation cap never drops a retained point
        while self.samples.len() >= self.max_history.max(1) {
            let Some(evicted) = self.samples.pop_front() else {
                break;
            };
            self.retract(&evicted);
        }
        self.apply(&sample, hour as usize);
        self.samples.push_back(sample);
        Ok(())
    }

    /// Recompute every aggregate table from the retained samples.
    ///
    /// Malformed samples are skipped rather than failing the rebuild. Running
    /// it twice in a row yields identical tables.
    pub fn rebuild_patterns_from_samples(&mut self) -> RebuildReport {
        self.clear_tables();
        let mut report = RebuildReport::default();
        let samples = std::mem::take(&mut self.samples);
        for sample in &samples {
            match valid_hour(sample) {
                Some(hour) => {
                    self.apply(sample, hour);
                    report.applied += 1;
                }
                _ => {
                    warn!(timestamp = %sample.timestamp, "Skipping malformed sample during pattern rebuild");
                    report.skipped += 1;
                }
            }
        }
        self.samples = samples;
        debug!(applied = report.applied, skipped = report.skipped, "Rebuilt pattern tables");
        report
    }

    /// Drop all samples and tables.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.clear_tables();
    }

    fn clear_tables(&mut self) {
        self.time_patterns = [0.0; HOURS_PER_DAY];
        self.time_pattern_counts = [0; HOURS_PER_DAY];
        self.temp_correlation.clear();
        self.power_state_patterns.clear();
    }

    fn apply(&mut self, sample: &Sample, hour: usize) {
        let offset = sample.actual;

        let count = self.time_pattern_counts[hour];
        self.time_patterns[hour] = smooth(self.learning_rate, count, self.time_patterns[hour], offset);
        self.time_pattern_counts[hour] = count.saturating_add(1);

        if let Some(outdoor_temp) = sample.outdoor_temp {
            self.temp_correlation.push_back(TemperatureCorrelation {
                outdoor_temp,
                offset,
            });
            while self.temp_correlation.len() > self.max_history {
                self.temp_correlation.pop_front();
            }
        }

        if let Some(watts) = sample.power {
            let label = self.power_thresholds.classify(watts);
            let entry = self
                .power_state_patterns
                .entry(label.to_string())
                .or_insert(PowerStatePattern {
                    avg_offset: 0.0,
                    count: 0,
                });
            accumulate(entry, offset);
        }
    }

    /// Drop an evicted sample's contribution. Must run after it has left
    /// `self.samples`.
    fn retract(&mut self, evicted: &Sample) {
        let Some(hour) = valid_hour(evicted) else {
            return;
        };
        if evicted.outdoor_temp.is_some() {
            self.temp_correlation.pop_front();
        }
        self.replay_hour(hour);
        if let Some(watts) = evicted.power {
            let label = self.power_thresholds.classify(watts);
            self.replay_power_state(label);
        }
    }

    /// Recompute one hour slot from the retained samples in arrival order.
    fn replay_hour(&mut self, hour: usize) {
        let mut value = 0.0;
        let mut count = 0u32;
        for sample in self.samples.iter().filter(|s| valid_hour(s) == Some(hour)) {
            value = smooth(self.learning_rate, count, value, sample.actual);
            count = count.saturating_add(1);
        }
        self.time_patterns[hour] = value;
        self.time_pattern_counts[hour] = count;
    }

    /// Recompute one power-state mean from the retained samples.
    fn replay_power_state(&mut self, label: &'static str) {
        let mut pattern = PowerStatePattern {
            avg_offset: 0.0,
            count: 0,
        };
        for sample in &self.samples {
            if valid_hour(sample).is_none() {
                continue;
            }
            if let Some(watts) = sample.power {
                if self.power_thresholds.classify(watts) == label {
                    accumulate(&mut pattern, sample.actual);
                }
            }
        }
        if pattern.count == 0 {
            self.power_state_patterns.remove(label);
        } else {
            self.power_state_patterns.insert(label.to_string(), pattern);
        }
    }

    /// Replace the tables wholesale (persistence restore).
    pub(crate) fn restore_tables(
        &mut self,
        time_patterns: [f64; HOURS_PER_DAY],
        time_pattern_counts: [u32; HOURS_PER_DAY],
        temp_correlation: Vec<TemperatureCorrelation>,
        power_state_patterns: FxHashMap<String, PowerStatePattern>,
    ) {
        self.time_patterns = time_patterns;
        self.time_pattern_counts = time_pattern_counts;
        self.temp_correlation = temp_correlation.into();
        while self.temp_correlation.len() > self.max_history {
            self.temp_correlation.pop_front();
        }
        self.power_state_patterns = power_state_patterns;
    }

    /// Replace the raw samples without touching the tables (persistence restore).
    ///
    /// Returns how many of the oldest samples were dropped to fit
    /// `max_history`; the tables no longer describe the retained samples
    /// when this is non-zero.
    pub(crate) fn restore_samples(&mut self, samples: Vec<Sample>) -> usize {
        self.samples = samples.into();
        let dropped = self.samples.len().saturating_sub(self.max_history);
        self.samples.drain(..dropped);
        dropped
    }
}

/// Hour slot of a sample that can contribute to the tables.
fn valid_hour(sample: &Sample) -> Option<usize> {
    sample
        .hour()
        .map(|hour| hour as usize)
        .filter(|&hour| hour < HOURS_PER_DAY && sample.is_finite())
}

/// Hour-table update: the first observation seeds the slot, later ones are
/// exponentially smoothed in.
fn smooth(learning_rate: f64, count: u32, current: f64, offset: f64) -> f64 {
    if count == 0 {
        offset
    } else {
        learning_rate.mul_add(offset, (1.0 - learning_rate) * current)
    }
}

fn accumulate(pattern: &mut PowerStatePattern, offset: f64) {
    pattern.count = pattern.count.saturating_add(1);
    pattern.avg_offset += (offset - pattern.avg_offset) / f64::from(pattern.count);
}
