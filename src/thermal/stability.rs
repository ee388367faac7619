//! Steady-conditions detector

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::config::StabilityConfig;

/// Flags steady indoor conditions from a rolling window of readings.
///
/// Stable means: at least `min_readings` readings inside the window, the
/// retained readings cover at least half the window, and their spread is
/// no more than `max_range`.
#[derive(Debug, Clone)]
pub struct StabilityDetector {
    config: StabilityConfig,
    readings: VecDeque<(DateTime<Utc>, f64)>,
}

impl StabilityDetector {
    /// New detector with no readings.
    #[must_use]
    pub const fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            readings: VecDeque::new(),
        }
    }

    /// Add a reading. Non-finite values are ignored.
    pub fn observe(&mut self, temperature: f64, at: DateTime<Utc>) {
        if !temperature.is_finite() {
            return;
        }
        self.readings.push_back((at, temperature));
        self.prune(at);
    }

    /// Whether conditions are steady as of `now`.
    #[must_use]
    pub fn is_stable(&self, now: DateTime<Utc>) -> bool {
        let Ok(window) = chrono::Duration::from_std(self.config.window) else {
            return false;
        };
        let start = now - window;
        let mut count = 0;
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &(at, temp) in self.readings.iter().filter(|(at, _)| *at >= start && *at <= now) {
            count += 1;
            oldest = Some(oldest.map_or(at, |o| o.min(at)));
            lo = lo.min(temp);
            hi = hi.max(temp);
        }
        let Some(oldest) = oldest else {
            return false;
        };
        count >= self.config.min_readings && (now - oldest) * 2 >= window && hi - lo <= self.config.max_range
    }

    /// Forget all readings.
    pub fn reset(&mut self) {
        self.readings.clear();
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let Ok(window) = chrono::Duration::from_std(self.config.window) else {
            return;
        };
        let horizon = now - window;
        while self.readings.front().is_some_and(|(at, _)| *at < horizon) {
            self.readings.pop_front();
        }
    }
}
