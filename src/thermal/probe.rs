//! Probe results and their bounded history

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of probes kept; the oldest is evicted on overflow.
pub const MAX_PROBE_HISTORY_SIZE: usize = 75;

/// Outcome of one thermal probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Fitted time constant in minutes
    pub tau_value: f64,
    /// Fit confidence in `[0, 1]`
    pub confidence: f64,
    /// Probe length in seconds
    pub duration: u64,
    /// Goodness of fit (R²-like)
    pub fit_quality: f64,
    /// Probe ended early
    pub aborted: bool,
    /// Completion time
    pub timestamp: DateTime<Utc>,
    /// Direction the probe measured; set when recorded by the model.
    /// `None` for probes persisted before the direction was tracked, which
    /// count towards both constants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_cooling: Option<bool>,
}

impl ProbeResult {
    /// A completed probe stamped now.
    #[must_use]
    pub fn new(tau_value: f64, confidence: f64, duration: u64, fit_quality: f64) -> Self {
        Self {
            tau_value,
            confidence: confidence.clamp(0.0, 1.0),
            duration,
            fit_quality,
            aborted: false,
            timestamp: Utc::now(),
            is_cooling: None,
        }
    }

    /// Override the completion time.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Tag the direction the probe measured.
    #[must_use]
    pub fn direction(mut self, is_cooling: bool) -> Self {
        self.is_cooling = Some(is_cooling);
        self
    }

    /// True when the probe informs the constant for the given direction.
    #[must_use]
    pub fn applies_to(&self, is_cooling: bool) -> bool {
        self.is_cooling.map_or(true, |direction| direction == is_cooling)
    }

    /// Mark as aborted.
    #[must_use]
    pub fn aborted(mut self) -> Self {
        self.aborted = true;
        self
    }
}

/// FIFO history of probe results capped at [`MAX_PROBE_HISTORY_SIZE`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeHistory {
    probes: VecDeque<ProbeResult>,
}

impl ProbeHistory {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append, evicting the oldest probe if the cap is exceeded.
    pub fn push(&mut self, probe: ProbeResult) {
        self.probes.push_back(probe);
        while self.probes.len() > MAX_PROBE_HISTORY_SIZE {
            self.probes.pop_front();
        }
    }

    /// Number of stored probes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// True when no probes are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Probes, oldest first.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &ProbeResult> + '_ {
        self.probes.iter()
    }

    /// Most recent probe.
    #[must_use]
    pub fn latest(&self) -> Option<&ProbeResult> {
        self.probes.back()
    }

    /// Mean confidence, `0.0` when empty.
    #[must_use]
    pub fn mean_confidence(&self) -> f64 {
        if self.probes.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.probes.len() as f64;
        self.probes.iter().map(|p| p.confidence).sum::<f64>() / n
    }

    pub(crate) fn from_probes(probes: Vec<ProbeResult>) -> Self {
        let mut history = Self::new();
        for probe in probes {
            history.push(probe);
        }
        history
    }
}
