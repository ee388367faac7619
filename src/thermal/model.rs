//! Passive thermal model
//!
//! Treats the room like an RC circuit: with the AC idle, the indoor
//! temperature approaches the outdoor temperature exponentially with time
//! constant tau. Separate constants are kept for cooling (room warming up
//! after the AC stops cooling) and warming.
//!
//! Each tau is re-estimated from the probes recorded for its own direction
//! as a confidence- and recency-weighted mean. Older probes are down-weighted by a per-day decay
//! factor (0.98/day, half-life about 34 days) and never discarded early.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::probe::{ProbeHistory, ProbeResult};
use crate::config::ThermalConfig;
use crate::Result;

/// Lower clamp for tau (minutes).
pub const TAU_MIN_CLAMP: f64 = 30.0;
/// Upper clamp for tau (minutes).
pub const TAU_MAX_CLAMP: f64 = 300.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Exponential-decay thermal model with probe-driven tau estimation.
#[derive(Debug, Clone)]
pub struct ThermalModel {
    config: ThermalConfig,
    tau_cooling: f64,
    tau_warming: f64,
    history: ProbeHistory,
}

impl ThermalModel {
    /// Create a model from configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the configuration is out of range.
    pub fn new(config: ThermalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tau_cooling: clamp_tau(config.tau_cooling),
            tau_warming: clamp_tau(config.tau_warming),
            config,
            history: ProbeHistory::new(),
        })
    }

    /// Cooling time constant (minutes).
    #[must_use]
    pub const fn tau_cooling(&self) -> f64 {
        self.tau_cooling
    }

    /// Warming time constant (minutes).
    #[must_use]
    pub const fn tau_warming(&self) -> f64 {
        self.tau_warming
    }

    /// Probe history.
    #[must_use]
    pub const fn probe_history(&self) -> &ProbeHistory {
        &self.history
    }

    /// Predicted indoor temperature after `minutes` of passive drift.
    #[must_use]
    pub fn predict_drift(
        &self,
        current_temp: f64,
        outdoor_temp: f64,
        minutes: f64,
        is_cooling: bool,
    ) -> f64 {
        let tau = if is_cooling {
            self.tau_cooling
        } else {
            self.tau_warming
        };
        let approach = 1.0 - (-minutes.max(0.0) / tau).exp();
        (outdoor_temp - current_temp).mul_add(approach, current_temp)
    }

    /// Record a probe for one direction and re-estimate that direction's tau.
    /// Returns the new tau.
    pub fn update_tau(&mut self, probe: ProbeResult, is_cooling: bool) -> f64 {
        self.update_tau_at(probe, is_cooling, Utc::now())
    }

    /// [`update_tau`](Self::update_tau) with an explicit reference time for ageing.
    pub fn update_tau_at(&mut self, probe: ProbeResult, is_cooling: bool, now: DateTime<Utc>) -> f64 {
        debug!(
            tau = probe.tau_value,
            confidence = probe.confidence,
            aborted = probe.aborted,
            is_cooling,
            "Recording thermal probe"
        );
        self.history.push(probe.direction(is_cooling));

        let current = if is_cooling {
            self.tau_cooling
        } else {
            self.tau_warming
        };
        let updated = self.weighted_tau(now, is_cooling).map_or(current, clamp_tau);
        if is_cooling {
            self.tau_cooling = updated;
        } else {
            self.tau_warming = updated;
        }
        info!(
            tau = updated,
            previous = current,
            probes = self.history.len(),
            is_cooling,
            "Updated thermal time constant"
        );
        updated
    }

    /// Mean probe confidence scaled by history maturity.
    ///
    /// Cannot exceed the raw mean until the required probe count is reached.
    #[must_use]
    pub fn get_confidence(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let maturity =
            (self.history.len() as f64 / self.config.confidence_required_samples as f64).min(1.0);
        (self.history.mean_confidence() * maturity).clamp(0.0, 1.0)
    }

    /// Number of stored probes.
    #[must_use]
    pub fn get_probe_count(&self) -> usize {
        self.history.len()
    }

    /// Confidence × recency weighted mean of the non-aborted probes' tau for
    /// one direction.
    fn weighted_tau(&self, now: DateTime<Utc>, is_cooling: bool) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for probe in self
            .history
            .iter()
            .filter(|p| !p.aborted && p.applies_to(is_cooling))
        {
            #[allow(clippy::cast_precision_loss)]
            let age_days = ((now - probe.timestamp).num_seconds().max(0) as f64) / SECONDS_PER_DAY;
            let weight = probe.confidence * self.config.recency_decay_per_day.powf(age_days);
            if weight > 0.0 && probe.tau_value.is_finite() {
                weighted = clamp_tau(probe.tau_value).mul_add(weight, weighted);
                total += weight;
            }
        }
        (total > 0.0).then(|| weighted / total)
    }

    /// Replace taus and history (persistence restore).
    pub(crate) fn restore(&mut self, tau_cooling: f64, tau_warming: f64, probes: Vec<ProbeResult>) {
        self.tau_cooling = clamp_tau(tau_cooling);
        self.tau_warming = clamp_tau(tau_warming);
        self.history = ProbeHistory::from_probes(probes);
    }
}

/// Clamp to `[TAU_MIN_CLAMP, TAU_MAX_CLAMP]`; non-finite input maps to the lower bound.
#[must_use]
pub fn clamp_tau(tau: f64) -> f64 {
    if tau.is_nan() {
        return TAU_MIN_CLAMP;
    }
    tau.clamp(TAU_MIN_CLAMP, TAU_MAX_CLAMP)
}
