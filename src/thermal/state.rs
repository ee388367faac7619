//! Thermal states and per-tick context

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThermalState {
    /// AC idle, temperature allowed to drift inside the window
    #[default]
    Drifting,
    /// AC actively pulling the temperature back into the window
    Correcting,
    /// Passive measurement cycle estimating tau
    Probing,
    /// Verification cycle under steady conditions
    Calibrating,
}

impl fmt::Display for ThermalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drifting => write!(f, "DRIFTING"),
            Self::Correcting => write!(f, "CORRECTING"),
            Self::Probing => write!(f, "PROBING"),
            Self::Calibrating => write!(f, "CALIBRATING"),
        }
    }
}

/// Malformed tick input; the handler stays put and reports it.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Anomaly {
    /// No current temperature reading
    #[error("current temperature missing")]
    MissingTemperature,
    /// Reading is NaN or infinite
    #[error("current temperature is not finite: {0}")]
    NonFiniteTemperature(f64),
    /// Window bounds are reversed or not finite
    #[error("operating window is invalid: lower={lower}, upper={upper}")]
    InvalidWindow {
        /// Lower bound
        lower: f64,
        /// Upper bound
        upper: f64,
    },
}

/// Mutable controller memory, written only by state handlers and entry effects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlFlags {
    /// Whether the offset learner should ignore new samples
    pub offset_learning_paused: bool,
    /// Temperature the correction is steering towards
    pub learning_target: Option<f64>,
    /// Start of the most recent probe cycle
    pub last_probe_time: Option<DateTime<Utc>>,
    /// Start of the most recent calibration cycle
    pub last_calibration_time: Option<DateTime<Utc>>,
}

/// Live inputs for one control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Current room temperature
    pub current_temp: Option<f64>,
    /// Active setpoint, if known
    pub setpoint: Option<f64>,
    /// Current power draw (W)
    pub power_watts: Option<f64>,
    /// Tick time
    pub now: DateTime<Utc>,
}

impl Reading {
    /// Reading with a temperature at the current time.
    #[must_use]
    pub fn temperature(current_temp: f64) -> Self {
        Self {
            current_temp: Some(current_temp),
            setpoint: None,
            power_watts: None,
            now: Utc::now(),
        }
    }

    /// Override the tick time.
    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Attach the active setpoint.
    #[must_use]
    pub fn setpoint(mut self, setpoint: f64) -> Self {
        self.setpoint = Some(setpoint);
        self
    }

    /// Attach the power draw.
    #[must_use]
    pub fn power(mut self, watts: f64) -> Self {
        self.power_watts = Some(watts);
        self
    }
}

/// Everything a handler sees during one tick.
#[derive(Debug)]
pub struct TickContext<'a> {
    /// Current room temperature
    pub current_temp: Option<f64>,
    /// `(lower, upper)` window
    pub operating_window: (f64, f64),
    /// Active setpoint
    pub setpoint: Option<f64>,
    /// Current power draw (W)
    pub power_watts: Option<f64>,
    /// Tick time
    pub now: DateTime<Utc>,
    /// Thermal model confidence
    pub model_confidence: f64,
    /// Slowest of the model's time constants (minutes)
    pub model_tau: f64,
    /// Stability detector verdict
    pub stable: bool,
    /// Mutable controller memory
    pub flags: &'a mut ControlFlags,
}

impl TickContext<'_> {
    /// Validated `(temperature, lower, upper)`.
    ///
    /// # Errors
    ///
    /// The [`Anomaly`] describing the malformed input.
    pub fn geometry(&self) -> Result<(f64, f64, f64), Anomaly> {
        let temp = self.current_temp.ok_or(Anomaly::MissingTemperature)?;
        if !temp.is_finite() {
            return Err(Anomaly::NonFiniteTemperature(temp));
        }
        let (lower, upper) = self.operating_window;
        if !(lower.is_finite() && upper.is_finite()) || lower > upper {
            return Err(Anomaly::InvalidWindow { lower, upper });
        }
        Ok((temp, lower, upper))
    }
}
