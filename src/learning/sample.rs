//! Sample, query-condition and observation types

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Hysteresis labels reported by the host's hysteresis detector.
pub mod hysteresis {
    /// Thresholds are still being learned
    pub const LEARNING: &str = "learning_hysteresis";
    /// Compressor is running
    pub const ACTIVE_PHASE: &str = "active_phase";
    /// Idle, room above the learned start threshold
    pub const IDLE_ABOVE_START: &str = "idle_above_start_threshold";
    /// Idle, room below the learned stop threshold
    pub const IDLE_BELOW_STOP: &str = "idle_below_stop_threshold";
    /// Idle between the two thresholds
    pub const IDLE_STABLE_ZONE: &str = "idle_stable_zone";
    /// No power sensor configured
    pub const NO_POWER_SENSOR: &str = "no_power_sensor";
}

/// Accepted layouts for timestamps without a UTC offset.
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn default_hysteresis_state() -> String {
    hysteresis::NO_POWER_SENSOR.to_string()
}

/// One observed outcome ("enhanced sample").
///
/// Immutable once appended to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Offset the engine predicted
    pub predicted: f64,
    /// Offset that turned out to be correct
    pub actual: f64,
    /// Temperature reported by the AC's internal sensor
    pub ac_temp: f64,
    /// Temperature reported by the room sensor
    pub room_temp: f64,
    /// Outdoor temperature, if a sensor exists
    #[serde(default)]
    pub outdoor_temp: Option<f64>,
    /// HVAC mode label
    pub mode: String,
    /// Power draw in watts, if a sensor exists
    #[serde(default)]
    pub power: Option<f64>,
    /// Hysteresis label at observation time
    #[serde(default = "default_hysteresis_state")]
    pub hysteresis_state: String,
    /// Indoor relative humidity
    #[serde(default)]
    pub indoor_humidity: Option<f64>,
    /// Outdoor relative humidity
    #[serde(default)]
    pub outdoor_humidity: Option<f64>,
    /// ISO 8601 timestamp, RFC 3339 when written by this crate
    pub timestamp: String,
}

impl Sample {
    /// Hour-of-day recorded in the timestamp.
    ///
    /// Offset-qualified timestamps report the hour in their own offset;
    /// naive ones (no offset) are read as wall-clock time. `None` when the
    /// timestamp cannot be parsed.
    #[must_use]
    pub fn hour(&self) -> Option<u32> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(ts.hour());
        }
        NAIVE_TIMESTAMP_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(&self.timestamp, format).ok())
            .map(|ts| ts.hour())
    }

    /// Absolute prediction error.
    #[must_use]
    pub fn error(&self) -> f64 {
        (self.predicted - self.actual).abs()
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.predicted.is_finite()
            && self.actual.is_finite()
            && self.ac_temp.is_finite()
            && self.room_temp.is_finite()
            && self.outdoor_temp.map_or(true, f64::is_finite)
            && self.power.map_or(true, f64::is_finite)
    }
}

/// The environment a prediction is asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditions {
    /// AC internal sensor temperature
    pub ac_temp: f64,
    /// Room sensor temperature
    pub room_temp: f64,
    /// Outdoor temperature
    pub outdoor_temp: Option<f64>,
    /// HVAC mode label
    pub mode: String,
    /// Power draw in watts
    pub power: Option<f64>,
    /// Hysteresis label; `no_power_sensor` when absent
    pub hysteresis_state: Option<String>,
}

impl Conditions {
    /// Conditions with only the required fields set.
    #[must_use]
    pub fn new(ac_temp: f64, room_temp: f64, mode: impl Into<String>) -> Self {
        Self {
            ac_temp,
            room_temp,
            outdoor_temp: None,
            mode: mode.into(),
            power: None,
            hysteresis_state: None,
        }
    }

    /// Set the outdoor temperature.
    #[must_use]
    pub fn outdoor(mut self, temp: f64) -> Self {
        self.outdoor_temp = Some(temp);
        self
    }

    /// Set the power draw.
    #[must_use]
    pub fn power(mut self, watts: f64) -> Self {
        self.power = Some(watts);
        self
    }

    /// Set the hysteresis label.
    #[must_use]
    pub fn hysteresis(mut self, state: impl Into<String>) -> Self {
        self.hysteresis_state = Some(state.into());
        self
    }

    /// Effective hysteresis label.
    #[must_use]
    pub fn hysteresis_label(&self) -> &str {
        self.hysteresis_state
            .as_deref()
            .unwrap_or(hysteresis::NO_POWER_SENSOR)
    }
}

/// A sample before it is accepted into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Offset the engine predicted
    pub predicted: f64,
    /// Offset that turned out to be correct
    pub actual: f64,
    /// Environment at observation time
    pub conditions: Conditions,
    /// Indoor relative humidity
    pub indoor_humidity: Option<f64>,
    /// Outdoor relative humidity
    pub outdoor_humidity: Option<f64>,
    /// Observation time
    pub timestamp: DateTime<FixedOffset>,
    hour: Option<u32>,
}

impl Observation {
    /// New observation stamped with the local time.
    #[must_use]
    pub fn new(predicted: f64, actual: f64, conditions: Conditions) -> Self {
        Self {
            predicted,
            actual,
            conditions,
            indoor_humidity: None,
            outdoor_humidity: None,
            timestamp: Local::now().fixed_offset(),
            hour: None,
        }
    }

    /// Override the timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Pin the hour-of-day; validated when the sample is added.
    #[must_use]
    pub fn at_hour(mut self, hour: u32) -> Self {
        self.hour = Some(hour);
        self
    }

    /// Attach humidity readings.
    #[must_use]
    pub fn humidity(mut self, indoor: Option<f64>, outdoor: Option<f64>) -> Self {
        self.indoor_humidity = indoor;
        self.outdoor_humidity = outdoor;
        self
    }

    /// Convert into a stored sample.
    ///
    /// # Errors
    ///
    /// `InvalidHour` when a pinned hour is outside `0..=23`.
    pub fn into_sample(self) -> Result<Sample> {
        let timestamp = match self.hour {
            Some(hour) if hour > 23 => return Err(Error::InvalidHour(hour)),
            Some(hour) => self
                .timestamp
                .with_hour(hour)
                .ok_or(Error::InvalidHour(hour))?,
            None => self.timestamp,
        };
        let conditions = self.conditions;
        let hysteresis_state = conditions.hysteresis_label().to_string();
        Ok(Sample {
            predicted: self.predicted,
            actual: self.actual,
            ac_temp: conditions.ac_temp,
            room_temp: conditions.room_temp,
            outdoor_temp: conditions.outdoor_temp,
            mode: conditions.mode,
            power: conditions.power,
            hysteresis_state,
            indoor_humidity: self.indoor_humidity,
            outdoor_humidity: self.outdoor_humidity,
            timestamp: timestamp.to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_hour_is_stored() {
        let sample = Observation::new(0.5, 1.0, Conditions::new(24.0, 23.0, "cool"))
            .at_hour(14)
            .into_sample()
            .unwrap();
        assert_eq!(sample.hour(), Some(14));
        assert_eq!(sample.hysteresis_state, hysteresis::NO_POWER_SENSOR);
    }

    #[test]
    fn test_hour_out_of_range() {
        let result = Observation::new(0.0, 0.0, Conditions::new(24.0, 23.0, "cool"))
            .at_hour(24)
            .into_sample();
        assert!(matches!(result, Err(Error::InvalidHour(24))));
    }

    #[test]
    fn test_sample_defaults_when_fields_absent() {
        let json = r#"{"predicted":0.1,"actual":0.2,"ac_temp":22.0,"room_temp":23.0,
                       "mode":"cool","timestamp":"2025-06-01T10:00:00+00:00"}"#;
        let sample: Sample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.outdoor_temp, None);
        assert_eq!(sample.indoor_humidity, None);
        assert_eq!(sample.hysteresis_state, hysteresis::NO_POWER_SENSOR);
        assert_eq!(sample.hour(), Some(10));
    }

    #[test]
    fn test_hour_from_naive_timestamp() {
        let mut sample = Observation::new(0.0, 0.5, Conditions::new(24.0, 23.0, "cool"))
            .into_sample()
            .unwrap();

        sample.timestamp = "2025-06-01T10:00:00.123456".to_string();
        assert_eq!(sample.hour(), Some(10));
        sample.timestamp = "2025-06-01T21:15:00".to_string();
        assert_eq!(sample.hour(), Some(21));
        sample.timestamp = "2025-06-01 07:30:00".to_string();
        assert_eq!(sample.hour(), Some(7));
        // offset-qualified timestamps keep their own hour
        sample.timestamp = "2025-06-01T23:30:00-04:00".to_string();
        assert_eq!(sample.hour(), Some(23));

        sample.timestamp = "2025-06-01".to_string();
        assert_eq!(sample.hour(), None);
    }
}
