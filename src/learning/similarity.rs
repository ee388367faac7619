//! Per-factor similarity between a stored sample and a query

use super::{Conditions, Sample};

/// Window over which AC/room temperature similarity falls to zero (°C).
pub const INDOOR_TEMP_WINDOW: f64 = 5.0;
/// Window over which outdoor temperature similarity falls to zero (°C).
pub const OUTDOOR_TEMP_WINDOW: f64 = 10.0;
/// Window over which power similarity falls to zero (W).
pub const POWER_WINDOW: f64 = 500.0;
/// Similarity for a different HVAC mode.
pub const MODE_MISMATCH: f64 = 0.3;
/// Similarity for a different hysteresis label.
pub const HYSTERESIS_MISMATCH: f64 = 0.2;
/// Floor applied to each factor before combining.
pub const FACTOR_FLOOR: f64 = 0.01;

/// Linear decay `max(0, 1 - |delta| / window)`.
#[must_use]
pub fn linear_closeness(a: f64, b: f64, window: f64) -> f64 {
    (1.0 - (a - b).abs() / window).max(0.0)
}

/// Combined similarity in `(0, 1]`.
///
/// Geometric mean of the floored factors. The hysteresis factor appears
/// twice so that hysteresis agreement weighs double.
#[must_use]
pub fn similarity(sample: &Sample, query: &Conditions) -> f64 {
    let mut factors = [0.0_f64; 7];
    let mut n = 0;
    let mut push = |value: f64| {
        factors[n] = value;
        n += 1;
    };

    push(linear_closeness(sample.ac_temp, query.ac_temp, INDOOR_TEMP_WINDOW));
    push(linear_closeness(sample.room_temp, query.room_temp, INDOOR_TEMP_WINDOW));
    if let (Some(a), Some(b)) = (sample.outdoor_temp, query.outdoor_temp) {
        push(linear_closeness(a, b, OUTDOOR_TEMP_WINDOW));
    }
    push(if sample.mode == query.mode { 1.0 } else { MODE_MISMATCH });
    if let (Some(a), Some(b)) = (sample.power, query.power) {
        push(linear_closeness(a, b, POWER_WINDOW));
    }
    let hysteresis = if sample.hysteresis_state == query.hysteresis_label() {
        1.0
    } else {
        HYSTERESIS_MISMATCH
    };
    push(hysteresis);
    push(hysteresis);

    geometric_mean(&factors[..n])
}

fn geometric_mean(factors: &[f64]) -> f64 {
    if factors.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = factors.len() as f64;
    let log_sum: f64 = factors.iter().map(|f| f.max(FACTOR_FLOOR).ln()).sum();
    (log_sum / n).exp()
}
