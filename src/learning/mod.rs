//! Adaptive offset learning
//!
//! Learns the correction between the AC's internal sensor and the room from
//! observed outcomes, and predicts the offset for new conditions.
//!
//! ## Layout
//!
//! ```text
//! OffsetLearner ──owns── SampleStore ──┬── raw samples (bounded, FIFO)
//!                                      ├── hour-of-day table
//!                                      ├── outdoor-temperature correlation
//!                                      └── power-state averages
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use offset_engine::config::LearnerConfig;
//! use offset_engine::learning::{Conditions, Observation, OffsetLearner};
//!
//! let mut learner = OffsetLearner::new(LearnerConfig::default())?;
//! let conditions = Conditions::new(21.5, 23.0, "cool").outdoor(31.0);
//!
//! for _ in 0..30 {
//!     learner.add_sample(Observation::new(1.5, 1.5, conditions.clone()))?;
//! }
//!
//! let offset = learner.predict(&conditions);
//! assert!((offset - 1.5).abs() < 0.1);
//! # Ok::<(), offset_engine::Error>(())
//! ```

mod learner;
mod sample;
pub mod similarity;
mod store;

pub use learner::{
    LearningStats, OffsetLearner, OffsetPrediction, POWER_STATE_WEIGHT, TEMPERATURE_WEIGHT,
    TIME_PATTERN_WEIGHT,
};
pub use sample::{hysteresis, Conditions, Observation, Sample};
pub use store::{
    PowerStatePattern, RebuildReport, SampleStore, TemperatureCorrelation, HOURS_PER_DAY,
};
