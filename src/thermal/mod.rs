//! Passive thermal response and the drift/correct state machine
//!
//! ```text
//! ThermalModel ──owns── ProbeHistory (≤ 75 probes, FIFO)
//!      │
//!      └── confidence ──> ThermalStateMachine ──> offset_learning_paused,
//!                                                 learning_target
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use offset_engine::config::{StateMachineConfig, ThermalConfig};
//! use offset_engine::thermal::{Reading, ThermalModel, ThermalState, ThermalStateMachine};
//!
//! let model = ThermalModel::new(ThermalConfig::default())?;
//! let mut machine = ThermalStateMachine::new(StateMachineConfig::default(), (21.0, 24.0))?;
//! machine.set_last_probe_time(Some(chrono::Utc::now()));
//!
//! let outcome = machine.execute(&model, Reading::temperature(24.0));
//! assert_eq!(outcome.to, ThermalState::Correcting);
//! assert!(!machine.offset_learning_paused());
//! # Ok::<(), offset_engine::Error>(())
//! ```

mod cycle;
mod machine;
mod model;
mod probe;
mod stability;
mod state;

pub use cycle::{plan_probe_duration, MeasurementCycle, SLOW_RESPONSE_TAU};
pub use machine::{
    CalibratingHandler, CorrectingHandler, DriftingHandler, FinishedProbe, ProbingHandler,
    StateHandler, ThermalStateMachine, TickOutcome,
};
pub use model::{clamp_tau, ThermalModel, TAU_MAX_CLAMP, TAU_MIN_CLAMP};
pub use probe::{ProbeHistory, ProbeResult, MAX_PROBE_HISTORY_SIZE};
pub use stability::StabilityDetector;
pub use state::{Anomaly, ControlFlags, Reading, ThermalState, TickContext};
