//! Thermal State Machine - DRIFTING / CORRECTING / PROBING / CALIBRATING
//!
//! ## Transition Table
//!
//! | State | Condition (first match wins) | Next |
//! |-------|------------------------------|------|
//! | DRIFTING | steady conditions and calibration due | CALIBRATING |
//! | DRIFTING | model confidence < threshold and probe interval elapsed | PROBING |
//! | DRIFTING | `T >= U` or `T <= L` | CORRECTING |
//! | CORRECTING | `L + b <= T <= U - b` | DRIFTING |
//! | PROBING | cycle complete, steady conditions, or `T` outside window | DRIFTING |
//! | CALIBRATING | cycle complete or `T` outside window | DRIFTING |
//!
//! The inner buffer `b` keeps the controller from chattering between
//! DRIFTING and CORRECTING at the window edge.
//!
//! Entry effects are applied here at transition time: DRIFTING, PROBING and
//! CALIBRATING pause offset learning, CORRECTING resumes it. Handler
//! `on_enter`/`on_exit` hooks only observe.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cycle::{plan_probe_duration, MeasurementCycle};
use super::model::ThermalModel;
use super::stability::StabilityDetector;
use super::state::{Anomaly, ControlFlags, Reading, ThermalState, TickContext};
use crate::config::{ProbeCycleConfig, StateMachineConfig};
use crate::Result;

/// Behaviour of one state.
pub trait StateHandler: Send {
    /// Decide the next state; `Ok(None)` stays, `Err` reports an anomaly and stays.
    ///
    /// # Errors
    ///
    /// The [`Anomaly`] found in the tick input.
    fn execute(&mut self, ctx: &mut TickContext<'_>) -> std::result::Result<Option<ThermalState>, Anomaly>;

    /// Observation hook called after entering the state.
    fn on_enter(&mut self, _ctx: &TickContext<'_>) {}

    /// Observation hook called before leaving the state.
    fn on_exit(&mut self, _ctx: &TickContext<'_>) {}
}

/// Passive drift inside the window.
#[derive(Debug, Clone)]
pub struct DriftingHandler {
    probe_confidence_threshold: f64,
    min_probe_interval: Duration,
    min_calibration_interval: Duration,
}

impl DriftingHandler {
    fn interval_elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
        last.map_or(true, |at| {
            chrono::Duration::from_std(interval).is_ok_and(|interval| now - at >= interval)
        })
    }
}

impl StateHandler for DriftingHandler {
    fn execute(&mut self, ctx: &mut TickContext<'_>) -> std::result::Result<Option<ThermalState>, Anomaly> {
        let (temp, lower, upper) = ctx.geometry()?;

        let calibration_due =
            Self::interval_elapsed(ctx.flags.last_calibration_time, ctx.now, self.min_calibration_interval);
        if ctx.stable && calibration_due {
            return Ok(Some(ThermalState::Calibrating));
        }

        let probe_due = Self::interval_elapsed(ctx.flags.last_probe_time, ctx.now, self.min_probe_interval);
        if ctx.model_confidence < self.probe_confidence_threshold && probe_due {
            return Ok(Some(ThermalState::Probing));
        }

        if temp >= upper || temp <= lower {
            return Ok(Some(ThermalState::Correcting));
        }
        Ok(None)
    }

    fn on_enter(&mut self, ctx: &TickContext<'_>) {
        debug!(window = ?ctx.operating_window, "Drifting: AC idle, passive drift tolerated");
    }
}

/// Active correction back into the window.
#[derive(Debug, Clone)]
pub struct CorrectingHandler {
    buffer: f64,
}

impl StateHandler for CorrectingHandler {
    fn execute(&mut self, ctx: &mut TickContext<'_>) -> std::result::Result<Option<ThermalState>, Anomaly> {
        let (temp, lower, upper) = ctx.geometry()?;

        let target = if temp > upper {
            upper
        } else if temp < lower {
            lower
        } else {
            ctx.setpoint.unwrap_or((lower + upper) / 2.0)
        };
        ctx.flags.learning_target = Some(target);

        if temp >= lower + self.buffer && temp <= upper - self.buffer {
            return Ok(Some(ThermalState::Drifting));
        }
        Ok(None)
    }

    fn on_enter(&mut self, ctx: &TickContext<'_>) {
        debug!(temp = ?ctx.current_temp, window = ?ctx.operating_window, "Correcting: steering back into window");
    }
}

/// Passive measurement cycle for tau estimation.
#[derive(Debug, Clone)]
pub struct ProbingHandler {
    cycle_config: ProbeCycleConfig,
    cycle: MeasurementCycle,
    completed: Option<FinishedProbe>,
}

/// A probe cycle that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FinishedProbe {
    /// Cycle start
    pub started_at: DateTime<Utc>,
    /// Cycle end
    pub ended_at: DateTime<Utc>,
}

impl StateHandler for ProbingHandler {
    fn execute(&mut self, ctx: &mut TickContext<'_>) -> std::result::Result<Option<ThermalState>, Anomaly> {
        let (temp, lower, upper) = ctx.geometry()?;

        if !self.cycle.is_running() {
            let duration = plan_probe_duration(&self.cycle_config, ctx.power_watts, ctx.model_tau);
            self.cycle.start(ctx.now, duration);
            ctx.flags.last_probe_time = Some(ctx.now);
            info!(minutes = duration.as_secs() / 60, "Probe cycle started");
            return Ok(None);
        }

        if temp > upper || temp < lower {
            self.cycle.cancel();
            info!(temp, "Probe cycle cancelled: temperature left the operating window");
            return Ok(Some(ThermalState::Drifting));
        }
        if ctx.stable {
            self.cycle.cancel();
            info!("Probe cycle cancelled early: conditions stable");
            return Ok(Some(ThermalState::Drifting));
        }
        if self.cycle.is_complete(ctx.now) {
            if let Some(started_at) = self.cycle.cancel() {
                self.completed = Some(FinishedProbe {
                    started_at,
                    ended_at: ctx.now,
                });
            }
            info!("Probe cycle complete");
            return Ok(Some(ThermalState::Drifting));
        }
        Ok(None)
    }
}

/// Verification cycle under steady conditions.
#[derive(Debug, Clone)]
pub struct CalibratingHandler {
    duration: Duration,
    cycle: MeasurementCycle,
}

impl StateHandler for CalibratingHandler {
    fn execute(&mut self, ctx: &mut TickContext<'_>) -> std::result::Result<Option<ThermalState>, Anomaly> {
        let (temp, lower, upper) = ctx.geometry()?;

        if !self.cycle.is_running() {
            self.cycle.start(ctx.now, self.duration);
            ctx.flags.last_calibration_time = Some(ctx.now);
            info!(minutes = self.duration.as_secs() / 60, "Calibration cycle started");
            return Ok(None);
        }

        if temp > upper || temp < lower {
            self.cycle.cancel();
            info!(temp, "Calibration cancelled: temperature left the operating window");
            return Ok(Some(ThermalState::Drifting));
        }
        if self.cycle.is_complete(ctx.now) {
            self.cycle.cancel();
            info!("Calibration cycle complete");
            return Ok(Some(ThermalState::Drifting));
        }
        Ok(None)
    }
}

/// Result of one [`ThermalStateMachine::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    /// State before the tick
    pub from: ThermalState,
    /// State after the tick
    pub to: ThermalState,
    /// Malformed input reported by the handler
    pub anomaly: Option<Anomaly>,
}

impl TickOutcome {
    /// Whether the tick changed state.
    #[must_use]
    pub fn transitioned(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone)]
struct Handlers {
    drifting: DriftingHandler,
    correcting: CorrectingHandler,
    probing: ProbingHandler,
    calibrating: CalibratingHandler,
}

impl Handlers {
    fn get_mut(&mut self, state: ThermalState) -> &mut dyn StateHandler {
        match state {
            ThermalState::Drifting => &mut self.drifting,
            ThermalState::Correcting => &mut self.correcting,
            ThermalState::Probing => &mut self.probing,
            ThermalState::Calibrating => &mut self.calibrating,
        }
    }
}

/// Hysteresis-protected controller deciding between passive drift and
/// active correction.
#[derive(Debug, Clone)]
pub struct ThermalStateMachine {
    state: ThermalState,
    operating_window: (f64, f64),
    flags: ControlFlags,
    stability: StabilityDetector,
    handlers: Handlers,
}

impl ThermalStateMachine {
    /// Machine in DRIFTING with learning paused.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the configuration is out of range.
    pub fn new(config: StateMachineConfig, operating_window: (f64, f64)) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: ThermalState::Drifting,
            operating_window,
            flags: ControlFlags {
                offset_learning_paused: true,
                ..ControlFlags::default()
            },
            stability: StabilityDetector::new(config.stability.clone()),
            handlers: Handlers {
                drifting: DriftingHandler {
                    probe_confidence_threshold: config.probe_confidence_threshold,
                    min_probe_interval: config.min_probe_interval,
                    min_calibration_interval: config.min_calibration_interval,
                },
                correcting: CorrectingHandler {
                    buffer: config.hysteresis_buffer,
                },
                probing: ProbingHandler {
                    cycle_config: config.probe_cycle.clone(),
                    cycle: MeasurementCycle::new(),
                    completed: None,
                },
                calibrating: CalibratingHandler {
                    duration: config.calibration_duration,
                    cycle: MeasurementCycle::new(),
                },
            },
        })
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ThermalState {
        self.state
    }

    /// `(lower, upper)` window.
    #[must_use]
    pub const fn operating_window(&self) -> (f64, f64) {
        self.operating_window
    }

    /// Replace the window. Inverted windows are reported at the next tick.
    pub fn set_operating_window(&mut self, lower: f64, upper: f64) {
        self.operating_window = (lower, upper);
    }

    /// Whether the offset learner should ignore new samples.
    #[must_use]
    pub const fn offset_learning_paused(&self) -> bool {
        self.flags.offset_learning_paused
    }

    /// Temperature the correction is steering towards.
    #[must_use]
    pub const fn learning_target(&self) -> Option<f64> {
        self.flags.learning_target
    }

    /// Controller memory.
    #[must_use]
    pub const fn flags(&self) -> &ControlFlags {
        &self.flags
    }

    /// Record when a probe last ran (e.g. one driven externally).
    pub fn set_last_probe_time(&mut self, at: Option<DateTime<Utc>>) {
        self.flags.last_probe_time = at;
    }

    /// Take the most recent completed probe cycle, if any.
    pub fn take_finished_probe(&mut self) -> Option<FinishedProbe> {
        self.handlers.probing.completed.take()
    }

    /// Run one control tick.
    ///
    /// Never panics on malformed input: an inverted window or a missing
    /// temperature yields no transition and an `anomaly` in the outcome.
    pub fn execute(&mut self, model: &ThermalModel, reading: Reading) -> TickOutcome {
        if let Some(temp) = reading.current_temp {
            self.stability.observe(temp, reading.now);
        }
        let stable = self.stability.is_stable(reading.now);
        let from = self.state;

        let mut ctx = TickContext {
            current_temp: reading.current_temp,
            operating_window: self.operating_window,
            setpoint: reading.setpoint,
            power_watts: reading.power_watts,
            now: reading.now,
            model_confidence: model.get_confidence(),
            model_tau: model.tau_cooling().max(model.tau_warming()),
            stable,
            flags: &mut self.flags,
        };

        let result = self.handlers.get_mut(from).execute(&mut ctx);

        match result {
            Ok(Some(next)) if next != from => {
                self.handlers.get_mut(from).on_exit(&ctx);
                apply_entry_effects(next, ctx.flags);
                self.handlers.get_mut(next).on_enter(&ctx);
                self.state = next;
                info!(from = %from, to = %next, "Thermal state transition");
                TickOutcome {
                    from,
                    to: next,
                    anomaly: None,
                }
            }
            Ok(_) => TickOutcome {
                from,
                to: from,
                anomaly: None,
            },
            Err(anomaly) => {
                warn!(state = %from, %anomaly, "Skipping tick: malformed input");
                TickOutcome {
                    from,
                    to: from,
                    anomaly: Some(anomaly),
                }
            }
        }
    }

    /// Restore state and memory (persistence restore). Running cycles are cleared.
    pub(crate) fn restore(&mut self, state: ThermalState, operating_window: (f64, f64), flags: ControlFlags) {
        self.state = state;
        self.operating_window = operating_window;
        self.flags = flags;
        self.handlers.probing.cycle.cancel();
        self.handlers.calibrating.cycle.cancel();
        self.stability.reset();
        if matches!(state, ThermalState::Probing | ThermalState::Calibrating) {
            // cycles do not survive a restart
            self.state = ThermalState::Drifting;
            apply_entry_effects(ThermalState::Drifting, &mut self.flags);
        }
    }
}

fn apply_entry_effects(state: ThermalState, flags: &mut ControlFlags) {
    flags.offset_learning_paused = !matches!(state, ThermalState::Correcting);
}
