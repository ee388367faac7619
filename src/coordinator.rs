//! Per-entity wiring of the learner, thermal model and state machine
//!
//! One [`EntityCoordinator`] per controlled AC. The host drives it with
//! [`tick`](EntityCoordinator::tick) readings and
//! [`record_observation`](EntityCoordinator::record_observation) outcomes;
//! persistence goes through
//! [`snapshot_document`](EntityCoordinator::snapshot_document) and
//! [`restore_document`](EntityCoordinator::restore_document).
//!
//! ```rust
//! use offset_engine::coordinator::EntityCoordinator;
//! use offset_engine::learning::{Conditions, Observation};
//! use offset_engine::thermal::{Reading, ThermalState};
//!
//! let mut coordinator = EntityCoordinator::builder("climate.bedroom")
//!     .operating_window(21.0, 24.0)
//!     .build()?;
//! coordinator.thermal_mut().machine_mut().set_last_probe_time(Some(chrono::Utc::now()));
//!
//! // learning is paused while drifting
//! let observation = Observation::new(0.0, 1.0, Conditions::new(22.0, 24.5, "cool"));
//! assert!(!coordinator.record_observation(observation.clone())?);
//!
//! assert_eq!(coordinator.tick(Reading::temperature(24.5)).to, ThermalState::Correcting);
//! assert!(coordinator.record_observation(observation)?);
//! # Ok::<(), offset_engine::Error>(())
//! ```

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::learning::{Conditions, Observation, OffsetLearner};
use crate::persistence::{
    apply_document, build_document, DocumentRestoreReport, PersistedDocument, ThermalDataHooks,
    ThermalSnapshot,
};
use crate::thermal::{ProbeResult, Reading, ThermalModel, ThermalStateMachine, TickOutcome};
use crate::{Error, Result};

/// Thermal model and state machine of one entity.
#[derive(Debug)]
pub struct ThermalComponents {
    model: ThermalModel,
    machine: ThermalStateMachine,
}

impl ThermalComponents {
    /// Thermal model.
    #[must_use]
    pub const fn model(&self) -> &ThermalModel {
        &self.model
    }

    /// Mutable thermal model.
    pub fn model_mut(&mut self) -> &mut ThermalModel {
        &mut self.model
    }

    /// State machine.
    #[must_use]
    pub const fn machine(&self) -> &ThermalStateMachine {
        &self.machine
    }

    /// Mutable state machine.
    pub fn machine_mut(&mut self) -> &mut ThermalStateMachine {
        &mut self.machine
    }
}

impl ThermalDataHooks for ThermalComponents {
    fn get_thermal_data(&self) -> anyhow::Result<Option<Value>> {
        let snapshot = ThermalSnapshot::capture(&self.model, &self.machine);
        Ok(Some(serde_json::to_value(snapshot)?))
    }

    fn restore_thermal_data(&mut self, data: &Value) -> anyhow::Result<()> {
        if data.is_null() {
            return Ok(());
        }
        let snapshot = ThermalSnapshot::from_value(data)?;
        snapshot.apply(&mut self.model, &mut self.machine);
        Ok(())
    }
}

/// Everything the engine knows about one controlled entity.
#[derive(Debug)]
pub struct EntityCoordinator {
    entity_id: String,
    enable_learning: bool,
    learner: OffsetLearner,
    thermal: ThermalComponents,
    carried_fields: Map<String, Value>,
}

impl EntityCoordinator {
    /// Start building a coordinator for `entity_id`.
    #[must_use]
    pub fn builder(entity_id: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            entity_id: entity_id.into(),
            config: EngineConfig::default(),
            operating_window: None,
            enable_learning: true,
        }
    }

    /// Entity this coordinator serves.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Whether learning is enabled.
    #[must_use]
    pub const fn learning_enabled(&self) -> bool {
        self.enable_learning
    }

    /// Turn learning on or off.
    pub fn set_learning_enabled(&mut self, enabled: bool) {
        if self.enable_learning != enabled {
            info!(entity_id = %self.entity_id, enabled, "Offset learning toggled");
        }
        self.enable_learning = enabled;
    }

    /// Offset learner.
    #[must_use]
    pub const fn learner(&self) -> &OffsetLearner {
        &self.learner
    }

    /// Mutable offset learner.
    pub fn learner_mut(&mut self) -> &mut OffsetLearner {
        &mut self.learner
    }

    /// Thermal components.
    #[must_use]
    pub const fn thermal(&self) -> &ThermalComponents {
        &self.thermal
    }

    /// Mutable thermal components.
    pub fn thermal_mut(&mut self) -> &mut ThermalComponents {
        &mut self.thermal
    }

    /// Run one control tick against the current thermal model.
    pub fn tick(&mut self, reading: Reading) -> TickOutcome {
        let ThermalComponents { model, machine } = &mut self.thermal;
        machine.execute(model, reading)
    }

    /// Feed an observed outcome to the learner unless learning is disabled
    /// or the state machine has paused it. Returns whether it was recorded.
    ///
    /// # Errors
    ///
    /// Whatever [`OffsetLearner::add_sample`] rejects.
    pub fn record_observation(&mut self, observation: Observation) -> Result<bool> {
        if !self.enable_learning {
            debug!(entity_id = %self.entity_id, "Learning disabled, observation ignored");
            return Ok(false);
        }
        if self.thermal.machine.offset_learning_paused() {
            debug!(
                entity_id = %self.entity_id,
                state = %self.thermal.machine.state(),
                "Learning paused, observation ignored"
            );
            return Ok(false);
        }
        self.learner.add_sample(observation)?;
        Ok(true)
    }

    /// Offset to apply for the given conditions.
    #[must_use]
    pub fn recommend_offset(&self, conditions: &Conditions) -> f64 {
        self.learner.predict(conditions)
    }

    /// Record a fitted probe and return the updated tau.
    pub fn complete_probe(&mut self, probe: ProbeResult, is_cooling: bool) -> f64 {
        self.thermal.model.update_tau(probe, is_cooling)
    }

    /// Current state as a persisted document.
    #[must_use]
    pub fn snapshot_document(&self) -> PersistedDocument {
        build_document(
            &self.entity_id,
            self.enable_learning,
            Some(&self.learner),
            Some(&self.thermal),
            self.carried_fields.clone(),
        )
    }

    /// Restore from a decoded document.
    ///
    /// Unknown top-level fields are remembered and written back on the next
    /// snapshot.
    ///
    /// # Errors
    ///
    /// `EntityMismatch` when the document belongs to another entity. Learner
    /// and thermal rejections are reported, not returned.
    pub fn restore_document(&mut self, document: &PersistedDocument) -> Result<DocumentRestoreReport> {
        if document.entity_id != self.entity_id {
            return Err(Error::EntityMismatch {
                expected: self.entity_id.clone(),
                found: document.entity_id.clone(),
            });
        }
        let report = apply_document(document, &mut self.learner, Some(&mut self.thermal));
        self.enable_learning = report.enable_learning;
        self.carried_fields = document.extra.clone();
        info!(
            entity_id = %self.entity_id,
            samples = self.learner.sample_count(),
            state = %self.thermal.machine.state(),
            "Restored entity state"
        );
        Ok(report)
    }
}

/// Builder for [`EntityCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorBuilder {
    entity_id: String,
    config: EngineConfig,
    operating_window: Option<(f64, f64)>,
    enable_learning: bool,
}

impl CoordinatorBuilder {
    /// Engine configuration (defaults otherwise).
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Comfort window `(lower, upper)`. Required.
    #[must_use]
    pub fn operating_window(mut self, lower: f64, upper: f64) -> Self {
        self.operating_window = Some((lower, upper));
        self
    }

    /// Initial learning switch (default on).
    #[must_use]
    pub fn enable_learning(mut self, enabled: bool) -> Self {
        self.enable_learning = enabled;
        self
    }

    /// Build the coordinator.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a missing or invalid window, otherwise any
    /// configuration validation error.
    pub fn build(self) -> Result<EntityCoordinator> {
        let (lower, upper) = self
            .operating_window
            .ok_or_else(|| Error::InvalidConfig("operating window not set".to_string()))?;
        if !(lower.is_finite() && upper.is_finite()) || lower >= upper {
            return Err(Error::InvalidConfig(format!(
                "operating window must satisfy lower < upper, got ({lower}, {upper})"
            )));
        }
        self.config.validate()?;

        Ok(EntityCoordinator {
            learner: OffsetLearner::new(self.config.learner)?,
            thermal: ThermalComponents {
                model: ThermalModel::new(self.config.thermal)?,
                machine: ThermalStateMachine::new(self.config.state_machine, (lower, upper))?,
            },
            entity_id: self.entity_id,
            enable_learning: self.enable_learning,
            carried_fields: Map::new(),
        })
    }
}
