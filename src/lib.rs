//! # Offset Engine: Adaptive AC Offset Learning
//!
//! Many air conditioners regulate against an internal sensor that reads
//! differently from the room. The engine learns the correction ("offset")
//! from observed outcomes and models the room's passive thermal response so
//! the controller knows when to correct, drift, probe or calibrate.
//!
//! ## Components
//!
//! ```text
//! ┌──────────────────── EntityCoordinator ────────────────────┐
//! │                                                           │
//! │  OffsetLearner ◄── observations (when not paused)         │
//! │    └── SampleStore: samples + hour / outdoor / power      │
//! │                                                           │
//! │  ThermalModel ◄── probe results (tau, confidence)         │
//! │  ThermalStateMachine ── DRIFTING / CORRECTING /           │
//! │                         PROBING / CALIBRATING             │
//! └───────────────┬───────────────────────────────────────────┘
//!                 │ PersistedDocument (2.1)
//!                 ▼
//!         PersistenceManager ──> StorageBackend (memory / file)
//! ```
//!
//! Prediction and update calls are synchronous and allocation-light; only
//! persistence is async.
//!
//! ## Example
//!
//! ```rust
//! use offset_engine::config::LearnerConfig;
//! use offset_engine::learning::{Conditions, Observation, OffsetLearner};
//!
//! let mut learner = OffsetLearner::new(LearnerConfig::default())?;
//! let conditions = Conditions::new(22.0, 24.0, "cool").outdoor(30.0).power(1200.0);
//! learner.add_sample(Observation::new(0.5, 1.2, conditions.clone()))?;
//!
//! let offset = learner.predict(&conditions);
//! assert!((offset - 1.2).abs() < 1e-9);
//! # Ok::<(), offset_engine::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod learning;
pub mod persistence;
pub mod telemetry;
pub mod thermal;

pub use coordinator::{CoordinatorBuilder, EntityCoordinator, ThermalComponents};
pub use error::{Error, Result};
