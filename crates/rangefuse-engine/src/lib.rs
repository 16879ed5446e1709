//! `rangefuse-engine` – the position-fusion core.
//!
//! Turns asynchronous range reports from three fixed sensors into a
//! windowed-average 3-D position with an outlier-robust error radius.
//! Nothing in this crate performs I/O or reads a clock; the runtime crate
//! owns timers, transports, and side-channel logging.
//!
//! # Modules
//!
//! - [`trilateration`] – [`compute_instant`][trilateration::compute_instant]:
//!   converts one offset-corrected distance triple into a [`Coordinate`]
//!   or a [`Rejection`][trilateration::Rejection].
//! - [`estimator`] – [`StabilityHistory`][estimator::StabilityHistory] and
//!   [`estimate_error`][estimator::estimate_error]: bounded FIFO of recent
//!   points and the single-outlier mean-absolute-deviation statistic.
//! - [`readiness`] – [`ReadinessTracker`][readiness::ReadinessTracker]:
//!   latest distance per sensor plus the set of sensors heard from since the
//!   last calculation attempt.
//! - [`aggregator`] – [`PeriodicHistory`][aggregator::PeriodicHistory]:
//!   points collected during one tick interval and the averaging flush.
//! - [`engine`] – [`FusionEngine`][engine::FusionEngine]: owns all of the
//!   above behind two mutators, `ingest` and `tick`.
//!
//! [`Coordinate`]: rangefuse_types::Coordinate

pub mod aggregator;
pub mod engine;
pub mod estimator;
pub mod readiness;
pub mod trilateration;

pub use aggregator::{PeriodicHistory, TickReport};
pub use engine::{EngineConfig, EngineSnapshot, FusionEngine, IngestOutcome};
pub use estimator::{StabilityHistory, estimate_error};
pub use readiness::{Readiness, ReadinessTracker};
pub use trilateration::{AnchorGeometry, Rejection, Z_SQUARED_TOLERANCE, compute_instant};
