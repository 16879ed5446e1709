//! [`FusionEngine`] – single owner of all mutable fusion state.
//!
//! The engine holds the latest distances, the ready set, the stability
//! history and the periodic history as one unit, and exposes exactly two
//! mutators:
//!
//! - [`FusionEngine::ingest`] – called for every inbound distance report.
//!   Completing a triple triggers one trilateration attempt; accepted points
//!   are pushed into both histories.
//! - [`FusionEngine::tick`] – called once per aggregation interval.  Averages
//!   the periodic history, attaches the error radius, and clears it.
//!
//! Callers must serialise the two (the runtime does so by owning the engine
//! inside a single task).  Neither method blocks or performs I/O; results are
//! returned so the caller can publish or log them afterwards.
//!
//! # Example
//!
//! ```rust
//! use rangefuse_engine::{AnchorGeometry, EngineConfig, FusionEngine, IngestOutcome};
//! use rangefuse_types::SensorReading;
//!
//! let config = EngineConfig {
//!     anchors: AnchorGeometry { a: 100.0, c: 50.0, b: 100.0 },
//!     history_size: 5,
//!     distance_offset: 30.0,
//! };
//! let mut engine = FusionEngine::new(config).unwrap();
//!
//! engine.ingest(SensorReading::new(1, 90.0).unwrap());
//! engine.ingest(SensorReading::new(2, 80.0).unwrap());
//! let outcome = engine.ingest(SensorReading::new(3, 100.0).unwrap());
//! assert!(matches!(outcome, IngestOutcome::Accepted { .. }));
//!
//! let report = engine.tick();
//! assert_eq!(report.result.x, 61.5);
//! assert_eq!(report.result.r, 30.0); // stability window not yet full
//! ```

use rangefuse_types::{Coordinate, FuseError, SensorId, SensorReading};
use tracing::{debug, error, warn};

use crate::aggregator::{PeriodicHistory, TickReport};
use crate::estimator::StabilityHistory;
use crate::readiness::{Readiness, ReadinessTracker};
use crate::trilateration::{Rejection, compute_instant};

pub use crate::trilateration::AnchorGeometry;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Immutable engine parameters, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub anchors: AnchorGeometry,
    /// Capacity `H` of the stability history.
    pub history_size: usize,
    /// Added to every raw distance, and to the error estimate on emission.
    pub distance_offset: f64,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), FuseError> {
        self.anchors.validate()?;
        if self.history_size == 0 {
            return Err(FuseError::InvalidConfig(
                "history_size must be at least 1".to_string(),
            ));
        }
        if !self.distance_offset.is_finite() {
            return Err(FuseError::InvalidConfig(format!(
                "distance_offset {} is not a finite number",
                self.distance_offset
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            anchors: AnchorGeometry { a: 100.0, c: 50.0, b: 100.0 },
            history_size: 5,
            distance_offset: 30.0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Outcomes
// ────────────────────────────────────────────────────────────────────────────

/// What a single [`FusionEngine::ingest`] call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// Reading stored; the triple is not complete yet.
    Pending { received: usize },
    /// Triple completed and produced a point, now in both histories.
    /// `raw` holds the pre-offset distances used.
    Accepted { raw: [f64; 3], coordinate: Coordinate },
    /// Triple completed but the attempt was discarded.
    Rejected { raw: Option<[f64; 3]>, reason: Rejection },
}

/// Point-in-time view of the engine's buffers, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub stability_len: usize,
    pub stability_capacity: usize,
    pub periodic_len: usize,
    pub ready: Vec<SensorId>,
}

// ────────────────────────────────────────────────────────────────────────────
// FusionEngine
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FusionEngine {
    config: EngineConfig,
    readiness: ReadinessTracker,
    stability: StabilityHistory,
    periodic: PeriodicHistory,
}

impl FusionEngine {
    /// Build an engine, refusing configurations that cannot be computed with.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::InvalidConfig`] when an anchor baseline is zero
    /// or non-finite, the history size is zero, or the offset is not finite.
    pub fn new(config: EngineConfig) -> Result<Self, FuseError> {
        config.validate()?;
        Ok(Self {
            config,
            readiness: ReadinessTracker::new(),
            stability: StabilityHistory::new(config.history_size),
            periodic: PeriodicHistory::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stability(&self) -> &StabilityHistory {
        &self.stability
    }

    /// Validate and ingest an untyped `(sensor id, distance)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::InvalidReading`] without touching any state when
    /// the id is not 1–3 or the distance is not a non-negative number.
    pub fn ingest_raw(&mut self, sensor_id: i64, distance: f64) -> Result<IngestOutcome, FuseError> {
        let reading = SensorReading::new(sensor_id, distance)?;
        Ok(self.ingest(reading))
    }

    /// Record `reading`; when it completes a triple, run one calculation
    /// attempt and re-arm for the next triple regardless of the outcome.
    pub fn ingest(&mut self, reading: SensorReading) -> IngestOutcome {
        debug!(sensor = %reading.sensor, distance = reading.distance, "distance updated");
        match self.readiness.record(reading) {
            Readiness::Pending { received } => IngestOutcome::Pending { received },
            Readiness::Complete => self.attempt_calculation(),
        }
    }

    fn attempt_calculation(&mut self) -> IngestOutcome {
        let Some(raw) = self.readiness.take_triple() else {
            error!("calculation attempted with a missing distance; skipping");
            return IngestOutcome::Rejected {
                raw: None,
                reason: Rejection::IncompleteTriple,
            };
        };
        debug!(d1 = raw[0], d2 = raw[1], d3 = raw[2], "triple complete, computing instant position");

        match compute_instant(raw, self.config.distance_offset, &self.config.anchors) {
            Ok(coordinate) => {
                debug!(x = coordinate.x, y = coordinate.y, z = coordinate.z, "instant position accepted");
                self.stability.push(coordinate);
                self.periodic.push(coordinate);
                IngestOutcome::Accepted { raw, coordinate }
            }
            Err(reason) => {
                warn!(d1 = raw[0], d2 = raw[1], d3 = raw[2], %reason, "instant position discarded");
                IngestOutcome::Rejected {
                    raw: Some(raw),
                    reason,
                }
            }
        }
    }

    /// Close the current interval: average it, attach the error radius and
    /// clear the periodic history.
    pub fn tick(&mut self) -> TickReport {
        let report = self
            .periodic
            .flush(&self.stability, self.config.distance_offset);
        if report.is_empty_interval() {
            debug!("no valid points in interval");
        } else if report.error.is_none() {
            debug!(
                history = self.stability.len(),
                capacity = self.stability.capacity(),
                "stability window not full; r is the offset alone"
            );
        }
        report
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            stability_len: self.stability.len(),
            stability_capacity: self.stability.capacity(),
            periodic_len: self.periodic.len(),
            ready: self.readiness.ready_ids(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
