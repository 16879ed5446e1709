//! Periodic Aggregator.
//!
//! Collects every accepted point between two ticks.  On each tick the
//! collection is averaged, paired with the error radius from the
//! [`StabilityHistory`], and emptied:
//!
//! | Periodic history | Emitted result |
//! |---|---|
//! | non-empty | `{x̄, ȳ, z̄, error + offset}` (or `offset` alone while the error is undefined) |
//! | empty | `{0, 0, 0, 0}` |
//!
//! Averages are summed in sorted order, so any permutation of the same points
//! produces a bit-identical result.

use rangefuse_types::{Coordinate, FusedResult};

use crate::estimator::{StabilityHistory, mean};

/// Outcome of one tick, before wire rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub result: FusedResult,
    /// Points averaged in this interval.
    pub points: usize,
    /// Raw error estimate (before the offset), `None` while the stability
    /// window is not yet full.
    pub error: Option<f64>,
}

impl TickReport {
    pub fn is_empty_interval(&self) -> bool {
        self.points == 0
    }
}

/// Points accepted since the last tick.  Unbounded until flushed.
#[derive(Debug, Clone, Default)]
pub struct PeriodicHistory {
    points: Vec<Coordinate>,
}

impl PeriodicHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: Coordinate) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Produce this interval's result and start a new interval.
    pub fn flush(&mut self, stability: &StabilityHistory, offset: f64) -> TickReport {
        let points = std::mem::take(&mut self.points);
        let Some(centroid) = average(&points) else {
            return TickReport {
                result: FusedResult::SENTINEL,
                points: 0,
                error: None,
            };
        };

        let error = stability.estimate_error();
        let r = error.map_or(offset, |e| e + offset);
        TickReport {
            result: FusedResult {
                x: centroid.x,
                y: centroid.y,
                z: centroid.z,
                r,
            },
            points: points.len(),
            error,
        }
    }
}

/// Unweighted per-axis mean, `None` for an empty slice.
pub fn average(points: &[Coordinate]) -> Option<Coordinate> {
    let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
    let zs: Vec<f64> = points.iter().map(|p| p.z).collect();
    Some(Coordinate::new(mean(&xs)?, mean(&ys)?, mean(&zs)?))
}
