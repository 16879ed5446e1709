//! Distance ingestion and readiness tracking.
//!
//! Keeps the most recent distance per sensor and the set of sensors heard
//! from since the last calculation attempt.  A repeated report from the same
//! sensor only overwrites its distance; the triple completes when the third
//! distinct sensor reports.

use std::collections::BTreeSet;

use rangefuse_types::{SENSOR_COUNT, SensorId, SensorReading};

/// State of the current triple after a reading is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Still waiting; `received` distinct sensors have reported so far.
    Pending { received: usize },
    /// All three sensors have reported since the last attempt.
    Complete,
}

#[derive(Debug, Clone, Default)]
pub struct ReadinessTracker {
    latest: [Option<f64>; SENSOR_COUNT],
    ready: BTreeSet<SensorId>,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `reading` as its sensor's latest distance and mark the sensor
    /// ready.
    pub fn record(&mut self, reading: SensorReading) -> Readiness {
        self.latest[reading.sensor.index()] = Some(reading.distance);
        self.ready.insert(reading.sensor);
        if self.ready.len() == SENSOR_COUNT {
            Readiness::Complete
        } else {
            Readiness::Pending {
                received: self.ready.len(),
            }
        }
    }

    /// Read the latest triple `[d1, d2, d3]` and re-arm for the next one.
    ///
    /// The ready set is cleared whether or not every distance is present;
    /// `None` means a sensor has never reported.
    pub fn take_triple(&mut self) -> Option<[f64; 3]> {
        self.ready.clear();
        match self.latest {
            [Some(d1), Some(d2), Some(d3)] => Some([d1, d2, d3]),
            _ => None,
        }
    }

    /// Latest distance reported by `sensor`, if any.
    pub fn latest(&self, sensor: SensorId) -> Option<f64> {
        self.latest[sensor.index()]
    }

    /// Sensors that reported since the last attempt, ascending.
    pub fn ready_ids(&self) -> Vec<SensorId> {
        self.ready.iter().copied().collect()
    }
}
