//! [`SensorLiveness`] – per-sensor silence detection.
//!
//! Every accepted reading counts as a heartbeat for its sensor.  A sensor
//! that stays silent longer than the timeout becomes *stale*; each sensor
//! reports the stale transition once and the recovery once.
//!
//! Time is passed in explicitly so the service decides which clock applies.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rangefuse_types::SensorId;

/// A state change worth telling the operator about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessChange {
    /// Silent for longer than the timeout.
    Stale { sensor: SensorId, silent_for: Duration },
    /// Reporting again after being stale.
    Recovered { sensor: SensorId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorHealth {
    Healthy,
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct SensorEntry {
    last_seen: Instant,
    stale: bool,
}

/// Tracks when each of the three sensors last reported.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use rangefuse_runtime::liveness::{SensorHealth, SensorLiveness};
/// use rangefuse_types::SensorId;
///
/// let start = Instant::now();
/// let mut liveness = SensorLiveness::new(Duration::from_secs(10), start);
/// liveness.observe(SensorId::ONE, start);
///
/// assert_eq!(liveness.health(SensorId::ONE, start), SensorHealth::Healthy);
/// ```
#[derive(Debug, Clone)]
pub struct SensorLiveness {
    timeout: Duration,
    sensors: BTreeMap<SensorId, SensorEntry>,
}

impl SensorLiveness {
    /// All three sensors start as last seen at `now`.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        let sensors = SensorId::ALL
            .iter()
            .map(|id| {
                (
                    *id,
                    SensorEntry {
                        last_seen: now,
                        stale: false,
                    },
                )
            })
            .collect();
        Self { timeout, sensors }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a report from `sensor`.  Returns
    /// [`LivenessChange::Recovered`] when the sensor had been stale.
    pub fn observe(&mut self, sensor: SensorId, now: Instant) -> Option<LivenessChange> {
        let entry = self.sensors.get_mut(&sensor)?;
        entry.last_seen = now;
        if entry.stale {
            entry.stale = false;
            Some(LivenessChange::Recovered { sensor })
        } else {
            None
        }
    }

    /// Mark sensors that have exceeded the timeout, returning only those
    /// that were not already stale.  Ascending sensor order.
    pub fn sweep(&mut self, now: Instant) -> Vec<LivenessChange> {
        let timeout = self.timeout;
        self.sensors
            .iter_mut()
            .filter_map(|(sensor, entry)| {
                let silent_for = now.saturating_duration_since(entry.last_seen);
                if entry.stale || silent_for <= timeout {
                    return None;
                }
                entry.stale = true;
                Some(LivenessChange::Stale {
                    sensor: *sensor,
                    silent_for,
                })
            })
            .collect()
    }

    pub fn health(&self, sensor: SensorId, now: Instant) -> SensorHealth {
        match self.sensors.get(&sensor) {
            Some(entry) if now.saturating_duration_since(entry.last_seen) <= self.timeout => {
                SensorHealth::Healthy
            }
            _ => SensorHealth::Stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn fresh_sensors_are_healthy() {
        let start = Instant::now();
        let liveness = SensorLiveness::new(TIMEOUT, start);
        for id in SensorId::ALL {
            assert_eq!(liveness.health(id, start + TIMEOUT), SensorHealth::Healthy);
        }
    }

    #[test]
    fn silent_sensor_goes_stale_once() {
        let start = Instant::now();
        let mut liveness = SensorLiveness::new(TIMEOUT, start);
        let later = start + Duration::from_secs(11);
        liveness.observe(SensorId::ONE, later);
        liveness.observe(SensorId::THREE, later);

        let changes = liveness.sweep(later);
        assert_eq!(
            changes,
            vec![LivenessChange::Stale {
                sensor: SensorId::TWO,
                silent_for: Duration::from_secs(11),
            }]
        );
        assert!(liveness.sweep(later + Duration::from_secs(1)).is_empty());
        assert_eq!(liveness.health(SensorId::TWO, later), SensorHealth::Stale);
    }

    #[test]
    fn stale_sensor_recovers_on_next_report() {
        let start = Instant::now();
        let mut liveness = SensorLiveness::new(TIMEOUT, start);
        let later = start + Duration::from_secs(20);
        assert_eq!(liveness.sweep(later).len(), 3);

        assert_eq!(
            liveness.observe(SensorId::TWO, later),
            Some(LivenessChange::Recovered { sensor: SensorId::TWO })
        );
        assert_eq!(liveness.observe(SensorId::TWO, later), None);
        assert_eq!(liveness.health(SensorId::TWO, later), SensorHealth::Healthy);
    }

    #[test]
    fn heartbeat_resets_deadline() {
        let start = Instant::now();
        let mut liveness = SensorLiveness::new(TIMEOUT, start);
        let mid = start + Duration::from_secs(8);
        for id in SensorId::ALL {
            liveness.observe(id, mid);
        }
        assert!(liveness.sweep(start + Duration::from_secs(15)).is_empty());
    }
}
