//! Sensor feeds for the CLI.
//!
//! - [`StdinFeed`] – one JSON payload per line on standard input, exactly as
//!   the sensor nodes send them (`{"id":1,"d":93.4}`).
//! - [`SimulatedFeed`] – synthetic reports for a fixed target, for bench
//!   testing without hardware.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use rangefuse_engine::AnchorGeometry;
use rangefuse_middleware::SensorFeed;
use rangefuse_types::{Coordinate, SensorId, SensorPayload};
use tokio::io::{AsyncBufReadExt, BufReader};

// ─────────────────────────────────────────────────────────────────────────────
// Stdin
// ─────────────────────────────────────────────────────────────────────────────

pub struct StdinFeed;

#[async_trait]
impl SensorFeed for StdinFeed {
    async fn sensor_stream(&self) -> BoxStream<'static, String> {
        let lines = BufReader::new(tokio::io::stdin()).lines();
        stream::unfold(lines, |mut lines| async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => return Some((line, lines)),
                    Ok(None) => return None,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read stdin");
                        return None;
                    }
                }
            }
        })
        .boxed()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulator
// ─────────────────────────────────────────────────────────────────────────────

/// Target position given as `x,y,z` on the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTarget(pub Coordinate);

impl FromStr for SimTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, z] = parts.as_slice() else {
            return Err(format!("expected x,y,z but got '{s}'"));
        };
        let parse = |v: &str| {
            v.parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| format!("'{v}' is not a number"))
        };
        Ok(SimTarget(Coordinate::new(parse(*x)?, parse(*y)?, parse(*z)?)))
    }
}

/// Repeating jitter added to simulated distances, in distance units.
const JITTER: [f64; 5] = [0.0, 0.35, -0.2, 0.15, -0.3];

/// Emits one report per sensor per `period`, in id order, for a fixed
/// target.  Reported values have the offset already removed, as a real
/// sensor's would.
#[derive(Debug, Clone)]
pub struct SimulatedFeed {
    target: Coordinate,
    anchors: AnchorGeometry,
    distance_offset: f64,
    period: Duration,
}

impl SimulatedFeed {
    pub fn new(target: Coordinate, anchors: AnchorGeometry, distance_offset: f64, period: Duration) -> Self {
        Self {
            target,
            anchors,
            distance_offset,
            period,
        }
    }

    /// Reported distances for round `round`, never negative.
    pub fn distances(&self, round: u64) -> [f64; 3] {
        let jitter = JITTER[(round % JITTER.len() as u64) as usize];
        let Coordinate { x, y, z } = self.target;
        let AnchorGeometry { a, c, b } = self.anchors;
        let true_ranges = [
            (x * x + y * y + z * z).sqrt(),
            ((x - a).powi(2) + y * y + z * z).sqrt(),
            ((x - c).powi(2) + (y - b).powi(2) + z * z).sqrt(),
        ];
        true_ranges.map(|r| (r - self.distance_offset + jitter).max(0.0))
    }

    /// The JSON payloads for round `round`.
    pub fn payloads(&self, round: u64) -> Vec<String> {
        SensorId::ALL
            .iter()
            .zip(self.distances(round))
            .filter_map(|(id, d)| {
                let payload = SensorPayload {
                    id: i64::from(id.get()),
                    d,
                };
                serde_json::to_string(&payload).ok()
            })
            .collect()
    }
}

#[async_trait]
impl SensorFeed for SimulatedFeed {
    async fn sensor_stream(&self) -> BoxStream<'static, String> {
        let sim = self.clone();
        let ticker = tokio::time::interval(self.period);
        stream::unfold((sim, ticker, 0u64), |(sim, mut ticker, round)| async move {
            ticker.tick().await;
            let batch = sim.payloads(round);
            Some((stream::iter(batch), (sim, ticker, round + 1)))
        })
        .flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangefuse_engine::compute_instant;

    fn anchors() -> AnchorGeometry {
        AnchorGeometry {
            a: 100.0,
            c: 50.0,
            b: 100.0,
        }
    }

    #[test]
    fn target_parses_from_comma_list() {
        let target: SimTarget = "40, 30,80".parse().unwrap();
        assert_eq!(target.0, Coordinate::new(40.0, 30.0, 80.0));
        assert!("40,30".parse::<SimTarget>().is_err());
        assert!("40,thirty,80".parse::<SimTarget>().is_err());
        assert!("40,30,inf".parse::<SimTarget>().is_err());
    }

    #[test]
    fn unjittered_round_trilaterates_back_to_target() {
        let feed = SimulatedFeed::new(Coordinate::new(40.0, 30.0, 80.0), anchors(), 30.0, Duration::from_secs(1));
        let point = compute_instant(feed.distances(0), 30.0, &anchors()).unwrap();
        assert_eq!(point, Coordinate::new(40.0, 30.0, 80.0));
    }

    #[test]
    fn jitter_repeats_deterministically() {
        let feed = SimulatedFeed::new(Coordinate::new(40.0, 30.0, 80.0), anchors(), 30.0, Duration::from_secs(1));
        assert_eq!(feed.distances(1), feed.distances(1 + JITTER.len() as u64));
        assert_ne!(feed.distances(0), feed.distances(1));
    }

    #[test]
    fn payloads_are_sensor_wire_format() {
        let feed = SimulatedFeed::new(Coordinate::new(40.0, 30.0, 80.0), anchors(), 30.0, Duration::from_secs(1));
        let payloads = feed.payloads(0);
        assert_eq!(payloads.len(), 3);
        let first: SensorPayload = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(first.id, 1);
        assert!((first.d - ((40.0f64 * 40.0 + 30.0 * 30.0 + 80.0 * 80.0).sqrt() - 30.0)).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_emits_three_payloads_per_round() {
        let feed = SimulatedFeed::new(Coordinate::new(40.0, 30.0, 80.0), anchors(), 30.0, Duration::from_secs(1));
        let batch: Vec<String> = feed.sensor_stream().await.take(6).collect().await;
        let ids: Vec<i64> = batch
            .iter()
            .map(|raw| serde_json::from_str::<SensorPayload>(raw).unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 1, 2, 3]);
    }
}
