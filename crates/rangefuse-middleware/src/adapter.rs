//! The adapter seams.
//!
//! The fusion service never reads from a serial port or writes to a socket.
//! Raw sensor payloads arrive on the [`EventBus`] and fused results leave
//! through a [`ResultSink`].  Anything that talks to the outside world sits
//! behind one of these two traits.
//!
//! # Overview
//!
//! - [`SensorFeed`] – produces raw `{id, d}` payload strings.
//! - [`forward_feed`] – pumps a feed onto [`Topic::SensorDistances`].
//! - [`ResultSink`] – delivers an [`OutboundMessage`] downstream.
//! - [`BusResultSink`] – publishes results on [`Topic::FusedPosition`].

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use rangefuse_types::{Event, EventPayload, FuseError, OutboundMessage};

use crate::bus::{EventBus, Topic};

/// A source of raw distance reports.
///
/// Payloads are passed through untouched; decoding and validation belong to
/// the consumer.
#[async_trait]
pub trait SensorFeed: Send + Sync {
    /// Live stream of raw payloads.  The stream ends when the source does.
    async fn sensor_stream(&self) -> BoxStream<'static, String>;
}

/// Downstream consumer of fused results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<(), FuseError>;
}

/// [`ResultSink`] that publishes onto the [`Topic::FusedPosition`] lane.
#[derive(Clone, Debug)]
pub struct BusResultSink {
    bus: EventBus,
    source: String,
}

impl BusResultSink {
    pub fn new(bus: EventBus, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }
}

#[async_trait]
impl ResultSink for BusResultSink {
    async fn publish(&self, message: OutboundMessage) -> Result<(), FuseError> {
        let event = Event::new(self.source.clone(), EventPayload::FusedPosition(message));
        self.bus.publish_to(Topic::FusedPosition, event).map(|_| ())
    }
}

/// Forward every payload from `feed` onto [`Topic::SensorDistances`] until
/// the feed ends.  Returns the number of payloads forwarded.
///
/// Payloads published while nobody listens are dropped with a warning.
pub async fn forward_feed(feed: &dyn SensorFeed, bus: &EventBus, source: &str) -> usize {
    let mut stream = feed.sensor_stream().await;
    let mut forwarded = 0;
    while let Some(raw) = stream.next().await {
        let event = Event::new(source, EventPayload::SensorMessage(raw));
        match bus.publish_to(Topic::SensorDistances, event) {
            Ok(_) => forwarded += 1,
            Err(e) => tracing::warn!(source, error = %e, "Sensor payload dropped"),
        }
    }
    tracing::debug!(source, forwarded, "Sensor feed ended");
    forwarded
}
