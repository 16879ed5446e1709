//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::SensorDistances`] | Raw `{id, d}` payloads from the three ranging nodes |
//! | [`Topic::FusedPosition`] | Periodic `{deviceID, data}` results for the downstream consumer |
//! | [`Topic::SystemAlerts`] | Sensor liveness changes and other operator-facing events |

use rangefuse_types::{Event, FuseError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Inbound distance reports, still unparsed.
    SensorDistances,
    /// Outbound fused position reports.
    FusedPosition,
    /// Operator-facing alerts.
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    sensor_distances: broadcast::Sender<Event>,
    fused_position: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (sensor_distances, _) = broadcast::channel(capacity);
        let (fused_position, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            sensor_distances,
            fused_position,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`FuseError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, FuseError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| FuseError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::SensorDistances => &self.sensor_distances,
            Topic::FusedPosition => &self.fused_position,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangefuse_types::EventPayload;

    fn sensor_event(raw: &str) -> Event {
        Event::new("test::sensor", EventPayload::SensorMessage(raw.to_string()))
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::FusedPosition, sensor_event("{}"));
        assert!(matches!(result, Err(FuseError::Channel(_))));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut first = bus.subscribe_to(Topic::SensorDistances);
        let mut second = bus.subscribe_to(Topic::SensorDistances);

        let event = sensor_event(r#"{"id":1,"d":90}"#);
        assert_eq!(bus.publish_to(Topic::SensorDistances, event.clone())?, 2);

        assert_eq!(first.recv().await?.id, event.id);
        assert_eq!(second.recv().await?.id, event.id);
        Ok(())
    }

    /// A subscriber on `SystemAlerts` must not receive events published to
    /// `SensorDistances`.
    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let _sensors = bus.subscribe_to(Topic::SensorDistances);

        bus.publish_to(Topic::SensorDistances, sensor_event("{}"))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts.recv()).await;
        assert!(result.is_err(), "alerts subscriber must not see sensor traffic");
        assert_eq!(alerts.topic(), Topic::SystemAlerts);
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_observes_lag() {
        let bus = EventBus::new(8);
        let mut slow = bus.subscribe_to(Topic::SensorDistances);
        for _ in 0..100 {
            let _ = bus.publish_to(Topic::SensorDistances, sensor_event("{}"));
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(Topic::FusedPosition), 0);
        let rx = bus.subscribe_to(Topic::FusedPosition);
        assert_eq!(bus.subscriber_count(Topic::FusedPosition), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(Topic::FusedPosition), 0);
    }
}
