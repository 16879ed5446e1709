//! `rangefuse-middleware` – in-process message routing.
//!
//! Carries raw sensor messages towards the fusion engine and fused results
//! away from it, without interpreting either.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`adapter`] – the seams to the outside world: [`SensorFeed`] (anything
//!   that yields raw sensor payloads) and [`ResultSink`] (anything that can
//!   deliver a fused result downstream).

pub mod adapter;
pub mod bus;

pub use adapter::{BusResultSink, ResultSink, SensorFeed, forward_feed};
pub use bus::{EventBus, Topic, TopicReceiver};
