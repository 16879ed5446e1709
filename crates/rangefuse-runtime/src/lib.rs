//! `rangefuse-runtime` – process plumbing around the fusion engine.
//!
//! # Modules
//!
//! - [`service`] – [`FusionService`][service::FusionService]: the single
//!   owner of the engine, serialising inbound readings, scheduler ticks and
//!   the shutdown signal through one `tokio::select!` loop.
//! - [`scheduler`] – the [`Scheduler`][scheduler::Scheduler] seam with a
//!   wall-clock [`IntervalScheduler`][scheduler::IntervalScheduler] and a
//!   test-driven [`ManualScheduler`][scheduler::ManualScheduler].
//! - [`liveness`] – [`SensorLiveness`][liveness::SensorLiveness]: per-sensor
//!   last-seen tracking with stale/recovered transitions.
//! - [`csv_log`] – append-only `time,d1,d2,d3,x,y,z` side log written from
//!   its own task.
//! - [`telemetry`] – `tracing` subscriber initialisation with optional OTLP
//!   export.

pub mod csv_log;
pub mod liveness;
pub mod scheduler;
pub mod service;
pub mod telemetry;

pub use service::{FusionService, ServiceHandle, ServiceSettings};
