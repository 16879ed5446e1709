//! Tick sources for the periodic aggregator.
//!
//! The service only ever asks "wait for the next tick"; whether that tick
//! comes from a wall clock or from a test is decided by the [`Scheduler`]
//! it was built with.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

#[async_trait]
pub trait Scheduler: Send {
    /// Wait for the next tick.  Returns `false` once the scheduler has
    /// stopped and will never tick again.
    ///
    /// Must be cancel-safe: it is polled inside `tokio::select!`.
    async fn next_tick(&mut self) -> bool;
}

// ────────────────────────────────────────────────────────────────────────────
// IntervalScheduler
// ────────────────────────────────────────────────────────────────────────────

/// Fixed-period wall-clock scheduler.  The first tick fires one full period
/// after construction, not immediately.
pub struct IntervalScheduler {
    interval: Interval,
}

impl IntervalScheduler {
    /// # Panics
    ///
    /// Panics if `period` is zero; configuration validation rejects that
    /// before a scheduler is built.
    pub fn new(period: Duration) -> Self {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl Scheduler for IntervalScheduler {
    async fn next_tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ManualScheduler
// ────────────────────────────────────────────────────────────────────────────

/// Scheduler that ticks only when its [`ManualTicker`] says so.
pub struct ManualScheduler {
    ticks: mpsc::UnboundedReceiver<()>,
}

/// Trigger side of a [`ManualScheduler`].  Dropping every ticker stops the
/// scheduler.
#[derive(Clone)]
pub struct ManualTicker {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualScheduler {
    pub fn new() -> (Self, ManualTicker) {
        let (tx, ticks) = mpsc::unbounded_channel();
        (Self { ticks }, ManualTicker { tx })
    }
}

impl ManualTicker {
    /// Queue one tick.  Returns `false` if the scheduler is gone.
    pub fn tick(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    async fn next_tick(&mut self) -> bool {
        self.ticks.recv().await.is_some()
    }
}
