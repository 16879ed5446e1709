//! [`FusionService`] – the single owner of the fusion engine.
//!
//! One Tokio task holds the [`FusionEngine`] and is the only code that ever
//! touches it.  Inbound sensor messages, scheduler ticks and the shutdown
//! signal are multiplexed through one `tokio::select!`, so ingestion and
//! flushing never interleave.
//!
//! Side effects leave the task through bounded queues that are fed with
//! `try_send`: the result publisher and the CSV writer each run on their
//! own task and can lag without stalling the engine.
//!
//! ```text
//!  SensorDistances ──┐
//!  Scheduler ticks ──┼──► FusionService ──► publisher task ──► ResultSink
//!  shutdown watch ───┘          │
//!                               └─────────► CSV writer task ──► data/1.csv
//! ```
//!
//! # Shutdown
//!
//! When the shutdown watch flips the loop stops taking ticks and returns.
//! Dropping its queue senders lets the publisher and CSV tasks drain what
//! is already queued and exit; [`ServiceHandle::join_within`] bounds that
//! drain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rangefuse_engine::{EngineConfig, FusionEngine, IngestOutcome};
use rangefuse_middleware::{EventBus, ResultSink, Topic, TopicReceiver};
use rangefuse_types::{
    Event, EventPayload, FuseError, OutboundMessage, SensorId, SensorPayload, SensorReading,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::csv_log::{CsvLog, CsvRow, CsvSender};
use crate::liveness::{LivenessChange, SensorHealth, SensorLiveness};
use crate::scheduler::Scheduler;
use crate::telemetry::RESULT_TARGET;

/// Results buffered between the engine and the publisher task.
const PUBLISH_QUEUE_DEPTH: usize = 16;

/// Source tag on events this service puts on the bus.
const SERVICE_SOURCE: &str = "rangefuse-runtime::service";

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Everything the service needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub engine: EngineConfig,
    /// `deviceID` stamped on every outbound message.
    pub device_id: u32,
    /// When `false`, results are computed and logged but never published.
    pub publish_results: bool,
    /// Silence after which a sensor is reported stale; `None` disables the
    /// check.
    pub sensor_timeout: Option<Duration>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            device_id: 1,
            publish_results: true,
            sensor_timeout: Some(Duration::from_secs(10)),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Inbound decoding
// ────────────────────────────────────────────────────────────────────────────

/// Decode a raw `{ "id": <int>, "d": <number> }` message.  Anything other
/// than a JSON object is rejected.
///
/// # Errors
///
/// * [`FuseError::Malformed`] – the text is not JSON.
/// * [`FuseError::InvalidReading`] – valid JSON with missing or mistyped
///   fields, an unknown sensor id, or an unusable distance.
pub fn parse_sensor_message(raw: &str) -> Result<SensorReading, FuseError> {
    let payload: SensorPayload = serde_json::from_str(raw).map_err(|e| {
        if e.is_data() {
            FuseError::InvalidReading(e.to_string())
        } else {
            FuseError::Malformed(e.to_string())
        }
    })?;
    SensorReading::try_from(payload)
}

// ────────────────────────────────────────────────────────────────────────────
// FusionService
// ────────────────────────────────────────────────────────────────────────────

pub struct FusionService {
    engine: FusionEngine,
    settings: ServiceSettings,
    bus: EventBus,
    inbound: TopicReceiver,
    scheduler: Box<dyn Scheduler>,
    outbound: mpsc::Sender<OutboundMessage>,
    csv: Option<CsvSender>,
    liveness: Option<SensorLiveness>,
    shutdown: watch::Receiver<bool>,
}

/// Join handles for the service and its side-channel tasks.
pub struct ServiceHandle {
    service: JoinHandle<FusionEngine>,
    side_tasks: Vec<JoinHandle<()>>,
}

impl FusionService {
    /// Validate `settings`, subscribe to the sensor lane and start the
    /// service, publisher and (when `csv` is given) CSV writer tasks.
    ///
    /// The subscription exists before this returns, so anything published
    /// on [`Topic::SensorDistances`] afterwards is seen by the engine.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::InvalidConfig`] when the engine configuration is
    /// unusable.  Nothing is spawned in that case.
    pub fn spawn(
        settings: ServiceSettings,
        bus: &EventBus,
        scheduler: Box<dyn Scheduler>,
        sink: Arc<dyn ResultSink>,
        csv: Option<CsvLog>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ServiceHandle, FuseError> {
        let engine = FusionEngine::new(settings.engine)?;
        let inbound = bus.subscribe_to(Topic::SensorDistances);

        let mut side_tasks = Vec::new();
        let (outbound, outbound_rx) = mpsc::channel(PUBLISH_QUEUE_DEPTH);
        side_tasks.push(tokio::spawn(run_publisher(outbound_rx, sink)));

        let csv = csv.map(|log| {
            let (sender, handle) = log.spawn_writer();
            side_tasks.push(handle);
            sender
        });

        let liveness = settings
            .sensor_timeout
            .map(|timeout| SensorLiveness::new(timeout, Instant::now()));

        let service = FusionService {
            engine,
            settings,
            bus: bus.clone(),
            inbound,
            scheduler,
            outbound,
            csv,
            liveness,
            shutdown,
        };

        Ok(ServiceHandle {
            service: tokio::spawn(service.run()),
            side_tasks,
        })
    }

    /// Drive the engine until shutdown.  Returns the engine so callers can
    /// inspect its final state.
    ///
    /// Inbound messages already delivered are handled before a pending tick,
    /// so a tick always sees every reading published before it fired.
    async fn run(mut self) -> FusionEngine {
        let config = self.engine.config();
        info!(
            a = config.anchors.a,
            c = config.anchors.c,
            b = config.anchors.b,
            history_size = config.history_size,
            distance_offset = config.distance_offset,
            device_id = self.settings.device_id,
            publish = self.settings.publish_results,
            sensor_timeout_ms = self.liveness.as_ref().map(|l| l.timeout().as_millis() as u64),
            "Fusion service started"
        );

        if *self.shutdown.borrow() {
            info!("Shutdown already requested; fusion service not started");
            return self.engine;
        }

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("Shutdown requested; scheduler stopped");
                        break;
                    }
                }

                event = self.inbound.recv() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sensor lane lagged; readings lost");
                    }
                    Err(RecvError::Closed) => {
                        info!("Sensor lane closed");
                        break;
                    }
                },

                ticking = self.scheduler.next_tick() => {
                    if !ticking {
                        info!("Scheduler stopped");
                        break;
                    }
                    self.on_tick(Instant::now());
                }
            }
        }

        info!("Fusion service stopped");
        self.engine
    }

    fn handle_event(&mut self, event: Event) {
        match event.payload {
            EventPayload::SensorMessage(raw) => self.handle_sensor_message(&event.source, &raw),
            other => debug!(source = %event.source, ?other, "Ignoring non-sensor payload"),
        }
    }

    fn handle_sensor_message(&mut self, source: &str, raw: &str) {
        let reading = match parse_sensor_message(raw) {
            Ok(reading) => reading,
            Err(e @ FuseError::Malformed(_)) => {
                error!(source, raw, error = %e, "Malformed JSON from sensor");
                return;
            }
            Err(e) => {
                warn!(source, raw, error = %e, "Invalid sensor reading dropped");
                return;
            }
        };

        if let Some(liveness) = self.liveness.as_mut() {
            if let Some(change) = liveness.observe(reading.sensor, Instant::now()) {
                self.report_liveness(change);
            }
        }

        if let IngestOutcome::Accepted { raw, coordinate } = self.engine.ingest(reading) {
            if let Some(csv) = &self.csv {
                csv.submit(CsvRow::new(Utc::now(), raw, coordinate));
            }
        }
    }

    fn on_tick(&mut self, now: Instant) {
        if let Some(liveness) = self.liveness.as_mut() {
            for change in liveness.sweep(now) {
                self.report_liveness(change);
            }
        }

        let report = self.engine.tick();
        let message = OutboundMessage::new(self.settings.device_id, report.result);
        let snapshot = self.engine.snapshot();
        debug!(?snapshot, "Engine state after tick");

        if report.points == 0
            && let Some(liveness) = &self.liveness
        {
            let silent: Vec<u8> = SensorId::ALL
                .into_iter()
                .filter(|id| liveness.health(*id, now) == SensorHealth::Stale)
                .map(SensorId::get)
                .collect();
            debug!(?silent, "No valid points this interval");
        }

        let data = message.data;
        info!(
            target: RESULT_TARGET,
            device_id = message.device_id,
            x = data.x,
            y = data.y,
            z = data.z,
            r = data.r,
            points = report.points,
            "Fused position"
        );

        if !self.settings.publish_results {
            debug!("Publishing disabled; result not sent");
            return;
        }
        match self.outbound.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Publisher queue full; result dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Publisher task gone; result dropped");
            }
        }
    }

    fn report_liveness(&self, change: LivenessChange) {
        let (sensor, alive) = match change {
            LivenessChange::Stale { sensor, silent_for } => {
                warn!(%sensor, silent_ms = silent_for.as_millis() as u64, "Sensor stopped reporting");
                (sensor, false)
            }
            LivenessChange::Recovered { sensor } => {
                info!(%sensor, "Sensor reporting again");
                (sensor, true)
            }
        };
        let event = Event::new(SERVICE_SOURCE, EventPayload::SensorLiveness { sensor, alive });
        if self.bus.publish_to(Topic::SystemAlerts, event).is_err() {
            debug!(%sensor, "No alert subscribers");
        }
    }
}

/// Forward queued results to `sink` until the queue closes.
async fn run_publisher(mut rx: mpsc::Receiver<OutboundMessage>, sink: Arc<dyn ResultSink>) {
    while let Some(message) = rx.recv().await {
        match sink.publish(message).await {
            Ok(()) => debug!(device_id = message.device_id, "Result published"),
            Err(FuseError::Channel(reason)) => {
                warn!(%reason, "Result consumer offline; result not delivered");
            }
            Err(e) => error!(error = %e, "Result publish failed"),
        }
    }
    debug!("Publisher drained");
}

impl ServiceHandle {
    /// Wait for the service and its side tasks to finish.
    ///
    /// Returns the final engine, or `None` when `grace` elapses first or the
    /// service task panicked.
    pub async fn join_within(self, grace: Duration) -> Option<FusionEngine> {
        let drain = async move {
            let engine = self.service.await.map_err(|e| error!(error = %e, "Fusion service task failed")).ok();
            for task in self.side_tasks {
                if let Err(e) = task.await {
                    error!(error = %e, "Side task failed");
                }
            }
            engine
        };
        match tokio::time::timeout(grace, drain).await {
            Ok(engine) => engine,
            Err(_) => {
                error!(grace_ms = grace.as_millis() as u64, "Shutdown grace period exceeded");
                None
            }
        }
    }
}
