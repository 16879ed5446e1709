//! `rangefuse` – three-sensor position fusion node.
//!
//! This binary wires the fusion stack together.  It:
//!
//! 1. Loads `rangefuse.toml` (defaults when absent or unreadable) and applies
//!    `RANGEFUSE_*` environment overrides; unusable values abort start-up.
//! 2. Starts the fusion service with a wall-clock scheduler, the CSV side
//!    log and a bus-backed result sink.
//! 3. Feeds sensor payloads from stdin (one JSON object per line) or, with
//!    `--simulate x,y,z`, from a synthetic target.
//! 4. Prints every published result to stdout as one JSON line.
//! 5. On Ctrl-C / SIGTERM stops the scheduler, drains queued work within a
//!    grace period, and exits non-zero if the drain does not finish.

mod config;
mod feed;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use rangefuse_middleware::{BusResultSink, EventBus, SensorFeed, Topic, TopicReceiver, forward_feed};
use rangefuse_runtime::csv_log::CsvLog;
use rangefuse_runtime::scheduler::IntervalScheduler;
use rangefuse_runtime::telemetry::{default_directive, init_tracing};
use rangefuse_runtime::{FusionService, ServiceHandle};
use rangefuse_types::EventPayload;

use config::{Config, ConfigError};
use feed::{SimTarget, SimulatedFeed, StdinFeed};

/// Time allowed for queued results and CSV rows to drain after a shutdown
/// request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// rangefuse – fuse three range sensors into one 3-D position
#[derive(Parser, Debug)]
#[command(name = "rangefuse")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = config::DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// Replace stdin with a simulated feed for a fixed target
    #[arg(long, value_name = "X,Y,Z")]
    simulate: Option<SimTarget>,

    /// Milliseconds between simulated report rounds
    #[arg(long, value_name = "MS", default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    simulate_period_ms: u64,

    /// Suppress the start-up banner
    #[arg(short = 'q', long)]
    quiet: bool,
}

/// How the configuration was obtained, reported once logging is up.
enum ConfigOrigin {
    File,
    Missing,
    Unusable(ConfigError),
}

fn main() -> ExitCode {
    let args = Args::parse();

    let (mut cfg, origin) = match config::load_from(&args.config_file) {
        Ok(Some(cfg)) => (cfg, ConfigOrigin::File),
        Ok(None) => (Config::default(), ConfigOrigin::Missing),
        Err(e) => (Config::default(), ConfigOrigin::Unusable(e)),
    };
    config::apply_env_overrides(&mut cfg);

    // ── Structured logging ────────────────────────────────────────────────
    // The tracing pipeline must exist before the Tokio runtime is built.
    let telemetry = init_tracing("rangefuse", default_directive(cfg.logging.level));

    if !args.quiet {
        print_banner();
    }

    match origin {
        ConfigOrigin::File => info!(path = %args.config_file.display(), "Configuration loaded"),
        ConfigOrigin::Missing => warn!(
            path = %args.config_file.display(),
            "Configuration file not found; using defaults"
        ),
        ConfigOrigin::Unusable(e) if e.is_recoverable() => {
            error!(error = %e, "Configuration unusable; using defaults")
        }
        ConfigOrigin::Unusable(e) => {
            error!(error = %e, "Refusing to start");
            eprintln!("{}: {}", "Config error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = cfg.validate() {
        error!(error = %e, "Refusing to start");
        eprintln!("{}: {}", "Config error".red().bold(), e);
        return ExitCode::FAILURE;
    }

    info!(
        a = cfg.anchors.a,
        c = cfg.anchors.c,
        b = cfg.anchors.b,
        history_size = cfg.calculation.history_size,
        distance_offset = cfg.calculation.distance_offset,
        interval_ms = cfg.calculation.average_interval_ms,
        publish = cfg.calculation.publish_results,
        log_level = %cfg.logging.level,
        otlp = telemetry.is_exporting(),
        "Effective configuration"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(args, cfg));
    // A pending stdin read would otherwise keep the runtime alive.
    runtime.shutdown_background();
    code
}

async fn run(args: Args, cfg: Config) -> ExitCode {
    // ── Shutdown signal ───────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let shutdown_ctrlc = shutdown_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Shutdown requested – draining …".yellow().bold());
        shutdown_ctrlc.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown will not be available");
    }

    // ── Bus and result printer ────────────────────────────────────────────
    // The printer outlives the service so drained results still reach stdout.
    let bus = EventBus::default();
    let (printer_stop, printer_stop_rx) = watch::channel(false);
    let printer = tokio::spawn(print_results(
        bus.subscribe_to(Topic::FusedPosition),
        printer_stop_rx,
    ));

    // ── CSV side log ──────────────────────────────────────────────────────
    let csv = cfg.csv_path().and_then(|path| match CsvLog::open(path) {
        Ok(log) => Some(log),
        Err(e) => {
            error!(error = %e, "CSV log disabled");
            None
        }
    });

    // ── Fusion service ────────────────────────────────────────────────────
    let handle: ServiceHandle = match FusionService::spawn(
        cfg.service_settings(),
        &bus,
        Box::new(IntervalScheduler::new(cfg.average_interval())),
        Arc::new(BusResultSink::new(bus.clone(), "rangefuse-cli::service")),
        csv,
        shutdown_rx.clone(),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Failed to start fusion service");
            return ExitCode::FAILURE;
        }
    };

    // ── Sensor feed ───────────────────────────────────────────────────────
    let feed_bus = bus.clone();
    let feed_task = match args.simulate {
        Some(SimTarget(target)) => {
            info!(x = target.x, y = target.y, z = target.z, "Simulated sensor feed enabled");
            let sim = SimulatedFeed::new(
                target,
                cfg.engine_config().anchors,
                cfg.calculation.distance_offset,
                Duration::from_millis(args.simulate_period_ms),
            );
            tokio::spawn(async move { pump(&sim, &feed_bus, "rangefuse-cli::simulator").await })
        }
        None => {
            info!("Reading sensor payloads from stdin");
            tokio::spawn(async move { pump(&StdinFeed, &feed_bus, "rangefuse-cli::stdin").await })
        }
    };

    // ── Wait for shutdown ─────────────────────────────────────────────────
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }
    feed_task.abort();

    let drained = handle.join_within(SHUTDOWN_GRACE).await.is_some();
    printer_stop.send_replace(true);
    if let Err(e) = printer.await {
        error!(error = %e, "Result printer failed");
    }

    if drained {
        info!("Shutdown complete");
        ExitCode::SUCCESS
    } else {
        error!("Forcing exit");
        ExitCode::FAILURE
    }
}

async fn pump(feed: &dyn SensorFeed, bus: &EventBus, source: &str) {
    let forwarded = forward_feed(feed, bus, source).await;
    info!(source, forwarded, "Sensor feed closed");
}

/// Print each published result as one JSON line on stdout.
///
/// Results already on the bus are printed before the shutdown signal is
/// honoured.
async fn print_results(mut rx: TopicReceiver, mut shutdown: watch::Receiver<bool>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        tokio::select! {
            biased;

            event = rx.recv() => match event {
                Ok(event) => {
                    if let EventPayload::FusedPosition(message) = event.payload {
                        match serde_json::to_string(&message) {
                            Ok(line) => println!("{line}"),
                            Err(e) => error!(error = %e, "Failed to encode result"),
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Result printer lagged"),
                Err(RecvError::Closed) => break,
            },

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    eprintln!();
    eprintln!("{}", "   ___                      ___              ".bold().cyan());
    eprintln!("{}", "  | _ \\__ _ _ _  __ _ ___  | __|  _ ___ ___ ".bold().cyan());
    eprintln!("{}", "  |   / _` | ' \\/ _` / -_) | _| || (_-</ -_)".bold().cyan());
    eprintln!("{}", "  |_|_\\__,_|_||_\\__, \\___| |_| \\_,_/__/\\___|".bold().cyan());
    eprintln!("{}", "                |___/                       ".bold().cyan());
    eprintln!(
        "  {} v{}\n",
        "three-sensor position fusion".dimmed(),
        env!("CARGO_PKG_VERSION")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_default_to_local_config_and_stdin() {
        let args = Args::parse_from(["rangefuse"]);
        assert_eq!(args.config_file, PathBuf::from("rangefuse.toml"));
        assert!(args.simulate.is_none());
        assert_eq!(args.simulate_period_ms, 1000);
    }

    #[test]
    fn simulate_flag_parses_target() {
        let args = Args::parse_from(["rangefuse", "--simulate", "40,30,80", "-c", "/etc/rangefuse.toml"]);
        assert_eq!(args.config_file, PathBuf::from("/etc/rangefuse.toml"));
        assert_eq!(args.simulate.map(|t| t.0.z), Some(80.0));
    }

    #[test]
    fn zero_simulation_period_is_rejected() {
        assert!(Args::try_parse_from(["rangefuse", "--simulate-period-ms", "0"]).is_err());
    }

    #[tokio::test]
    async fn printer_flushes_pending_results_before_stopping() {
        use rangefuse_types::{Event, FusedResult, OutboundMessage};

        let bus = EventBus::default();
        let (tx, rx) = watch::channel(false);
        let printer = tokio::spawn(print_results(bus.subscribe_to(Topic::FusedPosition), rx));

        let message = OutboundMessage::new(1, FusedResult::SENTINEL);
        bus.publish_to(
            Topic::FusedPosition,
            Event::new("test", EventPayload::FusedPosition(message)),
        )
        .unwrap();
        tx.send(true).unwrap();
        printer.await.unwrap();
        assert_eq!(bus.subscriber_count(Topic::FusedPosition), 0);
    }
}
