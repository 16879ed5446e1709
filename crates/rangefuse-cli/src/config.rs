//! Configuration Vault – reads `rangefuse.toml`.
//!
//! Every section and field is optional; anything absent takes its default.
//! A missing or unparseable file is not fatal (the caller falls back to
//! defaults), but a file that parses into unusable values is.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rangefuse_engine::{AnchorGeometry, EngineConfig};
use rangefuse_runtime::ServiceSettings;
use rangefuse_types::LogLevel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "rangefuse.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// `true` for failures that still allow running on defaults.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ConfigError::Invalid(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Anchor geometry: sensor 1 at the origin, sensor 2 at `(a, 0, 0)`, sensor 3
/// at `(c, b, 0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorsSection {
    #[serde(default = "default_a")]
    pub a: f64,
    #[serde(default = "default_c")]
    pub c: f64,
    #[serde(default = "default_b")]
    pub b: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationSection {
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    #[serde(default = "default_distance_offset")]
    pub distance_offset: f64,

    #[serde(default = "default_average_interval_ms")]
    pub average_interval_ms: u64,

    #[serde(default = "default_publish_results")]
    pub publish_results: bool,

    /// Silence before a sensor is reported stale; `0` disables the check.
    #[serde(default = "default_sensor_timeout_ms")]
    pub sensor_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: LogLevel,

    /// CSV side log; an empty string disables it.
    #[serde(default = "default_csv_path")]
    pub csv_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_device_id")]
    pub device_id: u32,
}

/// Contents of `rangefuse.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub anchors: AnchorsSection,
    #[serde(default)]
    pub calculation: CalculationSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub output: OutputSection,
}

fn default_a() -> f64 {
    100.0
}
fn default_c() -> f64 {
    50.0
}
fn default_b() -> f64 {
    100.0
}
fn default_history_size() -> usize {
    5
}
fn default_distance_offset() -> f64 {
    30.0
}
fn default_average_interval_ms() -> u64 {
    3000
}
fn default_publish_results() -> bool {
    true
}
fn default_sensor_timeout_ms() -> u64 {
    10_000
}
fn default_csv_path() -> String {
    "data/1.csv".to_string()
}
fn default_device_id() -> u32 {
    1
}

impl Default for AnchorsSection {
    fn default() -> Self {
        Self {
            a: default_a(),
            c: default_c(),
            b: default_b(),
        }
    }
}

impl Default for CalculationSection {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            distance_offset: default_distance_offset(),
            average_interval_ms: default_average_interval_ms(),
            publish_results: default_publish_results(),
            sensor_timeout_ms: default_sensor_timeout_ms(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            csv_path: default_csv_path(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Derived settings
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            anchors: AnchorGeometry {
                a: self.anchors.a,
                c: self.anchors.c,
                b: self.anchors.b,
            },
            history_size: self.calculation.history_size,
            distance_offset: self.calculation.distance_offset,
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        let timeout_ms = self.calculation.sensor_timeout_ms;
        ServiceSettings {
            engine: self.engine_config(),
            device_id: self.output.device_id,
            publish_results: self.calculation.publish_results,
            sensor_timeout: (timeout_ms > 0).then_some(Duration::from_millis(timeout_ms)),
        }
    }

    pub fn average_interval(&self) -> Duration {
        Duration::from_millis(self.calculation.average_interval_ms)
    }

    /// `None` when the CSV side log is disabled.
    pub fn csv_path(&self) -> Option<&Path> {
        let path = self.logging.csv_path.trim();
        (!path.is_empty()).then_some(Path::new(path))
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.calculation.average_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "average_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(cfg))
}

/// Apply `RANGEFUSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RANGEFUSE_HISTORY_SIZE` | `calculation.history_size` |
/// | `RANGEFUSE_DISTANCE_OFFSET` | `calculation.distance_offset` |
/// | `RANGEFUSE_INTERVAL_MS` | `calculation.average_interval_ms` |
/// | `RANGEFUSE_PUBLISH` | `calculation.publish_results` |
/// | `RANGEFUSE_LOG_LEVEL` | `logging.level` |
/// | `RANGEFUSE_CSV_PATH` | `logging.csv_path` |
/// | `RANGEFUSE_DEVICE_ID` | `output.device_id` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("RANGEFUSE_HISTORY_SIZE")
        && let Ok(n) = v.trim().parse()
    {
        cfg.calculation.history_size = n;
    }
    if let Some(v) = lookup("RANGEFUSE_DISTANCE_OFFSET")
        && let Ok(offset) = v.trim().parse()
    {
        cfg.calculation.distance_offset = offset;
    }
    if let Some(v) = lookup("RANGEFUSE_INTERVAL_MS")
        && let Ok(ms) = v.trim().parse()
    {
        cfg.calculation.average_interval_ms = ms;
    }
    if let Some(v) = lookup("RANGEFUSE_PUBLISH")
        && let Ok(publish) = v.trim().parse()
    {
        cfg.calculation.publish_results = publish;
    }
    if let Some(v) = lookup("RANGEFUSE_LOG_LEVEL") {
        cfg.logging.level = LogLevel::from(v);
    }
    if let Some(v) = lookup("RANGEFUSE_CSV_PATH") {
        cfg.logging.csv_path = v;
    }
    if let Some(v) = lookup("RANGEFUSE_DEVICE_ID")
        && let Ok(id) = v.trim().parse()
    {
        cfg.output.device_id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, contents).expect("write config");
        (dir, path)
    }

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = Config::default();
        assert_eq!(cfg.anchors, AnchorsSection { a: 100.0, c: 50.0, b: 100.0 });
        assert_eq!(cfg.calculation.history_size, 5);
        assert_eq!(cfg.calculation.distance_offset, 30.0);
        assert_eq!(cfg.average_interval(), Duration::from_secs(3));
        assert!(cfg.calculation.publish_results);
        assert_eq!(cfg.logging.level, LogLevel::Verbose);
        assert_eq!(cfg.csv_path(), Some(Path::new("data/1.csv")));
        assert_eq!(cfg.output.device_id, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join(DEFAULT_CONFIG_FILE)).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let (_dir, path) = write_config(
            r#"
            [anchors]
            a = 120.0

            [calculation]
            history_size = 8
            publish_results = false

            [logging]
            level = "minimal"
            "#,
        );
        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.anchors, AnchorsSection { a: 120.0, c: 50.0, b: 100.0 });
        assert_eq!(cfg.calculation.history_size, 8);
        assert_eq!(cfg.calculation.distance_offset, 30.0);
        assert!(!cfg.calculation.publish_results);
        assert_eq!(cfg.logging.level, LogLevel::Minimal);
        assert_eq!(cfg.logging.csv_path, "data/1.csv");
        assert_eq!(cfg.output.device_id, 1);
    }

    #[test]
    fn unknown_log_level_falls_back_to_verbose() {
        let (_dir, path) = write_config("[logging]\nlevel = \"chatty\"\n");
        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.logging.level, LogLevel::Verbose);
    }

    #[test]
    fn unparseable_file_is_recoverable_error() {
        let (_dir, path) = write_config("[calculation\nhistory_size = ");
        let err = load_from(&path).expect_err("parse error");
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn zero_baseline_is_fatal() {
        let mut cfg = Config::default();
        cfg.anchors.a = 0.0;
        let err = cfg.validate().expect_err("invalid");
        assert!(!err.is_recoverable());

        let mut cfg = Config::default();
        cfg.anchors.b = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_history_and_zero_interval_are_fatal() {
        let mut cfg = Config::default();
        cfg.calculation.history_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = Config::default();
        cfg.calculation.average_interval_ms = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            overrides(&[
                ("RANGEFUSE_HISTORY_SIZE", "10"),
                ("RANGEFUSE_DISTANCE_OFFSET", "12.5"),
                ("RANGEFUSE_INTERVAL_MS", "500"),
                ("RANGEFUSE_PUBLISH", "false"),
                ("RANGEFUSE_LOG_LEVEL", "results"),
                ("RANGEFUSE_CSV_PATH", ""),
                ("RANGEFUSE_DEVICE_ID", "7"),
            ]),
        );
        assert_eq!(cfg.calculation.history_size, 10);
        assert_eq!(cfg.calculation.distance_offset, 12.5);
        assert_eq!(cfg.average_interval(), Duration::from_millis(500));
        assert!(!cfg.calculation.publish_results);
        assert_eq!(cfg.logging.level, LogLevel::Results);
        assert_eq!(cfg.csv_path(), None);
        assert_eq!(cfg.output.device_id, 7);
    }

    #[test]
    fn unparseable_overrides_are_ignored() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            overrides(&[
                ("RANGEFUSE_HISTORY_SIZE", "many"),
                ("RANGEFUSE_PUBLISH", "sometimes"),
                ("RANGEFUSE_DEVICE_ID", "-3"),
            ]),
        );
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn apply_env_overrides_reads_process_environment() {
        // SAFETY: no other test reads or writes this env-var.
        unsafe { std::env::set_var("RANGEFUSE_DEVICE_ID", "42") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.output.device_id, 42);
        unsafe { std::env::remove_var("RANGEFUSE_DEVICE_ID") };
    }

    #[test]
    fn service_settings_follow_config() {
        let mut cfg = Config::default();
        cfg.calculation.sensor_timeout_ms = 0;
        cfg.output.device_id = 3;
        let settings = cfg.service_settings();
        assert_eq!(settings.sensor_timeout, None);
        assert_eq!(settings.device_id, 3);
        assert_eq!(settings.engine, EngineConfig::default());
    }
}
