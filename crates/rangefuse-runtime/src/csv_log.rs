//! Append-only CSV record of every accepted instant position.
//!
//! ```text
//! time,d1,d2,d3,x,y,z
//! 2025-05-14 09:30:12,90,80,100,61.5,19.25,101.23
//! ```
//!
//! `d1..d3` are the distances as reported (before the offset) and `x, y, z`
//! the rounded instant coordinate.  Timestamps are wall-clock time at UTC+7.
//!
//! Rows travel over a bounded queue to a dedicated writer task, so a slow
//! disk never stalls the engine.  When the queue is full the row is dropped.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};
use rangefuse_types::{Coordinate, FuseError};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const CSV_HEADER: &str = "time,d1,d2,d3,x,y,z";

/// Rows buffered between the engine and the writer task.
pub const QUEUE_DEPTH: usize = 64;

const UTC_OFFSET_SECS: i32 = 7 * 3600;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `YYYY-MM-DD HH:MM:SS` at UTC+7.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(UTC_OFFSET_SECS) {
        Some(tz) => at.with_timezone(&tz).format(TIMESTAMP_FORMAT).to_string(),
        None => at.format(TIMESTAMP_FORMAT).to_string(),
    }
}

/// One line of the log.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub timestamp: String,
    pub raw: [f64; 3],
    pub coordinate: Coordinate,
}

impl CsvRow {
    pub fn new(at: DateTime<Utc>, raw: [f64; 3], coordinate: Coordinate) -> Self {
        Self {
            timestamp: format_timestamp(at),
            raw,
            coordinate,
        }
    }

    pub fn to_line(&self) -> String {
        let [d1, d2, d3] = self.raw;
        let Coordinate { x, y, z } = self.coordinate;
        format!("{},{d1},{d2},{d3},{x},{y},{z}", self.timestamp)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CsvLog
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    /// Prepare `path` for appending: create the parent directory and write
    /// the header when the file does not exist yet.  An existing file is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`FuseError::Io`] when the directory or header cannot be
    /// written.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FuseError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| FuseError::Io(format!("creating {}: {e}", parent.display())))?;
        }
        if !path.exists() {
            std::fs::write(&path, format!("{CSV_HEADER}\n"))
                .map_err(|e| FuseError::Io(format!("writing header to {}: {e}", path.display())))?;
            info!(path = %path.display(), "CSV log created");
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, row: &CsvRow) -> Result<(), FuseError> {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .map_err(|e| FuseError::Io(format!("opening {}: {e}", self.path.display())))?;
        let line = format!("{}\n", row.to_line());
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| FuseError::Io(format!("appending to {}: {e}", self.path.display())))?;
        file.flush()
            .await
            .map_err(|e| FuseError::Io(format!("flushing {}: {e}", self.path.display())))
    }

    /// Move the log onto its own writer task.  The task ends after the last
    /// [`CsvSender`] is dropped and the queue is drained.
    pub fn spawn_writer(self) -> (CsvSender, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<CsvRow>(QUEUE_DEPTH);
        let handle = tokio::spawn(async move {
            while let Some(row) = rx.recv().await {
                match self.append(&row).await {
                    Ok(()) => debug!(path = %self.path.display(), "CSV row written"),
                    Err(e) => error!(error = %e, "CSV write failed"),
                }
            }
            debug!(path = %self.path.display(), "CSV writer drained");
        });
        (CsvSender { tx }, handle)
    }
}

/// Non-blocking producer side of the CSV writer.
#[derive(Debug, Clone)]
pub struct CsvSender {
    tx: mpsc::Sender<CsvRow>,
}

impl CsvSender {
    /// Queue `row` without waiting.  Returns `false` if it was dropped.
    pub fn submit(&self, row: CsvRow) -> bool {
        match self.tx.try_send(row) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("CSV queue full; row dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("CSV writer stopped; row dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_row() -> CsvRow {
        let at = Utc.with_ymd_and_hms(2025, 5, 14, 2, 30, 12).unwrap();
        CsvRow::new(at, [90.0, 80.0, 100.0], Coordinate::new(61.5, 19.25, 101.23))
    }

    #[test]
    fn timestamp_is_utc_plus_seven() {
        let at = Utc.with_ymd_and_hms(2025, 12, 31, 20, 0, 5).unwrap();
        assert_eq!(format_timestamp(at), "2026-01-01 03:00:05");
    }

    #[test]
    fn row_formats_raw_distances_and_coordinate() {
        assert_eq!(sample_row().to_line(), "2025-05-14 09:30:12,90,80,100,61.5,19.25,101.23");
    }

    #[test]
    fn open_creates_directory_and_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("1.csv");

        CsvLog::open(&path).unwrap();
        std::fs::write(&path, format!("{CSV_HEADER}\nexisting\n")).unwrap();
        CsvLog::open(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{CSV_HEADER}\nexisting\n"));
    }

    #[tokio::test]
    async fn writer_appends_rows_in_order_and_drains_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.csv");
        let (sender, handle) = CsvLog::open(&path).unwrap().spawn_writer();

        let first = sample_row();
        let mut second = sample_row();
        second.raw = [95.0, 105.5, 120.0];
        assert!(sender.submit(first.clone()));
        assert!(sender.submit(second.clone()));
        drop(sender);
        handle.await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        assert_eq!(lines, vec![CSV_HEADER.to_string(), first.to_line(), second.to_line()]);
    }
}
