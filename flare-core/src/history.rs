//! Session history records
//!
//! A write-only record of what happened: status messages with their error
//! codes, and timed actions (application open/close, each recording).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use crate::error::{CaptureError, Result};

/// Severity of a status record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Info,
    Warning,
    Error,
}

impl Status {
    /// Status matching an error
    pub fn for_error(err: &CaptureError) -> Self {
        if err.is_warning() {
            Status::Warning
        } else {
            Status::Error
        }
    }

    /// Status matching an error callback code
    pub fn for_code(code: i32) -> Self {
        if code == CaptureError::SessionRecreated(String::new()).code() {
            Status::Warning
        } else {
            Status::Error
        }
    }
}

/// Timed action recorded in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    OpenApp,
    Record,
    CloseApp,
}

/// One line of the history file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Log {
        timestamp: u64,
        status: Status,
        message: String,
        code: i32,
    },
    History {
        timestamp: u64,
        action: HistoryAction,
        elapsed_secs: u64,
    },
}

/// Sink for session records
pub trait EventLog: Send + Sync {
    /// Record a status message
    fn log(&self, status: Status, message: &str, code: i32) -> Result<()>;

    /// Record a completed action and how long it lasted
    fn history(&self, action: HistoryAction, elapsed_secs: u64) -> Result<()>;
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Records as structured tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl EventLog for TracingLog {
    fn log(&self, status: Status, message: &str, code: i32) -> Result<()> {
        match status {
            Status::Info => info!(code, "{}", message),
            Status::Warning => warn!(code, "{}", message),
            Status::Error => error!(code, "{}", message),
        }
        Ok(())
    }

    fn history(&self, action: HistoryAction, elapsed_secs: u64) -> Result<()> {
        info!(?action, elapsed_secs, "Session history");
        Ok(())
    }
}

/// Appends records to a JSON-lines file
pub struct JsonLinesLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl std::fmt::Debug for JsonLinesLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesLog").field("path", &self.path).finish()
    }
}

impl JsonLinesLog {
    /// Default history file (~/.local/share/flare/history.jsonl)
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("flare").join("history.jsonl"))
    }

    /// Open (creating if needed) a history file for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("History file: {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the history file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| CaptureError::config(format!("Failed to serialize record: {}", e)))?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Read every record back from a history file
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn read(path: impl AsRef<Path>) -> Result<Vec<Record>> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut records = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping history line {}: {}", number + 1, e),
            }
        }
        Ok(records)
    }
}

impl EventLog for JsonLinesLog {
    fn log(&self, status: Status, message: &str, code: i32) -> Result<()> {
        self.append(&Record::Log {
            timestamp: now_secs(),
            status,
            message: message.to_string(),
            code,
        })
    }

    fn history(&self, action: HistoryAction, elapsed_secs: u64) -> Result<()> {
        self.append(&Record::History {
            timestamp: now_secs(),
            action,
            elapsed_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.jsonl");

        let log = JsonLinesLog::open(&path).unwrap();
        log.history(HistoryAction::OpenApp, 0).unwrap();
        log.log(Status::Warning, "session rebuilt", -11).unwrap();
        log.history(HistoryAction::Record, 42).unwrap();
        drop(log);

        let records = JsonLinesLog::read(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(
            records[0],
            Record::History {
                action: HistoryAction::OpenApp,
                elapsed_secs: 0,
                ..
            }
        ));
        match &records[1] {
            Record::Log {
                status,
                message,
                code,
                ..
            } => {
                assert_eq!(*status, Status::Warning);
                assert_eq!(message, "session rebuilt");
                assert_eq!(*code, -11);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_action_names() {
        let json = serde_json::to_string(&HistoryAction::CloseApp).unwrap();
        assert_eq!(json, "\"CLOSE_APP\"");
    }

    #[test]
    fn test_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        JsonLinesLog::open(&path)
            .unwrap()
            .history(HistoryAction::OpenApp, 0)
            .unwrap();
        JsonLinesLog::open(&path)
            .unwrap()
            .history(HistoryAction::CloseApp, 5)
            .unwrap();
        assert_eq!(JsonLinesLog::read(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_status_for_error() {
        assert_eq!(
            Status::for_error(&CaptureError::SessionRecreated("x".into())),
            Status::Warning
        );
        assert_eq!(Status::for_error(&CaptureError::NoSourcesFound), Status::Error);
        assert_eq!(Status::for_code(-11), Status::Warning);
        assert_eq!(Status::for_code(-6), Status::Error);
    }
}
