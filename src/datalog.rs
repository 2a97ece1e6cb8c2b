use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Errors returned by command record sinks.
#[derive(Debug, Error)]
pub enum DatalogError {
    #[error("failed to open command log `{path}`: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write command record: {0}")]
    Write(#[from] std::io::Error),
    #[error("failed to encode command record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One attempt (or final outcome) of a command, as seen by the host.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Device identity, normally the module MAC.
    pub device: String,
    pub command: String,
    /// Status the caller was hoping for.
    pub expected: u8,
    pub actual: u8,
    /// Set when this attempt failed and will be followed by another.
    pub retry: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Destination for command records.
pub trait DatalogSink: Send + Sync + fmt::Debug {
    /// Stores one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    fn record(&self, record: &CommandRecord) -> Result<(), DatalogError>;
}

/// Appends records as JSON lines to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatalogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| DatalogError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatalogSink for JsonLinesSink {
    fn record(&self, record: &CommandRecord) -> Result<(), DatalogError> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps records in memory; useful for tests and short sessions.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<CommandRecord>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record stored so far.
    #[must_use]
    pub fn records(&self) -> Vec<CommandRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DatalogSink for MemorySink {
    fn record(&self, record: &CommandRecord) -> Result<(), DatalogError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
