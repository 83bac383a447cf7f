//! Append-only CSV sink for result records
//!
//! The header is written once when the file is created. Every record is
//! flushed and synced before `append` returns, so a process killed at any
//! point leaves a header-prefixed file of complete records.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::{ResultRecord, RESULT_COLUMNS};

/// Timestamp format used in output and archive file names
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving `output_<timestamp>.csv` files
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

/// `<prefix>_<YYYYMMDD_HHMMSS>.csv`
pub fn timestamped_file_name(prefix: &str, at: DateTime<Local>) -> String {
    format!("{prefix}_{}.csv", at.format(FILE_TIMESTAMP_FORMAT))
}

/// Incremental writer of result records
pub struct ResultSink {
    writer: csv::Writer<File>,
    path: PathBuf,
    written: usize,
}

impl ResultSink {
    /// Create a new output file and write the header
    ///
    /// # Errors
    ///
    /// Fails with `Error::Io` if the file already exists, so a previous run
    /// is never overwritten.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                Error::with_source(format!("Failed to create output file {}", path.display()), e)
            })?;

        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let mut sink = Self {
            writer,
            path: path.to_path_buf(),
            written: 0,
        };

        sink.writer.write_record(RESULT_COLUMNS)?;
        sink.commit()?;

        tracing::info!(path = %path.display(), "Created output file");
        Ok(sink)
    }

    /// Create `output_<timestamp>.csv` inside `dir`
    pub fn create_timestamped(dir: &Path, at: DateTime<Local>) -> Result<Self> {
        Self::create(&dir.join(timestamped_file_name("output", at)))
    }

    /// Append one record and make it durable
    pub fn append(&mut self, record: &ResultRecord) -> Result<()> {
        self.writer.serialize(record)?;
        self.commit()?;
        self.written += 1;
        Ok(())
    }

    /// Output file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended so far
    pub fn written(&self) -> usize {
        self.written
    }

    fn commit(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}
