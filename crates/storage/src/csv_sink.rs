//! CSV row sink

use crate::{RowSink, Shape, StorageError};
use obd_protocol::Row;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Header of the leading capture-time column
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// CSV output options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    /// Cell text for an absent reading
    pub null_marker: String,
    /// Prefix every row with its RFC 3339 capture time
    pub timestamp_column: bool,
    /// `fsync` file data after every row, not just flush to the OS
    pub sync: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            null_marker: "NULL".to_string(),
            timestamp_column: true,
            sync: false,
        }
    }
}

/// Writes rows to a truncated CSV file, flushing after each one
pub struct CsvSink {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    options: CsvOptions,
    shape: Shape,
    rows_written: u64,
}

impl CsvSink {
    /// Create or truncate `path`, creating missing parent directories
    pub fn open(path: impl AsRef<Path>, options: CsvOptions) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |e: std::io::Error| StorageError::SinkUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(unavailable)?;
        }
        let file = File::create(&path).map_err(unavailable)?;
        info!("CSV sink opened at '{}'", path.display());

        Ok(Self {
            writer: Some(csv::Writer::from_writer(file)),
            path,
            options,
            shape: Shape::default(),
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>, StorageError> {
        self.writer
            .as_mut()
            .ok_or_else(|| StorageError::Write(format!("{} is closed", self.path.display())))
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        let sync = self.options.sync;
        let writer = self.writer()?;
        writer.flush()?;
        if sync {
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }
}

impl RowSink for CsvSink {
    fn write_header(&mut self, labels: &[&str]) -> Result<(), StorageError> {
        self.shape.set_header(labels.len())?;

        let mut record: Vec<&str> = Vec::with_capacity(labels.len() + 1);
        if self.options.timestamp_column {
            record.push(TIMESTAMP_COLUMN);
        }
        record.extend_from_slice(labels);

        self.writer()?.write_record(&record)?;
        self.flush()?;
        debug!("CSV header written: {:?}", record);
        Ok(())
    }

    fn append_row(&mut self, row: &Row) -> Result<(), StorageError> {
        self.shape.check_row(row)?;

        let mut record = Vec::with_capacity(row.len() + 1);
        if self.options.timestamp_column {
            record.push(row.captured_at.to_rfc3339());
        }
        record.extend(row.render(&self.options.null_marker));

        self.writer()?.write_record(&record)?;
        self.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if self.writer.is_some() {
            self.flush()?;
            self.writer = None;
            info!(
                "CSV sink closed after {} rows ('{}')",
                self.rows_written,
                self.path.display()
            );
        }
        Ok(())
    }
}
