//! Storage Layer
//!
//! Append-only sinks for poll rows: a CSV file that is flushed after every
//! row, and an in-memory sink for tests.

mod csv_sink;
mod memory;

pub use csv_sink::{CsvOptions, CsvSink, TIMESTAMP_COLUMN};
pub use memory::MemorySink;

use obd_protocol::Row;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Sink unavailable at {path}: {reason}")]
    SinkUnavailable { path: String, reason: String },
    #[error("Write error: {0}")]
    Write(String),
    #[error("Header already written")]
    HeaderAlreadyWritten,
    #[error("Row appended before header")]
    HeaderMissing,
    #[error("Row has {actual} columns, header has {expected}")]
    ColumnMismatch { expected: usize, actual: usize },
}

impl From<csv::Error> for StorageError {
    fn from(err: csv::Error) -> Self {
        StorageError::Write(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Write(err.to_string())
    }
}

/// Destination for poll rows.
///
/// The header is written exactly once, before any row. Every appended row must
/// have one cell per header label and is durable once `append_row` returns.
pub trait RowSink {
    fn write_header(&mut self, labels: &[&str]) -> Result<(), StorageError>;

    fn append_row(&mut self, row: &Row) -> Result<(), StorageError>;

    fn close(&mut self) -> Result<(), StorageError>;
}

impl<S: RowSink + ?Sized> RowSink for Box<S> {
    fn write_header(&mut self, labels: &[&str]) -> Result<(), StorageError> {
        (**self).write_header(labels)
    }

    fn append_row(&mut self, row: &Row) -> Result<(), StorageError> {
        (**self).append_row(row)
    }

    fn close(&mut self) -> Result<(), StorageError> {
        (**self).close()
    }
}

/// Header/row shape bookkeeping shared by the sinks
#[derive(Debug, Default, Clone, Copy)]
struct Shape {
    columns: Option<usize>,
}

impl Shape {
    fn set_header(&mut self, columns: usize) -> Result<(), StorageError> {
        if self.columns.is_some() {
            return Err(StorageError::HeaderAlreadyWritten);
        }
        self.columns = Some(columns);
        Ok(())
    }

    fn check_row(&self, row: &Row) -> Result<(), StorageError> {
        match self.columns {
            None => Err(StorageError::HeaderMissing),
            Some(expected) if expected != row.len() => Err(StorageError::ColumnMismatch {
                expected,
                actual: row.len(),
            }),
            Some(_) => Ok(()),
        }
    }
}
