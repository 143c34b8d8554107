//! In-memory row sink

use crate::{RowSink, Shape, StorageError};
use obd_protocol::Row;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    header: Option<Vec<String>>,
    rows: Vec<Row>,
    shape: Shape,
    closed: bool,
}

/// Keeps rows in memory. Clones share the same storage, so a handle kept by a
/// test sees everything written through a clone handed to the poller.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn header(&self) -> Option<Vec<String>> {
        self.lock().header.clone()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.lock().rows.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl RowSink for MemorySink {
    fn write_header(&mut self, labels: &[&str]) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.shape.set_header(labels.len())?;
        state.header = Some(labels.iter().map(|l| l.to_string()).collect());
        Ok(())
    }

    fn append_row(&mut self, row: &Row) -> Result<(), StorageError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StorageError::Write("memory sink is closed".to_string()));
        }
        state.shape.check_row(row)?;
        state.rows.push(row.clone());
        debug!("Stored row {} in memory", state.rows.len());
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use obd_protocol::Reading;

    #[test]
    fn test_shared_handle() {
        let handle = MemorySink::new();
        let mut sink = handle.clone();

        sink.write_header(&["RPM"]).unwrap();
        sink.append_row(&Row::new(Utc::now(), vec![Some(Reading::Integer(750))]))
            .unwrap();
        sink.close().unwrap();

        assert_eq!(handle.header(), Some(vec!["RPM".to_string()]));
        assert_eq!(handle.rows().len(), 1);
        assert!(handle.is_closed());
    }
}
