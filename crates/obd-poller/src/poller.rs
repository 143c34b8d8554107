//! Poller Implementation

use chrono::Utc;
use obd_protocol::{ObdError, PidRegistry, Reading, Row, Session, Transport};
use std::fmt;
use std::time::Duration;
use storage::{RowSink, StorageError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Pause between the end of one cycle and the start of the next
    pub cycle_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(1),
        }
    }
}

/// Lifecycle of a poll run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Initializing,
    Polling,
    Stopping,
    Stopped,
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// External cancellation; a clean shutdown
    Cancelled,
    /// The link broke mid-run; the partial row was still persisted
    TransportFailure(String),
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub rows_written: u64,
    pub stop: StopReason,
}

impl PollSummary {
    pub fn is_clean(&self) -> bool {
        self.stop == StopReason::Cancelled
    }
}

/// Errors that abort a run without a summary
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Sink error: {0}")]
    Sink(#[from] StorageError),
}

enum CycleEnd {
    Complete,
    /// Cancelled after `queried` PIDs completed
    Cancelled { queried: usize },
    TransportFailed(ObdError),
}

/// Polls every configured PID in order and writes one row per cycle
pub struct Poller<T: Transport, S: RowSink> {
    session: Session<T>,
    registry: PidRegistry,
    sink: S,
    config: PollerConfig,
    state: PollerState,
    rows_written: u64,
}

impl<T: Transport, S: RowSink> Poller<T, S> {
    pub fn new(session: Session<T>, registry: PidRegistry, sink: S, config: PollerConfig) -> Self {
        info!("Poller created with {} PIDs", registry.len());
        Self {
            session,
            registry,
            sink,
            config,
            state: PollerState::Idle,
            rows_written: 0,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn registry(&self) -> &PidRegistry {
        &self.registry
    }

    fn transition(&mut self, next: PollerState) {
        debug!("Poller {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run until `cancel` fires or the transport fails.
    ///
    /// Writes the header, initializes the adapter, then loops over poll cycles.
    /// Both the session and the sink are closed before returning.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<PollSummary, PollError> {
        let labels = self.registry.labels();
        if let Err(e) = self.sink.write_header(&labels) {
            self.shutdown().await;
            return Err(e.into());
        }

        self.transition(PollerState::Initializing);
        let initialized = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.session.initialize() => true,
        };

        let stop = if initialized {
            self.transition(PollerState::Polling);
            info!("Polling {} PIDs every {:?}", self.registry.len(), self.config.cycle_interval);
            match self.poll_loop(&cancel).await {
                Ok(stop) => stop,
                Err(e) => {
                    error!("Poll loop aborted: {}", e);
                    self.shutdown().await;
                    return Err(e);
                }
            }
        } else {
            StopReason::Cancelled
        };

        self.shutdown().await;
        let summary = PollSummary {
            rows_written: self.rows_written,
            stop,
        };
        info!("Poller stopped after {} rows ({:?})", summary.rows_written, summary.stop);
        Ok(summary)
    }

    async fn poll_loop(&mut self, cancel: &CancellationToken) -> Result<StopReason, PollError> {
        loop {
            let (cells, end) = self.poll_cycle(cancel).await;

            match end {
                CycleEnd::Complete => self.emit(cells)?,
                CycleEnd::Cancelled { queried } => {
                    if queried > 0 {
                        self.emit(cells)?;
                    }
                    return Ok(StopReason::Cancelled);
                }
                CycleEnd::TransportFailed(e) => {
                    error!("Transport failure, stopping: {}", e);
                    self.emit(cells)?;
                    return Ok(StopReason::TransportFailure(e.to_string()));
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StopReason::Cancelled),
                _ = tokio::time::sleep(self.config.cycle_interval) => {}
            }
        }
    }

    /// Query each PID once. The returned cells always cover the full registry,
    /// with `None` for misses and for PIDs never reached.
    async fn poll_cycle(&mut self, cancel: &CancellationToken) -> (Vec<Option<Reading>>, CycleEnd) {
        let mut cells = vec![None; self.registry.len()];

        for (index, spec) in self.registry.iter().enumerate() {
            if cancel.is_cancelled() {
                return (cells, CycleEnd::Cancelled { queried: index });
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.session.query(spec) => Some(result),
            };

            match result {
                None => return (cells, CycleEnd::Cancelled { queried: index }),
                Some(Err(e)) => return (cells, CycleEnd::TransportFailed(e)),
                Some(Ok(exchange)) => match &exchange.outcome {
                    Ok(reading) => cells[index] = Some(*reading),
                    Err(reason) => warn!(
                        "PID {} ({}) {}; response: {}",
                        spec.code,
                        spec.label,
                        reason,
                        exchange.raw.escaped()
                    ),
                },
            }
        }

        (cells, CycleEnd::Complete)
    }

    fn emit(&mut self, cells: Vec<Option<Reading>>) -> Result<(), PollError> {
        let row = Row::new(Utc::now(), cells);
        self.sink.append_row(&row)?;
        self.rows_written += 1;
        info!("{}", RowEcho(&row));
        Ok(())
    }

    /// Close the session and sink; failures are logged since the run is ending anyway
    async fn shutdown(&mut self) {
        self.transition(PollerState::Stopping);
        if let Err(e) = self.session.close().await {
            warn!("Failed to close session: {}", e);
        }
        if let Err(e) = self.sink.close() {
            error!("Failed to close sink: {}", e);
        }
        self.transition(PollerState::Stopped);
    }
}

/// Console rendering of a row, `value | value | ...`
struct RowEcho<'a>(&'a Row);

impl fmt::Display for RowEcho<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.render("NULL").join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::{MockTransport, SessionConfig};
    use storage::MemorySink;

    fn adapter() -> MockTransport {
        let mock = MockTransport::new();
        mock.reply("0105", "41057A\r\r>");
        mock.reply("010C", "410C1AF8\r\r>");
        mock.reply("010F", "410F50\r\r>");
        // 0111 falls through to NO DATA
        mock
    }

    fn poller(mock: &MockTransport, sink: &MemorySink) -> Poller<MockTransport, MemorySink> {
        Poller::new(
            Session::new(mock.clone(), SessionConfig::default()),
            PidRegistry::default_set().unwrap(),
            sink.clone(),
            PollerConfig::default(),
        )
    }

    /// Cancel once `command` has been written `times` times
    fn cancel_on(mock: &MockTransport, command: &'static str, times: usize) -> CancellationToken {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let mut seen = 0;
        mock.on_write(move |written| {
            if written == command {
                seen += 1;
                if seen == times {
                    trigger.cancel();
                }
            }
        });
        token
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_keep_registry_width() {
        let mock = adapter();
        let sink = MemorySink::new();
        let cancel = cancel_on(&mock, "0105", 3);
        let mut poller = poller(&mock, &sink);

        let summary = poller.run(cancel).await.unwrap();

        assert_eq!(summary.stop, StopReason::Cancelled);
        assert!(summary.is_clean());
        assert_eq!(summary.rows_written, 2);
        assert_eq!(
            sink.header(),
            Some(vec![
                "Coolant".to_string(),
                "RPM".to_string(),
                "TPS".to_string(),
                "Intake Temp".to_string()
            ])
        );

        let rows = sink.rows();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(
                row.cells,
                vec![
                    Some(Reading::Integer(82)),
                    Some(Reading::Integer(1726)),
                    None,
                    Some(Reading::Integer(40)),
                ]
            );
        }
        assert!(rows[0].captured_at <= rows[1].captured_at);
        assert_eq!(poller.state(), PollerState::Stopped);
        assert!(sink.is_closed());
        assert!(mock.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialization_precedes_polling() {
        let mock = adapter();
        let sink = MemorySink::new();
        let cancel = cancel_on(&mock, "010C", 1);
        let mut poller = poller(&mock, &sink);

        poller.run(cancel).await.unwrap();

        let written = mock.written();
        assert_eq!(
            written,
            vec!["ATZ", "ATE0", "ATL0", "ATS0", "ATH0", "ATSP0", "0105", "010C"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_cycle_emits_partial_row() {
        let mock = adapter();
        let sink = MemorySink::new();
        // cancelled while the second PID is in flight
        let cancel = cancel_on(&mock, "010C", 1);
        let mut poller = poller(&mock, &sink);

        let summary = poller.run(cancel).await.unwrap();

        assert_eq!(summary.stop, StopReason::Cancelled);
        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].cells,
            vec![Some(Reading::Integer(82)), None, None, None]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_persists_partial_row() {
        let mock = adapter();
        // 6 init commands, one full cycle of 4, then two more PIDs
        mock.fail_writes_after(12);
        let sink = MemorySink::new();
        let mut poller = poller(&mock, &sink);

        let summary = poller.run(CancellationToken::new()).await.unwrap();

        assert!(matches!(summary.stop, StopReason::TransportFailure(_)));
        assert!(!summary.is_clean());
        let rows = sink.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].len(), 4);
        assert_eq!(
            rows[1].cells,
            vec![Some(Reading::Integer(82)), Some(Reading::Integer(1726)), None, None]
        );
        assert_eq!(poller.state(), PollerState::Stopped);
        assert!(sink.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_init_replies_still_poll() {
        let mock = adapter();
        mock.reply("ATZ", "?\r\r>");
        let sink = MemorySink::new();
        let cancel = cancel_on(&mock, "0105", 2);
        let mut poller = poller(&mock, &sink);

        let summary = poller.run(cancel).await.unwrap();
        assert_eq!(summary.rows_written, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_writes_header_only() {
        let mock = adapter();
        let sink = MemorySink::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut poller = poller(&mock, &sink);

        let summary = poller.run(cancel).await.unwrap();

        assert_eq!(summary.rows_written, 0);
        assert!(sink.header().is_some());
        assert!(sink.rows().is_empty());
        assert!(mock.written().is_empty());
        assert_eq!(poller.state(), PollerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_failure_aborts_before_rows() {
        let mock = adapter();
        let mut sink = MemorySink::new();
        sink.write_header(&["already"]).unwrap();
        let mut poller = poller(&mock, &sink);

        let err = poller.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            PollError::Sink(StorageError::HeaderAlreadyWritten)
        ));
        assert!(mock.written().is_empty());
        assert!(mock.is_closed());
    }

    #[test]
    fn test_row_echo() {
        let row = Row::new(
            Utc::now(),
            vec![Some(Reading::Integer(82)), None, Some(Reading::decimal(35.3, 1))],
        );
        assert_eq!(RowEcho(&row).to_string(), "82 | NULL | 35.3");
    }
}
