//! Protocol Session for ELM327 Adapters
//!
//! Turns one command into at most one matched response line. The adapter has
//! no length framing; replies end with a `>` prompt that may or may not arrive
//! within a single read, so the session either waits a settle delay and takes
//! whatever is buffered, or accumulates reads until the prompt shows up.

use crate::error::{ObdError, ResponseError};
use crate::pid::PidSpec;
use crate::protocol::{AdapterOptions, InitStep};
use crate::reading::Reading;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Ready prompt printed by the adapter after every reply
pub const PROMPT: char = '>';

/// Service 01 positive response marker
pub const POSITIVE_RESPONSE: &str = "41";

/// Default wait between writing a PID command and reading its reply
pub const DEFAULT_QUERY_SETTLE: Duration = Duration::from_millis(300);

/// Default number of bytes read per exchange
pub const DEFAULT_READ_BUDGET: usize = 200;

/// Default read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// How a reply is collected after a command is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadMode {
    /// Sleep the settle delay, then take one read of whatever is buffered
    #[default]
    Settle,
    /// Keep reading until the prompt arrives, the budget fills or the timeout expires
    UntilPrompt,
}

/// Session timing and initialization settings
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Adapter configuration commands sent by `initialize`, in order
    pub init: Vec<InitStep>,
    pub read_mode: ReadMode,
    pub query_settle: Duration,
    /// Maximum bytes collected for one reply
    pub read_budget: usize,
    pub read_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init: AdapterOptions::default().init_sequence(),
            read_mode: ReadMode::Settle,
            query_settle: DEFAULT_QUERY_SETTLE,
            read_budget: DEFAULT_READ_BUDGET,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Unparsed reply bytes and the command that produced them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExchange {
    pub command: String,
    pub bytes: Vec<u8>,
}

impl RawExchange {
    /// Normalised, non-empty reply lines
    pub fn lines(&self) -> Vec<String> {
        response_lines(&self.bytes)
    }

    /// Reply bytes with control characters escaped, for logs
    pub fn escaped(&self) -> String {
        self.bytes.trim_ascii().escape_ascii().to_string()
    }
}

/// Result of one PID query
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub raw: RawExchange,
    pub outcome: Result<Reading, ResponseError>,
}

impl Exchange {
    /// The decoded reading, or `None` for any kind of miss
    pub fn reading(&self) -> Option<Reading> {
        self.outcome.as_ref().ok().copied()
    }
}

/// Split raw reply bytes into normalised lines.
///
/// Lines break on `\r` and `\n` in any combination. Leading prompt characters
/// and all whitespace are removed and hex is upper-cased; lines left empty
/// (blank or prompt-only) are dropped.
pub fn response_lines(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .split(['\r', '\n'])
        .map(|line| {
            line.trim()
                .trim_start_matches(PROMPT)
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_uppercase()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// First line carrying the positive response prefix
pub fn first_positive_line(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .map(String::as_str)
        .find(|line| line.starts_with(POSITIVE_RESPONSE))
}

/// Owns the transport for the lifetime of a run
pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    initialized: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            initialized: false,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Send the initialization sequence, discarding replies.
    ///
    /// Failures are logged and skipped since the adapter may still answer PID
    /// queries. Returns the number of steps that failed.
    pub async fn initialize(&mut self) -> usize {
        info!("Initializing OBD adapter ({} commands)", self.config.init.len());
        let steps = self.config.init.clone();
        let mut failures = 0;

        for step in &steps {
            match self.send_and_collect(&step.command, step.settle, ReadMode::Settle).await {
                Ok(raw) => debug!("Init {} -> {}", step.command, raw.escaped()),
                Err(e) => {
                    failures += 1;
                    warn!("Init command {} failed: {}", step.command, e);
                }
            }
        }

        self.initialized = true;
        if failures == 0 {
            info!("OBD adapter initialized successfully");
        } else {
            warn!("OBD adapter initialized with {} failed commands", failures);
        }
        failures
    }

    /// Query one PID.
    ///
    /// Only transport failures are errors. A reply without a positive line,
    /// or whose first positive line fails to decode, is a miss in `outcome`.
    pub async fn query(&mut self, spec: &PidSpec) -> Result<Exchange, ObdError> {
        let raw = self
            .send_and_collect(&spec.code.command(), self.config.query_settle, self.config.read_mode)
            .await?;

        let lines = raw.lines();
        let outcome = match first_positive_line(&lines) {
            Some(line) => spec.try_decode(line).map_err(ResponseError::from),
            None => Err(ResponseError::NoMatchingResponseLine),
        };

        match &outcome {
            Ok(reading) => debug!("PID {} ({}) = {}", spec.code, spec.label, reading),
            Err(e) => debug!("PID {} ({}) missed: {}", spec.code, spec.label, e),
        }
        Ok(Exchange { raw, outcome })
    }

    /// Write `command` followed by a carriage return and collect the reply
    pub async fn send_and_collect(
        &mut self,
        command: &str,
        settle: Duration,
        mode: ReadMode,
    ) -> Result<RawExchange, ObdError> {
        let mut frame = Vec::with_capacity(command.len() + 1);
        frame.extend_from_slice(command.as_bytes());
        frame.push(b'\r');
        self.transport.write(&frame).await?;

        let bytes = match mode {
            ReadMode::Settle => {
                tokio::time::sleep(settle).await;
                self.transport
                    .read(self.config.read_budget, self.config.read_timeout)
                    .await?
            }
            ReadMode::UntilPrompt => self.read_until_prompt().await?,
        };

        Ok(RawExchange {
            command: command.to_string(),
            bytes,
        })
    }

    async fn read_until_prompt(&mut self) -> Result<Vec<u8>, ObdError> {
        let budget = self.config.read_budget;
        let deadline = Instant::now() + self.config.read_timeout;
        let mut buffer = Vec::with_capacity(budget);

        while buffer.len() < budget {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let chunk = self.transport.read(budget - buffer.len(), remaining).await?;
            if chunk.is_empty() {
                break;
            }
            buffer.extend_from_slice(&chunk);
            if chunk.contains(&(PROMPT as u8)) {
                break;
            }
        }
        Ok(buffer)
    }

    /// Close the transport
    pub async fn close(&mut self) -> Result<(), ObdError> {
        info!("Closing OBD session");
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::pid::PidCode;
    use crate::registry::catalog_lookup;
    use crate::transport::MockTransport;

    fn spec(code: &str) -> PidSpec {
        catalog_lookup(code.parse::<PidCode>().unwrap()).unwrap()
    }

    fn session(mock: &MockTransport) -> Session<MockTransport> {
        Session::new(mock.clone(), SessionConfig::default())
    }

    #[test]
    fn test_response_lines() {
        let lines = response_lines(b"\r\n41 0C 1A F8\r\r\n>");
        assert_eq!(lines, vec!["410C1AF8"]);

        let lines = response_lines(b">\r\n\r\n>>\r");
        assert!(lines.is_empty());

        let lines = response_lines(b"SEARCHING...\r410c1af8\n>");
        assert_eq!(lines, vec!["SEARCHING...", "410C1AF8"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_decodes_first_positive_line() {
        let mock = MockTransport::new();
        mock.reply("010C", "SEARCHING...\r410C1AF8\r410C0000\r\r>");
        let mut session = session(&mock);

        let exchange = session.query(&spec("010C")).await.unwrap();
        // 0x1AF8 = 6904, 6904 / 4 = 1726
        assert_eq!(exchange.reading(), Some(Reading::Integer(1726)));
        assert_eq!(mock.written(), vec!["010C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_only_reply_is_absent() {
        let mock = MockTransport::new();
        mock.reply("0105", "\r\n>\r\n");
        let mut session = session(&mock);

        let exchange = session.query(&spec("0105")).await.unwrap();
        assert_eq!(exchange.outcome, Err(ResponseError::NoMatchingResponseLine));
        assert_eq!(exchange.raw.bytes, b"\r\n>\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_reply_is_absent() {
        let mock = MockTransport::new();
        let mut session = session(&mock);

        let exchange = session.query(&spec("010F")).await.unwrap();
        assert_eq!(exchange.reading(), None);
        assert_eq!(exchange.raw.escaped(), "NO DATA\\r\\r>");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_pid_line_is_not_decoded() {
        let mock = MockTransport::new();
        mock.reply("0105", "41047A\r41057A\r\r>");
        let mut session = session(&mock);

        // first-match policy: the 4104 line is picked and rejected, 4105 is never tried
        let exchange = session.query(&spec("0105")).await.unwrap();
        assert!(matches!(
            exchange.outcome,
            Err(ResponseError::Decode(DecodeError::PrefixMismatch { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_mode_misses_split_reply() {
        let mock = MockTransport::new();
        mock.reply_once("0105", &[b"41", b"057A\r\r>"]);
        let mut session = session(&mock);

        let exchange = session.query(&spec("0105")).await.unwrap();
        assert_eq!(exchange.reading(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_prompt_mode_joins_split_reply() {
        let mock = MockTransport::new();
        mock.reply_once("0105", &[b"41", b"05", b"7A\r\r>"]);
        let config = SessionConfig {
            read_mode: ReadMode::UntilPrompt,
            ..Default::default()
        };
        let mut session = Session::new(mock.clone(), config);

        let exchange = session.query(&spec("0105")).await.unwrap();
        assert_eq!(exchange.reading(), Some(Reading::Integer(82)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_sends_sequence_and_tolerates_failures() {
        let mock = MockTransport::new();
        mock.fail_writes_after(3);
        let mut session = session(&mock);

        let failures = session.initialize().await;
        assert!(session.is_initialized());
        assert_eq!(failures, 3);
        assert_eq!(mock.written(), vec!["ATZ", "ATE0", "ATL0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_propagates() {
        let mock = MockTransport::new();
        mock.fail_writes_after(0);
        let mut session = session(&mock);

        let err = session.query(&spec("010C")).await.unwrap_err();
        assert!(matches!(err, ObdError::TransportIo(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_transport() {
        let mock = MockTransport::new();
        let mut session = session(&mock);
        session.close().await.unwrap();
        assert!(mock.is_closed());
    }
}
