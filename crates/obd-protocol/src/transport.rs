//! Byte-level transports
//!
//! A [`Transport`] moves raw bytes and knows nothing about lines or prompts.
//! [`SerialTransport`] talks to a real adapter; [`MockTransport`] replays
//! scripted replies for tests and dry runs.

use crate::error::ObdError;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

/// Bidirectional byte stream to an adapter
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Write all bytes; a broken link is `TransportIo`
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ObdError>;

    /// Read up to `max` bytes, waiting at most `timeout`.
    ///
    /// Returns an empty vector when nothing arrived in time.
    async fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, ObdError>;

    /// Release the underlying handle
    async fn close(&mut self) -> Result<(), ObdError>;
}

/// Serial port transport built on `tokio-serial`
pub struct SerialTransport {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    port: String,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    /// Open `port` at `baud_rate`. Must be called from within a tokio runtime.
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self, ObdError> {
        info!("Opening serial port {} at {} baud", port, baud_rate);
        let stream = tokio_serial::new(port, baud_rate)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| ObdError::TransportUnavailable {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            port: port.to_string(),
            stream: Some(stream),
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    fn stream(&mut self) -> Result<&mut SerialStream, ObdError> {
        self.stream
            .as_mut()
            .ok_or_else(|| ObdError::TransportIo(format!("{} is closed", self.port)))
    }
}

impl Transport for SerialTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ObdError> {
        let stream = self.stream()?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, ObdError> {
        let stream = self.stream()?;
        let mut buf = vec![0u8; max];
        match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(Vec::new())
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn close(&mut self) -> Result<(), ObdError> {
        if self.stream.take().is_some() {
            info!("Closed serial port {}", self.port);
        }
        Ok(())
    }
}

type WriteHook = Box<dyn FnMut(&str) + Send>;

#[derive(Default)]
struct MockState {
    /// Reply given every time a command is written
    replies: HashMap<String, Vec<u8>>,
    /// One-shot replies, consumed before `replies`, delivered chunk by chunk
    scripted: HashMap<String, VecDeque<Vec<Vec<u8>>>>,
    /// Bytes waiting to be read, one entry per read call
    pending: VecDeque<Vec<u8>>,
    written: Vec<String>,
    writes_before_failure: Option<usize>,
    simulate: bool,
    tick: u64,
    closed: bool,
    on_write: Option<WriteHook>,
}

/// Scripted in-memory adapter.
///
/// Clones share state, so a test can keep a handle after moving one into a
/// session. Unscripted AT commands answer `OK`, unscripted PIDs `NO DATA`.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock that answers every catalog PID with plausible, varying values
    pub fn simulated() -> Self {
        info!("Creating simulated OBD adapter");
        let mock = Self::new();
        mock.lock().simulate = true;
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer `command` with `reply` every time it is written
    pub fn reply(&self, command: &str, reply: impl AsRef<[u8]>) -> &Self {
        self.lock()
            .replies
            .insert(command.to_ascii_uppercase(), reply.as_ref().to_vec());
        self
    }

    /// Answer the next write of `command` with `chunks`, one chunk per read
    pub fn reply_once(&self, command: &str, chunks: &[&[u8]]) -> &Self {
        self.lock()
            .scripted
            .entry(command.to_ascii_uppercase())
            .or_default()
            .push_back(chunks.iter().map(|c| c.to_vec()).collect());
        self
    }

    /// Let `n` writes succeed, then fail every write after that
    pub fn fail_writes_after(&self, n: usize) -> &Self {
        self.lock().writes_before_failure = Some(n);
        self
    }

    /// Run `hook` with each command as it is written
    pub fn on_write(&self, hook: impl FnMut(&str) + Send + 'static) -> &Self {
        self.lock().on_write = Some(Box::new(hook));
        self
    }

    /// Commands written so far, without their carriage returns
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Transport for MockTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ObdError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(ObdError::TransportIo("mock transport is closed".to_string()));
        }
        if let Some(remaining) = state.writes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(ObdError::TransportIo("mock link broken".to_string()));
            }
            *remaining -= 1;
        }

        let command = String::from_utf8_lossy(bytes)
            .trim_end_matches(['\r', '\n'])
            .to_ascii_uppercase();
        debug!("Mock adapter received {:?}", command);
        state.written.push(command.clone());
        if let Some(hook) = state.on_write.as_mut() {
            hook(&command);
        }

        let scripted = state
            .scripted
            .get_mut(&command)
            .and_then(VecDeque::pop_front);
        let chunks = match scripted {
            Some(chunks) => chunks,
            None => vec![state.default_reply(&command)],
        };
        state.pending.extend(chunks);
        Ok(())
    }

    async fn read(&mut self, max: usize, _timeout: Duration) -> Result<Vec<u8>, ObdError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(ObdError::TransportIo("mock transport is closed".to_string()));
        }
        match state.pending.pop_front() {
            Some(mut chunk) => {
                if chunk.len() > max {
                    let rest = chunk.split_off(max);
                    state.pending.push_front(rest);
                }
                Ok(chunk)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn close(&mut self) -> Result<(), ObdError> {
        self.lock().closed = true;
        Ok(())
    }
}

impl MockState {
    fn default_reply(&mut self, command: &str) -> Vec<u8> {
        if let Some(reply) = self.replies.get(command) {
            return reply.clone();
        }
        if command.starts_with("AT") {
            let reply = if command == "ATZ" { "\r\rELM327 v1.5\r\r>" } else { "OK\r\r>" };
            return reply.as_bytes().to_vec();
        }
        if self.simulate {
            self.tick += 1;
            if let Some(data) = simulated_data(command, self.tick) {
                return format!("{}\r\r>", data).into_bytes();
            }
        }
        b"NO DATA\r\r>".to_vec()
    }
}

/// Pseudo-random but deterministic reply for a catalog PID
fn simulated_data(command: &str, tick: u64) -> Option<String> {
    let code: crate::PidCode = command.parse().ok()?;
    let spec = crate::registry::catalog_lookup(code).ok()?;

    let mut hasher = DefaultHasher::new();
    tick.hash(&mut hasher);
    command.hash(&mut hasher);
    let hash = hasher.finish();

    let data: Vec<u8> = match code.parameter() {
        // RPM: 800-3500 RPM range
        0x0C => {
            let encoded = (800 + (hash % 2700) as u16) * 4;
            encoded.to_be_bytes().to_vec()
        }
        // Speed: 0-120 km/h
        0x0D => vec![(hash % 120) as u8],
        // Temperatures: 70-105°C (stored as value + 40)
        0x05 | 0x0F => vec![(110 + (hash % 35)) as u8],
        // MAF: 5-50 g/s
        0x10 => (500 + (hash % 4500) as u16).to_be_bytes().to_vec(),
        // Module voltage: 12.0-14.5 V
        0x42 => (12_000 + (hash % 2500) as u16).to_be_bytes().to_vec(),
        // Equivalence ratio: around stoichiometric
        0x44 => (31_000 + (hash % 3500) as u16).to_be_bytes().to_vec(),
        0x1F => ((tick / 4) as u16).to_be_bytes().to_vec(),
        _ => {
            let mut bytes = vec![(hash % 200) as u8];
            bytes.resize(spec.decoder.data_bytes(), 0);
            bytes
        }
    };

    let hex: String = data.iter().map(|b| format!("{:02X}", b)).collect();
    Some(format!("{}{}", code.echo_prefix(), hex))
}
