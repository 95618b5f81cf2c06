//! Device session
//!
//! A Session is the single interactive connection to the system under test.
//! Commands go out through the transport's writer; everything the device
//! prints is read by a dedicated thread into a [`ConsoleBuffer`], and the
//! expect operations walk a cursor forward through that buffer.

use super::logger::TextSink;
use super::stream::{ConsoleBuffer, WaitError};
use super::transport::{open_transport, ConsoleProcess, Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Bytes of recent output quoted in a timeout error
const RECENT_OUTPUT_LIMIT: usize = 256;

/// Line ending appended to sent commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// LF only
    #[default]
    Lf,
    /// CR+LF
    Crlf,
    /// CR only
    Cr,
    /// No line ending
    None,
}

impl LineEnding {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Lf => b"\n",
            Self::Crlf => b"\r\n",
            Self::Cr => b"\r",
            Self::None => b"",
        }
    }
}

impl fmt::Display for LineEnding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lf => write!(f, "lf"),
            Self::Crlf => write!(f, "crlf"),
            Self::Cr => write!(f, "cr"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Session error types
#[derive(Error, Debug)]
pub enum SessionError {
    /// Expected output did not show up in time
    #[error("Timed out after {waited:?} waiting for {expected:?}; recent output: {recent:?}")]
    Timeout {
        /// Line or token being waited for
        expected: String,
        /// Configured wait window
        waited: Duration,
        /// Tail of the unconsumed output
        recent: String,
    },

    /// The output stream ended before the expected text appeared
    #[error("Session closed while waiting for {expected:?}")]
    ClosedWhileWaiting {
        /// Line or token being waited for
        expected: String,
    },

    /// The session has terminated
    #[error("Session closed")]
    Closed,

    /// Text cannot be sent on a Latin-1 console
    #[error("Character {0:?} cannot be sent as Latin-1")]
    Unencodable(char),

    /// No control character exists for the given key
    #[error("No control character for {0:?}")]
    InvalidControl(char),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an expect call waits for its text
    pub timeout: Duration,
    /// Bound on the exit wait in [`Session::terminate`]; `None` waits forever
    pub exit_timeout: Option<Duration>,
    /// Liveness polling interval while exiting
    pub poll_interval: Duration,
    /// Line ending appended by [`Session::send`]
    pub line_ending: LineEnding,
}

impl SessionConfig {
    /// Create a configuration with the given expect timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            exit_timeout: None,
            poll_interval: Duration::from_millis(100),
            line_ending: LineEnding::Lf,
        }
    }

    /// Set the exit wait bound
    #[must_use]
    pub fn exit_timeout(mut self, limit: Option<Duration>) -> Self {
        self.exit_timeout = limit;
        self
    }

    /// Set the line ending
    #[must_use]
    pub fn line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Active session
pub struct Session {
    writer: Box<dyn Write + Send>,
    process: Box<dyn ConsoleProcess>,
    buffer: Arc<ConsoleBuffer>,
    cursor: usize,
    config: SessionConfig,
}

impl Session {
    /// Open a session over the given transport. Console output is teed into
    /// `sink` when one is given.
    pub fn open(
        transport: Transport,
        config: SessionConfig,
        sink: Option<Box<dyn TextSink>>,
    ) -> Result<Self, SessionError> {
        let parts = open_transport(transport)?;
        let buffer = Arc::new(ConsoleBuffer::new());

        spawn_reader(parts.reader, buffer.clone(), sink)?;
        info!(console = %parts.info, timeout = ?config.timeout, "Session opened");

        Ok(Self {
            writer: parts.writer,
            process: parts.process,
            buffer,
            cursor: 0,
            config,
        })
    }

    /// Spawn `command` under a pseudoterminal and open a session on it
    #[cfg(unix)]
    pub fn spawn(
        command: &str,
        config: SessionConfig,
        sink: Option<Box<dyn TextSink>>,
    ) -> Result<Self, SessionError> {
        let pty = super::transport::PtyConfig::new(command);
        Self::open(Transport::Pty(pty), config, sink)
    }

    /// Byte offset of the cursor; everything before it is consumed
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Check whether the process behind the console still runs
    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    /// Send a command followed by the configured line ending
    pub fn send(&mut self, command: &str) -> Result<(), SessionError> {
        self.ensure_open()?;

        let mut data = encode_latin1(command)?;
        data.extend_from_slice(self.config.line_ending.as_bytes());
        debug!(command, "Sending");
        self.write_bytes(&data)
    }

    /// Send the control character for `key` (`'a'` sends 0x01)
    pub fn send_control(&mut self, key: char) -> Result<(), SessionError> {
        self.ensure_open()?;
        let byte = control_byte(key)?;
        self.write_bytes(&[byte])
    }

    /// Wait for each non-blank line of `block`, in order. Other output may
    /// appear between the lines. Returns the number of lines matched.
    pub fn expect_ordered(&mut self, block: &str) -> Result<usize, SessionError> {
        let mut matched = 0;
        for line in block.lines().filter(|line| !line.trim().is_empty()) {
            self.expect_exact(line)?;
            matched += 1;
        }
        Ok(matched)
    }

    /// Wait for `text` anywhere in the unconsumed output and consume up to
    /// the end of it
    pub fn expect_exact(&mut self, text: &str) -> Result<(), SessionError> {
        match self.buffer.find_from(self.cursor, text, self.config.timeout) {
            Ok(found) => {
                trace!(expected = text, start = found.start, end = found.end, "Matched");
                self.cursor = found.end;
                Ok(())
            }
            Err(WaitError::Timeout) => Err(SessionError::Timeout {
                expected: text.to_string(),
                waited: self.config.timeout,
                recent: self.buffer.tail(self.cursor, RECENT_OUTPUT_LIMIT),
            }),
            Err(WaitError::Closed) => Err(SessionError::ClosedWhileWaiting {
                expected: text.to_string(),
            }),
        }
    }

    /// Exit the emulator: send Ctrl-A `x` and wait for the process to go away
    pub fn terminate(&mut self) -> Result<(), SessionError> {
        if self.process.is_alive() {
            info!("Exiting emulator");
            // A console that already went away cannot take the keys.
            let sent = self.send_control('a').and_then(|()| self.write_bytes(b"x"));
            if let Err(e) = sent {
                debug!(error = %e, "Exit sequence not delivered");
            }
        }

        let started = Instant::now();
        while self.process.is_alive() {
            if let Some(limit) = self.config.exit_timeout {
                if started.elapsed() >= limit {
                    warn!(waited = ?limit, "Emulator did not exit, killing it");
                    self.process.kill()?;
                    break;
                }
            }
            thread::sleep(self.config.poll_interval);
        }

        info!("Session terminated");
        Ok(())
    }

    fn ensure_open(&mut self) -> Result<(), SessionError> {
        if self.buffer.is_closed() || !self.process.is_alive() {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let result = self.writer.write_all(data).and_then(|()| self.writer.flush());
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(SessionError::Closed),
            Err(e) => Err(SessionError::Io(e)),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.process.is_alive() {
            if let Err(e) = self.process.kill() {
                warn!(error = %e, "Failed to kill console process");
            }
        }
    }
}

fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    buffer: Arc<ConsoleBuffer>,
    mut sink: Option<Box<dyn TextSink>>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("console-reader".to_string())
        .spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = decode_latin1(&chunk[..n]);
                        if let Some(sink) = sink.as_mut() {
                            sink.write(&text);
                        }
                        buffer.append(&text);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    // A pty master reports EIO once the child side is gone
                    Err(e) => {
                        debug!(error = %e, "Console read ended");
                        break;
                    }
                }
            }

            if let Some(sink) = sink.as_mut() {
                sink.flush();
            }
            buffer.close();
            debug!("Console output closed");
        })
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn encode_latin1(text: &str) -> Result<Vec<u8>, SessionError> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| SessionError::Unencodable(c)))
        .collect()
}

fn control_byte(key: char) -> Result<u8, SessionError> {
    let upper = key.to_ascii_uppercase();
    if ('@'..='_').contains(&upper) {
        Ok(upper as u8 & 0x1f)
    } else {
        Err(SessionError::InvalidControl(key))
    }
}
