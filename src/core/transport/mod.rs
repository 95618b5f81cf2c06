//! Console transports
//!
//! A transport is the raw byte channel to the system under test:
//! - Pseudoterminal: the run command spawned under a pty
//! - Loopback: an in-process device, used by tests and dry runs

mod loopback;
#[cfg(unix)]
mod pty;

pub use loopback::{loopback, LoopbackDevice, LoopbackTransport};
#[cfg(unix)]
pub use pty::PtyConfig;

use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Transport configuration
pub enum Transport {
    /// Spawn a command under a pseudoterminal
    #[cfg(unix)]
    Pty(PtyConfig),
    /// In-process loopback device
    Loopback(LoopbackTransport),
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Self::Pty(cfg) => f.debug_tuple("Pty").field(cfg).finish(),
            Self::Loopback(_) => f.write_str("Loopback"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Pseudoterminal allocation failed
    #[error("Pseudoterminal allocation failed: {0}")]
    Pty(String),

    /// The console process could not be started
    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        /// Command line that was run
        command: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// Liveness and control of the process behind a console
pub trait ConsoleProcess: Send {
    /// Check whether the process is still running
    fn is_alive(&mut self) -> bool;

    /// Forcefully stop the process and reap it
    fn kill(&mut self) -> io::Result<()>;
}

/// An opened console split into its halves
pub struct ConsoleParts {
    /// Output of the system under test
    pub reader: Box<dyn Read + Send>,
    /// Input to the system under test
    pub writer: Box<dyn Write + Send>,
    /// The process owning the console
    pub process: Box<dyn ConsoleProcess>,
    /// Human-readable description
    pub info: String,
}

/// Open a console from its transport configuration
pub fn open_transport(transport: Transport) -> Result<ConsoleParts, TransportError> {
    match transport {
        #[cfg(unix)]
        Transport::Pty(cfg) => pty::open(&cfg),
        Transport::Loopback(lo) => Ok(lo.into_parts()),
    }
}
