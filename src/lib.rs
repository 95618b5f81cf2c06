//! # Monolinux Harness
//!
//! End-to-end test harness for a Monolinux image running under QEMU:
//! - Device session over a pseudoterminal with ordered expect matching
//! - Line logging of console output
//! - Mock HTTP file server, MQTT broker and TCP probe
//! - Sequencer running the test cases and computing the exit status
//!
//! ## Example
//!
//! ```rust,no_run
//! use monolinux_harness::{Session, SessionConfig};
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = SessionConfig::new(Duration::from_secs(30));
//!     let mut session = Session::spawn("make -s run", config, None)?;
//!
//!     session.expect_exact("Welcome to Monolinux!")?;
//!     session.send("test_lzma")?;
//!     session.expect_ordered("LZMA decoder init successful.\n")?;
//!     session.terminate()?;
//!
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod suite;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{ConfigError, HarnessConfig};
pub use crate::core::logger::{LineLogger, LineSink, MemorySink, TextSink, TracingSink, TranscriptSink};
pub use crate::core::sequencer::{CaseError, CaseResult, Sequencer, SequencerResult, TestCase, TestStatus};
pub use crate::core::services::{
    HttpFileServer, MockService, MqttBrokerService, ServiceError, ServiceKind, ServiceState, TcpProbe,
};
pub use crate::core::session::{LineEnding, Session, SessionConfig, SessionError};
pub use crate::core::transport::{loopback, LoopbackDevice, Transport};
pub use crate::suite::{test_cases, Harness};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
