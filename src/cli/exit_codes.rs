//! CLI Exit Codes
//!
//! A completed run exits with the number of failed test cases, so 0 means
//! every case passed. Runs that did not complete use codes no reported
//! failure count reaches.

use crate::core::sequencer::SequencerResult;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Nothing failed
    pub const SUCCESS: u8 = 0;

    /// Harness failure (configuration, spawn, service bind)
    pub const FATAL: u8 = 127;

    /// Run cancelled with Ctrl-C (128 + SIGINT)
    pub const INTERRUPTED: u8 = 130;
}

/// Outcome of a harness invocation
#[derive(Debug)]
pub enum CliResult {
    /// Nothing to run (case listing)
    Done,

    /// The sequencer ran
    Run(SequencerResult),

    /// The run could not complete
    Fatal(String),
}

impl CliResult {
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Done => ExitCodes::SUCCESS,
            Self::Run(result) if result.cancelled => ExitCodes::INTERRUPTED,
            Self::Run(result) => result.exit_code(),
            Self::Fatal(_) => ExitCodes::FATAL,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}
