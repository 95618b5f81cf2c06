//! CLI Module
//!
//! Exit status mapping and report formats for the harness binary.

pub mod exit_codes;

pub use exit_codes::{CliResult, ExitCodes};

use crate::core::sequencer::SequencerResult;
use clap::ValueEnum;

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format for scripting
    Json,
}

/// Render a run report in the given format
pub fn format_report(result: &SequencerResult, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Text => Ok(result.report()),
        OutputFormat::Json => result.report_json(),
    }
}
