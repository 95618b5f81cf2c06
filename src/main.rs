//! Monolinux harness - end-to-end tests for a Monolinux image
//!
//! Boots the image with the configured run command, drives its console
//! through the test suite and exits with the number of failed cases.

use anyhow::Context;
use clap::Parser;
use monolinux_harness::cli::{format_report, CliResult, OutputFormat};
use monolinux_harness::config::{HarnessConfig, DEFAULT_CONFIG_FILE};
use monolinux_harness::core::logger::{LineLogger, LineSink, TextSink, TracingSink, Tee, TranscriptSink};
use monolinux_harness::core::sequencer::Sequencer;
use monolinux_harness::core::services::{HttpFileServer, MockService};
use monolinux_harness::core::session::Session;
use monolinux_harness::suite::{test_cases, Harness};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Monolinux end-to-end test harness
#[derive(Parser, Debug)]
#[command(name = "monolinux-harness", version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "MONOLINUX_HARNESS_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Command that builds and boots the image
    #[arg(long)]
    command: Option<String>,

    /// Expect timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Directory served by the HTTP file server
    #[arg(long)]
    http_root: Option<PathBuf>,

    /// Write a console transcript to this file
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Run only this case (repeatable)
    #[arg(long = "only", value_name = "CASE")]
    only: Vec<String>,

    /// List the test cases and exit
    #[arg(long)]
    list: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = match run(&cli) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            CliResult::fatal(format!("{e:#}"))
        }
    };

    outcome.to_exit_code()
}

fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    let mut config = HarnessConfig::load_or_default(&cli.config)?;
    apply_overrides(&mut config, cli);
    init_tracing(&config, cli);

    let mut sequencer = Sequencer::new().with_cases(test_cases());
    if cli.list {
        for case in sequencer.cases() {
            println!("{:<16} {}", case.name(), case.description());
        }
        return Ok(CliResult::Done);
    }

    if !cli.only.is_empty() {
        sequencer = sequencer.with_filter(cli.only.iter().cloned());
        let unknown = sequencer.unknown_names();
        if !unknown.is_empty() {
            anyhow::bail!("Unknown test case(s): {}", unknown.join(", "));
        }
    }

    let running = sequencer.cancel_handle();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;

    let mut http = HttpFileServer::new(&config.http.root);
    http.start()?;

    info!(command = %config.session.command, "Booting image");
    let session = Session::spawn(&config.session.command, config.session_config(), console_sink(&config)?)?;
    let mut harness = Harness::new(session);

    let run_result = sequencer.run(&mut harness);

    if let Err(e) = harness.session.terminate() {
        warn!(error = %e, "Emulator exit failed");
    }
    if let Err(e) = harness.mqtt.stop() {
        warn!(error = %e, "MQTT broker stop failed");
    }
    http.stop()?;

    let result = run_result?;
    if !cli.quiet || cli.format == OutputFormat::Json {
        print!("{}", format_report(&result, cli.format)?);
        if cli.format == OutputFormat::Json {
            println!();
        }
    }

    if result.cancelled {
        warn!("Run interrupted");
    }
    Ok(CliResult::Run(result))
}

fn apply_overrides(config: &mut HarnessConfig, cli: &Cli) {
    if let Some(command) = &cli.command {
        config.session.command = command.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.session.timeout_secs = timeout;
    }
    if let Some(root) = &cli.http_root {
        config.http.root = root.clone();
    }
    if let Some(path) = &cli.transcript {
        config.logging.transcript = Some(path.clone());
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    } else if cli.quiet {
        config.logging.level = "error".to_string();
    }
}

fn init_tracing(config: &HarnessConfig, cli: &Cli) {
    let filter = if cli.verbose || cli.quiet {
        EnvFilter::new(&config.logging.level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // Machine-readable reports get machine-readable logs
    if cli.format == OutputFormat::Json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the tee for console output: tracing, a transcript file, both, or
/// nothing
fn console_sink(config: &HarnessConfig) -> anyhow::Result<Option<Box<dyn TextSink>>> {
    let transcript = match &config.logging.transcript {
        Some(path) => Some(
            TranscriptSink::create(path)
                .with_context(|| format!("Failed to open transcript {}", path.display()))?,
        ),
        None => None,
    };

    let lines: Option<Box<dyn LineSink>> = match (config.session.echo, transcript) {
        (true, Some(file)) => Some(Box::new(Tee(TracingSink, file))),
        (true, None) => Some(Box::new(TracingSink)),
        (false, Some(file)) => Some(Box::new(file)),
        (false, None) => None,
    };

    Ok(lines.map(|sink| Box::new(LineLogger::new(sink)) as Box<dyn TextSink>))
}
