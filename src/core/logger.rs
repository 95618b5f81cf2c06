//! Console line logging
//!
//! The session tees raw console output into a [`TextSink`]. The
//! [`LineLogger`] is the usual one: it buffers fragments until a line feed
//! arrives and hands each completed line to a [`LineSink`].

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source label attached to console lines
pub const DEFAULT_SOURCE: &str = "console";

/// Consumer of raw, arbitrarily fragmented text
pub trait TextSink: Send {
    /// Accept a chunk of output
    fn write(&mut self, chunk: &str);

    /// Push out anything held back
    fn flush(&mut self) {}
}

/// Consumer of completed log lines
pub trait LineSink: Send {
    /// Record one line, without its terminator
    fn record(&mut self, source: &str, line: &str);

    /// Push buffered records to their destination
    fn flush(&mut self) {}
}

impl LineSink for Box<dyn LineSink> {
    fn record(&mut self, source: &str, line: &str) {
        (**self).record(source, line);
    }

    fn flush(&mut self) {
        (**self).flush();
    }
}

/// Splits a character stream into lines
pub struct LineLogger<S> {
    sink: S,
    source: String,
    pending: String,
    lines_emitted: usize,
}

impl<S: LineSink> LineLogger<S> {
    /// Create a logger forwarding to `sink` under the default source label
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            source: DEFAULT_SOURCE.to_string(),
            pending: String::new(),
            lines_emitted: 0,
        }
    }

    /// Set the source label
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Partial line waiting for its terminator
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Number of lines handed to the sink
    pub fn lines_emitted(&self) -> usize {
        self.lines_emitted
    }

}

impl<S: LineSink> TextSink for LineLogger<S> {
    fn write(&mut self, chunk: &str) {
        // Only the new chunk can hold a line feed; earlier text was scanned
        let mut scan_from = self.pending.len();
        self.pending.push_str(chunk);

        while let Some(offset) = self.pending[scan_from..].find('\n') {
            let pos = scan_from + offset;
            scan_from = 0;
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim_end_matches(|c| matches!(c, '\r' | '\n' | '\u{0b}'));
            self.sink.record(&self.source, line);
            self.lines_emitted += 1;
        }
    }

    // A partial line stays pending until its terminator arrives, however long
    // that takes, so there is nothing to do here.
    fn flush(&mut self) {}
}

/// Forwards lines to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LineSink for TracingSink {
    fn record(&mut self, source: &str, line: &str) {
        tracing::info!(target: "console", source, "{}", line);
    }
}

/// A recorded line
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub source: String,
    pub line: String,
}

impl LogRecord {
    /// Create a record stamped now
    pub fn new(source: &str, line: &str) -> Self {
        Self {
            timestamp: Local::now(),
            source: source.to_string(),
            line: line.to_string(),
        }
    }

    /// Format as text
    pub fn to_text(&self, show_timestamp: bool) -> String {
        if show_timestamp {
            format!(
                "[{}] {} {}",
                self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                self.source,
                self.line
            )
        } else {
            format!("{} {}", self.source, self.line)
        }
    }
}

/// Writes lines to a timestamped transcript file
pub struct TranscriptSink {
    file: BufWriter<File>,
    path: PathBuf,
    timestamps: bool,
    lines_logged: usize,
}

impl TranscriptSink {
    /// Open `path` for appending
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            file: BufWriter::new(file),
            path,
            timestamps: true,
            lines_logged: 0,
        })
    }

    /// Set timestamp display
    #[must_use]
    pub fn with_timestamps(mut self, show: bool) -> Self {
        self.timestamps = show;
        self
    }
}

impl LineSink for TranscriptSink {
    fn record(&mut self, source: &str, line: &str) {
        let entry = LogRecord::new(source, line);
        if let Err(e) = writeln!(self.file, "{}", entry.to_text(self.timestamps)) {
            tracing::warn!(path = %self.path.display(), error = %e, "Transcript write failed");
            return;
        }
        self.lines_logged += 1;

        // Flush periodically
        if self.lines_logged % 100 == 0 {
            let _ = self.file.flush();
        }
    }

    fn flush(&mut self) {
        let _ = self.file.flush();
    }
}

impl Drop for TranscriptSink {
    fn drop(&mut self) {
        let _ = self.file.flush();
    }
}

/// Keeps lines in memory; clones share the same records
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records so far
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Just the line texts
    pub fn lines(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.line.clone()).collect()
    }
}

impl LineSink for MemorySink {
    fn record(&mut self, source: &str, line: &str) {
        self.records.lock().push(LogRecord::new(source, line));
    }
}

/// Sends every line to two sinks
pub struct Tee<A, B>(pub A, pub B);

impl<A: LineSink, B: LineSink> LineSink for Tee<A, B> {
    fn record(&mut self, source: &str, line: &str) {
        self.0.record(source, line);
        self.1.record(source, line);
    }

    fn flush(&mut self) {
        self.0.flush();
        self.1.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &str = "insmod begin\r\nWelcome to Monolinux!\r\n\r\nUptime: 0.52\x0b\r\n$ ";

    #[test]
    fn test_lines_are_stripped() {
        let sink = MemorySink::new();
        let mut logger = LineLogger::new(sink.clone());

        logger.write(TRANSCRIPT);

        assert_eq!(
            sink.lines(),
            vec!["insmod begin", "Welcome to Monolinux!", "", "Uptime: 0.52"]
        );
        assert_eq!(logger.pending(), "$ ");
        assert_eq!(logger.lines_emitted(), 4);
    }

    #[test]
    fn test_fragment_boundaries_do_not_matter() {
        let whole = MemorySink::new();
        let mut logger = LineLogger::new(whole.clone());
        logger.write(TRANSCRIPT);

        let bytewise = MemorySink::new();
        let mut logger = LineLogger::new(bytewise.clone());
        for c in TRANSCRIPT.chars() {
            logger.write(&c.to_string());
        }

        let uneven = MemorySink::new();
        let mut logger = LineLogger::new(uneven.clone());
        let (head, rest) = TRANSCRIPT.split_at(7);
        let (middle, tail) = rest.split_at(19);
        for part in [head, middle, tail] {
            logger.write(part);
        }

        assert_eq!(whole.lines(), bytewise.lines());
        assert_eq!(whole.lines(), uneven.lines());
    }

    #[test]
    fn test_long_line_fed_one_char_at_a_time() {
        let sink = MemorySink::new();
        let mut logger = LineLogger::new(sink.clone());

        let line = "x".repeat(200_000);
        for c in line.chars() {
            logger.write(&c.to_string());
        }
        assert_eq!(logger.pending().len(), 200_000);
        assert_eq!(logger.lines_emitted(), 0);

        logger.write("\r\nnext");
        assert_eq!(sink.lines(), vec![line]);
        assert_eq!(logger.pending(), "next");
    }

    #[test]
    fn test_partial_line_survives_flush() {
        let sink = MemorySink::new();
        let mut logger = LineLogger::new(sink.clone());

        logger.write("tcp: Conn");
        logger.flush();
        assert!(sink.lines().is_empty());

        logger.write("ected.\n");
        assert_eq!(sink.lines(), vec!["tcp: Connected."]);
    }

    #[test]
    fn test_source_label() {
        let sink = MemorySink::new();
        let mut logger = LineLogger::new(sink.clone()).with_source("qemu");

        logger.write("hello\n");
        assert_eq!(sink.records()[0].source, "qemu");
        assert!(sink.records()[0].to_text(false).starts_with("qemu hello"));
    }

    #[test]
    fn test_transcript_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");

        {
            let sink = TranscriptSink::create(&path).unwrap().with_timestamps(false);
            let mut logger = LineLogger::new(Tee(sink, MemorySink::new()));
            logger.write("first\nsecond\npartial");
            assert_eq!(logger.lines_emitted(), 2);
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "console first\nconsole second\n");
    }
}
