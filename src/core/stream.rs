//! Append-only console buffer with a blocking search
//!
//! One producer (the session's reader thread) appends decoded output; one
//! consumer (the session) searches forward from its cursor, sleeping on a
//! condition variable until new output arrives, the deadline passes, or the
//! stream closes. Output is never removed, so offsets stay valid for the
//! lifetime of the buffer.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Location of a match in the buffer, as byte offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// First byte of the match
    pub start: usize,
    /// One past the last byte of the match
    pub end: usize,
}

/// Why a search ended without a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The deadline passed
    Timeout,
    /// The stream ended
    Closed,
}

#[derive(Debug, Default)]
struct BufferState {
    text: String,
    closed: bool,
}

/// Shared console output buffer
#[derive(Debug, Default)]
pub struct ConsoleBuffer {
    state: Mutex<BufferState>,
    changed: Condvar,
}

impl ConsoleBuffer {
    /// Create an empty, open buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append output and wake the consumer
    pub fn append(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.state.lock().text.push_str(chunk);
        self.changed.notify_all();
    }

    /// Mark the end of the stream
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }

    /// Check whether the stream has ended
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Total bytes received so far
    pub fn len(&self) -> usize {
        self.state.lock().text.len()
    }

    /// Check whether nothing was received yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the output from `start` on, at most `limit` bytes from the end
    pub fn tail(&self, start: usize, limit: usize) -> String {
        let state = self.state.lock();
        let text = &state.text;
        let from = floor_boundary(text, start.max(text.len().saturating_sub(limit)));
        text[from..].to_string()
    }

    /// Find `needle` at or after byte offset `start`, waiting up to `timeout`
    /// for it to arrive.
    ///
    /// Bytes before `start` are never examined.
    pub fn find_from(&self, start: usize, needle: &str, timeout: Duration) -> Result<Match, WaitError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let mut scan_from = floor_boundary(&state.text, start);
        let mut timed_out = false;

        loop {
            if let Some(offset) = state.text[scan_from..].find(needle) {
                let start = scan_from + offset;
                return Ok(Match {
                    start,
                    end: start + needle.len(),
                });
            }

            // A match can only begin in the last needle.len() - 1 bytes seen.
            let keep = needle.len().saturating_sub(1);
            scan_from = floor_boundary(&state.text, scan_from.max(state.text.len().saturating_sub(keep)));

            if state.closed {
                return Err(WaitError::Closed);
            }
            if timed_out {
                return Err(WaitError::Timeout);
            }
            timed_out = self.changed.wait_until(&mut state, deadline).timed_out();
        }
    }
}

fn floor_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_find_existing_output() {
        let buffer = ConsoleBuffer::new();
        buffer.append("Welcome to Monolinux!\n$ ");

        let m = buffer.find_from(0, "$ ", Duration::from_millis(10)).unwrap();
        assert_eq!(m, Match { start: 22, end: 24 });
    }

    #[test]
    fn test_never_matches_before_start() {
        let buffer = ConsoleBuffer::new();
        buffer.append("Client accepted.\n");

        let result = buffer.find_from(5, "Client", Duration::from_millis(20));
        assert_eq!(result, Err(WaitError::Timeout));
    }

    #[test]
    fn test_waits_for_split_needle() {
        let buffer = Arc::new(ConsoleBuffer::new());
        let producer = buffer.clone();

        let handle = thread::spawn(move || {
            for part in ["Listening for cli", "ents on port ", "15000.\n"] {
                thread::sleep(Duration::from_millis(20));
                producer.append(part);
            }
        });

        let m = buffer
            .find_from(0, "clients on port 15000.", Duration::from_secs(5))
            .unwrap();
        assert_eq!(m.start, "Listening for ".len());
        handle.join().unwrap();
    }

    #[test]
    fn test_closed_stream_ends_wait() {
        let buffer = Arc::new(ConsoleBuffer::new());
        let producer = buffer.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.append("Kernel panic\n");
            producer.close();
        });

        let result = buffer.find_from(0, "never printed", Duration::from_secs(5));
        assert_eq!(result, Err(WaitError::Closed));
        handle.join().unwrap();
    }

    #[test]
    fn test_output_before_close_still_matches() {
        let buffer = ConsoleBuffer::new();
        buffer.append("last words\n");
        buffer.close();

        assert!(buffer.find_from(0, "last words", Duration::ZERO).is_ok());
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        let buffer = ConsoleBuffer::new();
        buffer.append("abc\u{e9}def");

        assert_eq!(buffer.tail(0, 3), "def");
        assert_eq!(buffer.tail(0, 4), "\u{e9}def");
        assert_eq!(buffer.tail(6, 100), "ef");
    }
}
