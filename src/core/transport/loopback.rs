//! Loopback transport
//!
//! Connects a session to an in-process device instead of a real console.
//! The device side emits output text and reads back what the harness sent.

use super::{ConsoleParts, ConsoleProcess};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Harness side of a loopback pair
pub struct LoopbackTransport {
    output_rx: Receiver<Vec<u8>>,
    input_tx: Sender<Vec<u8>>,
    alive: Arc<AtomicBool>,
}

/// Device side of a loopback pair
pub struct LoopbackDevice {
    output_tx: Mutex<Option<Sender<Vec<u8>>>>,
    input_rx: Receiver<Vec<u8>>,
    alive: Arc<AtomicBool>,
    pending: Mutex<Vec<u8>>,
}

/// Create a connected transport/device pair
pub fn loopback() -> (LoopbackTransport, LoopbackDevice) {
    let (output_tx, output_rx) = unbounded();
    let (input_tx, input_rx) = unbounded();
    let alive = Arc::new(AtomicBool::new(true));

    let transport = LoopbackTransport {
        output_rx,
        input_tx,
        alive: alive.clone(),
    };
    let device = LoopbackDevice {
        output_tx: Mutex::new(Some(output_tx)),
        input_rx,
        alive,
        pending: Mutex::new(Vec::new()),
    };

    (transport, device)
}

impl LoopbackTransport {
    pub(super) fn into_parts(self) -> ConsoleParts {
        ConsoleParts {
            reader: Box::new(ChannelReader {
                rx: self.output_rx,
                chunk: Vec::new(),
                offset: 0,
            }),
            writer: Box::new(ChannelWriter { tx: self.input_tx }),
            process: Box::new(LoopbackProcess { alive: self.alive }),
            info: "loopback".to_string(),
        }
    }
}

impl LoopbackDevice {
    /// Emit console output. Characters outside Latin-1 are sent as `?`.
    ///
    /// Returns `false` once the device has exited.
    pub fn emit(&self, text: &str) -> bool {
        let bytes: Vec<u8> = text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();

        match self.output_tx.lock().as_ref() {
            Some(tx) => tx.send(bytes).is_ok(),
            None => false,
        }
    }

    /// Receive the next raw chunk written by the harness
    pub fn next_input(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            return Some(std::mem::take(&mut *pending));
        }
        drop(pending);

        match self.input_rx.recv_timeout(timeout) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Receive the next newline-terminated line written by the harness,
    /// without its terminator
    pub fn next_line(&self, timeout: Duration) -> Option<String> {
        let deadline = std::time::Instant::now() + timeout;
        let mut pending = self.pending.lock();

        loop {
            if let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let text: String = line.iter().map(|&b| char::from(b)).collect();
                return Some(text.trim_end_matches(&['\r', '\n'][..]).to_string());
            }

            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.input_rx.recv_timeout(remaining) {
                Ok(chunk) => pending.extend_from_slice(&chunk),
                Err(_) => return None,
            }
        }
    }

    /// Check whether the device still runs
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Simulate process exit: mark not alive and close the output stream
    pub fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.output_tx.lock().take();
    }
}

impl Drop for LoopbackDevice {
    fn drop(&mut self) {
        self.exit();
    }
}

struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    offset: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset >= self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.offset = 0;
                }
                // Every sender gone: end of stream
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(self.chunk.len() - self.offset);
        buf[..n].copy_from_slice(&self.chunk[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

struct ChannelWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback device gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct LoopbackProcess {
    alive: Arc<AtomicBool>,
}

impl ConsoleProcess for LoopbackProcess {
    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_reaches_reader() {
        let (transport, device) = loopback();
        let mut parts = transport.into_parts();

        assert!(device.emit("hello"));
        let mut buf = [0u8; 16];
        let n = parts.reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_exit_ends_stream() {
        let (transport, device) = loopback();
        let mut parts = transport.into_parts();

        device.exit();
        let mut buf = [0u8; 16];
        assert_eq!(parts.reader.read(&mut buf).unwrap(), 0);
        assert!(!parts.process.is_alive());
        assert!(!device.emit("late"));
    }

    #[test]
    fn test_next_line_joins_fragments() {
        let (transport, device) = loopback();
        let mut parts = transport.into_parts();

        parts.writer.write_all(b"test_").unwrap();
        parts.writer.write_all(b"disk\r\nrest").unwrap();

        let line = device.next_line(Duration::from_secs(1));
        assert_eq!(line.as_deref(), Some("test_disk"));
        assert_eq!(device.next_input(Duration::from_millis(10)), Some(b"rest".to_vec()));
    }
}
