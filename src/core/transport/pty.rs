//! Pseudoterminal transport
//!
//! Runs the build-and-run command through `sh -c` with its stdio attached to
//! the slave side of a fresh pty. The harness keeps the master side.
//!
//! The command runs in its own process group. `make run` starts the emulator
//! as a grandchild, so killing only the shell would leave it running with
//! the console still open.

use super::{ConsoleParts, ConsoleProcess, TransportError};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{killpg, Signal};
use nix::sys::termios::Termios;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

/// Pseudoterminal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtyConfig {
    /// Shell command line to run
    pub command: String,
    /// Terminal rows
    pub rows: u16,
    /// Terminal columns
    pub cols: u16,
}

impl PtyConfig {
    /// Create a new configuration for a command
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            rows: 24,
            cols: 80,
        }
    }

    /// Set the terminal size
    #[must_use]
    pub fn size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self::new("make -s run")
    }
}

pub(super) fn open(config: &PtyConfig) -> Result<ConsoleParts, TransportError> {
    let winsize = Winsize {
        ws_row: config.rows,
        ws_col: config.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    let pty = openpty(Some(&winsize), None::<&Termios>)
        .map_err(|e| TransportError::Pty(e.to_string()))?;

    // openpty does not set close-on-exec; other children must not inherit
    // either side or the master never sees the console hang up.
    for fd in [pty.master.as_raw_fd(), pty.slave.as_raw_fd()] {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(|e| TransportError::Pty(e.to_string()))?;
    }

    let slave = pty.slave;
    let child = Command::new("sh")
        .arg("-c")
        .arg(&config.command)
        .stdin(Stdio::from(slave.try_clone()?))
        .stdout(Stdio::from(slave.try_clone()?))
        .stderr(Stdio::from(slave))
        .process_group(0)
        .spawn()
        .map_err(|source| TransportError::SpawnFailed {
            command: config.command.clone(),
            source,
        })?;

    tracing::debug!(pid = child.id(), command = %config.command, "Spawned console process");

    // The slave side now only lives in the child, so reads on the master
    // fail with EIO once the child and its descendants are gone.
    let master = File::from(pty.master);
    let writer = master.try_clone()?;

    Ok(ConsoleParts {
        reader: Box::new(master),
        writer: Box::new(writer),
        process: Box::new(ProcessGroup { child }),
        info: format!("pty: {}", config.command),
    })
}

/// The shell and everything it started
struct ProcessGroup {
    child: Child,
}

impl ConsoleProcess for ProcessGroup {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) -> io::Result<()> {
        // The group id is the shell's pid; ESRCH means everyone already left
        let group = Pid::from_raw(self.child.id() as i32);
        match killpg(group, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(io::Error::from(e)),
        }
        self.child.wait().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_pty_config_builder() {
        let config = PtyConfig::new("true").size(50, 132);
        assert_eq!(config.command, "true");
        assert_eq!(config.rows, 50);
        assert_eq!(config.cols, 132);
    }

    #[test]
    fn test_spawn_echo_under_pty() {
        let mut parts = open(&PtyConfig::new("echo hello-pty")).unwrap();

        let mut output = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match parts.reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
            }
        }

        assert!(String::from_utf8_lossy(&output).contains("hello-pty"));
    }
}
