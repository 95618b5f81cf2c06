//! TCP probe
//!
//! The device's TCP server test listens on port 15000, forwarded to the
//! host by the emulator. The probe connects once and hangs up, which is
//! enough for the device to log the accepted client.

use super::{ServiceError, ServiceKind};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, info};

/// Port the device listens on
pub const TCP_PROBE_PORT: u16 = 15000;

/// Default target address
pub const TCP_PROBE_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), TCP_PROBE_PORT);

/// One-shot TCP client
#[derive(Debug, Clone)]
pub struct TcpProbe {
    target: SocketAddr,
    connect_timeout: Duration,
}

impl TcpProbe {
    /// Create a probe for the standard target
    pub fn new() -> Self {
        Self {
            target: TCP_PROBE_ADDR,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Set the target address
    #[must_use]
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn kind(&self) -> ServiceKind {
        ServiceKind::TcpProbe
    }

    /// Address the probe connects to
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Connect to the target and close the connection right away
    pub fn connect_once(&self) -> Result<(), ServiceError> {
        let stream = TcpStream::connect_timeout(&self.target, self.connect_timeout).map_err(|source| {
            ServiceError::Connect {
                addr: self.target,
                source,
            }
        })?;

        info!(target_addr = %self.target, "TCP probe connected");
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!(error = %e, "TCP probe shutdown");
        }
        Ok(())
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new()
    }
}
