//! MQTT broker for the device's publish/subscribe test
//!
//! Runs an in-process broker with in-memory storage and anonymous access.

use super::{worker_state, MockService, ServiceError, ServiceKind, ServiceState, ServiceWorker};
use mqtt5::broker::{BrokerConfig, MqttBroker, StorageBackendType, StorageConfig};
use std::net::{Ipv4Addr, SocketAddr};
use tracing::{debug, info};

/// Standard MQTT port
pub const MQTT_PORT: u16 = 1883;

/// Default listening address
pub const MQTT_ADDR: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), MQTT_PORT);

/// In-process MQTT broker
pub struct MqttBrokerService {
    addr: SocketAddr,
    worker: Option<ServiceWorker>,
}

impl MqttBrokerService {
    /// Create a broker on the standard address
    pub fn new() -> Self {
        Self {
            addr: MQTT_ADDR,
            worker: None,
        }
    }

    /// Set the listening address
    #[must_use]
    pub fn with_address(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.worker.as_ref().map(ServiceWorker::local_addr)
    }

    fn broker_config(&self) -> BrokerConfig {
        let storage = StorageConfig::default()
            .with_backend(StorageBackendType::Memory)
            .with_persistence(false);

        BrokerConfig::default()
            .with_bind_address(self.addr)
            .with_storage(storage)
    }
}

impl Default for MqttBrokerService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockService for MqttBrokerService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::MqttBroker
    }

    fn address(&self) -> SocketAddr {
        self.addr
    }

    fn state(&self) -> ServiceState {
        worker_state(self.worker.as_ref())
    }

    fn start(&mut self) -> Result<(), ServiceError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let addr = self.addr;
        let config = self.broker_config();

        let worker = ServiceWorker::spawn(ServiceKind::MqttBroker, "mqtt-broker", move |ready, shutdown| async move {
            let mut broker = match MqttBroker::with_config(config).await {
                Ok(broker) => broker,
                Err(e) => {
                    ready.failed(ServiceError::Bind {
                        kind: ServiceKind::MqttBroker,
                        addr,
                        reason: e.to_string(),
                    });
                    return Ok(());
                }
            };

            let local_addr = broker.local_addr().unwrap_or(addr);
            info!(addr = %local_addr, "MQTT broker listening");
            ready.bound(local_addr);

            tokio::select! {
                result = broker.run() => {
                    result.map_err(|e| ServiceError::Runtime {
                        kind: ServiceKind::MqttBroker,
                        reason: e.to_string(),
                    })
                }
                _ = shutdown => {
                    debug!("MQTT broker shutting down");
                    Ok(())
                }
            }
        })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ServiceError> {
        match self.worker.take() {
            Some(mut worker) => {
                worker.stop()?;
                info!(addr = %self.addr, "MQTT broker stopped");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    fn local_broker() -> MqttBrokerService {
        MqttBrokerService::new().with_address("127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_default_address() {
        let broker = MqttBrokerService::new();
        assert_eq!(broker.address().to_string(), "127.0.0.1:1883");
        assert_eq!(broker.state(), ServiceState::Stopped);
    }

    #[test]
    fn test_accepts_anonymous_connect() {
        let mut broker = local_broker();
        broker.start().unwrap();
        let addr = broker.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        // MQTT 5 CONNECT: clean start, keep alive 60, no properties, client id "ml"
        let connect = [
            0x10, 0x0f, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, 0x02, 0x00, 0x3c, 0x00, 0x00, 0x02, b'm', b'l',
        ];
        stream.write_all(&connect).unwrap();

        let mut connack = [0u8; 4];
        stream.read_exact(&mut connack).unwrap();
        // CONNACK with reason code Success
        assert_eq!(connack[0], 0x20);
        assert_eq!(connack[3], 0x00);

        broker.stop().unwrap();
    }

    #[test]
    fn test_stop_releases_port_and_connections() {
        let mut broker = local_broker();
        broker.start().unwrap();
        let addr = broker.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        broker.stop().unwrap();
        assert_eq!(broker.state(), ServiceState::Stopped);

        let mut buf = [0u8; 1];
        assert!(matches!(client.read(&mut buf), Ok(0) | Err(_)));
        assert!(TcpListener::bind(addr).is_ok());
    }
}
