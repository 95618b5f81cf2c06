//! Mock network services
//!
//! The image under test talks to three peers on the host:
//! - HTTP file server on port 8001
//! - MQTT broker on 127.0.0.1:1883
//! - TCP client probing the device's forwarded port 15000
//!
//! The two servers each run on their own thread with a private tokio
//! runtime, so they keep serving while the sequencer blocks on console
//! output. Stopping a server tears its runtime down, which closes the
//! listener and every open connection.

mod http;
mod mqtt;
mod tcp;

pub use http::{HttpFileServer, HTTP_ADDR, HTTP_PORT};
pub use mqtt::{MqttBrokerService, MQTT_ADDR, MQTT_PORT};
pub use tcp::{TcpProbe, TCP_PROBE_ADDR, TCP_PROBE_PORT};

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::oneshot;

/// Kind of mock service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    /// Static file server
    HttpServer,
    /// MQTT broker
    MqttBroker,
    /// TCP client
    TcpProbe,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpServer => write!(f, "HTTP server"),
            Self::MqttBroker => write!(f, "MQTT broker"),
            Self::TcpProbe => write!(f, "TCP probe"),
        }
    }
}

/// Lifecycle state of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Stopped,
    Running,
    /// The serving thread ended on its own
    Failed,
}

/// Service error types
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The listening address could not be bound
    #[error("{kind} could not bind {addr}: {reason}")]
    Bind {
        kind: ServiceKind,
        addr: SocketAddr,
        reason: String,
    },

    /// The service failed while starting or serving
    #[error("{kind} failed: {reason}")]
    Runtime { kind: ServiceKind, reason: String },

    /// The service thread panicked
    #[error("{0} thread panicked")]
    Panicked(ServiceKind),

    /// The service thread could not be created
    #[error("Failed to start {kind} thread: {source}")]
    Spawn {
        kind: ServiceKind,
        #[source]
        source: io::Error,
    },

    /// The probe could not reach its target
    #[error("Could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Common control surface of the mock servers
pub trait MockService {
    /// Which service this is
    fn kind(&self) -> ServiceKind;

    /// Configured listening address
    fn address(&self) -> SocketAddr;

    /// Current lifecycle state
    fn state(&self) -> ServiceState;

    /// Bind and begin serving. Returns once the listener is bound, or with
    /// the reason it could not be.
    fn start(&mut self) -> Result<(), ServiceError>;

    /// Stop serving and release the address. Stopping a stopped service is
    /// a no-op.
    fn stop(&mut self) -> Result<(), ServiceError>;

    /// Check whether the service is serving
    fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }
}

/// Handed to the serving future to report how startup went
pub(crate) struct Ready {
    tx: Sender<Result<SocketAddr, ServiceError>>,
}

impl Ready {
    /// The listener is bound at `addr`
    pub(crate) fn bound(&self, addr: SocketAddr) {
        let _ = self.tx.send(Ok(addr));
    }

    /// Startup failed
    pub(crate) fn failed(&self, err: ServiceError) {
        let _ = self.tx.send(Err(err));
    }
}

/// A serving thread with its own runtime and a shutdown trigger
pub(crate) struct ServiceWorker {
    kind: ServiceKind,
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Result<(), ServiceError>>>,
}

impl ServiceWorker {
    /// Run `serve` on a new thread and wait for it to report ready.
    ///
    /// `serve` receives the startup reporter and a shutdown receiver; it
    /// must call [`Ready::bound`] or [`Ready::failed`] exactly once.
    pub(crate) fn spawn<F, Fut>(kind: ServiceKind, name: &str, serve: F) -> Result<Self, ServiceError>
    where
        F: FnOnce(Ready, oneshot::Receiver<()>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ServiceError>>,
    {
        let (ready_tx, ready_rx): (_, Receiver<Result<SocketAddr, ServiceError>>) = bounded(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .thread_name(format!("{kind}-worker"))
                    .enable_all()
                    .build()
                    .map_err(|e| ServiceError::Runtime {
                        kind,
                        reason: e.to_string(),
                    });
                let runtime = match runtime {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(ServiceError::Runtime {
                            kind,
                            reason: e.to_string(),
                        }));
                        return Err(e);
                    }
                };

                let result = runtime.block_on(serve(Ready { tx: ready_tx }, shutdown_rx));
                // Dropping the runtime cancels every task it still owns,
                // closing the remaining client connections.
                drop(runtime);
                result
            })
            .map_err(|source| ServiceError::Spawn { kind, source })?;

        match ready_rx.recv() {
            Ok(Ok(local_addr)) => Ok(Self {
                kind,
                local_addr,
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            // The thread went away without reporting
            Err(_) => match thread.join() {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(ServiceError::Runtime {
                    kind,
                    reason: "exited before binding".to_string(),
                }),
                Err(_) => Err(ServiceError::Panicked(kind)),
            },
        }
    }

    /// Address the listener actually bound
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Check whether the serving thread is still running
    pub(crate) fn is_serving(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal shutdown and wait for the thread to finish
    pub(crate) fn stop(&mut self) -> Result<(), ServiceError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ServiceError::Panicked(self.kind))?,
            None => Ok(()),
        }
    }
}

impl Drop for ServiceWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(service = %self.kind, error = %e, "Service did not stop cleanly");
        }
    }
}

/// State of an optional worker
pub(crate) fn worker_state(worker: Option<&ServiceWorker>) -> ServiceState {
    match worker {
        None => ServiceState::Stopped,
        Some(w) if w.is_serving() => ServiceState::Running,
        Some(_) => ServiceState::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_worker_reports_bound_address() {
        let mut worker = ServiceWorker::spawn(ServiceKind::TcpProbe, "test-worker", |ready, shutdown| async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .map_err(|e| ServiceError::Runtime {
                    kind: ServiceKind::TcpProbe,
                    reason: e.to_string(),
                })?;
            ready.bound(listener.local_addr().unwrap());
            let _ = shutdown.await;
            Ok(())
        })
        .unwrap();

        assert_ne!(worker.local_addr().port(), 0);
        assert_eq!(worker_state(Some(&worker)), ServiceState::Running);

        worker.stop().unwrap();
        assert!(!worker.is_serving());
        assert!(TcpListener::bind(worker.local_addr()).is_ok());
    }

    #[test]
    fn test_worker_startup_failure() {
        let result = ServiceWorker::spawn(ServiceKind::MqttBroker, "test-worker", |ready, _shutdown| async move {
            ready.failed(ServiceError::Runtime {
                kind: ServiceKind::MqttBroker,
                reason: "no storage".to_string(),
            });
            Ok(())
        });

        match result {
            Err(ServiceError::Runtime { kind, reason }) => {
                assert_eq!(kind, ServiceKind::MqttBroker);
                assert_eq!(reason, "no storage");
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("startup should fail"),
        }
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ServiceKind::HttpServer.to_string(), "HTTP server");
        assert_eq!(worker_state(None), ServiceState::Stopped);
    }
}
