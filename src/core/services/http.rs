//! Static HTTP file server
//!
//! Serves a directory tree over plain HTTP the way Python's
//! `http.server` does: files by path, `index.html` for directories that
//! have one, a generated listing for those that don't.

use super::{worker_state, MockService, ServiceError, ServiceKind, ServiceState, ServiceWorker};
use axum::extract::State;
use axum::handler::Handler;
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use std::future::IntoFuture;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Port the image fetches files from
pub const HTTP_PORT: u16 = 8001;

/// Default listening address: every interface, so the emulator's user
/// networking can reach it
pub const HTTP_ADDR: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), HTTP_PORT);

/// Static file server over a root directory
pub struct HttpFileServer {
    root: PathBuf,
    addr: SocketAddr,
    worker: Option<ServiceWorker>,
}

impl HttpFileServer {
    /// Create a server for `root` on the standard address
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            addr: HTTP_ADDR,
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
}

impl MockService for HttpFileServer {
    fn kind(&self) -> ServiceKind {
        ServiceKind::HttpServer
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
        let root = Arc::new(self.root.clone());

        let worker = ServiceWorker::spawn(ServiceKind::HttpServer, "http-server", move |ready, shutdown| async move {
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    ready.failed(ServiceError::Bind {
                        kind: ServiceKind::HttpServer,
                        addr,
                        reason: e.to_string(),
                    });
                    return Ok(());
                }
            };
            let local_addr = listener.local_addr().unwrap_or(addr);

            let files = ServeDir::new(root.as_path()).fallback(list_directory.with_state(root.clone()));
            let app = Router::new()
                .fallback_service(files)
                .layer(TraceLayer::new_for_http());

            info!(addr = %local_addr, root = %root.display(), "HTTP server listening");
            ready.bound(local_addr);

            tokio::select! {
                result = axum::serve(listener, app).into_future() => {
                    result.map_err(|e| ServiceError::Runtime {
                        kind: ServiceKind::HttpServer,
                        reason: e.to_string(),
                    })
                }
                _ = shutdown => {
                    debug!("HTTP server shutting down");
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
                info!(addr = %self.addr, "HTTP server stopped");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

async fn list_directory(State(root): State<Arc<PathBuf>>, uri: Uri) -> Response {
    let Some(relative) = resolve_path(uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let dir = root.join(&relative);

    let mut reader = match tokio::fs::read_dir(&dir).await {
        Ok(reader) => reader,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let mut entries = Vec::new();
    while let Ok(Some(entry)) = reader.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        entries.push((name, is_dir));
    }
    entries.sort_by_key(|(name, _)| name.to_lowercase());

    let title = format!("Directory listing for {}", html_escape::encode_text(uri.path()));
    let mut body = format!("<!DOCTYPE HTML>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n<hr>\n<ul>\n");
    for (name, is_dir) in &entries {
        let suffix = if *is_dir { "/" } else { "" };
        let href = urlencoding::encode(name);
        let label = html_escape::encode_text(name);
        body.push_str(&format!("<li><a href=\"{href}{suffix}\">{label}{suffix}</a></li>\n"));
    }
    body.push_str("</ul>\n<hr>\n</body>\n</html>\n");

    Html(body).into_response()
}

/// Turn a request path into a path relative to the root. Returns `None`
/// for anything that would leave the root.
fn resolve_path(request: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request).ok()?;
    let mut path = PathBuf::new();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}
