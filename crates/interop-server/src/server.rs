//! HTTP front of the dispatcher
//!
//! Plain and TLS listeners feed hyper connections into one axum router. The
//! listener attaches a [`ConnectionInfo`] to every request so the handler
//! knows the remote address and the client certificate chain of the TLS
//! session. Behind a trusted proxy the chain comes from the forwarded client
//! certificate header instead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use rustls::pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::auth::{PeerInfo, TrustedProxies};
use crate::dispatcher::{Dispatcher, InboundRequest, InboundResponse};
use crate::metrics;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Time allowed for a TLS handshake
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept, so descriptor exhaustion does not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Time allowed for open connections to finish after shutdown
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shutdown signal broadcaster
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// New signal and the sender that trips it
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (sender, receiver) = watch::channel(false);
        (sender, Self { receiver })
    }

    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for shutdown; also returns when the sender is gone
    pub async fn wait(&mut self) {
        if *self.receiver.borrow() {
            return;
        }
        let _ = self.receiver.wait_for(|down| *down).await;
    }
}

/// Transport facts attached to every request by the listener
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub remote_addr: SocketAddr,
    pub client_certs: Vec<CertificateDer<'static>>,
}

struct AppState {
    dispatcher: Arc<Dispatcher>,
    proxies: TrustedProxies,
}

/// Router serving the dispatcher at `path`
pub fn build_router(dispatcher: Arc<Dispatcher>, path: &str, proxies: TrustedProxies) -> Router {
    let state = Arc::new(AppState { dispatcher, proxies });
    Router::new()
        .route(path, post(handle_interop))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_interop(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let connection = parts.extensions.get::<ConnectionInfo>().cloned();

    let max_body_size = state.dispatcher.settings().max_body_size;
    let body = match axum::body::to_bytes(body, max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "Rejecting request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let mut peer = PeerInfo {
        remote_addr: connection.as_ref().map(|c| c.remote_addr),
        client_certs: connection.map(|c| c.client_certs).unwrap_or_default(),
        authorization: header_str(&parts.headers, &AUTHORIZATION),
    };
    if peer.client_certs.is_empty() {
        match state
            .proxies
            .forwarded_client_certs(peer.remote_addr, &parts.headers)
        {
            Ok(certs) => peer.client_certs = certs,
            Err(e) => {
                warn!(remote_addr = ?peer.remote_addr, error = %e, "Invalid forwarded client certificate");
                return StatusCode::BAD_REQUEST.into_response();
            }
        }
    }

    let response = state
        .dispatcher
        .handle(InboundRequest {
            request_id: header_str(&parts.headers, &REQUEST_ID_HEADER),
            peer,
            body,
        })
        .await;
    into_http(response)
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn into_http(response: InboundResponse) -> Response {
    let mut http = match response.body {
        Some(body) => {
            let mut http = (response.status, body).into_response();
            http.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            http
        }
        None => response.status.into_response(),
    };
    if let Ok(id) = HeaderValue::from_str(&response.correlation_id) {
        http.headers_mut().insert(REQUEST_ID_HEADER, id);
    }
    http
}

/// Serve one connection until it closes or shutdown is signaled
async fn serve_connection<S>(stream: S, connection: ConnectionInfo, router: Router, mut shutdown: ShutdownSignal)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let remote_addr = connection.remote_addr;
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let mut request = request.map(axum::body::Body::new);
        request.extensions_mut().insert(connection.clone());
        router.clone().oneshot(request)
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);
    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.wait() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        debug!("Connection from {} ended: {}", remote_addr, e);
    }
}

/// A bound listener, with TLS when an acceptor is set
/// Sleep after an accept error; true when shutdown arrived meanwhile
async fn accept_backoff(shutdown: &mut ShutdownSignal) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => false,
        _ = shutdown.wait() => true,
    }
}

pub struct Listener {
    name: &'static str,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    pub async fn bind(name: &'static str, addr: SocketAddr, tls: Option<TlsAcceptor>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            listener = name,
            addr = %listener.local_addr()?,
            tls = tls.is_some(),
            "Backend Interfaces listener started"
        );
        Ok(Self { name, listener, tls })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown; connection tasks join `tracker`
    pub async fn run(self, router: Router, mut shutdown: ShutdownSignal, tracker: TaskTracker) {
        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.wait() => break,
            };
            let (stream, remote_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(listener = self.name, "Accept error: {}", e);
                    if accept_backoff(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let router = router.clone();
            let shutdown = shutdown.clone();
            let tls = self.tls.clone();
            let name = self.name;
            tracker.spawn(async move {
                let _guard = metrics::record_connection_start(name);
                let Some(acceptor) = tls else {
                    let connection = ConnectionInfo {
                        remote_addr,
                        client_certs: Vec::new(),
                    };
                    serve_connection(stream, connection, router, shutdown).await;
                    return;
                };

                let stream = match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        metrics::record_tls_handshake_error(name);
                        debug!(remote_addr = %remote_addr, "TLS handshake failed: {}", e);
                        return;
                    }
                    Err(_) => {
                        metrics::record_tls_handshake_error(name);
                        debug!(remote_addr = %remote_addr, "TLS handshake timed out");
                        return;
                    }
                };
                let client_certs = stream
                    .get_ref()
                    .1
                    .peer_certificates()
                    .map(|certs| certs.to_vec())
                    .unwrap_or_default();
                let connection = ConnectionInfo {
                    remote_addr,
                    client_certs,
                };
                serve_connection(stream, connection, router, shutdown).await;
            });
        }
        info!(listener = self.name, "Listener shutting down");
    }
}

/// Wait for Ctrl+C or SIGTERM
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

/// Close `tracker` and wait up to `timeout` for its tasks
pub async fn drain(tracker: TaskTracker, timeout: Duration) {
    tracker.close();
    info!("Waiting up to {:?} for connections to drain...", timeout);
    if tokio::time::timeout(timeout, tracker.wait()).await.is_err() {
        warn!("Drain timeout reached, forcing shutdown");
    } else {
        info!("All connections drained successfully");
    }
}
