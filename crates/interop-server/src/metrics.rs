//! Listener metrics and the Prometheus endpoint
//!
//! Protocol metrics live in `interop_common::metrics`; this module adds the
//! connection level ones and serves everything at `/metrics`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::server::ShutdownSignal;

lazy_static! {
    pub static ref CONNECTIONS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        "interop_connections_active",
        "Open connections by listener",
        &["listener"]
    ).expect("register interop_connections_active");

    pub static ref CONNECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "interop_connections_total",
        "Accepted connections by listener",
        &["listener"]
    ).expect("register interop_connections_total");

    pub static ref TLS_HANDSHAKE_ERRORS: IntCounterVec = register_int_counter_vec!(
        "interop_tls_handshake_errors_total",
        "Failed TLS handshakes by listener",
        &["listener"]
    ).expect("register interop_tls_handshake_errors_total");
}

/// Decrements the active gauge when the connection ends
pub struct ConnectionGuard {
    listener: &'static str,
}

/// Record an accepted connection
pub fn record_connection_start(listener: &'static str) -> ConnectionGuard {
    CONNECTIONS_ACTIVE.with_label_values(&[listener]).inc();
    CONNECTIONS_TOTAL.with_label_values(&[listener]).inc();
    ConnectionGuard { listener }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        CONNECTIONS_ACTIVE.with_label_values(&[self.listener]).dec();
    }
}

pub fn record_tls_handshake_error(listener: &str) {
    TLS_HANDSHAKE_ERRORS.with_label_values(&[listener]).inc();
}

/// Serve `/metrics`, `/health` and `/ready` until shutdown
pub async fn start_metrics_server(bind_addr: SocketAddr, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("Metrics server listening on {}", bind_addr);

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    debug!("Metrics accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
            _ = shutdown.wait() => break,
        };
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_metrics))
                .await
            {
                error!("Metrics server error: {}", e);
            }
        });
    }

    info!("Metrics server stopped");
    Ok(())
}

fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn handle_metrics(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(render(req.uri().path()))
}

fn render(path: &str) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
                error!("Failed to encode metrics: {}", e);
                return plain(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
            }
            let mut response = plain(StatusCode::OK, buffer);
            if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                response.headers_mut().insert(CONTENT_TYPE, content_type);
            }
            response
        }
        "/health" | "/ready" => plain(StatusCode::OK, "OK"),
        _ => plain(StatusCode::NOT_FOUND, "Not Found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_render_metrics() {
        interop_common::metrics::record_race("success");
        let _guard = record_connection_start("test");

        let response = render("/metrics");
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("interop_join_server_races_total"));
        assert!(text.contains("interop_connections_active{listener=\"test\"} 1"));

        assert_eq!(render("/health").status(), StatusCode::OK);
        assert_eq!(render("/nope").status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_connection_guard() {
        {
            let _guard = record_connection_start("guard");
            assert_eq!(CONNECTIONS_ACTIVE.with_label_values(&["guard"]).get(), 1);
        }
        assert_eq!(CONNECTIONS_ACTIVE.with_label_values(&["guard"]).get(), 0);
    }
}
