//! Metrics HTTP Endpoint
//!
//! - `/metrics` : Prometheus text format
//! - `/healthz` : liveness
//!
//! The server runs on its own tokio task and only reads the registry, so it
//! keeps answering while the pipeline runs on a blocking thread.

pub mod signals;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{MonitorError, Result};
use crate::monitoring::MetricsRegistry;

pub use signals::{listen_for_signals, Shutdown, ShutdownSignals, ShutdownTrigger};

/// Content type of the Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    let body = registry.render();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Builds the endpoint routes around a shared registry.
pub fn build_router(registry: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(registry)
}

/// Handle to a running metrics endpoint.
pub struct MetricsServer {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl MetricsServer {
    /// Binds `addr` and starts serving in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(addr: SocketAddr, registry: Arc<MetricsRegistry>) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| MonitorError::Bind {
                port: addr.port(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = build_router(registry);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!("Metrics endpoint listening on {}", local_addr);
        Ok(Self {
            local_addr,
            shutdown_tx,
            handle,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting scrapes and waits for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        match self.handle.await {
            Ok(Ok(())) => debug!("Metrics endpoint stopped"),
            Ok(Err(e)) => warn!("Metrics endpoint stopped with error: {}", e),
            Err(e) => warn!("Metrics endpoint task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::{Counter, Gauge};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get_path(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    fn registry() -> Arc<MetricsRegistry> {
        Arc::new(MetricsRegistry::new("casa", &["1.tclean".to_string()]))
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_registry() {
        let registry = registry();
        registry
            .set_gauge(Gauge::TaskSeconds, &[("task", "1.tclean")], 0.75)
            .unwrap();
        registry.increment_counter(Counter::TasksOk, &[]).unwrap();

        let server = MetricsServer::start("127.0.0.1:0".parse().unwrap(), Arc::clone(&registry))
            .await
            .unwrap();

        let response = get_path(server.local_addr(), "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("text/plain; version=0.0.4"));
        assert!(response.contains("casa_task_seconds{task=\"1.tclean\"} 0.75"));
        assert!(response.contains("casa_tasks_ok_total 1"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_scrapes_see_later_updates() {
        let registry = registry();
        let server = MetricsServer::start("127.0.0.1:0".parse().unwrap(), Arc::clone(&registry))
            .await
            .unwrap();

        let before = get_path(server.local_addr(), "/metrics").await;
        assert!(before.contains("casa_pipeline_ok 0"));

        registry.set_gauge(Gauge::PipelineOk, &[], 1.0).unwrap();
        let after = get_path(server.local_addr(), "/metrics").await;
        assert!(after.contains("casa_pipeline_ok 1"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_healthz() {
        let server = MetricsServer::start("127.0.0.1:0".parse().unwrap(), registry())
            .await
            .unwrap();

        let response = get_path(server.local_addr(), "/healthz").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("ok"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_port() {
        let server = MetricsServer::start("127.0.0.1:0".parse().unwrap(), registry())
            .await
            .unwrap();
        let addr = server.local_addr();
        server.shutdown().await;

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_reported() {
        let first = MetricsServer::start("127.0.0.1:0".parse().unwrap(), registry())
            .await
            .unwrap();

        let err = MetricsServer::start(first.local_addr(), registry())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::Bind { .. }));

        first.shutdown().await;
    }
}
