//! Liveness server - Axum-based HTTP

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Instant,
}

/// The liveness server
pub struct HealthServer {
    state: HealthState,
    bind: SocketAddr,
}

impl HealthServer {
    /// Create a new health server
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            state: HealthState {
                start_time: Instant::now(),
            },
            bind,
        }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index_handler))
            .route("/api/status", get(status_handler))
            .with_state(self.state.clone())
    }

    /// Bind and serve until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind)
            .await
            .with_context(|| format!("Failed to bind health server to {}", self.bind))?;
        info!("Health server listening on {}", self.bind);
        self.serve(listener, cancel).await
    }

    /// Serve on an already bound listener until `cancel` fires
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> anyhow::Result<()> {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .context("Health server exited")?;

        info!("Health server stopped");
        Ok(())
    }

    /// Start the server in the background, returning a handle
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

// ── HTTP Handlers ──

async fn index_handler() -> &'static str {
    "relaybot is alive"
}

async fn status_handler(State(state): State<HealthState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_server() -> (SocketAddr, CancellationToken, JoinHandle<anyhow::Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = HealthServer::new(addr);
        let handle = tokio::spawn(server.serve(listener, cancel.clone()));
        (addr, cancel, handle)
    }

    #[tokio::test]
    async fn test_index_reports_alive() {
        let (addr, cancel, handle) = start_server().await;

        let resp = reqwest::get(format!("http://{}/", addr)).await.unwrap();
        assert!(resp.status().is_success());
        assert_eq!(resp.text().await.unwrap(), "relaybot is alive");

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_status_json() {
        let (addr, cancel, handle) = start_server().await;

        let resp = reqwest::get(format!("http://{}/api/status", addr))
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let json: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].is_u64());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (addr, cancel, handle) = start_server().await;

        let resp = reqwest::get(format!("http://{}/nope", addr)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_fails_when_port_taken() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let result = HealthServer::new(addr).run(CancellationToken::new()).await;
        assert!(result.is_err());
        drop(listener);
    }
}
