//! Admin HTTP routes
//!
//! Read-only endpoints for operators and the failover tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::driver::NodeStatus;
use crate::observability::{Event, Logger};
use crate::shutdown::ShutdownSignal;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub node_id: u32,
    pub role: String,
    pub accepts_writes: bool,
}

pub struct AdminState {
    status: watch::Receiver<NodeStatus>,
}

impl AdminState {
    pub fn new(status: watch::Receiver<NodeStatus>) -> Self {
        Self { status }
    }
}

pub fn admin_routes(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/cluster/status", get(status_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        node_id: status.view.node_id,
        role: status.view.role.to_string(),
        accepts_writes: status.view.accepts_writes(),
    };

    (StatusCode::OK, Json(response))
}

async fn status_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    (StatusCode::OK, Json(status))
}

/// Bound admin listener.
pub struct AdminServer {
    listener: TcpListener,
    router: Router,
}

impl AdminServer {
    pub async fn bind(addr: &str, status: watch::Receiver<NodeStatus>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let router = admin_routes(Arc::new(AdminState::new(status)));
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let addr = self
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        Logger::info(Event::AdminListening, &[("addr", &addr)]);

        let served = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await;
        if let Err(e) = served {
            Logger::error(Event::AdminListening, &[("addr", &addr), ("error", &e.to_string())]);
        }
    }
}
