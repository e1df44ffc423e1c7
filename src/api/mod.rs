//! src/api/mod.rs
//!
//! Defines the `ApiServer` service: the axum-based WebSocket endpoint
//! clients connect to for the session fabric. Generalized from the
//! teacher's visualizer-only server (a single `/ws` route serving a
//! `watch`-pushed state snapshot) to a bidirectional envelope transport
//! backed by `FabricHandle`.

use crate::session::fabric::FabricHandle;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

pub mod ws;

/// The shared state accessible by all Axum handlers.
#[derive(Clone)]
pub struct ApiState {
    pub fabric: FabricHandle,
    pub outbound_queue_depth: usize,
}

pub struct ApiServer {
    bind_addr: SocketAddr,
    fabric: FabricHandle,
    outbound_queue_depth: usize,
}

impl ApiServer {
    pub fn new(bind_addr: SocketAddr, fabric: FabricHandle, outbound_queue_depth: usize) -> Self {
        Self {
            bind_addr,
            fabric,
            outbound_queue_depth,
        }
    }

    pub async fn run(self, shutdown_token: CancellationToken) -> crate::error::Result<()> {
        let app_state = ApiState {
            fabric: self.fabric,
            outbound_queue_depth: self.outbound_queue_depth,
        };

        let app = Router::new()
            .route("/ws", get(ws::websocket_handler))
            .nest_service("/", ServeDir::new("dist"))
            .with_state(app_state);

        tracing::info!(listen_addr = %self.bind_addr, "API server listening");

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
                tracing::info!("API server received shutdown signal.");
            })
            .await?;

        Ok(())
    }
}
