//! HTTP front door for the RPC engine.
//!
//! Each mounted endpoint gets its own WebSocket route; upgraded connections
//! speak JSON-RPC 2.0, one message per text frame.
//!
//! ## Endpoints
//!
//! - `WS /ServerService/v1.0` - session setup and server lifecycle
//! - `WS /TestDebugService/v1.0` - engine self-tests, only when debug endpoints are enabled

mod websocket;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::context::AppContext;
use crate::rpc::connection::Shared;
use crate::rpc::{CallRegistry, Endpoint, RouterError};
use websocket::EndpointState;

/// Serves a set of endpoints over WebSocket.
pub struct RpcServer {
    endpoints: Vec<Arc<Endpoint>>,
    shared: Arc<Shared>,
    next_connection: Arc<AtomicU64>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RpcServer {
    /// Create a server sharing the context's session registry and shutdown signal.
    pub fn new(ctx: &AppContext) -> Self {
        let shared = Shared {
            calls: CallRegistry::new(),
            sessions: ctx.sessions.clone(),
            max_concurrent_calls: ctx.config.max_concurrent_calls,
        };

        Self {
            endpoints: Vec::new(),
            shared: Arc::new(shared),
            next_connection: Arc::new(AtomicU64::new(1)),
            shutdown_tx: ctx.shutdown.clone(),
        }
    }

    /// Add an endpoint. Endpoint names are unique per server.
    pub fn mount(&mut self, endpoint: Endpoint) -> Result<(), RouterError> {
        if self.endpoints.iter().any(|e| e.name() == endpoint.name()) {
            return Err(RouterError::DuplicateEndpoint(endpoint.name().to_string()));
        }
        tracing::debug!(endpoint = %endpoint.name(), methods = ?endpoint.methods(), "Endpoint mounted");
        self.endpoints.push(Arc::new(endpoint));
        Ok(())
    }

    /// Registry of calls currently running on any connection.
    pub fn calls(&self) -> &CallRegistry {
        &self.shared.calls
    }

    /// Build the axum router with one route per endpoint.
    pub fn router(&self) -> Router {
        let mut router = Router::new();

        for endpoint in &self.endpoints {
            let state = EndpointState {
                endpoint: endpoint.clone(),
                shared: self.shared.clone(),
                next_connection: self.next_connection.clone(),
            };
            router = router.route(&endpoint.path(), get(websocket::ws_handler).with_state(state));
        }

        router
    }

    /// Serve on `listener` until shutdown is signalled.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let app = self.router();
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, endpoints = self.endpoints.len(), "RPC server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        tracing::info!("RPC server stopped");
        Ok(())
    }
}
