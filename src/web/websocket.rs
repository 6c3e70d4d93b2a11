//! WebSocket upgrade for one endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use crate::rpc::connection::{self, Shared};
use crate::rpc::router::Endpoint;
use crate::rpc::transport;

/// Everything a connection on one endpoint needs.
#[derive(Clone)]
pub struct EndpointState {
    pub endpoint: Arc<Endpoint>,
    pub shared: Arc<Shared>,
    pub next_connection: Arc<AtomicU64>,
}

/// Handle WebSocket upgrade requests
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<EndpointState>,
) -> impl IntoResponse {
    let id = state.next_connection.fetch_add(1, Ordering::Relaxed);
    ws.on_upgrade(move |socket| async move {
        let (reader, writer) = transport::websocket(socket);
        connection::serve(id, reader, Arc::new(writer), state.endpoint, state.shared).await;
    })
}
