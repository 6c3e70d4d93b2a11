//! The message loop for one connection.
//!
//! Messages are read strictly in arrival order. Every request is handed to
//! its own task, so a slow call never holds up the loop and a
//! `$/cancelRequest` is seen while other calls are still running.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use super::cancel::{CallContext, CallRegistry, ConnectionId};
use super::codec::DecodeScope;
use super::handler;
use super::protocol::{
    CANCEL_REQUEST_METHOD, Id, Message, Notification, Request, Response, RpcError,
};
use super::router::Endpoint;
use super::session::SessionRegistry;
use super::transport::{MessageReader, MessageWriter, TransportError};

/// The outgoing side of a connection: what handlers and observers write through.
pub struct Peer {
    id: ConnectionId,
    writer: Arc<dyn MessageWriter>,
}

impl Peer {
    pub fn new(id: ConnectionId, writer: Arc<dyn MessageWriter>) -> Self {
        Self { id, writer }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Send a notification to the remote side.
    pub async fn notify(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Result<usize, TransportError> {
        self.writer
            .write(&Message::Notification(Notification::new(method, params)))
            .await
    }

    pub async fn respond(&self, response: Response) -> Result<usize, TransportError> {
        self.writer.write(&Message::Response(response)).await
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        self.writer.close().await
    }
}

/// State shared by every connection of a server.
pub struct Shared {
    pub calls: CallRegistry,
    pub sessions: Arc<SessionRegistry>,
    /// Upper bound on concurrently running handlers per connection.
    pub max_concurrent_calls: Option<usize>,
}

#[derive(Deserialize)]
struct CancelParams {
    id: Id,
}

/// Drive one connection until the peer goes away or the transport fails.
pub async fn serve<R>(
    id: ConnectionId,
    mut reader: R,
    writer: Arc<dyn MessageWriter>,
    endpoint: Arc<Endpoint>,
    shared: Arc<Shared>,
) where
    R: MessageReader,
{
    let conn = Connection {
        peer: Arc::new(Peer::new(id, writer)),
        token: CancellationToken::new(),
        limiter: shared
            .max_concurrent_calls
            .map(|n| Arc::new(Semaphore::new(n.max(1)))),
        endpoint,
        shared,
    };

    debug!(conn = id, endpoint = %conn.endpoint.name(), "Connection opened");

    loop {
        match reader.read().await {
            Ok((message, size)) => {
                debug!(conn = id, size, "Message received");
                conn.dispatch(message);
            }
            Err(TransportError::Decode(e)) => {
                warn!(conn = id, error = %e, "Rejected message");
                conn.reply(Response::rejected(&e));
            }
            Err(TransportError::Closed) => break,
            Err(e) => {
                warn!(conn = id, error = %e, "Connection error");
                break;
            }
        }
    }

    // Calls still running on this connection can no longer be answered.
    conn.token.cancel();
    if let Err(e) = conn.peer.close().await {
        debug!(conn = id, error = %e, "Close failed");
    }
    debug!(conn = id, "Connection closed");
}

struct Connection {
    peer: Arc<Peer>,
    token: CancellationToken,
    limiter: Option<Arc<Semaphore>>,
    endpoint: Arc<Endpoint>,
    shared: Arc<Shared>,
}

impl Connection {
    fn dispatch(&self, message: Message) {
        match message {
            Message::Notification(note) if note.method == CANCEL_REQUEST_METHOD => {
                self.cancel_request(note)
            }
            Message::Notification(note) => {
                debug!(conn = self.peer.id(), method = %note.method, "Ignoring notification");
            }
            Message::Request(request) => self.call(request),
            Message::Response(response) => {
                debug!(
                    conn = self.peer.id(),
                    id = ?response.id,
                    "Ignoring response; this side never issues requests"
                );
            }
        }
    }

    fn cancel_request(&self, note: Notification) {
        let params = note.params.unwrap_or(Value::Null);
        // Some clients wrap the object in a one-element array
        let params = match params {
            Value::Array(mut values) if values.len() == 1 => values.remove(0),
            other => other,
        };

        match serde_json::from_value::<CancelParams>(params) {
            Ok(CancelParams { id }) => {
                let found = self.shared.calls.cancel(self.peer.id(), &id);
                debug!(conn = self.peer.id(), %id, found, "Cancel requested");
            }
            Err(e) => warn!(conn = self.peer.id(), error = %e, "Malformed cancel request"),
        }
    }

    fn call(&self, request: Request) {
        let Some(handler) = self.endpoint.handler(&request.method) else {
            debug!(conn = self.peer.id(), method = %request.method, "Method not found");
            self.reply(Response::error(
                request.id,
                RpcError::method_not_found(&request.method),
            ));
            return;
        };

        // Registered before the task starts so a cancel right behind the request finds it.
        let guard = self
            .shared
            .calls
            .register(self.peer.id(), request.id.clone(), &self.token);
        let cx = CallContext::new(
            request.id.clone(),
            request.method.as_str(),
            guard.token().clone(),
        );

        let peer = self.peer.clone();
        let scope = DecodeScope::new(&self.peer, self.shared.sessions.clone());
        let limiter = self.limiter.clone();
        let span = info_span!(
            "rpc.call",
            conn = peer.id(),
            endpoint = %self.endpoint.name(),
            method = %request.method,
            id = %request.id,
        );

        tokio::spawn(
            async move {
                // A queued call can be cancelled before it ever gets a slot.
                let _permit = match limiter {
                    Some(limiter) => match cx.run_until_cancelled(limiter.acquire_owned()).await {
                        Ok(permit) => permit.ok(),
                        Err(_) => {
                            debug!("Cancelled while queued");
                            let response = Response::error(request.id, RpcError::cancelled());
                            if let Err(e) = peer.respond(response).await {
                                debug!(error = %e, "Failed to send response");
                            }
                            drop(guard);
                            return;
                        }
                    },
                    None => None,
                };

                let params = request.positional();
                let response = match params {
                    Ok(params) => handler::invoke(handler.as_ref(), cx, params, &scope).await,
                    Err(err) => Response::error(request.id, err),
                };

                if let Err(e) = peer.respond(response).await {
                    debug!(error = %e, "Failed to send response");
                }
                drop(guard);
            }
            .instrument(span),
        );
    }

    /// Send a response without blocking the read loop.
    fn reply(&self, response: Response) {
        let peer = self.peer.clone();
        tokio::spawn(async move {
            if let Err(e) = peer.respond(response).await {
                debug!(error = %e, "Failed to send response");
            }
        });
    }
}
