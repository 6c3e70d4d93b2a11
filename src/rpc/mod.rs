//! JSON-RPC engine.
//!
//! Lets a front-end drive this process over WebSocket: call methods, receive
//! streamed events through observers, and cancel calls that are still running.
//!
//! ## Architecture
//!
//! - `protocol`: JSON-RPC 2.0 envelopes and error codes
//! - `transport`: message reader/writer halves over a WebSocket
//! - `codec`: positional parameter decoding and the decode scope
//! - `handler`: adapts typed async functions into dispatch entries
//! - `observer`: push-stream handles bound to the calling connection
//! - `cancel`: in-flight call registry and `$/cancelRequest`
//! - `session`: sessions shared across calls and connections
//! - `router`: method tables and endpoints
//! - `connection`: the per-connection read loop

pub mod cancel;
pub mod codec;
pub mod connection;
pub mod handler;
pub mod observer;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

pub use cancel::{CallContext, CallRegistry, Cancelled};
pub use handler::Handler;
pub use observer::{Observer, ObserverError};
pub use protocol::{Id, Message, Notification, Request, Response, RpcError};
pub use router::{Endpoint, MethodTable, RouterError};
pub use session::{ExternalAuth, Session, SessionInit, SessionRegistry};
