//! Observer proxies: remote event sinks passed as call arguments.
//!
//! A caller marshals an observer as `{"__jsonrpc_marshaled": 1, "handle": N}`.
//! Decoding it as a call argument binds it to the connection the call came
//! in on, after which the handler can push events back:
//!
//! - `push(value)` sends `$/invokeProxy/{N}/onNext` with `[value]`
//! - `complete()` sends `$/invokeProxy/{N}/onCompleted` with `[]`

use std::fmt;
use std::marker::PhantomData;
use std::sync::Weak;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::codec;
use super::connection::Peer;
use super::transport::TransportError;

/// Discriminator confirming that an object is a marshaled callback reference.
const MARSHALED_TAG: &str = "__jsonrpc_marshaled";

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("connection for observer {0} is gone")]
    Disconnected(i64),
    #[error("failed to encode observer event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Write-only handle to an event sink on the calling side.
///
/// Only holds a weak reference to its connection; once the connection is
/// gone every push fails with [`ObserverError::Disconnected`].
pub struct Observer<T> {
    handle: i64,
    peer: Weak<Peer>,
    _item: PhantomData<fn(T)>,
}

impl<T> Observer<T> {
    /// The caller-assigned handle this observer pushes to.
    pub fn handle(&self) -> i64 {
        self.handle
    }

    fn method(&self, event: &str) -> String {
        format!("$/invokeProxy/{}/{}", self.handle, event)
    }

    async fn send(&self, event: &str, params: Vec<Value>) -> Result<(), ObserverError> {
        let peer = self
            .peer
            .upgrade()
            .ok_or(ObserverError::Disconnected(self.handle))?;
        peer.notify(self.method(event), params).await?;
        Ok(())
    }
}

impl<T: Serialize> Observer<T> {
    /// Send one `onNext` event.
    pub async fn push(&self, value: T) -> Result<(), ObserverError> {
        let value = serde_json::to_value(value)?;
        self.send("onNext", vec![value]).await
    }

    /// Send the `onCompleted` event.
    pub async fn complete(&self) -> Result<(), ObserverError> {
        self.send("onCompleted", Vec::new()).await
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            peer: self.peer.clone(),
            _item: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("handle", &self.handle)
            .field("connected", &(self.peer.strong_count() > 0))
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct ObserverWire {
    #[serde(rename = "__jsonrpc_marshaled", default)]
    marshaled: Option<i64>,
    #[serde(default)]
    handle: Option<i64>,
}

impl<T> Serialize for Observer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ObserverWire {
            marshaled: Some(1),
            handle: Some(self.handle),
        }
        .serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Observer<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = ObserverWire::deserialize(deserializer)?;

        if wire.marshaled != Some(1) {
            return Err(D::Error::custom(format!(
                "observer must carry \"{MARSHALED_TAG}\": 1"
            )));
        }
        let handle = wire
            .handle
            .ok_or_else(|| D::Error::missing_field("handle"))?;

        let scope = codec::current_scope()
            .ok_or_else(|| D::Error::custom("observers can only be decoded as call arguments"))?;

        Ok(Observer {
            handle,
            peer: scope.peer,
            _item: PhantomData,
        })
    }
}
