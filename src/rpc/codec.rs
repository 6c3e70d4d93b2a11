//! Positional parameter decoding.
//!
//! Arguments are decoded with plain serde, inside a decode scope that tells
//! connection-aware types where they are being decoded: an [`Observer`]
//! binds itself to the calling connection, and a [`Session`] resolves its id
//! in the session registry. The scope only exists for the synchronous
//! duration of the decode.
//!
//! [`Observer`]: super::observer::Observer
//! [`Session`]: super::session::Session

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::connection::Peer;
use super::protocol::RpcError;
use super::session::SessionRegistry;

/// What connection-aware types can reach while they are being decoded.
#[derive(Clone)]
pub struct DecodeScope {
    pub(crate) peer: Weak<Peer>,
    pub(crate) sessions: Arc<SessionRegistry>,
}

impl DecodeScope {
    pub fn new(peer: &Arc<Peer>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            peer: Arc::downgrade(peer),
            sessions,
        }
    }
}

thread_local! {
    static SCOPE: RefCell<Option<DecodeScope>> = const { RefCell::new(None) };
}

/// Restores the previously installed scope when dropped, even on unwind.
struct ScopeGuard(Option<DecodeScope>);

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.0.take();
        SCOPE.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Run `f` with `scope` installed as the current decode scope.
pub fn with_scope<R>(scope: &DecodeScope, f: impl FnOnce() -> R) -> R {
    let previous = SCOPE.with(|slot| slot.borrow_mut().replace(scope.clone()));
    let _guard = ScopeGuard(previous);
    f()
}

/// The decode scope installed on this thread, if any.
pub(crate) fn current_scope() -> Option<DecodeScope> {
    SCOPE.with(|slot| slot.borrow().clone())
}

/// Positional arguments of one call, consumed front to back.
pub struct Params {
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl Params {
    /// Wrap `values` after checking there are exactly `arity` of them.
    pub fn exact(values: Vec<Value>, arity: usize) -> Result<Self, RpcError> {
        if values.len() != arity {
            return Err(RpcError::invalid_params(format!(
                "expected {arity} parameter{}, got {}",
                if arity == 1 { "" } else { "s" },
                values.len()
            )));
        }

        Ok(Self {
            values: values.into_iter(),
            position: 0,
        })
    }

    /// Decode the next positional parameter as `T`.
    pub fn next<T: DeserializeOwned>(&mut self) -> Result<T, RpcError> {
        let position = self.position;
        self.position += 1;

        let value = self.values.next().ok_or_else(|| {
            RpcError::invalid_params(format!("missing parameter {position}"))
        })?;

        serde_json::from_value(value)
            .map_err(|e| RpcError::invalid_params(format!("parameter {position}: {e}")))
    }
}
