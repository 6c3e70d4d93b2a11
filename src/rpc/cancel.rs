//! Cancellation of in-flight calls.
//!
//! Every request that reaches a handler is registered here under its
//! connection and call id. The `$/cancelRequest` notification fires the
//! matching trigger; the entry itself is only removed when the call finishes,
//! through the [`CallGuard`] returned at registration.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use super::protocol::Id;

/// Error a handler returns when it stops because its call was cancelled.
///
/// It may be wrapped with extra context (`anyhow::Context`) before being
/// returned; the adapter still recognizes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request cancelled")]
pub struct Cancelled;

/// Returns true if `err` reports cancellation of a call whose trigger has fired.
pub fn is_cancellation(err: &anyhow::Error, token: &CancellationToken) -> bool {
    token.is_cancelled() && err.chain().any(|cause| cause.is::<Cancelled>())
}

/// Identifies one connection for the lifetime of the process.
pub type ConnectionId = u64;

type CallKey = (ConnectionId, Id);

/// A trigger plus the registration it belongs to.
struct Entry {
    seq: u64,
    token: CancellationToken,
}

/// Process-wide map of in-flight calls to their cancellation triggers.
#[derive(Clone, Default)]
pub struct CallRegistry {
    inner: Arc<Mutex<HashMap<CallKey, Entry>>>,
    next_seq: Arc<AtomicU64>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Nothing panics while holding the lock, so poisoning is recoverable.
    fn lock(&self) -> MutexGuard<'_, HashMap<CallKey, Entry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a call. The trigger derives from `parent` so closing the
    /// connection reaches every call still running on it.
    ///
    /// A duplicate id on the same connection replaces the previous entry;
    /// the earlier call keeps its own trigger and guard.
    pub fn register(
        &self,
        connection: ConnectionId,
        id: Id,
        parent: &CancellationToken,
    ) -> CallGuard {
        let token = parent.child_token();
        let key = (connection, id);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let previous = self.lock().insert(
            key.clone(),
            Entry {
                seq,
                token: token.clone(),
            },
        );
        if previous.is_some() {
            tracing::warn!(conn = connection, id = %key.1, "Duplicate in-flight request id");
        }

        CallGuard {
            registry: self.clone(),
            key,
            seq,
            token,
        }
    }

    /// Fire the trigger of an in-flight call. Returns false if no such call is running.
    pub fn cancel(&self, connection: ConnectionId, id: &Id) -> bool {
        let token = self
            .lock()
            .get(&(connection, id.clone()))
            .map(|entry| entry.token.clone());

        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of calls currently registered.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

/// Owns a registry entry. Dropping it removes the entry and fires the trigger, exactly once.
pub struct CallGuard {
    registry: CallRegistry,
    key: CallKey,
    seq: u64,
    token: CancellationToken,
}

impl CallGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        {
            let mut map = self.registry.lock();
            // Only remove the entry if it is still ours; a duplicate id may have replaced it.
            if map.get(&self.key).is_some_and(|entry| entry.seq == self.seq) {
                map.remove(&self.key);
            }
        }
        self.token.cancel();
    }
}

/// Per-call context handed to every handler as its first argument.
#[derive(Clone, Debug)]
pub struct CallContext {
    id: Id,
    method: Arc<str>,
    token: CancellationToken,
}

impl CallContext {
    pub fn new(id: Id, method: impl Into<Arc<str>>, token: CancellationToken) -> Self {
        Self {
            id,
            method: method.into(),
            token,
        }
    }

    /// The caller-assigned id of this call.
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Return `Err(Cancelled)` once the call has been cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait until the call is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Run `fut` to completion unless the call is cancelled first.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            output = fut => Ok(output),
        }
    }

    /// A token that follows this call's cancellation, for handing to sub-tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn cancel_fires_registered_trigger() {
        let registry = CallRegistry::new();
        let conn = CancellationToken::new();
        let guard = registry.register(1, Id::Number(7), &conn);

        assert!(registry.cancel(1, &Id::Number(7)));
        assert!(guard.token().is_cancelled());
        // Entry stays until the call finishes
        assert_eq!(registry.in_flight(), 1);

        drop(guard);
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn cancel_unknown_call_is_a_no_op() {
        let registry = CallRegistry::new();
        let conn = CancellationToken::new();
        let guard = registry.register(1, Id::Number(7), &conn);

        assert!(!registry.cancel(1, &Id::Number(8)));
        assert!(!registry.cancel(2, &Id::Number(7)));
        assert!(!guard.token().is_cancelled());
    }

    #[test]
    fn dropping_guard_removes_entry_and_fires() {
        let registry = CallRegistry::new();
        let conn = CancellationToken::new();
        let guard = registry.register(3, Id::from("a"), &conn);
        let token = guard.token().clone();

        drop(guard);

        assert!(token.is_cancelled());
        assert_eq!(registry.in_flight(), 0);
        assert!(!registry.cancel(3, &Id::from("a")));
        assert!(!conn.is_cancelled());
    }

    #[test]
    fn connection_token_reaches_calls() {
        let registry = CallRegistry::new();
        let conn = CancellationToken::new();
        let first = registry.register(1, Id::Number(1), &conn);
        let second = registry.register(1, Id::Number(2), &conn);

        conn.cancel();

        assert!(first.token().is_cancelled());
        assert!(second.token().is_cancelled());
    }

    #[test]
    fn duplicate_id_keeps_newer_entry() {
        let registry = CallRegistry::new();
        let conn = CancellationToken::new();
        let older = registry.register(1, Id::Number(1), &conn);
        let newer = registry.register(1, Id::Number(1), &conn);

        drop(older);
        assert_eq!(registry.in_flight(), 1);

        assert!(registry.cancel(1, &Id::Number(1)));
        assert!(newer.token().is_cancelled());
    }

    #[test]
    fn cancellation_predicate_sees_through_context() {
        let token = CancellationToken::new();
        let wrapped = anyhow::Error::from(Cancelled);
        let wrapped = Err::<(), _>(wrapped)
            .context("while deploying")
            .unwrap_err();

        assert!(!is_cancellation(&wrapped, &token));
        token.cancel();
        assert!(is_cancellation(&wrapped, &token));
        assert!(!is_cancellation(&anyhow::anyhow!("boom"), &token));
    }

    #[tokio::test]
    async fn run_until_cancelled_stops_early() {
        let token = CancellationToken::new();
        let cx = CallContext::new(Id::Number(1), "TestCancelAsync", token.clone());

        assert_eq!(cx.run_until_cancelled(async { 5 }).await, Ok(5));

        token.cancel();
        let result = cx
            .run_until_cancelled(tokio::time::sleep(std::time::Duration::from_secs(60)))
            .await;
        assert_eq!(result, Err(Cancelled));
        assert_eq!(cx.check(), Err(Cancelled));
    }
}
