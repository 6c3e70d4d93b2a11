//! `TestDebugService`: methods that exercise the engine end to end.
//!
//! Only mounted when debug endpoints are enabled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use super::auth::{AccessToken, DEFAULT_SCOPE, ExternalAuthClient};
use crate::rpc::{CallContext, Endpoint, MethodTable, Observer, RouterError, Session};

pub const ENDPOINT: &str = "TestDebugService";

/// Sleep for `timeout_ms` unless the call is cancelled first.
pub async fn test_cancel(cx: CallContext, timeout_ms: u64) -> Result<bool> {
    cx.run_until_cancelled(tokio::time::sleep(Duration::from_millis(timeout_ms)))
        .await?;
    Ok(true)
}

/// Push `0..max` to `observer`, then complete it.
pub async fn test_observer(cx: CallContext, max: i64, observer: Observer<i64>) -> Result<()> {
    for i in 0..max {
        cx.check()?;
        observer.push(i).await?;
    }
    observer.complete().await?;
    Ok(())
}

pub async fn test_panic(_cx: CallContext, message: String) -> Result<()> {
    panic!("{message}")
}

pub struct DebugService {
    auth: ExternalAuthClient,
}

impl Default for DebugService {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugService {
    pub fn new() -> Self {
        Self {
            auth: ExternalAuthClient::new(),
        }
    }

    /// Fetch a token through the session's external authentication endpoint.
    pub async fn fetch_token(&self, cx: CallContext, session: Session) -> Result<AccessToken> {
        let auth = session
            .external_auth()
            .context("session was not initialized with external authentication")?;

        cx.run_until_cancelled(self.auth.fetch_token(auth, &[DEFAULT_SCOPE]))
            .await?
    }

    pub fn endpoint(self: Arc<Self>) -> Result<Endpoint, RouterError> {
        let table = MethodTable::new()
            .with("TestCancelAsync", test_cancel)?
            .with("TestIObserverAsync", test_observer)?
            .with("TestPanicAsync", test_panic)?
            .with("FetchTokenAsync", move |cx: CallContext, session: Session| {
                let svc = self.clone();
                async move { svc.fetch_token(cx, session).await }
            })?;

        Endpoint::new(ENDPOINT, table)
    }
}
