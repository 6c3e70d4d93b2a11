//! `ServerService`: session setup and server lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::rpc::{
    CallContext, Endpoint, ExternalAuth, MethodTable, RouterError, RpcError, Session, SessionInit,
};

pub const ENDPOINT: &str = "ServerService";

/// Time given to the `StopAsync` response to reach the caller before shutdown.
const STOP_GRACE: Duration = Duration::from_millis(100);

/// Options a front-end passes to `InitializeAsync`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitializeServerOptions {
    #[serde(default)]
    pub authentication_endpoint: Option<String>,
    #[serde(default)]
    pub authentication_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
}

pub struct ServerService {
    ctx: AppContext,
}

impl ServerService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Create a session rooted at `root_path`.
    pub async fn initialize(
        &self,
        root_path: String,
        options: Option<InitializeServerOptions>,
    ) -> Result<Session> {
        let options = options.unwrap_or_default();

        let external_auth = match (options.authentication_endpoint, options.authentication_key) {
            (None, None) => None,
            (Some(endpoint), Some(key)) if !endpoint.is_empty() => {
                Some(ExternalAuth { endpoint, key })
            }
            _ => {
                return Err(RpcError::invalid_params(
                    "AuthenticationEndpoint and AuthenticationKey must be set together",
                )
                .into());
            }
        };

        let root = tokio::fs::canonicalize(PathBuf::from(&root_path))
            .await
            .with_context(|| format!("root path {root_path:?} does not exist"))?;
        if !root.is_dir() {
            anyhow::bail!("root path {} is not a directory", root.display());
        }

        let session = self.ctx.sessions.create(SessionInit {
            root,
            external_auth,
        })?;
        tracing::info!(session = %session.id(), root = %session.root().display(), "Session initialized");
        Ok(session)
    }

    /// Stop the server shortly after replying.
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("Stop requested");
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE).await;
            ctx.request_shutdown();
        });
        Ok(())
    }

    pub fn version(&self) -> VersionInfo {
        VersionInfo {
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn endpoint(self: Arc<Self>) -> Result<Endpoint, RouterError> {
        let init = self.clone();
        let stop = self.clone();
        let version = self;

        let table = MethodTable::new()
            .with(
                "InitializeAsync",
                move |_cx: CallContext, root: String, options: Option<InitializeServerOptions>| {
                    let svc = init.clone();
                    async move { svc.initialize(root, options).await }
                },
            )?
            .with("StopAsync", move |_cx: CallContext| {
                let svc = stop.clone();
                async move { svc.stop().await }
            })?
            .with("GetVersionAsync", move |_cx: CallContext| {
                let info = version.version();
                async move { Ok::<_, anyhow::Error>(info) }
            })?;

        Endpoint::new(ENDPOINT, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn service() -> ServerService {
        ServerService::new(AppContext::new(ServerConfig::default()))
    }

    #[tokio::test]
    async fn initialize_creates_distinct_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service();
        let root = dir.path().to_string_lossy().to_string();

        let a = svc.initialize(root.clone(), None).await.unwrap();
        let b = svc.initialize(root, None).await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.root(), dir.path().canonicalize().unwrap());
        assert!(a.external_auth().is_none());
    }

    #[tokio::test]
    async fn initialize_keeps_external_auth() {
        let dir = tempfile::tempdir().unwrap();
        let options = InitializeServerOptions {
            authentication_endpoint: Some("http://127.0.0.1:1/token".into()),
            authentication_key: Some("key".into()),
        };

        let session = service()
            .initialize(dir.path().to_string_lossy().to_string(), Some(options))
            .await
            .unwrap();

        assert_eq!(
            session.external_auth(),
            Some(&ExternalAuth {
                endpoint: "http://127.0.0.1:1/token".into(),
                key: "key".into(),
            })
        );
    }

    #[tokio::test]
    async fn initialize_rejects_half_configured_auth() {
        let dir = tempfile::tempdir().unwrap();
        let options = InitializeServerOptions {
            authentication_endpoint: Some("http://127.0.0.1:1/token".into()),
            authentication_key: None,
        };

        let err = service()
            .initialize(dir.path().to_string_lossy().to_string(), Some(options))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<RpcError>().unwrap().code,
            crate::rpc::protocol::INVALID_PARAMS
        );
    }

    #[tokio::test]
    async fn initialize_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing").to_string_lossy().to_string();

        assert!(service().initialize(missing, None).await.is_err());
    }
}
