//! Tokens from an external authentication endpoint.
//!
//! A front-end that owns the user's credentials can run a small HTTP
//! endpoint and hand its address and key to `InitializeAsync`. Token
//! requests for that session are then forwarded there instead of using
//! local credentials.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rpc::ExternalAuth;

/// Scope requested when the caller does not name one.
pub const DEFAULT_SCOPE: &str = "https://management.azure.com//.default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    scopes: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    status: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expires_on: Option<DateTime<Utc>>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone, Default)]
pub struct ExternalAuthClient {
    http: reqwest::Client,
}

impl ExternalAuthClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a token for `scopes` from the session's external endpoint.
    pub async fn fetch_token(&self, auth: &ExternalAuth, scopes: &[&str]) -> Result<AccessToken> {
        let body = TokenRequest {
            scopes,
            tenant_id: None,
        };

        let response = self
            .http
            .post(&auth.endpoint)
            .bearer_auth(&auth.key)
            .json(&body)
            .send()
            .await
            .context("Failed to reach external authentication endpoint")?
            .error_for_status()
            .context("External authentication endpoint rejected the request")?;

        let reply: TokenResponse = response
            .json()
            .await
            .context("Failed to parse external authentication response")?;

        if reply.status != "success" {
            bail!(
                "external authentication failed: {} {}",
                reply.code.unwrap_or_default(),
                reply.message.unwrap_or_default()
            );
        }

        match (reply.token, reply.expires_on) {
            (Some(token), Some(expires_on)) => Ok(AccessToken { token, expires_on }),
            _ => bail!("external authentication response is missing the token or its expiry"),
        }
    }
}
