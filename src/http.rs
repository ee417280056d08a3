//! HTTP adapters for the scraper gateway: the service that owns the browser,
//! logs in with a credential and reads an account's recent posts.
//!
//! - `POST   {base}/sessions`                      `{identity, secret, handle}` → `{session_id}`
//! - `DELETE {base}/sessions/{id}`
//! - `GET    {base}/sessions/{id}/posts?target=..&limit=..` → `[ContentItem]`

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::{AuthError, FetchError};
use crate::pool::Credential;
use crate::session::{PageFetcher, SessionProvider};
use crate::types::ContentItem;

#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: Url,
}

/// Handle for a session held by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySession {
    pub id: String,
    pub handle: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    session_id: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid gateway url {base_url:?}"))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("gateway url must be http(s): {base_url}");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn auth_error(status: StatusCode, message: String) -> AuthError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AuthError::Rejected(message),
        _ => AuthError::Unavailable(format!("status {}: {message}", status.as_u16())),
    }
}

fn fetch_error(status: StatusCode, message: String) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::SessionExpired,
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
        _ => FetchError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl SessionProvider for GatewayClient {
    type Session = GatewaySession;

    async fn authenticate(&self, credential: &Credential) -> Result<GatewaySession, AuthError> {
        let body = json!({
            "identity": credential.identity,
            "secret": credential.secret,
            "handle": credential.handle,
        });
        let resp = self
            .client
            .post(self.endpoint(&["sessions"]))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(auth_error(status, message));
        }
        let parsed: SessionResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("malformed session response: {e}")))?;
        Ok(GatewaySession {
            id: parsed.session_id,
            handle: credential.handle.clone(),
        })
    }

    async fn close(&self, session: GatewaySession) -> Result<()> {
        let resp = self
            .client
            .delete(self.endpoint(&["sessions", &session.id]))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            anyhow::bail!("closing session {} returned {status}", session.id);
        }
        Ok(())
    }
}

#[async_trait]
impl PageFetcher<GatewaySession> for GatewayClient {
    async fn fetch_recent(
        &self,
        session: &GatewaySession,
        target: &str,
        limit: usize,
    ) -> Result<Vec<ContentItem>, FetchError> {
        let limit_param = limit.to_string();
        let resp = self
            .client
            .get(self.endpoint(&["sessions", &session.id, "posts"]))
            .query(&[("target", target), ("limit", limit_param.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(fetch_error(status, message));
        }

        let mut items: Vec<ContentItem> = resp.json().await?;
        items.truncate(limit);
        for item in &mut items {
            item.target = target.to_string();
        }
        debug!(account = target, "Fetched {} item(s)", items.len());
        Ok(items)
    }
}
