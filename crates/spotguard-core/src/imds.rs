//! Instance metadata service client.
//!
//! Handles the IMDSv2 session-token handshake: a `PUT` to the token endpoint
//! yields a token that is echoed back on every metadata `GET`. Token failures
//! never block a request; the call simply goes out unauthenticated.

use std::time::Duration;

pub use reqwest::StatusCode;
use tokio::{sync::Mutex, time::Instant};

pub const DEFAULT_METADATA_BASE: &str = "http://169.254.169.254";
pub const TOKEN_PATH: &str = "/latest/api/token";
pub const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";
pub const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
pub const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(21600);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

// Refresh this long before the service would expire the token.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ImdsError {
    #[error("metadata request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("metadata service returned 401 unauthorized")]
    Unauthorized,
    #[error("metadata service returned unexpected status {0}")]
    UnexpectedStatus(u16),
}

#[derive(Debug, Clone)]
pub struct MetadataResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug)]
pub struct ImdsClient {
    http: reqwest::Client,
    token_url: Option<String>,
    token_ttl: Duration,
    token: Mutex<Option<CachedToken>>,
}

pub fn token_url_for(base: &str) -> String {
    format!("{}{TOKEN_PATH}", base.trim_end_matches('/'))
}

impl ImdsClient {
    /// `token_url = None` disables the token handshake entirely.
    pub fn new(
        token_url: Option<String>,
        token_ttl: Duration,
        timeout: Duration,
    ) -> Result<Self, ImdsError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("spotguard/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            token_url: token_url.filter(|u| !u.trim().is_empty()),
            token_ttl,
            token: Mutex::new(None),
        })
    }

    pub fn for_base(base: &str, timeout: Duration) -> Result<Self, ImdsError> {
        Self::new(Some(token_url_for(base)), DEFAULT_TOKEN_TTL, timeout)
    }

    async fn fetch_token(&self, url: &str) -> Result<String, ImdsError> {
        let resp = self
            .http
            .put(url)
            .header(TOKEN_TTL_HEADER, self.token_ttl.as_secs().to_string())
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ImdsError::Unauthorized);
        }
        if status != StatusCode::OK {
            return Err(ImdsError::UnexpectedStatus(status.as_u16()));
        }
        Ok(resp.text().await?.trim().to_string())
    }

    /// Returns a cached session token, acquiring a fresh one when needed.
    pub async fn session_token(&self) -> Option<String> {
        let url = self.token_url.as_deref()?;

        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref()
            && Instant::now() < cached.refresh_at
        {
            return Some(cached.value.clone());
        }

        match self.fetch_token(url).await {
            Ok(value) if !value.is_empty() => {
                let lifetime = self.token_ttl.saturating_sub(TOKEN_REFRESH_MARGIN);
                *guard = Some(CachedToken {
                    value: value.clone(),
                    refresh_at: Instant::now() + lifetime,
                });
                Some(value)
            }
            Ok(_) => {
                tracing::warn!(%url, "metadata token response was empty; proceeding without token");
                *guard = None;
                None
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "could not get metadata token; proceeding without token");
                *guard = None;
                None
            }
        }
    }

    pub async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Issues a `GET` and returns the raw status and body. Only transport
    /// failures are errors; status interpretation is up to the caller.
    pub async fn get(&self, url: &str) -> Result<MetadataResponse, ImdsError> {
        let token = self.session_token().await;

        let mut req = self.http.get(url);
        if let Some(token) = token {
            req = req.header(TOKEN_HEADER, token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }
        let body = resp.text().await?;
        Ok(MetadataResponse { status, body })
    }

    pub async fn instance_id(&self, base: &str) -> Result<String, ImdsError> {
        let url = format!("{}{INSTANCE_ID_PATH}", base.trim_end_matches('/'));
        let resp = self.get(&url).await?;
        match resp.status {
            StatusCode::OK => Ok(resp.body.trim().to_string()),
            StatusCode::UNAUTHORIZED => Err(ImdsError::Unauthorized),
            other => Err(ImdsError::UnexpectedStatus(other.as_u16())),
        }
    }
}
