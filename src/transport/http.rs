use crate::{Error, Result};
use async_trait::async_trait;
use keyring::Entry;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// A generation request as accepted by the remote API.
#[derive(Debug, Clone, Serialize)]
pub struct VideoJobRequest {
    /// Logical operation name, e.g. `generate` or `lipsync`.
    pub operation: String,
    /// Provider-shaped request body; opaque to this layer.
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Job state as returned by the remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoJob {
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub result_url: Option<String>,
}

/// The protected remote capability, behind a seam so the facade can be
/// exercised without a network.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn submit(&self, request: &VideoJobRequest) -> Result<VideoJob>;
    async fn status(&self, job_id: &str) -> Result<VideoJob>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Connection and read timeouts are worth retrying; everything else at
    /// this level is not.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout() || e.is_connect(),
            TransportError::Other(_) => false,
        }
    }
}

/// HTTP client for the video-generation API.
pub struct HttpVideoApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpVideoApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // Minimal production-friendly defaults (env-overridable).
        let timeout_secs = env::var("VIDGATE_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(120);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(
                env::var("VIDGATE_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(8),
            )
            .pool_idle_timeout(Some(Duration::from_secs(
                env::var("VIDGATE_HTTP_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(90),
            )))
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client, base_url: base_url.into(), api_key: Self::get_api_key() })
    }

    fn get_api_key() -> Option<String> {
        // 1. Try the OS keyring
        if let Ok(entry) = Entry::new("vidgate", "video-api") {
            if let Ok(key) = entry.get_password() {
                return Some(key);
            }
        }
        // 2. Fall back to the environment
        env::var("VIDEO_API_KEY").ok()
    }

    fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
        // Only the common `Retry-After: <seconds>` form.
        let raw = headers.get("retry-after")?.to_str().ok()?;
        let secs: u64 = raw.trim().parse().ok()?;
        Some(secs.saturating_mul(1000))
    }

    /// Map a non-success response onto the error taxonomy: 429 becomes
    /// [`Error::RateLimited`], 5xx [`Error::UpstreamServer`], any other 4xx
    /// [`Error::UpstreamClient`].
    async fn classify(resp: reqwest::Response) -> Result<VideoJob> {
        let status = resp.status();
        if status.is_success() {
            return resp.json().await.map_err(|e| Error::Transport(TransportError::Http(e)));
        }

        let code = status.as_u16();
        if code == 429 {
            let retry_after_ms = Self::retry_after_ms(resp.headers());
            return Err(Error::RateLimited { retry_after_ms });
        }

        let message = resp.text().await.unwrap_or_default();
        if (500..600).contains(&code) {
            Err(Error::UpstreamServer { status: code, message })
        } else {
            Err(Error::UpstreamClient { status: code, message })
        }
    }
}

#[async_trait]
impl VideoBackend for HttpVideoApi {
    async fn submit(&self, request: &VideoJobRequest) -> Result<VideoJob> {
        let url = format!("{}/v1/generations", self.base_url);
        let mut req = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| Error::Transport(TransportError::Http(e)))?;
        Self::classify(resp).await
    }

    async fn status(&self, job_id: &str) -> Result<VideoJob> {
        let url = format!("{}/v1/generations/{}", self.base_url, job_id);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| Error::Transport(TransportError::Http(e)))?;
        Self::classify(resp).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
