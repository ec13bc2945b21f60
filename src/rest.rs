use std::future::Future;

use serde::Deserialize;
use tracing::debug;

use crate::error::Error;

/// Default API base used by [`HttpMetadataProvider`].
const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Connection metadata returned by the remote service.
///
/// Cacheable until `session_start_limit.reset_after` milliseconds after it was
/// fetched; the gateway facade re-fetches lazily on expiry.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayMetadata {
    /// Base WebSocket URL to connect shards to.
    pub url: String,
    /// Server-recommended shard count for automatic sizing.
    pub shards: u16,
    /// Identify budget for the rolling bring-up window.
    pub session_start_limit: SessionStartLimit,
}

/// The identify budget attached to gateway metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until the budget window resets. Doubles as the metadata
    /// cache TTL; zero or absent means the caller falls back to a short TTL.
    #[serde(default)]
    pub reset_after: u64,
    /// Maximum concurrent identify operations per rolling window.
    pub max_concurrency: u32,
}

/// External collaborator that fetches gateway connection metadata.
///
/// The HTTP request layer is a black box to the connection machinery; bring-up
/// only depends on the typed payload. Failures surface as
/// [`Error::MetadataFetch`] and bring-up must not proceed on partial data.
pub trait MetadataProvider: Send + Sync + 'static {
    fn fetch_gateway_metadata(
        &self,
    ) -> impl Future<Output = crate::Result<GatewayMetadata>> + Send;
}

/// Metadata provider backed by the service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpMetadataProvider {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpMetadataProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        let token = token.into();
        let token = if token.starts_with("Bot ") {
            token
        } else {
            format!("Bot {token}")
        };
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }
}

impl MetadataProvider for HttpMetadataProvider {
    async fn fetch_gateway_metadata(&self) -> crate::Result<GatewayMetadata> {
        let url = format!("{}/gateway/bot", self.base_url);
        debug!("fetching gateway metadata from {url}");

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, &self.token)
            .send()
            .await
            .map_err(|e| Error::MetadataFetch(e.to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| Error::MetadataFetch(e.to_string()))?;

        response
            .json::<GatewayMetadata>()
            .await
            .map_err(|e| Error::MetadataFetch(e.to_string()))
    }
}
