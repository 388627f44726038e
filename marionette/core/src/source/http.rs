//! HTTP client for the animation service

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, warn};

use super::{SequenceListing, SequenceSource, SequenceSummary};
use crate::clip::{AssetLoader, Clip, ClipDecoder, SequenceDescriptor};
use crate::config::{ConfigError, ServiceConfig};
use crate::error::EngineError;

/// Timeout for the health check, independent of the request timeout
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse the service base URL so relative references join under it
fn parse_base_url(base_url: &str) -> Result<Url, EngineError> {
    let mut normalized = base_url.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(|e| {
        EngineError::Config(ConfigError::ValidationError(format!(
            "invalid service URL '{base_url}': {e}"
        )))
    })
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, EngineError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EngineError::asset_load("http client", e))
}

/// Resolve a clip reference; absolute URLs pass through, relative ones join the base
///
/// # Errors
///
/// Returns `EngineError::AssetLoad` if the reference is not a valid URL.
pub fn resolve_clip_url(base: &Url, clip_ref: &str) -> Result<Url, EngineError> {
    base.join(clip_ref)
        .map_err(|e| EngineError::asset_load(clip_ref, e))
}

/// [`SequenceSource`] backed by the animation service
#[derive(Clone, Debug)]
pub struct HttpSequenceSource {
    base_url: Url,
    http_client: reqwest::Client,
}

impl HttpSequenceSource {
    /// Create a client for the configured service
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &ServiceConfig) -> Result<Self, EngineError> {
        Ok(Self {
            base_url: parse_base_url(&config.base_url)?,
            http_client: build_client(config.request_timeout)?,
        })
    }

    /// The normalized base URL
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of an endpoint below the base, one path segment per element
    fn endpoint(&self, segments: &[&str]) -> Result<Url, EngineError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| EngineError::asset_load(self.base_url.as_str(), "URL cannot have a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        resource: &str,
        url: Url,
    ) -> Result<T, EngineError> {
        debug!(%url, "GET");
        self.http_client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| EngineError::asset_load(resource, e))?
            .json::<T>()
            .await
            .map_err(|e| EngineError::asset_load(resource, e))
    }
}

#[async_trait]
impl SequenceSource for HttpSequenceSource {
    fn name(&self) -> &'static str {
        "animation-service"
    }

    async fn fetch_descriptor(&self, name: &str) -> Result<SequenceDescriptor, EngineError> {
        let url = self.endpoint(&["sequence", name])?;
        self.get_json(name, url).await
    }

    async fn list_sequences(&self) -> Result<Vec<SequenceSummary>, EngineError> {
        let url = self.endpoint(&["sequences"])?;
        let listing: SequenceListing = self.get_json("sequences", url).await?;
        if listing.count != listing.sequences.len() {
            warn!(
                count = listing.count,
                listed = listing.sequences.len(),
                "Sequence listing count mismatch"
            );
        }
        Ok(listing.sequences)
    }

    async fn health_check(&self) -> bool {
        let Ok(url) = self.endpoint(&["health"]) else {
            return false;
        };
        self.http_client
            .get(url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}

/// [`AssetLoader`] that downloads clips and hands the bytes to a [`ClipDecoder`]
#[derive(Clone)]
pub struct HttpAssetLoader {
    base_url: Url,
    http_client: reqwest::Client,
    decoder: Arc<dyn ClipDecoder>,
}

impl std::fmt::Debug for HttpAssetLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAssetLoader")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpAssetLoader {
    /// Create a loader resolving relative clip references against the service
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &ServiceConfig, decoder: Arc<dyn ClipDecoder>) -> Result<Self, EngineError> {
        Ok(Self {
            base_url: parse_base_url(&config.base_url)?,
            http_client: build_client(config.request_timeout)?,
            decoder,
        })
    }
}

#[async_trait]
impl AssetLoader for HttpAssetLoader {
    async fn load_clip(&self, clip_ref: &str) -> Result<Clip, EngineError> {
        let url = resolve_clip_url(&self.base_url, clip_ref)?;
        debug!(%url, "Downloading clip");
        let bytes = self
            .http_client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| EngineError::asset_load(clip_ref, e))?
            .bytes()
            .await
            .map_err(|e| EngineError::asset_load(clip_ref, e))?;
        self.decoder.decode(clip_ref, &bytes)
    }
}
