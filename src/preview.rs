// src/preview.rs
//! Client for the attachment preview service: `GET <base>?atchmnflNo=<id>`
//! with a bearer token, answering `{success, content?, error?}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PREVIEW_ID_PARAM: &str = "atchmnflNo";

fn default_preview_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewConfig {
    pub base_url: String,
    pub token: String,
    #[serde(default = "default_preview_timeout_ms")]
    pub timeout_ms: u64,
}

impl PreviewConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            timeout_ms: default_preview_timeout_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Preview fetch timeout after {0}ms")]
    Timeout(u64),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("Preview API responded with success=false: {0}")]
    Api(String),
    #[error("Malformed preview response: {0}")]
    Decode(String),
    #[error("Preview request failed: {0}")]
    Request(String),
}

/// Source of extracted attachment text.
#[async_trait]
pub trait PreviewLookup: Send + Sync {
    async fn fetch_preview(&self, preview_id: &str) -> Result<String, PreviewError>;
}

#[derive(Debug, Deserialize)]
struct PreviewResponse {
    success: Option<bool>,
    content: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
pub struct HttpPreviewClient {
    client: Client,
    config: PreviewConfig,
}

impl HttpPreviewClient {
    pub fn new(config: PreviewConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Base URL with `atchmnflNo` set to `preview_id`. An id already present
    /// on the base is replaced, other parameters are kept.
    pub fn preview_url(&self, preview_id: &str) -> Result<Url, PreviewError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| PreviewError::Request(format!("invalid preview base URL: {e}")))?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| &**k != PREVIEW_ID_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(PREVIEW_ID_PARAM, preview_id);
        Ok(url)
    }
}

#[async_trait]
impl PreviewLookup for HttpPreviewClient {
    async fn fetch_preview(&self, preview_id: &str) -> Result<String, PreviewError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                PreviewError::Timeout(self.config.timeout_ms)
            } else if e.is_decode() {
                PreviewError::Decode(e.to_string())
            } else {
                PreviewError::Request(e.to_string())
            }
        };

        let url = self.preview_url(preview_id)?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.config.token)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        if !resp.status().is_success() {
            return Err(PreviewError::Status(resp.status().as_u16()));
        }

        let body: PreviewResponse = resp.json().await.map_err(map_err)?;
        match body {
            PreviewResponse {
                success: Some(true),
                content: Some(content),
                ..
            } => Ok(content.trim().to_string()),
            PreviewResponse { error, .. } => Err(PreviewError::Api(
                error.unwrap_or_else(|| "Missing preview content in response".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpPreviewClient {
        HttpPreviewClient::new(PreviewConfig::new(base, "t"))
    }

    #[test]
    fn id_param_is_set_not_appended() {
        let url = client("https://preview.example.com/parse?lang=ko&atchmnflNo=1")
            .preview_url("76744")
            .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("lang".to_string(), "ko".to_string()),
                ("atchmnflNo".to_string(), "76744".to_string()),
            ]
        );
    }

    #[test]
    fn bare_base_gets_a_query() {
        let url = client("https://preview.example.com/parse").preview_url("7").unwrap();
        assert_eq!(url.as_str(), "https://preview.example.com/parse?atchmnflNo=7");
    }

    #[test]
    fn unparsable_base_is_a_request_error() {
        let err = client("not a url").preview_url("7").unwrap_err();
        assert!(matches!(err, PreviewError::Request(_)), "got {err:?}");
    }
}
