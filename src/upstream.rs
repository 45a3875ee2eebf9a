//! Upstream Client
//!
//! Fetches JSON documents from the configured upstream API. Used as the
//! fallback for `/fetch` requests that miss the cache.

use reqwest::Client;
use thiserror::Error;

/// Failure talking to the upstream API.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream returned {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// JSON GET client bound to a base URL.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Full URL for `path`, which is expected to start with `/`.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// GETs `path` and decodes the body as JSON.
    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value, UpstreamError> {
        let url = self.url_for(path);
        let request_error = |source| UpstreamError::Request {
            url: url.clone(),
            source,
        };

        let response = self.client.get(&url).send().await.map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: url.clone(),
                status,
            });
        }

        response.json().await.map_err(request_error)
    }
}
