//! Plain HTTP fetcher

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use tracing::{debug, instrument};
use url::Url;

use super::{resolve_content_type, FetchResult, PageFetcher};
use crate::config::FetchConfig;
use crate::error::{PortalError, Result};

const MAX_REDIRECTS: usize = 10;

/// Performs one GET per target, following redirects
pub struct StaticFetcher {
    client: reqwest::Client,
}

impl StaticFetcher {
    /// Create a new static fetcher
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(user_agent)
            .build()
            .map_err(|e| PortalError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Self::new(config.timeout(), &config.user_agent)
    }

    /// Wrap an already configured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    #[instrument(skip(self), fields(target = %target))]
    async fn fetch(&self, target: &Url) -> Result<FetchResult> {
        let response = self.client.get(target.clone()).send().await?;

        let status = response.status();
        let final_url = response.url().clone();
        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Non-2xx bodies are returned like any other.
        let body = response.bytes().await?;

        debug!(
            "Fetched {} -> {} ({} bytes, status {})",
            target,
            final_url,
            body.len(),
            status
        );

        Ok(FetchResult {
            content_type: resolve_content_type(declared.as_deref(), &final_url),
            body,
            final_url,
            status,
        })
    }

    fn fetcher_name(&self) -> &'static str {
        "static"
    }
}
