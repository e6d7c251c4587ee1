//! Request dispatch
//!
//! Chooses a fetch strategy, runs the matching fetcher and decides whether the result is
//! rewritten or passed through untouched.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::StatusCode;
use tracing::{debug, info, instrument};
use url::Url;

use super::fetch::{FetchResult, PageFetcher, HTML_CONTENT_TYPE};
use super::rewrite::{rewrite_document, RewriteContext};
use super::strategy::{FetchStrategy, StrategySelector};
use crate::error::{PortalError, Result};

/// Caller intent for a proxied request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// `/proxy`: pick a strategy, rewrite HTML
    Document,
    /// `/resource`: static fetch, never rewritten
    ResourceOnly,
}

impl ProxyMode {
    /// Prefix for server-side error messages
    pub fn error_prefix(&self) -> &'static str {
        match self {
            Self::Document => "Proxy error",
            Self::ResourceOnly => "Resource proxy error",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::ResourceOnly => "resource",
        }
    }
}

/// A single inbound request to proxy
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub target_url: String,
    pub mode: ProxyMode,
}

impl ProxyRequest {
    pub fn document(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            mode: ProxyMode::Document,
        }
    }

    pub fn resource(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            mode: ProxyMode::ResourceOnly,
        }
    }
}

/// What is written back to the client
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
}

impl ProxyResponse {
    fn passthrough(result: FetchResult) -> Self {
        Self {
            status: result.status,
            content_type: result.content_type,
            body: result.body,
        }
    }
}

/// Orchestrates strategy selection, fetching and rewriting
pub struct Dispatcher {
    selector: Arc<dyn StrategySelector>,
    static_fetcher: Arc<dyn PageFetcher>,
    rendered_fetcher: Arc<dyn PageFetcher>,
}

impl Dispatcher {
    pub fn new(
        selector: Arc<dyn StrategySelector>,
        static_fetcher: Arc<dyn PageFetcher>,
        rendered_fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            selector,
            static_fetcher,
            rendered_fetcher,
        }
    }

    /// Handle one proxied request
    #[instrument(skip(self, request), fields(mode = request.mode.as_str(), target = %request.target_url))]
    pub async fn dispatch(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        let target = parse_target(&request.target_url)?;
        let started = Instant::now();

        let response = match request.mode {
            ProxyMode::ResourceOnly => {
                let result = self.static_fetcher.fetch(&target).await?;
                ProxyResponse::passthrough(result)
            }
            ProxyMode::Document => {
                let strategy = self.selector.select(target.as_str());
                let fetcher = self.fetcher_for(strategy);
                info!(
                    "{} -> {} ({} fetcher)",
                    strategy.as_str(),
                    target,
                    fetcher.fetcher_name()
                );

                let result = fetcher.fetch(&target).await?;
                if result.is_html() {
                    rewrite(result)
                } else {
                    ProxyResponse::passthrough(result)
                }
            }
        };

        debug!(
            "Dispatched {} ({} bytes, {}) in {:?}",
            target,
            response.body.len(),
            response.content_type,
            started.elapsed()
        );

        Ok(response)
    }

    /// Release fetcher resources (the shared browser)
    pub async fn shutdown(&self) {
        self.rendered_fetcher.shutdown().await;
        self.static_fetcher.shutdown().await;
    }

    fn fetcher_for(&self, strategy: FetchStrategy) -> &Arc<dyn PageFetcher> {
        match strategy {
            FetchStrategy::Static => &self.static_fetcher,
            FetchStrategy::Rendered => &self.rendered_fetcher,
        }
    }
}

fn parse_target(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PortalError::MissingUrl);
    }

    let url = Url::parse(raw)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PortalError::InvalidUrl(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

fn rewrite(result: FetchResult) -> ProxyResponse {
    let ctx = RewriteContext::new(result.final_url);
    let body = rewrite_document(&result.body, &ctx);

    ProxyResponse {
        status: result.status,
        content_type: HTML_CONTENT_TYPE.to_string(),
        body: Bytes::from(body),
    }
}
