//! Proxy endpoint handlers

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, warn};

use crate::api::server::AppState;
use crate::error::PortalError;
use crate::proxy::{ProxyMode, ProxyRequest};

/// Query parameters shared by `/proxy` and `/resource`
#[derive(Debug, Deserialize, Default)]
pub struct ProxyQuery {
    pub url: Option<String>,
}

/// Fetch a page and rewrite it when it is HTML
pub async fn proxy_document(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Response {
    serve(&state, ProxyMode::Document, query).await
}

/// Fetch a subresource and return it untouched
pub async fn proxy_resource(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Response {
    serve(&state, ProxyMode::ResourceOnly, query).await
}

async fn serve(state: &AppState, mode: ProxyMode, query: ProxyQuery) -> Response {
    let Some(target_url) = query.url.filter(|u| !u.trim().is_empty()) else {
        return PortalError::MissingUrl.into_response();
    };

    let request = ProxyRequest { target_url, mode };
    match state.dispatcher.dispatch(&request).await {
        Ok(response) => (
            response.status,
            [(header::CONTENT_TYPE, response.content_type)],
            response.body,
        )
            .into_response(),
        Err(e) => {
            if e.is_server_error() {
                error!("{} {} failed: {}", mode.as_str(), request.target_url, e);
            } else {
                warn!("{} {} rejected: {}", mode.as_str(), request.target_url, e);
            }
            e.into_prefixed_response(mode.error_prefix())
        }
    }
}
