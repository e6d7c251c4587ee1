//! Route definitions

use std::path::Path;

use axum::routing::get;
use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

use super::handlers;
use super::server::AppState;

/// Create the router with all routes
///
/// Anything that is not an endpoint or an existing front-end file gets `index.html`.
pub fn create_router(state: AppState, public_dir: &Path) -> Router {
    let frontend = ServeDir::new(public_dir).fallback(ServeFile::new(public_dir.join("index.html")));

    Router::new()
        .route("/proxy", get(handlers::proxy::proxy_document))
        .route("/resource", get(handlers::proxy::proxy_resource))
        .route("/_health", get(handlers::health::health_check))
        .fallback_service(frontend)
        .with_state(state)
}
