//! HTTP server using Axum

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::{BoxError, Router};
use tokio::sync::watch;
use tower::timeout::{error::Elapsed, TimeoutLayer};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ServerConfig;
use crate::error::{PortalError, Result};
use crate::proxy::Dispatcher;

use super::middleware::{cors_layer, RequestLogging};
use super::routes;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// HTTP server
pub struct ApiServer {
    config: ServerConfig,
    state: AppState,
}

impl ApiServer {
    /// Create a new server
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            state: AppState { dispatcher },
        }
    }

    /// Build the router with all layers applied
    pub fn build_router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        let router = routes::create_router(self.state.clone(), &self.config.public_dir)
            .layer(from_fn(RequestLogging::log_request));

        with_request_timeout(router, Duration::from_secs(self.config.request_timeout))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until the shutdown channel fires
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| {
                PortalError::InvalidConfig(format!(
                    "Invalid server address {}:{}",
                    self.config.host, self.config.port
                ))
            })?;

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("Portal listening on {}", addr);
        info!("Serving front-end from {}", self.config.public_dir.display());

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| PortalError::Internal(e.to_string()))?;

        info!("Portal server shut down");
        Ok(())
    }

    /// Serve until `signal` resolves, then drain
    ///
    /// Returns the server's own error if it stops first, e.g. when the address is taken.
    pub async fn run_until<F>(&self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = self.run(shutdown_rx);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = signal => {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
                run.await
            }
        }
    }
}

/// Bound every request; an expired one gets a plain-text 504
fn with_request_timeout(router: Router, limit: Duration) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(timeout_response))
            .layer(TimeoutLayer::new(limit)),
    )
}

async fn timeout_response(err: BoxError) -> Response {
    if err.is::<Elapsed>() {
        PortalError::RequestTimeout.into_response()
    } else {
        PortalError::Internal(err.to_string()).into_response()
    }
}
