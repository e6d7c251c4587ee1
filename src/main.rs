//! Portal - Entry Point
//!
//! Starts the HTTP server and closes the shared browser after it drains.

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use portal::api::ApiServer;
use portal::config::{Config, LogConfig};
use portal::proxy::fetch::RenderedFetcherConfig;
use portal::proxy::{
    Dispatcher, FetchStrategy, FixedSelector, HostHintSelector, RenderedFetcher, StaticFetcher,
    StrategySelector,
};

#[tokio::main]
async fn main() -> portal::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Portal");

    let selector: Arc<dyn StrategySelector> = match config.fetch.force_strategy.as_deref() {
        Some(forced) => Arc::new(FixedSelector(FetchStrategy::from_str(forced))),
        None => Arc::new(HostHintSelector::new(&config.fetch.dynamic_host_hints)),
    };
    info!("Using strategy selector: {}", selector.selector_name());

    let static_fetcher = Arc::new(StaticFetcher::from_config(&config.fetch)?);
    let rendered_fetcher = Arc::new(RenderedFetcher::new(RenderedFetcherConfig::from_config(
        &config.render,
        &config.fetch.user_agent,
    )));

    let dispatcher = Arc::new(Dispatcher::new(selector, static_fetcher, rendered_fetcher));

    let server = ApiServer::new(config.server.clone(), dispatcher.clone());
    info!("Starting server on {}", config.server_addr());

    let result = server.run_until(shutdown_signal()).await;
    dispatcher.shutdown().await;

    if let Err(ref e) = result {
        error!("Server error: {}", e);
    }

    info!("Portal stopped");
    result
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("portal={},tower_http=debug", log.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
