//! Media Relay Server
//!
//! Resolves media identifiers through an external extraction tool and
//! relays the resulting streams to clients, for several content channels
//! at once. Results are cached, deliveries are admission controlled, and
//! upstream connections are dropped as soon as a client goes away.

mod cache;
mod config;
mod config_file;
mod delivery;
mod error;
mod extract;
mod formats;
mod http;
#[cfg(test)]
mod integration;
mod limits;
mod metrics;
mod proxy;
mod resolver;
mod state;
mod usage;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::extract::ToolInvoker;
use crate::http::create_router;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "media-relay";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let first = args.next();

    if first.as_deref() == Some("--write-config") {
        let path = args.next().unwrap_or_else(|| "config.toml".to_string());
        crate::config_file::generate_default_config(&path)
            .map_err(|e| ServerError::Config(e.to_string()))?;
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    // Load configuration
    let config_path = first.unwrap_or_else(|| "config.toml".to_string());
    let (config, load_error) = if std::path::Path::new(&config_path).exists() {
        match crate::config_file::ConfigFile::from_file(&config_path) {
            Ok(cf) => (cf.into_server_config(), None),
            Err(e) => (ServerConfig::default(), Some(e.to_string())),
        }
    } else {
        (ServerConfig::default(), None)
    };

    // Initialize logging
    init_logging(&config);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            config_path,
            e
        );
    }
    tracing::info!("Configuration loaded: {:?}", config);

    // Probe the extraction tool once; the result is advisory
    let invoker = Arc::new(ToolInvoker::new(config.extractor.program.clone()));
    if !invoker.probe().await {
        tracing::warn!(
            "{} could not be started; requests will fail until it is installed",
            config.extractor.program
        );
    }

    // Create application state
    let state = Arc::new(AppState::new(config.clone(), invoker));

    // Background task: sweep expired cache entries.
    {
        let state_bg = Arc::clone(&state);
        let period = Duration::from_secs(config.caches.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if state_bg.is_shutdown() {
                    break;
                }
                let removed = state_bg.sweep_caches();
                if removed > 0 {
                    tracing::debug!("Swept {} expired cache entr(ies)", removed);
                }
            }
        });
    }

    // Build router
    let app = create_router(state.clone());

    // Start server
    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| ServerError::Config(format!("Invalid listen address: {}", e)))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown();
    tracing::info!("{} stopped", APP_NAME);

    Ok(())
}

/// Initialize logging with tracing
fn init_logging(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("media_relay={},tower_http=info", config.log_level).into()
    });
    let json = config.log_format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
