use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use saferoute::api::create_router;
use saferoute::config::Config;
use saferoute::engine::RouteEngine;
use saferoute::store::{FileNetworkSource, NetworkStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Safest-route API server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides `server.listen`
    #[arg(long)]
    listen: Option<String>,

    /// Road network file (.osm.pbf or .json), overrides `network.path`
    #[arg(long)]
    network: Option<PathBuf>,

    /// Crime report export (JSON), overrides `crimes.path`
    #[arg(long)]
    crimes: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("saferoute=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(network) = args.network {
        config.network.path = network;
    }
    if let Some(crimes) = args.crimes {
        config.crimes.path = crimes;
    }
    config.validate().context("invalid configuration")?;

    // 1. Load the road network
    let source = Arc::new(FileNetworkSource::new(
        config.network.path.clone(),
        config.network.format,
    ));
    let attempts = config.network.load_attempts;
    let backoff = Duration::from_millis(config.network.retry_backoff_ms);
    let store = {
        let source = Arc::clone(&source);
        let region = config.region.clone();
        tokio::task::spawn_blocking(move || {
            NetworkStore::load(source.as_ref(), region, attempts, backoff)
        })
        .await?
        .with_context(|| format!("failed to load road network {}", config.network.path.display()))?
    };
    let store = Arc::new(store);

    // 2. Periodic network refresh
    if let Some(secs) = config.network.refresh_interval_secs.filter(|s| *s > 0) {
        let store = Arc::clone(&store);
        let source = Arc::clone(&source);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            // The first tick fires immediately and the network is already loaded.
            interval.tick().await;
            loop {
                interval.tick().await;
                let store = Arc::clone(&store);
                let source = Arc::clone(&source);
                let result = tokio::task::spawn_blocking(move || {
                    store.refresh_from(source.as_ref(), attempts, backoff)
                })
                .await;
                match result {
                    Ok(Ok(version)) => info!("Network refreshed to v{version}"),
                    Ok(Err(e)) => warn!("Network refresh failed, keeping current snapshot: {e}"),
                    Err(e) => warn!("Network refresh task panicked: {e}"),
                }
            }
        });
        info!("Refreshing the road network every {secs} s");
    }

    // 3. Engine and router
    let listen = config.server.listen.clone();
    let engine = Arc::new(RouteEngine::from_config(config, store)?);
    let app = create_router(engine);

    info!("API server running on http://{listen}");
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
