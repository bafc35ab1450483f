//! mdagg-server - HTTP front end of the metadata aggregation engine

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mdagg_service::config::ServiceConfig;
use mdagg_service::crawler::{run_invalidation_loop, supervise};
use mdagg_service::services::{build_services, shutdown_signal, ProcessRole};
use mdagg_service::{build_router, AppState};

/// Command-line arguments for mdagg-server
#[derive(Parser, Debug)]
#[command(name = "mdagg-server")]
#[command(about = "Music metadata aggregation server")]
#[command(version)]
struct Args {
    /// Configuration file (overrides MDAGG_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "MDAGG_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mdagg_service=info,mdagg_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting mdagg server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let services = build_services(&config, ProcessRole::Server).await?;
    // Pools are created lazily, so a provider that is down at startup can still recover
    if let Err(e) = services.registry.init_all().await {
        warn!(error = %e, "Provider initialization failed, continuing");
    }
    let registry = services.registry.clone();

    // The sweep expires this process's fast tier, so it runs here and not in the crawler
    let cancel = CancellationToken::new();
    let sweep = services.sweep.clone();
    let interval = Duration::from_secs(config.crawler.invalidation_interval_secs);
    let restart_backoff = Duration::from_secs(config.crawler.restart_backoff_secs);
    let sweep_cancel = cancel.clone();
    let sweeper = tokio::spawn(async move {
        let (sweep, token) = (sweep.as_ref(), &sweep_cancel);
        supervise("invalidation", restart_backoff, token, || {
            run_invalidation_loop(sweep, interval, token)
        })
        .await;
    });

    let state = AppState::new(&services, config.ttl.edge);
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Invalidation task panicked");
    }
    registry.shutdown_all().await;
    info!("Server shutdown complete");
    Ok(())
}
