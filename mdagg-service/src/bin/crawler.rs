//! mdagg-crawler - background refresh of the durable caches
//!
//! `--initialize` seeds the durable caches with every known id and exits.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mdagg_service::config::ServiceConfig;
use mdagg_service::crawler::{Crawler, CrawlerSettings};
use mdagg_service::services::{build_services, shutdown_signal, ProcessRole};

/// Command-line arguments for mdagg-crawler
#[derive(Parser, Debug)]
#[command(name = "mdagg-crawler")]
#[command(about = "Keeps the mdagg durable cache fresh")]
#[command(version)]
struct Args {
    /// Configuration file (overrides MDAGG_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replace the durable caches with every known id, then exit
    #[arg(long)]
    initialize: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mdagg_service=info,mdagg_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting mdagg crawler v{}", env!("CARGO_PKG_VERSION"));

    let config = ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let services = build_services(&config, ProcessRole::Crawler).await?;
    let crawler = Crawler::new(
        services.aggregator.clone(),
        CrawlerSettings::from_config(&config.crawler),
    );

    if args.initialize {
        services.registry.init_all().await.context("Provider initialization failed")?;
        let report = crawler.initialize().await.context("Cache initialization failed")?;
        info!(artists = report.artists, albums = report.albums, "Initialization complete");
        services.registry.shutdown_all().await;
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    crawler.run(cancel).await;

    services.registry.shutdown_all().await;
    info!("Crawler shutdown complete");
    Ok(())
}
