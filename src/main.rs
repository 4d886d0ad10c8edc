//! Clipper Webhooks server
//!
//! Serves the inbound Stripe endpoint, health and admin routes, and runs the
//! retry scheduler until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clipper_webhooks::handlers::{router, AppState};
use clipper_webhooks::store::InMemoryStore;
use clipper_webhooks::stripe::{LoggingHandler, StripeEventRouter};
use clipper_webhooks::{WebhookConfig, WebhookService};
use tracing_subscriber::EnvFilter;

/// Clipper Webhooks server
#[derive(Parser, Debug)]
#[command(name = "clipper-webhooks")]
#[command(author = "Clipper Team")]
#[command(version)]
#[command(about = "Webhook ingestion, signed delivery and retry scheduling")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override the retry scan interval (seconds)
    #[arg(long)]
    scan_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = WebhookConfig::from_env().context("loading configuration")?;
    if let Some(secs) = args.scan_interval {
        config.scan_interval = Duration::from_secs(secs);
        config.validate().context("applying --scan-interval")?;
    }

    let service = Arc::new(WebhookService::new(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::new(StripeEventRouter::new(Arc::new(LoggingHandler))),
    )?);
    let scheduler = Arc::new(service.scheduler()).start();

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(
        %addr,
        scan_interval_secs = service.config().scan_interval.as_secs(),
        "Clipper Webhooks listening"
    );

    let app = router(AppState::new(service));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.shutdown().await;
    served.context("HTTP server failed")?;
    tracing::info!("Clipper Webhooks stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
