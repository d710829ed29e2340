//! faro-fino binary entrypoint.
//! Loads config, starts the polling loop and the command API, and stops both
//! on Ctrl-C.

use anyhow::Context;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use faro_fino::{api, build_scheduler, config::AppConfig, metrics::Metrics};

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("faro_fino=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load().context("loading configuration")?;
    tracing::info!(config = ?cfg, "configuration loaded");

    let metrics = Metrics::init()?;
    let scheduler = build_scheduler(&cfg)?;
    let core = scheduler.handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let server = if cfg.api.enabled {
        let addr: SocketAddr = cfg.api.bind.parse().context("parsing api.bind")?;
        let app = api::router(api::AppState { core }).merge(metrics.router());
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        tracing::info!(%addr, "command API listening");
        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                })
                .await
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Err(e) = poller.await {
        tracing::warn!("polling task ended abnormally: {e}");
    }
    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => tracing::warn!("command API error: {e}"),
            Err(e) => tracing::warn!("command API task ended abnormally: {e}"),
            Ok(Ok(())) => {}
        }
    }
    Ok(())
}
