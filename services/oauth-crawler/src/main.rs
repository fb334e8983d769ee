//! OAuth Crawler
//!
//! Single-binary crawler that:
//! 1. Loads seeds and OAuth credentials from config
//! 2. Signs each request with a token drawn from a rotating OAuth1 pool
//!    (or attaches a static OAuth2 bearer token)
//! 3. Retires tokens the responses condemn and waits out their cooldown
//!    instead of stopping while requests are held

mod admin;
mod config;
mod crawler;
mod error;
mod metrics;
mod service;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use oauth_sign::{BearerAuth, CrawlRequest, HmacSha1Signer};
use tokio::net::TcpListener;
use tokio::sync::watch;
use token_pool::{CooldownWindow, RetryCoordinator, TokenPool};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::config::{ClassifierKind, Config};
use crate::crawler::{Crawler, FetchOutcome, status_policy};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting oauth-crawler");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder().context("failed to install metrics recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let client = reqwest::Client::builder()
        .user_agent(config.crawler.user_agent.clone())
        .build()
        .context("failed to build HTTP client")?;

    let mut crawler = Crawler::new(
        client,
        Duration::from_secs(config.crawler.timeout_secs),
        config.crawler.max_in_flight,
    );

    let mut pool = None;
    if let Some(oauth1) = &config.oauth1 {
        let tokens = oauth1
            .resolve_tokens()
            .await
            .context("failed to load oauth1 tokens")?;
        let token_pool = Arc::new(
            TokenPool::with_tokio_clock(tokens, CooldownWindow::from_minutes(oauth1.cooldown_minutes))
                .context("failed to build token pool")?,
        );
        let mut coordinator =
            RetryCoordinator::<FetchOutcome>::new(token_pool.clone(), Arc::new(HmacSha1Signer::new()))
                .with_max_attempts(config.crawler.max_attempts);
        if oauth1.classifier == ClassifierKind::Status {
            coordinator = coordinator.with_classifier(Arc::new(status_policy));
        }
        info!(
            tokens = token_pool.total(),
            cooldown_minutes = oauth1.cooldown_minutes,
            classifier = ?oauth1.classifier,
            "oauth1 pool ready"
        );
        crawler = crawler.with_oauth1(Arc::new(coordinator));
        pool = Some(token_pool);
    }

    if let Some(oauth2) = &config.oauth2 {
        // Config::load rejects an [oauth2] section without a token
        if let Some(token) = oauth2.token.clone() {
            info!(client_id = %oauth2.client_id, "oauth2 bearer enabled");
            crawler = crawler.with_oauth2(BearerAuth::new(oauth2.client_id.clone(), token));
        }
    }

    info!(
        seeds = config.crawler.seeds.len(),
        max_in_flight = config.crawler.max_in_flight,
        metrics_addr = ?config.crawler.metrics_addr,
        "configuration loaded"
    );

    if let Some(addr) = config.crawler.metrics_addr {
        let app = admin::router(AdminState {
            pool,
            prometheus: prometheus_handle,
            started_at: Instant::now(),
        });
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics listener to {addr}"))?;
        info!(addr = %addr, "metrics listener ready");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "metrics listener failed");
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let seeds = config
        .crawler
        .seeds
        .iter()
        .map(|url| CrawlRequest::get(url.as_str()))
        .collect();
    let summary = crawler.run(seeds, shutdown_rx).await;

    info!(
        pages = summary.pages,
        errors = summary.errors,
        dropped = summary.dropped,
        resumptions = summary.resumptions,
        "shutdown complete"
    );
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
