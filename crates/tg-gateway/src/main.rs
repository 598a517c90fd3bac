// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tg_dispatch::{DefaultAdapterProvider, Dispatcher};
use tg_gateway::routes::{AppState, WebhookRouter, build_query_app, build_tools_app};
use tg_gateway::GatewayConfig;
use tg_ratelimit::{MemoryCounterStore, RateLimiter};
use tg_store::{PassthroughCipher, Store};
use tg_webhook::WebhookReceiver;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tg-gateway", version, about = "Trackgate integration gateway")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the tools-surface bind address.
    #[arg(long)]
    tools_bind: Option<String>,

    /// Override the query-surface bind address.
    #[arg(long)]
    query_bind: Option<String>,

    /// Override the SQLite store path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_deref()).context("load config")?;
    if let Some(bind) = args.tools_bind {
        config.tools_bind = bind;
    }
    if let Some(bind) = args.query_bind {
        config.query_bind = bind;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let filter = if args.debug { "tg=debug" } else { "tg=info" };
    tg_telemetry::init_tracing(filter, config.log_json);

    let store = Arc::new(
        Store::open(&config.db_path, Arc::new(PassthroughCipher)).context("open store")?,
    );

    let limiter = RateLimiter::new(
        Arc::new(MemoryCounterStore::new()),
        config.rate_limit,
        Duration::from_secs(config.rate_limit_window_secs),
    );
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        limiter,
        Arc::new(DefaultAdapterProvider),
    );

    let mut webhooks = WebhookRouter::new();
    for (backend, secret) in &config.webhook_secrets {
        webhooks.insert(backend, Arc::new(WebhookReceiver::new(Some(secret.clone()))));
    }
    if config.webhook_secrets.is_empty() {
        warn!("no webhook secrets configured; webhook endpoints are disabled");
    }
    let webhooks = Arc::new(webhooks);

    // Periodic sweep of expired idempotency keys.
    {
        let store = Arc::clone(&store);
        let cadence = Duration::from_secs(config.idempotency_sweep_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.idempotency_cleanup_expired() {
                    Ok(removed) if removed > 0 => {
                        info!(removed, "idempotency sweeper removed expired keys");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "idempotency sweep failed"),
                }
            }
        });
    }

    let tools_state = Arc::new(AppState {
        store: Arc::clone(&store),
        dispatcher: dispatcher.clone(),
        webhooks: Arc::clone(&webhooks),
        server_name: "trackgate-tools",
    });
    let query_state = Arc::new(AppState {
        store,
        dispatcher,
        webhooks,
        server_name: "trackgate-query",
    });

    let tools_listener = tokio::net::TcpListener::bind(&config.tools_bind)
        .await
        .with_context(|| format!("bind {}", config.tools_bind))?;
    let query_listener = tokio::net::TcpListener::bind(&config.query_bind)
        .await
        .with_context(|| format!("bind {}", config.query_bind))?;

    info!(
        tools_bind = %config.tools_bind,
        query_bind = %config.query_bind,
        db = %config.db_path.display(),
        "trackgate listening"
    );

    let tools_server = axum::serve(tools_listener, build_tools_app(tools_state));
    let query_server = axum::serve(query_listener, build_query_app(query_state));

    tokio::try_join!(
        async { tools_server.await },
        async { query_server.await },
    )
    .context("serve")?;
    Ok(())
}
