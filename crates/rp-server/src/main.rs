//! Route planner listener: keeps the system catalogue current from the relay feed.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rp_server::api;
use rp_server::config::{Config, LogFormat};
use rp_server::loops::{ingest_loop, stats_loop};
use rp_server::persistence::{init_database, SqliteStore};
use rp_server::state::AppState;

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_level)?;
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    tracing::info!("Starting route planner listener...");

    let db = init_database(&config.database_path, config.database_max_connections).await?;
    let store = SqliteStore::new(&db);
    tracing::info!("Catalogue holds {} systems", store.count().await?);
    let state = Arc::new(AppState::new(Arc::new(store)));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
            }
            shutdown.cancel();
        });
    }

    tokio::spawn(stats_loop::run_stats_loop(
        state.clone(),
        config.stats_interval,
        shutdown.clone(),
    ));

    let app = api::routes().with_state(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    let ingest = ingest_loop::run_ingest_loop(state.clone(), config, shutdown.clone()).await;
    shutdown.cancel();

    if let Err(err) = &ingest {
        tracing::error!("Ingest stopped: {:#}", err);
    }
    server.await??;
    db.pool().close().await;

    let stats = state.stats();
    tracing::info!(
        processed = stats.processed,
        applied = stats.applied,
        "Listener stopped"
    );
    ingest
}
