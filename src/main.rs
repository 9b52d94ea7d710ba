//! OpenSASE Slips - payment slip verification service

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_slips::events::EventPublisher;
use opensase_slips::repository::PgSlipRepository;
use opensase_slips::storage::DiskStorage;
use opensase_slips::{http, Config, SlipService};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db = PgPoolOptions::new().max_connections(config.db_max_connections).connect(&config.database_url).await
        .context("connecting to postgres")?;
    sqlx::migrate!("./migrations").run(&db).await.context("running migrations")?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(%url, error = %e, "NATS unavailable, events disabled");
                None
            }
        },
        None => None,
    };

    let service = SlipService::new(
        PgSlipRepository::new(db.clone(), config.retry),
        DiskStorage::new(&config.slip_dir, config.slip_public_prefix.clone()),
        EventPublisher::new(nats),
    )
    .with_max_bytes(config.slip_max_bytes)
    .with_delete_mode(config.delete_mode);
    let app = http::router(Arc::new(service));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("🚀 OpenSASE Slips listening on 0.0.0.0:{}", config.port);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    db.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown signal received");
}
