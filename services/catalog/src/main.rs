use anyhow::{Context, Result};
use catalog_service::api::{start_api_server, AppState};
use catalog_service::{
    AssetStore, Config, MovieCache, MovieLifecycle, PgRecordStore, Reconciler, RecordStore,
    S3AssetStore,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Nier Catalog Service"
    );

    init_metrics(config.service.metrics_port)?;

    let record_store = Arc::new(
        PgRecordStore::new(&config.database)
            .await
            .context("Failed to initialize record store")?,
    );

    if config.database.run_migrations {
        record_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let asset_store = Arc::new(
        S3AssetStore::new(&config.s3)
            .await
            .context("Failed to initialize asset store")?,
    );

    let assets: Arc<dyn AssetStore> = asset_store;
    let records: Arc<dyn RecordStore> = record_store;

    let lifecycle = Arc::new(MovieLifecycle::new(assets.clone(), records.clone()));

    let api_state = AppState {
        movies: Arc::new(MovieCache::new(lifecycle)),
        reconciler: Arc::new(Reconciler::new(
            assets,
            records.clone(),
            config.reconcile.orphan_grace(),
        )),
        records,
    };

    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Catalog service started successfully");

    shutdown_signal().await;

    info!("Shutting down catalog service");

    api_handle.abort();

    info!("Catalog service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
