//! Service entry point.

use std::sync::Arc;

use anyhow::Context;
use api::{Config, Engine, LogFormat};
use event_processor::ReactionRegistry;
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore, SnapshotRepository};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_store(
    config: &Config,
) -> anyhow::Result<(Arc<dyn EventStore>, Arc<dyn SnapshotRepository>)> {
    let Some(url) = &config.database_url else {
        tracing::info!("DATABASE_URL not set, using the in-memory event store");
        let store = Arc::new(InMemoryEventStore::new());
        let snapshots: Arc<dyn SnapshotRepository> = store.clone();
        let events: Arc<dyn EventStore> = store;
        return Ok((events, snapshots));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;
    let store = Arc::new(PostgresEventStore::new(pool));
    store
        .run_migrations()
        .await
        .context("failed to run event store migrations")?;
    tracing::info!("using the PostgreSQL event store");
    let snapshots: Arc<dyn SnapshotRepository> = store.clone();
    let events: Arc<dyn EventStore> = store;
    Ok((events, snapshots))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    // 3. Event store and engine
    let (store, snapshots) = open_store(&config).await?;
    let engine = Engine::start(config.clone(), store, snapshots, ReactionRegistry::new()).await?;

    // 4. Build the application
    let app = api::create_app(engine.registrar().clone(), metrics_handle);

    // 5. Serve until a shutdown signal arrives
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    engine.shutdown().await;
    tracing::info!("server shut down gracefully");
    Ok(())
}
