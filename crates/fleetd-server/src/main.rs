use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleetd_api::{build_app, ApiMetrics, AppState, RateLimiter};
use fleetd_config::{LogFormat, ServerConfig};
use fleetd_log::JetStreamLog;
use fleetd_pipeline::{CommandExpirer, PartitionManager, PipelineMetrics, TelemetryWriter};
use fleetd_store::PostgresStore;

/// Bounded startup retries against an unreachable database.
const DB_CONNECT_ATTEMPTS: u32 = 5;
const DB_CONNECT_PAUSE: Duration = Duration::from_secs(3);

/// Drain window for graceful shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "fleetd-server", version, about = "fleetd ingest and control service")]
struct Cli {}

#[tokio::main]
async fn main() -> Result<()> {
    Cli::parse();

    // Config before tracing: the log format itself is configuration.
    let config = ServerConfig::from_env().context("server configuration")?;
    init_tracing(&config);

    info!(
        listen = %config.listen_addr,
        retention_days = config.retention_days,
        horizon_days = config.horizon_days,
        "fleetd server starting"
    );
    if config.tls_cert_path.is_some() {
        info!("TLS material configured; termination is handled by the ingress");
    }

    let store = connect_store(&config).await?;
    let log = Arc::new(
        JetStreamLog::connect(&config.nats_url, &config.consumer_name)
            .await
            .context("durable log connection")?,
    );

    let registry = Arc::new(Registry::new());
    let api_metrics = Arc::new(
        ApiMetrics::register(&registry).context("metrics registration")?,
    );
    let pipeline_metrics = Arc::new(
        PipelineMetrics::register(&registry).context("metrics registration")?,
    );

    let state = AppState {
        store: store.clone(),
        log: log.clone(),
        admin_token: Arc::new(config.admin_token.clone()),
        limiter: Arc::new(RateLimiter::new(config.rate_limit_per_minute)),
        registry,
        metrics: api_metrics,
        started_at: Utc::now(),
    };
    let app = build_app(state);

    // Background workers, each on its own child cancellation signal.
    let cancel = CancellationToken::new();
    let mut workers = tokio::task::JoinSet::new();
    workers.spawn(
        TelemetryWriter::new(
            store.clone(),
            log,
            config.retention_days,
            config.ingest_max_batch,
            pipeline_metrics.clone(),
        )
        .run(cancel.child_token()),
    );
    workers.spawn(CommandExpirer::new(store.clone(), pipeline_metrics.clone()).run(cancel.child_token()));
    workers.spawn(
        PartitionManager::new(
            store,
            config.retention_days,
            config.horizon_days,
            config.partition_hour,
            pipeline_metrics,
        )
        .run(cancel.child_token()),
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("shutdown signal received; draining workers");
    cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        while workers.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("drain window elapsed; aborting remaining workers");
        workers.abort_all();
    }

    info!("fleetd server stopped");
    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

async fn connect_store(config: &ServerConfig) -> Result<Arc<PostgresStore>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match PostgresStore::connect(&config.database_url).await {
            Ok(store) => return Ok(Arc::new(store)),
            Err(e) => {
                if attempt >= DB_CONNECT_ATTEMPTS {
                    bail!("database unreachable after {DB_CONNECT_ATTEMPTS} attempts: {e}");
                }
                warn!(attempt, error = %e, "database connect failed; retrying");
                tokio::time::sleep(DB_CONNECT_PAUSE).await;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
