use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleetd_agent::cloud::CloudWriter;
use fleetd_agent::command_client::CommandClient;
use fleetd_agent::policy_client::PolicyClient;
use fleetd_agent::registrar::Registrar;
use fleetd_agent::scheduler::Scheduler;
use fleetd_agent::writer::{EnvelopeWriter, LocalWriter};
use fleetd_agent::{http_client, ConfigHandle};
use fleetd_collect::{capabilities, default_collectors};
use fleetd_config::AgentConfig;

/// Drain window for graceful shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "fleetd-agent", version, about = "fleetd endpoint agent")]
struct Cli {
    /// Path to the agent config file.
    #[arg(long, env = "FLEETD_AGENT_CONFIG", default_value = "/etc/fleetd/agent.yml")]
    config: PathBuf,

    /// API endpoint used when bootstrapping a fresh config.
    #[arg(long, env = "FLEETD_API_ENDPOINT", default_value = "https://fleet.example.com")]
    api_endpoint: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent (default).
    Run,
    /// Run every collector once and print the envelope to stdout.
    Collect,
    /// Print the effective configuration.
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, created) = AgentConfig::load_or_bootstrap(&cli.config, &cli.api_endpoint)
        .context("loading agent config")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if created {
        info!(path = %cli.config.display(), "bootstrapped fresh agent config");
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, cli.config).await,
        Command::Collect => collect_once(config).await,
        Command::ShowConfig => {
            // The stored token is a secret; show presence, not the value.
            let mut shown = config;
            if shown.auth_token.is_some() {
                shown.auth_token = Some("<set>".to_string());
            }
            println!("{}", serde_yaml::to_string(&shown)?);
            Ok(())
        }
    }
}

async fn run(config: AgentConfig, config_path: PathBuf) -> Result<()> {
    info!(
        device_id = %config.device_id,
        interval = config.collection_interval,
        "fleetd agent starting"
    );

    let handle = ConfigHandle::new(config.clone(), config_path);
    let client = http_client()?;
    let collectors = default_collectors();
    let caps = capabilities(&collectors);

    let cloud = CloudWriter::new(client.clone(), handle.clone());
    let local = Arc::new(LocalWriter::new(config.local_output_path.clone()));
    let writers: Vec<Arc<dyn EnvelopeWriter>> = vec![local, cloud.clone()];

    let (scheduler, scheduler_handle) = Scheduler::new(
        config.device_id,
        fleetd_agent::agent_version().to_string(),
        collectors,
        &config.enabled_metrics,
        Duration::from_secs(u64::from(config.collection_interval)),
        writers,
    );

    // Registration is a startup requirement: a conflict is fatal, transient
    // failures have already been retried with backoff.
    let registrar = Registrar::new(client.clone(), handle.clone(), caps, cloud.clone());
    registrar
        .ensure_registered()
        .await
        .context("device registration")?;

    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn(scheduler.run(cancel.clone()));
    tasks.spawn(cloud.clone().run_drain_loop(cancel.clone()));
    tasks.spawn(
        PolicyClient::new(client.clone(), handle.clone(), scheduler_handle.clone())
            .run(cancel.clone()),
    );
    tasks.spawn(
        CommandClient::new(client.clone(), handle.clone(), scheduler_handle.clone())
            .run(cancel.clone()),
    );
    tasks.spawn(registrar.run(cancel.clone()));

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutdown signal received; draining");
    cancel.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("drain window elapsed; aborting remaining tasks");
        tasks.abort_all();
    }

    info!("fleetd agent stopped");
    Ok(())
}

/// One-shot collection for operators: every collector, no writers, envelope
/// on stdout.
async fn collect_once(config: AgentConfig) -> Result<()> {
    let collectors = default_collectors();
    let mut metrics = std::collections::BTreeMap::new();

    for collector in &collectors {
        match tokio::time::timeout(
            fleetd_agent::scheduler::COLLECTOR_DEADLINE,
            collector.collect(),
        )
        .await
        {
            Ok(Ok(payload)) => {
                metrics.insert(collector.name(), payload);
            }
            Ok(Err(e)) => error!(metric = %collector.name(), error = %e, "collector failed"),
            Err(_) => error!(metric = %collector.name(), "collector exceeded deadline"),
        }
    }

    let envelope = fleetd_domain::Envelope {
        device_id: config.device_id,
        agent_version: fleetd_agent::agent_version().to_string(),
        collected_at: chrono::Utc::now(),
        seq: 0,
        metrics,
        tags: None,
    };
    println!("{}", serde_yaml::to_string(&envelope)?);
    Ok(())
}
