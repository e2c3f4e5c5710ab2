use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use health_poller::network;
use health_poller::{
    AppConfig, HealthPoller, PollOutcome, ProbeTarget, ReqwestTransport, Scheduler,
    UniquenessPolicy,
};

/// Periodically probe a remote API and report whether it is healthy.
#[derive(Debug, Parser)]
#[command(name = "health_poller", version)]
struct Cli {
    /// Path to a TOML config file; the built-in default is used otherwise.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single tick, print the report as JSON and exit.
    #[arg(long)]
    once: bool,

    /// Override `schedule.interval_secs`.
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Override `schedule.policy`.
    #[arg(long, value_enum)]
    policy: Option<UniquenessPolicy>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load_default()?,
    };
    if let Some(secs) = cli.interval_secs {
        config.schedule.interval_secs = secs;
    }
    if let Some(policy) = cli.policy {
        config.schedule.policy = policy;
    }
    config.validate()?;

    let target = Arc::new(ProbeTarget::from_config(&config.probe)?);
    info!(
        url = %target.url,
        headers = ?target.describe_headers(),
        connect_timeout_ms = target.connect_timeout.as_millis() as u64,
        read_timeout_ms = target.read_timeout.as_millis() as u64,
        "starting health_poller"
    );

    let connectivity = network::checker_from_config(&config.connectivity, &target);
    let transport = Arc::new(ReqwestTransport::for_target(&target)?);
    let poller = HealthPoller::new(target, connectivity, transport);

    if cli.once {
        let report = poller.run_tick().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if report.outcome != PollOutcome::Success {
            std::process::exit(2);
        }
        return Ok(());
    }

    let scheduler = Scheduler::from_config(&config.schedule);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let identity = config.schedule.identity.clone();

    let periodic_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler.run_periodic(&identity, poller, shutdown_rx).await;
        })
    };

    tokio::signal::ctrl_c().await?;
    info!(policy = ?scheduler.policy(), "shutdown requested");
    let _ = shutdown_tx.send(true);
    if let Err(e) = periodic_handle.await {
        tracing::error!("periodic task error: {:#?}", e);
    }
    scheduler.shutdown_all().await;

    if let Some(status) = scheduler.status(&config.schedule.identity).await {
        info!(
            total_runs = status.total_runs,
            successes = status.successes,
            consecutive_failures = status.consecutive_failures,
            skipped_triggers = status.skipped_triggers,
            "health_poller stopped"
        );
    }

    Ok(())
}
