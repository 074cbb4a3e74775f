//! ibwatch agent - InfiniBand port health monitoring for a single node
//!
//! Runs the InfiniBand check on a fixed interval:
//! - `ibstat`/`ibstatus` as port sources
//! - JSON file event history with hourly retention purge
//! - SIGHUP reloads the port policy, SIGINT/SIGTERM stop the agent
//! - `--scan` runs one check without history and prints the port table

mod capabilities;
mod config;
mod execution;
mod tools;

use anyhow::{Context, Result};
use capabilities::SysfsInstrumentation;
use chrono::Utc;
use clap::Parser;
use config::AgentConfig;
use ibwatch_check::{Component, EventStore, InfinibandComponent, JsonEventStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tools::ToolSource;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const RETENTION_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser, Debug)]
#[command(name = "ibwatch-agent")]
#[command(about = "InfiniBand port health monitoring agent")]
struct Args {
    /// Path to the config file (defaults to $IBWATCH_CONFIG or the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single check without event history, print the result and exit
    #[arg(long)]
    scan: bool,
}

impl Args {
    fn load_config(&self) -> Result<AgentConfig> {
        match &self.config {
            Some(path) => AgentConfig::load_from(path),
            None => AgentConfig::load(),
        }
    }
}

fn build_component(config: &AgentConfig) -> Result<InfinibandComponent> {
    Ok(InfinibandComponent::new(config.check_config()?)
        .with_instrumentation(Arc::new(SysfsInstrumentation::new(config.check.require_nvidia)))
        .with_sources(Arc::new(ToolSource::ibstat()), Arc::new(ToolSource::ibstatus())))
}

/// One-off check: no history, so drop and flap detection are skipped.
async fn scan(config: &AgentConfig) -> Result<()> {
    let component = build_component(config)?;
    let result = component.check_at(Utc::now()).await;

    println!("{result}");
    println!();
    for state in result.health_states(component.name()) {
        println!("{}: {:?} ({})", state.component, state.health, state.reason);
        if !state.error.is_empty() {
            println!("error: {}", state.error);
        }
    }
    Ok(())
}

async fn run_retention(
    store: Arc<JsonEventStore>,
    retention: chrono::Duration,
    shutdown: CancellationToken,
) {
    let mut timer = tokio::time::interval(RETENTION_PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = timer.tick() => {}
        }

        let Some(before) = Utc::now().checked_sub_signed(retention) else {
            continue;
        };
        match store.purge(before) {
            Ok(0) => {}
            Ok(removed) => info!(removed, before = %before, "purged old events"),
            Err(e) => error!(error = %e, "failed to purge events"),
        }
    }
}

async fn run(args: &Args, config: AgentConfig) -> Result<()> {
    let retention_window = config.retention()?;
    let store_path = &config.store.path;
    let store = Arc::new(
        JsonEventStore::open(store_path)
            .with_context(|| format!("Failed to open event store {}", store_path.display()))?,
    );
    let shutdown = CancellationToken::new();

    let infiniband = build_component(&config)?
        .with_event_store(store.clone())
        .with_parent_cancel(&shutdown);
    if !infiniband.is_supported() {
        warn!("infiniband check not supported on this node, cycles will be skipped");
    }

    let components: Vec<Box<dyn Component>> = vec![Box::new(infiniband.clone())];
    for component in &components {
        info!(component = component.name(), tags = ?component.tags(), "starting component");
        component.start();
    }

    let retention = tokio::spawn(run_retention(store, retention_window, shutdown.clone()));

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("terminated, shutting down");
                break;
            }
            _ = sighup.recv() => match args.load_config() {
                Ok(reloaded) => infiniband.set_expected_port_states(reloaded.policy),
                Err(e) => error!(error = ?e, "failed to reload configuration"),
            },
        }
    }

    shutdown.cancel();
    for component in &components {
        component.close().await;
    }
    if let Err(e) = retention.await {
        warn!(error = %e, "retention task ended abnormally");
    }

    for state in infiniband.last_health_states() {
        info!(health = ?state.health, reason = %state.reason, "last state");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ibwatch_check=info,ibwatch_agent=info")),
        )
        .init();

    let args = Args::parse();
    let config = args.load_config().context("Failed to load configuration")?;

    if args.scan {
        return scan(&config).await;
    }

    info!("ibwatch agent starting");
    run(&args, config).await.context("Agent execution failed")
}
