//! # Orchid - entry point
//!
//! `run` wires the runtime in order:
//!
//! 1. **Config** - TOML file, `--data-dir`, then `ORCHID_*` environment overrides
//! 2. **Runtime** - object store, gateway router, sandbox manager, tools
//! 3. **Plan** - projects and goals seeded from the plan file
//! 4. **Watcher** - periodic sweeps until Ctrl+C or every goal is completed
//!
//! On the way out the watcher stops first, then every agent and sandbox.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use orchestrator::watcher::{self, WATCHER_NAME};
use orchestrator::{OrchestratorConfig, Runtime};
use orchid::cli::{Cli, Commands};
use orchid::plan::{Plan, seed};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { plan } => {
            let config = load_config(cli.config.as_deref(), cli.data_dir)?;
            run(config, plan.as_deref()).await
        }
        Commands::Plan { plan } => {
            let plan = load_plan(&plan)?;
            for project in &plan.projects {
                println!("{}", project.name);
                for (depth, layer) in project.layers().iter().enumerate() {
                    println!("  layer {depth}: {}", layer.join(", "));
                }
                for cycle in project.cycles() {
                    println!("  cycle: {}", cycle.join(" -> "));
                }
            }
            Ok(())
        }
        Commands::Ready { plan } => {
            let plan = load_plan(&plan)?;
            for project in &plan.projects {
                println!("{}: {}", project.name, project.ready_keys().join(", "));
            }
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::load(path).context("Failed to load configuration")?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    Ok(config)
}

fn load_plan(path: &Path) -> Result<Plan> {
    Plan::from_file(path).with_context(|| format!("Failed to load plan {}", path.display()))
}

async fn run(config: OrchestratorConfig, plan: Option<&Path>) -> Result<()> {
    let start_time = Instant::now();
    info!(data_dir = %config.data_dir.display(), "Orchid starting");

    let runtime = Runtime::builder(config)
        .build()
        .context("Runtime initialization failed. Check the [gateway] section of your config")?;

    if let Some(path) = plan {
        let plan = load_plan(path)?;
        let seeded = seed(&runtime, &plan).await.context("Failed to seed plan")?;
        for project in &seeded {
            info!(project_id = %project.project_id, name = %project.name, goals = project.goals.len(), "Project ready");
        }
    }

    let watcher = watcher::spawn(Arc::clone(&runtime), WATCHER_NAME, true)
        .await
        .context("Failed to start the watcher")?;
    info!(startup_ms = start_time.elapsed().as_millis(), "Orchid is running. Press Ctrl+C to stop.");

    tokio::select! {
        () = wait_for_shutdown() => {}
        () = wait_for_completion(&runtime) => info!("Every goal is completed"),
    }

    info!("Cleaning up...");
    watcher.stop().await;
    runtime.shutdown().await;
    info!("Orchid stopped");
    Ok(())
}

/// Resolve once every goal of every active project is completed.
async fn wait_for_completion(runtime: &Runtime) {
    let interval = runtime.config().watcher.interval;
    loop {
        tokio::time::sleep(interval).await;
        match open_goals(runtime).await {
            Ok(0) => return,
            Ok(open) => info!(open, "Goals still open"),
            Err(e) => warn!(error = %e, "Failed to count open goals"),
        }
    }
}

async fn open_goals(runtime: &Runtime) -> orchid_core::Result<usize> {
    let mut open = 0;
    for project in runtime.projects().list().await? {
        if !project.is_active() {
            continue;
        }
        open += runtime
            .goals()
            .list(&project.id)
            .await?
            .iter()
            .filter(|g| g.is_pending())
            .count();
    }
    Ok(open)
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
