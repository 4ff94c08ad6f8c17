//! redock entry point.
//!
//! `redock` runs update checks on an interval until Ctrl+C.
//! `redock check` runs one check and prints the result as JSON.
//! `redock recreate <name>` recreates an instance with its current settings.

use std::sync::Arc;

use anyhow::anyhow;
use log::{error, info};
use tokio::signal;

use redock::config::Config;
use redock::runtime::find_instance_id;
use redock::{DaemonGateway, DockerGateway, EditLock, EditOutcome, Orchestrator, UpdateDetector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting redock with config: {:?}", cfg);

    let gateway: Arc<dyn DaemonGateway> = Arc::new(DockerGateway::connect()?);
    let orchestrator = Arc::new(
        Orchestrator::new(gateway, EditLock::new()).with_destroy_wait(cfg.destroy_wait()),
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run_daemon(cfg, orchestrator).await,
        Some("check") => {
            let result = UpdateDetector::new(orchestrator).check_updates().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Some("recreate") => {
            let name = args
                .get(1)
                .ok_or_else(|| anyhow!("usage: redock recreate <name>"))?;
            recreate_by_name(&orchestrator, name).await
        }
        Some(other) => Err(anyhow!(
            "unknown command {other:?}, expected `check` or `recreate <name>`"
        )),
    }
}

async fn recreate_by_name(orchestrator: &Orchestrator, name: &str) -> anyhow::Result<()> {
    let gateway = orchestrator.gateway();
    let id = find_instance_id(gateway.as_ref(), name).await?;
    let desired = gateway.inspect(&id).await?;

    let outcome = EditOutcome::from(orchestrator.recreate(Some(&id), desired, false).await);
    println!("{name}: {outcome}");
    match outcome {
        EditOutcome::Applied { .. } => Ok(()),
        EditOutcome::RolledBack { cause, .. } => Err(anyhow!(
            "edit of {name} failed, previous state restored: {cause}"
        )),
        EditOutcome::Failed { error } => Err(error.into()),
    }
}

async fn run_daemon(cfg: Config, orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    let lock = orchestrator.lock().clone();
    let detector = UpdateDetector::new(orchestrator);

    let interval = cfg.update_interval();
    let check_on_startup = cfg.check_on_startup;
    let updates_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        if !check_on_startup {
            // The first tick completes immediately.
            ticker.tick().await;
        }
        loop {
            ticker.tick().await;
            let result = detector.check_updates().await;
            let pending: Vec<&str> = result
                .iter()
                .filter(|(_, available)| **available)
                .map(|(name, _)| name.as_str())
                .collect();
            info!(
                "Update check done: {} instances checked, updates pending for {:?}",
                result.len(),
                pending
            );
        }
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    // An edit cannot be interrupted once it has removed the old container.
    let _guard = lock.acquire().await;
    updates_handle.abort();

    info!("Shutdown complete.");
    Ok(())
}
