//! dagcid - auto-deploy daemon
//!
//! Runs the auto-deploy job on a fixed schedule until interrupted. A run that
//! outlasts its slot delays the next one instead of overlapping it, and
//! missed slots are not caught up.

use anyhow::{Context, Result};
use clap::Parser;
use dagci_core::{DeployConfig, DeployError, DeployJob, SystemRunner};
use dagci_github::GitHubClient;
use dagci_state::FsKvStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "dagcid")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Auto-deploy daemon for workflow repositories", long_about = None)]
struct Args {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

/// Counters for one scheduler lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SchedulerStats {
    runs: u32,
    deployed: u32,
    idle: u32,
    failed: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dagci_core::init_tracing(args.json, level);

    let config = DeployConfig::from_env();
    let client = GitHubClient::from_env().context("Failed to build GitHub client")?;
    if client.config().token.is_none() {
        warn!("No GitHub token provided; unauthenticated rate limits apply");
    }
    let repo_url = client.config().clone_url();
    let state = FsKvStore::new(&config.state_file);
    let interval = Duration::from_secs(config.schedule_interval_secs.max(1));
    let job = DeployJob::new(
        config,
        &repo_url,
        Arc::new(client),
        Arc::new(state),
        Arc::new(SystemRunner),
    );

    info!(
        version = dagci_core::VERSION,
        interval_secs = interval.as_secs(),
        package = %job.package_source(),
        "dagcid started"
    );
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let stats = run_scheduler(&job, interval, shutdown).await;
    info!(
        runs = stats.runs,
        deployed = stats.deployed,
        failed = stats.failed,
        "dagcid stopped"
    );
    Ok(())
}

/// Run `job` every `interval` until `shutdown` resolves. A shutdown during a
/// run abandons that run.
async fn run_scheduler<F>(job: &DeployJob, interval: Duration, shutdown: F) -> SchedulerStats
where
    F: Future<Output = ()>,
{
    let mut stats = SchedulerStats::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        stats.runs += 1;
        let outcome = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested; abandoning current run");
                break;
            }
            outcome = job.run_once() => outcome,
        };

        match outcome {
            Ok(deployed) => {
                stats.deployed += 1;
                info!(
                    commit = %deployed.commit,
                    attempts = deployed.attempts,
                    "Deployed new commit"
                );
            }
            Err(DeployError::SensorTimeout { waited_secs, .. }) => {
                stats.idle += 1;
                info!(waited_secs, "No new commit this run");
            }
            Err(e) => {
                stats.failed += 1;
                error!(error = %e, "Auto-deploy run failed");
            }
        }
    }
    stats
}
