//! dagci - CI jobs for workflow (DAG) repositories
//!
//! ## Commands
//!
//! - `validate`: validate the DAG changes of a pull request
//! - `report`: show the persisted validation report of a pull request
//! - `deploy check`: report whether the followed branch has a new commit
//! - `deploy run`: one sensor, update, save cycle of the auto-deploy job

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dagci_core::{DeployConfig, DeployJob, SystemRunner};
use dagci_github::GitHubClient;
use dagci_state::FsKvStore;
use dagci_validator::{
    PrValidator, ReportGate, ValidationError, ValidationReport, ValidationRequest,
    ValidatorConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{warn, Level};

#[derive(Parser)]
#[command(name = "dagci")]
#[command(author = "Colav Engineering")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "PR validation and auto-deploy for workflow repositories", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the DAG files changed by a pull request
    Validate {
        /// Pull request number
        #[arg(long)]
        pr: u64,

        /// GitHub token (anonymous access is rate limited)
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Directory holding the per-PR workspaces
        #[arg(long, env = "DAGCI_SCRATCH_ROOT")]
        scratch_root: Option<PathBuf>,
    },

    /// Show the persisted validation report of a pull request
    Report {
        /// Pull request number
        #[arg(long)]
        pr: u64,

        /// Directory holding the per-PR workspaces
        #[arg(long, env = "DAGCI_SCRATCH_ROOT")]
        scratch_root: Option<PathBuf>,
    },

    /// Auto-deploy job
    Deploy {
        #[command(subcommand)]
        action: DeployAction,
    },
}

#[derive(Subcommand)]
enum DeployAction {
    /// Check the followed branch once for a new commit
    Check,

    /// Wait for a new commit, reinstall the package and record the commit
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dagci_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate {
            pr,
            token,
            scratch_root,
        } => cmd_validate(pr, token, scratch_root).await,
        Commands::Report { pr, scratch_root } => cmd_report(pr, scratch_root),
        Commands::Deploy { action } => match action {
            DeployAction::Check => cmd_deploy_check().await,
            DeployAction::Run => cmd_deploy_run().await,
        },
    }
}

fn validator_config(scratch_root: Option<PathBuf>) -> ValidatorConfig {
    let mut config = ValidatorConfig::from_env();
    if let Some(root) = scratch_root {
        config.scratch_root = root;
    }
    config
}

fn github_client() -> Result<GitHubClient> {
    GitHubClient::from_env().context("Failed to build GitHub client")
}

async fn cmd_validate(
    pr: u64,
    token: Option<String>,
    scratch_root: Option<PathBuf>,
) -> Result<()> {
    let config = validator_config(scratch_root);
    if !config.is_enabled() {
        anyhow::bail!(
            "PR validation only runs when ENVIRONMENT=dev (current: {})",
            config.environment.as_deref().unwrap_or("<unset>")
        );
    }

    let mut request = ValidationRequest::new(pr);
    if let Some(token) = &token {
        request = request.with_token(token.as_str());
    }
    // the request carries the token; the run authenticates the host with it
    let client = github_client()?;
    println!("Validating PR #{} of {}", pr, client.config().full_name());

    let validator = PrValidator::new(config, Arc::new(client), Arc::new(SystemRunner));
    let report_path = validator.report_path(pr);
    let outcome = validator.run(&request).await;

    let report = match outcome {
        Ok(report) => report,
        Err(e @ (ValidationError::InvalidRequest(_) | ValidationError::Locked { .. })) => {
            return Err(e.into())
        }
        Err(e) => ValidationReport::load(&report_path)
            .with_context(|| format!("Validation failed ({e}) without writing a report"))?,
    };

    println!("{}", render_report(&report));
    println!("Report: {}", report_path.display());

    let verdict = ReportGate::evaluate(&report);
    if !verdict.violations.is_empty() {
        println!("Violations:");
        for violation in &verdict.violations {
            println!("  - {}", violation);
        }
    }

    if verdict.passed {
        println!("\n✓ {}", verdict.message);
        Ok(())
    } else {
        anyhow::bail!("{}", verdict.message)
    }
}

fn cmd_report(pr: u64, scratch_root: Option<PathBuf>) -> Result<()> {
    let path = validator_config(scratch_root).report_path(pr);
    let report = ValidationReport::load(&path)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn deploy_job() -> Result<DeployJob> {
    let config = DeployConfig::from_env();
    let client = github_client()?;
    if client.config().token.is_none() {
        warn!("No GitHub token provided; unauthenticated rate limits apply");
    }
    let repo_url = client.config().clone_url();
    let state = FsKvStore::new(&config.state_file);
    Ok(DeployJob::new(
        config,
        &repo_url,
        Arc::new(client),
        Arc::new(state),
        Arc::new(SystemRunner),
    ))
}

async fn cmd_deploy_check() -> Result<()> {
    let job = deploy_job()?;
    match job.poll().await? {
        Some(update) => {
            println!("New commit on {}: {}", job.config().branch, update.commit);
            println!(
                "Last deployed: {}",
                update.previous.as_deref().unwrap_or("<none>")
            );
        }
        None => println!("{} is up to date", job.config().branch),
    }
    Ok(())
}

async fn cmd_deploy_run() -> Result<()> {
    let job = deploy_job()?;
    println!("Installing from {}", job.package_source());
    let outcome = job.run_once().await.context("Auto-deploy failed")?;

    println!("Deployed commit: {}", outcome.commit);
    println!(
        "Previous commit: {}",
        outcome.previous.as_deref().unwrap_or("<none>")
    );
    println!(
        "Attempts: {} ({}ms install)",
        outcome.attempts, outcome.install_duration_ms
    );
    Ok(())
}

/// Terminal summary of a report.
fn render_report(report: &ValidationReport) -> String {
    let mut lines = vec![
        format!("PR #{}: {}", report.pr_number, report.status.as_str()),
        format!("Run ID: {}", report.run_id),
        format!("Timestamp: {}", report.timestamp.to_rfc3339()),
    ];
    if let Some(message) = &report.message {
        lines.push(format!("Message: {message}"));
    }
    if let Some(error) = &report.error {
        lines.push(format!("Error: {error}"));
    }
    for stage in dagci_validator::Stage::ALL {
        if let Some(result) = report.stage(stage) {
            let status = if result.success() { "✓" } else { "✗" };
            lines.push(format!(
                "  {} {} ({} passed, {} failed)",
                status,
                stage,
                result.passed.len(),
                result.failed.len()
            ));
        }
    }
    lines.join("\n")
}
