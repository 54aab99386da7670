//! Auto-deploy job.
//!
//! Watches a branch of the hosted repository and, when its tip moves,
//! force-reinstalls the package from that branch into the local interpreter.
//! Every worker host runs its own copy of this job so that all processes pick
//! up the new code without an image rebuild.
//!
//! One run is three steps:
//!
//! 1. sensor: poll the branch tip until it differs from the last deployed
//!    commit (or the sensor times out),
//! 2. update: `pip install --upgrade --force-reinstall` from the branch,
//!    retried once after a delay,
//! 3. save: record the deployed commit with a compare-and-swap against the
//!    value observed by the sensor, so two overlapping runs cannot both claim
//!    the same transition.

use dagci_github::SourceHost;
use dagci_state::KvStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::process::{CommandOutput, CommandSpec, ProcessRunner};

/// Key under which the last deployed commit is stored.
pub const DEFAULT_STATE_KEY: &str = "impactu_last_deployed_commit";

/// Auto-deploy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Branch to follow
    pub branch: String,
    /// State key holding the last deployed commit
    pub state_key: String,
    /// JSON file backing the state store
    pub state_file: PathBuf,
    /// Interpreter whose site-packages receive the package
    pub python: String,
    /// Package repository URL; defaults to the GitHub clone URL
    pub package_url: Option<String>,
    /// Timeout for the pip install
    pub install_timeout_secs: u64,
    /// Delay between sensor pokes
    pub poke_interval_secs: u64,
    /// Give up sensing after this long
    pub sensor_timeout_secs: u64,
    /// Delay between scheduled runs (daemon only)
    pub schedule_interval_secs: u64,
    /// Extra attempts for the update step
    pub retries: u32,
    /// Delay before retrying the update step
    pub retry_delay_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            branch: std::env::var("DAGCI_DEPLOY_BRANCH").unwrap_or_else(|_| "main".to_string()),
            state_key: std::env::var("DAGCI_STATE_KEY")
                .unwrap_or_else(|_| DEFAULT_STATE_KEY.to_string()),
            state_file: std::env::var("DAGCI_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".dagci/state.json")),
            python: std::env::var("DAGCI_PYTHON").unwrap_or_else(|_| "python3".to_string()),
            package_url: std::env::var("DAGCI_PACKAGE_URL").ok(),
            install_timeout_secs: env_u64("DAGCI_INSTALL_TIMEOUT", 300),
            poke_interval_secs: env_u64("DAGCI_POKE_INTERVAL", 60),
            sensor_timeout_secs: env_u64("DAGCI_SENSOR_TIMEOUT", 600),
            schedule_interval_secs: env_u64("DAGCI_SCHEDULE_INTERVAL", 600),
            retries: env_u32("DAGCI_DEPLOY_RETRIES", 1),
            retry_delay_secs: env_u64("DAGCI_RETRY_DELAY", 300),
        }
    }
}

impl DeployConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, default, "Ignoring non-numeric setting");
            default
        }),
        Err(_) => default,
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    let raw = env_u64(name, u64::from(default));
    u32::try_from(raw).unwrap_or_else(|_| {
        warn!(var = name, value = raw, default, "Ignoring out-of-range setting");
        default
    })
}

/// A branch tip that differs from the last deployed commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdate {
    /// Tip commit of the followed branch
    pub commit: String,
    /// Last deployed commit as observed by the sensor
    pub previous: Option<String>,
}

/// Outcome of a successful [`DeployJob::run_once`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub commit: String,
    pub previous: Option<String>,
    /// Update attempts used (1 = no retry)
    pub attempts: u32,
    pub install_duration_ms: u64,
}

/// The auto-deploy job.
pub struct DeployJob {
    config: DeployConfig,
    package_url: String,
    source: Arc<dyn SourceHost>,
    state: Arc<dyn KvStore>,
    runner: Arc<dyn ProcessRunner>,
}

impl DeployJob {
    /// `repo_url` is used when the config does not override the package URL.
    pub fn new(
        config: DeployConfig,
        repo_url: &str,
        source: Arc<dyn SourceHost>,
        state: Arc<dyn KvStore>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let package_url = config
            .package_url
            .clone()
            .unwrap_or_else(|| repo_url.to_string());
        Self {
            config,
            package_url,
            source,
            state,
            runner,
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// pip requirement pointing at the followed branch.
    pub fn package_source(&self) -> String {
        format!("git+{}@{}", self.package_url, self.config.branch)
    }

    /// The reinstall command run by the update step.
    pub fn install_command(&self) -> CommandSpec {
        CommandSpec::new(&self.config.python)
            .args([
                "-m",
                "pip",
                "install",
                "--upgrade",
                "--force-reinstall",
                "--no-cache-dir",
            ])
            .arg(self.package_source())
            .timeout_secs(self.config.install_timeout_secs)
    }

    /// Compare the branch tip against the last deployed commit.
    ///
    /// Errors are propagated; see [`Self::check_for_updates`] for the
    /// sensor flavour that swallows them.
    pub async fn poll(&self) -> Result<Option<PendingUpdate>> {
        let latest = self.source.latest_commit(&self.config.branch).await?;
        let previous = self.state.get(&self.config.state_key).await?;

        info!(
            branch = %self.config.branch,
            latest = %latest,
            deployed = previous.as_deref().unwrap_or("<none>"),
            "Checked for updates"
        );

        if previous.as_deref() == Some(latest.as_str()) {
            debug!("Already up to date");
            return Ok(None);
        }
        info!(commit = %latest, "New commit detected");
        Ok(Some(PendingUpdate {
            commit: latest,
            previous,
        }))
    }

    /// Sensor step: like [`Self::poll`], but a failed check counts as
    /// "no update yet" so that a transient API error never fails the run.
    pub async fn check_for_updates(&self) -> Option<PendingUpdate> {
        match self.poll().await {
            Ok(update) => update,
            Err(e) => {
                warn!(error = %e, "Error checking for updates");
                None
            }
        }
    }

    /// Poke [`Self::check_for_updates`] every `poke_interval_secs` until an
    /// update shows up or `sensor_timeout_secs` elapses.
    pub async fn wait_for_update(&self) -> Result<PendingUpdate> {
        let timeout = Duration::from_secs(self.config.sensor_timeout_secs);
        let poke = Duration::from_secs(self.config.poke_interval_secs.max(1));
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(update) = self.check_for_updates().await {
                return Ok(update);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DeployError::SensorTimeout {
                    branch: self.config.branch.clone(),
                    waited_secs: self.config.sensor_timeout_secs,
                });
            }
            tokio::time::sleep(poke.min(deadline - now)).await;
        }
    }

    /// Update step: reinstall the package from the followed branch.
    pub async fn update_package(&self) -> Result<CommandOutput> {
        let command = self.install_command();
        info!(package = %self.package_source(), "Updating package");

        let output = self.runner.run(&command).await?;
        if !output.success() {
            warn!(exit_code = output.exit_code, stderr = %output.stderr, "Failed to update package");
            return Err(DeployError::InstallFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        debug!(stdout = %output.stdout, "pip output");
        info!(duration_ms = output.duration_ms, "Package updated");
        Ok(output)
    }

    /// [`Self::update_package`] with the configured retry policy.
    /// Returns the output of the successful attempt and the attempt count.
    pub async fn update_with_retry(&self) -> Result<(CommandOutput, u32)> {
        let max_attempts = self.config.retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.update_package().await {
                Ok(output) => return Ok((output, attempt)),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        retry_in_secs = self.config.retry_delay_secs,
                        error = %e,
                        "Update attempt failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Save step: swap the stored commit from the sensor's observation to the
    /// new tip. Fails with a storage conflict if another run got there first.
    pub async fn save_deployed_commit(&self, update: &PendingUpdate) -> Result<()> {
        self.state
            .compare_and_swap(
                &self.config.state_key,
                update.previous.as_deref(),
                &update.commit,
            )
            .await?;
        info!(commit = %update.commit, "Saved deployed commit");
        Ok(())
    }

    /// Sensor, update, save.
    pub async fn run_once(&self) -> Result<DeployOutcome> {
        let update = self.wait_for_update().await?;
        let (output, attempts) = self.update_with_retry().await?;
        self.save_deployed_commit(&update).await?;

        Ok(DeployOutcome {
            commit: update.commit,
            previous: update.previous,
            attempts,
            install_duration_ms: output.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingRunner;
    use dagci_github::fakes::FakeSourceHost;
    use dagci_state::fakes::MemoryKvStore;

    fn config() -> DeployConfig {
        DeployConfig {
            branch: "main".to_string(),
            state_key: DEFAULT_STATE_KEY.to_string(),
            state_file: PathBuf::from("unused.json"),
            python: "/usr/bin/python3".to_string(),
            package_url: None,
            install_timeout_secs: 300,
            poke_interval_secs: 60,
            sensor_timeout_secs: 600,
            schedule_interval_secs: 600,
            retries: 1,
            retry_delay_secs: 300,
        }
    }

    fn job(runner: RecordingRunner) -> DeployJob {
        DeployJob::new(
            config(),
            "https://github.com/omazapa/impactu_airflow.git",
            Arc::new(FakeSourceHost::new()),
            Arc::new(MemoryKvStore::new()),
            Arc::new(runner),
        )
    }

    #[test]
    fn test_install_command_matches_pip_invocation() {
        let job = job(RecordingRunner::new());
        let command = job.install_command();
        assert_eq!(
            command.display(),
            "/usr/bin/python3 -m pip install --upgrade --force-reinstall --no-cache-dir \
             git+https://github.com/omazapa/impactu_airflow.git@main"
        );
        assert_eq!(command.timeout_secs, 300);
    }

    #[test]
    fn test_package_url_override() {
        let mut cfg = config();
        cfg.package_url = Some("https://example.com/fork.git".to_string());
        cfg.branch = "develop".to_string();
        let job = DeployJob::new(
            cfg,
            "https://github.com/o/r.git",
            Arc::new(FakeSourceHost::new()),
            Arc::new(MemoryKvStore::new()),
            Arc::new(RecordingRunner::new()),
        );
        assert_eq!(
            job.package_source(),
            "git+https://example.com/fork.git@develop"
        );
    }

    #[test]
    fn test_env_u64_falls_back_on_garbage() {
        assert_eq!(env_u64("DAGCI_TEST_SURELY_UNSET_VARIABLE", 42), 42);
    }

    #[test]
    fn test_env_u32_rejects_out_of_range() {
        std::env::set_var("DAGCI_TEST_RETRIES_TOO_LARGE", "4294967296");
        assert_eq!(env_u32("DAGCI_TEST_RETRIES_TOO_LARGE", 1), 1);

        std::env::set_var("DAGCI_TEST_RETRIES_IN_RANGE", "4294967295");
        assert_eq!(env_u32("DAGCI_TEST_RETRIES_IN_RANGE", 1), u32::MAX);
    }

    #[tokio::test]
    async fn test_max_retries_does_not_overflow() {
        let mut cfg = config();
        cfg.retries = u32::MAX;
        let job = DeployJob::new(
            cfg,
            "https://github.com/o/r.git",
            Arc::new(FakeSourceHost::new()),
            Arc::new(MemoryKvStore::new()),
            Arc::new(RecordingRunner::new()),
        );
        let (_, attempts) = job.update_with_retry().await.unwrap();
        assert_eq!(attempts, 1);
    }
}
