//! PR validation pipeline orchestration.
//!
//! ```text
//! lock -> reset workspace -> PR metadata -> filter task definitions
//!      -> (none: skipped)
//!      -> base archive -> overlay -> ignore file
//!      -> provision -> metadata store
//!      -> syntax -> imports -> structure (first failing stage stops the run)
//! ```
//!
//! The report is persisted on every terminal path. A stage failure leaves
//! `failed` in the report; any other error leaves `error` with its text.

use dagci_core::ProcessRunner;
use dagci_github::SourceHost;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::backend::{BackendFactory, EngineBackendFactory};
use crate::checks::CheckRunner;
use crate::config::ValidatorConfig;
use crate::error::{FetchError, ValidationError};
use crate::fetch::{write_ignore_file, Fetcher};
use crate::provision::Provisioner;
use crate::report::ValidationReport;
use crate::stage::Stage;
use crate::workspace::{ScratchWorkspace, WorkspaceLock};

/// One validation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub pr_number: u64,

    /// API token; anonymous access is rate limited.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

impl ValidationRequest {
    pub fn new(pr_number: u64) -> Self {
        Self {
            pr_number,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pr_number == 0 {
            return Err(ValidationError::InvalidRequest(
                "PR number must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// PR validation pipeline.
pub struct PrValidator {
    config: ValidatorConfig,
    host: Arc<dyn SourceHost>,
    runner: Arc<dyn ProcessRunner>,
    backends: Arc<dyn BackendFactory>,
}

impl PrValidator {
    /// Validator driving the real workflow engine through `runner`.
    pub fn new(
        config: ValidatorConfig,
        host: Arc<dyn SourceHost>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let backends = Arc::new(EngineBackendFactory::new(
            runner.clone(),
            config.check_timeout_secs,
        ));
        Self::with_backends(config, host, runner, backends)
    }

    pub fn with_backends(
        config: ValidatorConfig,
        host: Arc<dyn SourceHost>,
        runner: Arc<dyn ProcessRunner>,
        backends: Arc<dyn BackendFactory>,
    ) -> Self {
        Self {
            config,
            host,
            runner,
            backends,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Where the report of `pr_number` is persisted.
    pub fn report_path(&self, pr_number: u64) -> PathBuf {
        self.config.report_path(pr_number)
    }

    /// Validate one PR.
    ///
    /// Returns the report when the run ends `success` or `skipped`. Every
    /// other outcome is an error; the persisted report then carries the
    /// details. An invalid request or a held lock fails before any report
    /// is written.
    pub async fn run(&self, request: &ValidationRequest) -> Result<ValidationReport, ValidationError> {
        request.validate()?;
        let pr_number = request.pr_number;
        let host = match request.token.as_deref() {
            Some(token) => self.host.authenticated(token),
            None => {
                warn!("No API token provided; requests may be rate limited");
                self.host.clone()
            }
        };

        let lock = WorkspaceLock::try_acquire(&self.config.scratch_root, pr_number)?;
        let Some(_lock) = lock else {
            return Err(ValidationError::Locked {
                pr_number,
                lock: WorkspaceLock::lock_path(&self.config.scratch_root, pr_number)
                    .display()
                    .to_string(),
            });
        };

        let start = Instant::now();
        let report_path = self.report_path(pr_number);
        let mut report = ValidationReport::new(pr_number);
        info!(pr = pr_number, run_id = %report.run_id, "Starting PR validation");

        let outcome = self.execute(host.as_ref(), &mut report, &report_path).await;
        if let Err(e) = &outcome {
            if e.is_check_failure() {
                error!(pr = pr_number, error = %e, "PR validation failed");
            } else {
                error!(pr = pr_number, error = %e, "PR validation aborted");
                report.mark_error(e);
            }
        }
        persist(&report, &report_path);

        info!(
            pr = pr_number,
            status = report.status.as_str(),
            duration_ms = start.elapsed().as_millis() as u64,
            report = %report_path.display(),
            "PR validation finished"
        );
        outcome.map(|()| report)
    }

    async fn execute(
        &self,
        host: &dyn SourceHost,
        report: &mut ValidationReport,
        report_path: &Path,
    ) -> Result<(), ValidationError> {
        let pr_number = report.pr_number;
        let workspace = ScratchWorkspace::reset(&self.config.scratch_root, pr_number)?;
        let root = workspace.path();
        persist(report, report_path);

        let pr = host
            .pull_request(pr_number)
            .await
            .map_err(FetchError::Metadata)?;
        let files = host
            .pull_request_files(pr_number)
            .await
            .map_err(FetchError::Metadata)?;
        info!(
            pr = pr_number,
            title = %pr.title,
            base = %pr.base.name,
            head = %pr.head.name,
            changed_files = files.len(),
            "Fetched PR metadata"
        );
        report.title = Some(pr.title.clone());

        let dag_files: Vec<String> = files
            .iter()
            .map(|f| f.filename.clone())
            .filter(|name| self.config.is_task_definition(name))
            .collect();
        if dag_files.is_empty() {
            info!(pr = pr_number, "No task definitions changed; skipping validation");
            report.mark_skipped();
            return Ok(());
        }
        info!(files = ?dag_files, "Task definitions to validate");
        report.dag_files = dag_files.clone();

        let fetcher = Fetcher::new(host);
        fetcher.fetch_base(&pr.base.name, root).await?;
        fetcher.overlay(&files, root).await?;
        write_ignore_file(root, &self.config.ignore_file, &self.config.ignore_contents())
            .map_err(FetchError::Io)?;

        let provisioner = Provisioner::new(&self.config, self.runner.as_ref());
        let env = provisioner.provision(root).await?;
        provisioner.init_metadata_store(&env, root).await?;

        let backend = self.backends.create(&env, root);
        let checks = CheckRunner::new(backend.as_ref(), root, &self.config.dag_folder);
        for stage in Stage::ALL {
            let result = checks.run_stage(stage, &dag_files).await?;
            let failed = result.failed.len();
            report.record_stage(stage, result);
            if failed > 0 {
                report.mark_failed(stage);
                return Err(ValidationError::CheckFailure { stage, failed });
            }
        }

        report.mark_success();
        info!(pr = pr_number, "All validations passed");
        Ok(())
    }
}

/// Best-effort write; a report that cannot be written must not mask the
/// run's own outcome.
fn persist(report: &ValidationReport, path: &Path) {
    if let Err(e) = report.persist(path) {
        warn!(path = %path.display(), error = %e, "Failed to persist report");
    }
}
