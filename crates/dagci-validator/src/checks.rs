//! Check stage execution.

use dagci_core::ProcessError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info};

use crate::backend::{ValidationBackend, Verdict};
use crate::stage::Stage;

/// One file that failed a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}

/// Result of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Files that passed, in input order.
    pub passed: Vec<String>,

    /// Files that failed, in input order.
    pub failed: Vec<FileFailure>,
}

impl CheckResult {
    /// Whether this stage passed (no failures).
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }

    fn pass(&mut self, file: &str) {
        self.passed.push(file.to_string());
    }

    fn fail(&mut self, file: &str, error: impl Into<String>) {
        self.failed.push(FileFailure {
            file: file.to_string(),
            error: error.into(),
        });
    }
}

/// Runs stages against a workspace through a [`ValidationBackend`].
///
/// Files are workspace-relative paths; the backend receives absolute ones.
pub struct CheckRunner<'a> {
    backend: &'a dyn ValidationBackend,
    workspace: &'a Path,
    dag_folder: &'a str,
}

impl<'a> CheckRunner<'a> {
    pub fn new(backend: &'a dyn ValidationBackend, workspace: &'a Path, dag_folder: &'a str) -> Self {
        Self {
            backend,
            workspace,
            dag_folder,
        }
    }

    pub async fn run_stage(&self, stage: Stage, files: &[String]) -> Result<CheckResult, ProcessError> {
        info!(stage = %stage, files = files.len(), "Running stage");
        let result = match stage {
            Stage::Syntax => self.syntax(files).await?,
            Stage::Imports => self.imports().await?,
            Stage::Structure => self.structure(files).await?,
        };
        info!(
            stage = %stage,
            passed = result.passed.len(),
            failed = result.failed.len(),
            "Stage finished"
        );
        Ok(result)
    }

    async fn syntax(&self, files: &[String]) -> Result<CheckResult, ProcessError> {
        let mut result = CheckResult::default();
        for file in files {
            match self.backend.check_syntax(&self.workspace.join(file)).await? {
                Verdict::Pass(()) => result.pass(file),
                Verdict::Fail(text) => {
                    error!(file = %file, error = %text, "Syntax error");
                    result.fail(file, text);
                }
            }
        }
        Ok(result)
    }

    /// Whole-folder load. Failures are keyed by the offending file when the
    /// engine names one and by the folder otherwise.
    async fn imports(&self) -> Result<CheckResult, ProcessError> {
        let folder = self.workspace.join(self.dag_folder);
        let load = self.backend.load_collection(&folder).await?;
        let mut result = CheckResult::default();

        if let Some(crash) = load.crash {
            error!(error = %crash, "Task definitions failed to load");
            result.fail(self.dag_folder, crash);
            return Ok(result);
        }
        for (path, text) in &load.import_errors {
            let file = self.relative(path);
            error!(file = %file, error = %text, "Import error");
            result.fail(&file, text.clone());
        }
        if result.success() {
            info!(graphs = load.graphs.len(), "Task definitions loaded");
            result.pass(self.dag_folder);
        }
        Ok(result)
    }

    async fn structure(&self, files: &[String]) -> Result<CheckResult, ProcessError> {
        let folder = self.workspace.join(self.dag_folder);
        let mut result = CheckResult::default();
        for file in files {
            let verdict = self
                .backend
                .check_graph(&folder, &self.workspace.join(file))
                .await?;
            match verdict {
                Verdict::Pass(summary) => {
                    info!(file = %file, graph = %summary.graph_id, tasks = summary.edges.len(), "Graph is acyclic");
                    for edge in &summary.edges {
                        info!(
                            task = %edge.task_id,
                            upstream = ?edge.upstream,
                            downstream = ?edge.downstream,
                            "Task dependencies"
                        );
                    }
                    result.pass(file);
                }
                Verdict::Fail(text) => {
                    error!(file = %file, error = %text, "Structure error");
                    result.fail(file, text);
                }
            }
        }
        Ok(result)
    }

    /// Workspace-relative rendering of an engine-reported path.
    fn relative(&self, path: &str) -> String {
        Path::new(path)
            .strip_prefix(self.workspace)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string())
    }
}
