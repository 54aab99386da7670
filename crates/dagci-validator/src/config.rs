//! Validator configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Packages installed into every provisioned environment after the
/// repository's own requirements.
pub const DEFAULT_TOOLCHAIN: &[&str] = &[
    "apache-airflow==3.1.5",
    "apache-airflow-providers-fab",
    "structlog==25.5.0",
];

/// Patterns written to the ignore file so the engine never scans the
/// provisioned environment or VCS metadata.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &["venv/", ".git/", "__pycache__/"];

/// Name of the report file inside a PR workspace.
pub const REPORT_FILE: &str = "validation_report.json";

/// Deployment tier in which the validator is available.
pub const ENABLED_ENVIRONMENT: &str = "dev";

/// PR validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Directory holding the per-PR workspaces
    pub scratch_root: PathBuf,

    /// Folder (relative to the repository root) holding task definitions
    pub dag_folder: String,

    /// Requirements file that triggers an isolated environment
    pub requirements_file: String,

    /// Virtual-environment and installer tool
    pub venv_tool: String,

    /// Interpreter used when no isolated environment is built
    pub python: String,

    /// Pinned engine toolchain
    pub toolchain: Vec<String>,

    /// Timeout for each environment setup command
    pub install_timeout_secs: u64,

    /// Timeout for each engine loader invocation
    pub check_timeout_secs: u64,

    /// Ignore file written at the workspace root
    pub ignore_file: String,

    /// Contents of the ignore file, one pattern per line
    pub ignore_patterns: Vec<String>,

    /// Deployment tier (`ENVIRONMENT`)
    pub environment: Option<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            scratch_root: std::env::var("DAGCI_SCRATCH_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp")),
            dag_folder: std::env::var("DAGCI_DAG_FOLDER").unwrap_or_else(|_| "dags".to_string()),
            requirements_file: "requirements.txt".to_string(),
            venv_tool: std::env::var("DAGCI_VENV_TOOL").unwrap_or_else(|_| "uv".to_string()),
            python: std::env::var("DAGCI_PYTHON").unwrap_or_else(|_| "python3".to_string()),
            toolchain: DEFAULT_TOOLCHAIN.iter().map(|s| s.to_string()).collect(),
            install_timeout_secs: 300,
            check_timeout_secs: 300,
            ignore_file: ".airflowignore".to_string(),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            environment: std::env::var("ENVIRONMENT").ok(),
        }
    }
}

impl ValidatorConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Defaults rooted at `scratch_root`, ignoring the process environment.
    pub fn with_scratch_root(scratch_root: impl Into<PathBuf>) -> Self {
        ValidatorConfig {
            scratch_root: scratch_root.into(),
            dag_folder: "dags".to_string(),
            requirements_file: "requirements.txt".to_string(),
            venv_tool: "uv".to_string(),
            python: "python3".to_string(),
            toolchain: DEFAULT_TOOLCHAIN.iter().map(|s| s.to_string()).collect(),
            install_timeout_secs: 300,
            check_timeout_secs: 300,
            ignore_file: ".airflowignore".to_string(),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            environment: Some(ENABLED_ENVIRONMENT.to_string()),
        }
    }

    /// The validator only runs in the development tier.
    pub fn is_enabled(&self) -> bool {
        self.environment.as_deref() == Some(ENABLED_ENVIRONMENT)
    }

    pub fn workspace_dir(&self, pr_number: u64) -> PathBuf {
        self.scratch_root.join(format!("airflow_pr_{pr_number}"))
    }

    pub fn report_path(&self, pr_number: u64) -> PathBuf {
        self.workspace_dir(pr_number).join(REPORT_FILE)
    }

    /// Whether a repository path names a task-definition file.
    pub fn is_task_definition(&self, path: &str) -> bool {
        let folder = self.dag_folder.trim_end_matches('/');
        path.strip_prefix(folder)
            .is_some_and(|rest| rest.starts_with('/'))
            && path.ends_with(".py")
    }

    /// Rendered ignore file contents.
    pub fn ignore_contents(&self) -> String {
        self.ignore_patterns
            .iter()
            .map(|p| format!("{p}\n"))
            .collect()
    }
}
