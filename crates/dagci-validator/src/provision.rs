//! Dependency environment setup.
//!
//! When the repository ships a requirements file, an isolated virtual
//! environment is built inside the workspace and the pinned engine toolchain
//! is installed on top of the repository's own requirements. Without one,
//! the ambient interpreter is used as-is.

use dagci_core::{CommandSpec, ProcessRunner};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::ValidatorConfig;
use crate::error::ProvisionError;

/// SQLite file holding the engine's metadata inside the workspace.
pub const METADATA_DB_FILE: &str = "airflow_validation.db";

/// Interpreter plus the variables every engine invocation needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Interpreter that runs the checks
    pub python: String,
    /// Isolated environment directory, if one was built
    pub venv_dir: Option<PathBuf>,
    /// Variables set on every engine invocation
    pub vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn is_isolated(&self) -> bool {
        self.venv_dir.is_some()
    }

    /// A command running the environment's interpreter.
    pub fn python_command(&self) -> CommandSpec {
        CommandSpec::new(&self.python).envs(&self.vars)
    }
}

pub struct Provisioner<'a> {
    config: &'a ValidatorConfig,
    runner: &'a dyn ProcessRunner,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a ValidatorConfig, runner: &'a dyn ProcessRunner) -> Self {
        Self { config, runner }
    }

    /// Prepare the interpreter and engine variables for `workspace`.
    pub async fn provision(&self, workspace: &Path) -> Result<Environment, ProvisionError> {
        let requirements = workspace.join(&self.config.requirements_file);
        let (python, venv_dir) = if requirements.is_file() {
            let venv = workspace.join("venv");
            let python = venv.join("bin").join("python").to_string_lossy().to_string();
            self.build_venv(workspace, &venv, &python, &requirements)
                .await?;
            (python, Some(venv))
        } else {
            warn!(
                file = %self.config.requirements_file,
                "No requirements file found; using the ambient interpreter"
            );
            (self.config.python.clone(), None)
        };

        Ok(Environment {
            python,
            venv_dir,
            vars: engine_vars(workspace, &self.config.dag_folder),
        })
    }

    async fn build_venv(
        &self,
        workspace: &Path,
        venv: &Path,
        python: &str,
        requirements: &Path,
    ) -> Result<(), ProvisionError> {
        let tool = &self.config.venv_tool;

        info!(path = %venv.display(), "Creating virtual environment");
        self.run_checked(
            CommandSpec::new(tool)
                .arg("venv")
                .arg(venv.to_string_lossy()),
            workspace,
        )
        .await?;

        info!("Installing repository requirements");
        self.run_checked(
            CommandSpec::new(tool)
                .args(["pip", "install", "--python", python, "-r"])
                .arg(requirements.to_string_lossy()),
            workspace,
        )
        .await?;

        if !self.config.toolchain.is_empty() {
            info!(packages = ?self.config.toolchain, "Installing engine toolchain");
            self.run_checked(
                CommandSpec::new(tool)
                    .args(["pip", "install", "--python", python])
                    .args(self.config.toolchain.iter().cloned()),
                workspace,
            )
            .await?;
        }
        Ok(())
    }

    async fn run_checked(&self, spec: CommandSpec, workspace: &Path) -> Result<(), ProvisionError> {
        let spec = spec
            .current_dir(workspace)
            .timeout_secs(self.config.install_timeout_secs);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(ProvisionError::CommandFailed {
                command: spec.display(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    /// Create the engine's metadata schema in the workspace database.
    pub async fn init_metadata_store(
        &self,
        env: &Environment,
        workspace: &Path,
    ) -> Result<(), ProvisionError> {
        info!("Initializing metadata store");
        let spec = env
            .python_command()
            .args(["-m", "airflow", "db", "migrate"])
            .current_dir(workspace)
            .timeout_secs(self.config.install_timeout_secs);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(ProvisionError::MetadataStore {
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}

/// Variables pointing the engine at the workspace.
pub fn engine_vars(workspace: &Path, dag_folder: &str) -> BTreeMap<String, String> {
    let root = workspace.to_string_lossy().to_string();
    let python_path = match std::env::var("PYTHONPATH") {
        Ok(existing) if !existing.is_empty() => format!("{root}:{existing}"),
        _ => root.clone(),
    };

    let mut vars = BTreeMap::new();
    vars.insert("PYTHONPATH".to_string(), python_path);
    vars.insert(
        "AIRFLOW_HOME".to_string(),
        workspace.join(".airflow").to_string_lossy().to_string(),
    );
    vars.insert(
        "AIRFLOW__DATABASE__SQL_ALCHEMY_CONN".to_string(),
        format!("sqlite:///{}", workspace.join(METADATA_DB_FILE).display()),
    );
    vars.insert(
        "AIRFLOW__CORE__LOAD_EXAMPLES".to_string(),
        "False".to_string(),
    );
    vars.insert(
        "AIRFLOW__CORE__EXECUTOR".to_string(),
        "SequentialExecutor".to_string(),
    );
    vars.insert(
        "AIRFLOW__CORE__DAGS_FOLDER".to_string(),
        workspace.join(dag_folder).to_string_lossy().to_string(),
    );
    vars
}
