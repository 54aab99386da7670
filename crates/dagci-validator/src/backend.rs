//! The seam between the check runner and the workflow engine.
//!
//! [`EngineBackend`] drives the provisioned interpreter with short loader
//! scripts. Each script prints exactly one line starting with
//! [`RESULT_MARKER`] followed by a JSON document; everything else the engine
//! writes to stdout (log lines, warnings) is ignored.

use async_trait::async_trait;
use dagci_core::{CommandSpec, ProcessError, ProcessRunner};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::provision::Environment;

/// Prefix of the result line emitted by the loader scripts.
pub const RESULT_MARKER: &str = "DAGCI_RESULT ";

const LOAD_COLLECTION_SCRIPT: &str = r#"
import json, sys
from airflow.models import DagBag

bag = DagBag(dag_folder=sys.argv[1], include_examples=False)
result = {
    "graphs": sorted(bag.dags.keys()),
    "import_errors": {str(path): str(err) for path, err in bag.import_errors.items()},
}
print("DAGCI_RESULT " + json.dumps(result))
"#;

const CHECK_GRAPH_SCRIPT: &str = r#"
import json, os, sys
from airflow.models import DagBag

folder, target = sys.argv[1], os.path.realpath(sys.argv[2])
bag = DagBag(dag_folder=folder, include_examples=False)
dag = next(
    (d for d in bag.dags.values() if os.path.realpath(d.fileloc) == target),
    None,
)
if dag is None:
    print("DAGCI_RESULT " + json.dumps({"found": False}))
    sys.exit(0)

result = {
    "found": True,
    "graph_id": dag.dag_id,
    "edges": [
        {
            "task_id": task.task_id,
            "upstream": sorted(task.upstream_task_ids),
            "downstream": sorted(task.downstream_task_ids),
        }
        for task in dag.tasks
    ],
}
try:
    sort = getattr(dag, "topological_sort", None)
    if sort is not None:
        sort()
    else:
        from airflow.utils.dag_cycle_tester import check_cycle
        check_cycle(dag)
except Exception as exc:
    result["cycle"] = str(exc)
print("DAGCI_RESULT " + json.dumps(result))
"#;

/// Pass or fail with the engine's explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    Pass(T),
    Fail(String),
}

impl<T> Verdict<T> {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass(_))
    }
}

/// Outcome of loading the whole task-definition folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionLoad {
    /// Graph ids that loaded.
    #[serde(default)]
    pub graphs: Vec<String>,
    /// Import errors keyed by the file that raised them.
    #[serde(default)]
    pub import_errors: BTreeMap<String, String>,
    /// Set when the loader itself crashed before reporting.
    #[serde(skip)]
    pub crash: Option<String>,
}

impl CollectionLoad {
    pub fn is_clean(&self) -> bool {
        self.import_errors.is_empty() && self.crash.is_none()
    }
}

/// Dependencies of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEdges {
    pub task_id: String,
    #[serde(default)]
    pub upstream: Vec<String>,
    #[serde(default)]
    pub downstream: Vec<String>,
}

/// A graph that passed the structure check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub graph_id: String,
    pub edges: Vec<TaskEdges>,
}

/// Engine operations the check stages need.
///
/// An `Err` means the backend itself could not run; check verdicts are
/// always returned as `Ok`.
#[async_trait]
pub trait ValidationBackend: Send + Sync {
    /// Compile one file in isolation.
    async fn check_syntax(&self, file: &Path) -> Result<Verdict<()>, ProcessError>;

    /// Load every task definition under `folder`.
    async fn load_collection(&self, folder: &Path) -> Result<CollectionLoad, ProcessError>;

    /// Find the graph defined in `file` and verify it is acyclic.
    async fn check_graph(
        &self,
        folder: &Path,
        file: &Path,
    ) -> Result<Verdict<GraphSummary>, ProcessError>;
}

/// Builds a backend once the environment is known.
pub trait BackendFactory: Send + Sync {
    fn create(&self, env: &Environment, workspace: &Path) -> Arc<dyn ValidationBackend>;
}

/// Backend that shells out to the engine through the provisioned interpreter.
pub struct EngineBackend {
    env: Environment,
    workspace: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    timeout_secs: u64,
}

impl EngineBackend {
    pub fn new(
        env: Environment,
        workspace: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            env,
            workspace: workspace.into(),
            runner,
            timeout_secs,
        }
    }

    fn command(&self) -> CommandSpec {
        self.env
            .python_command()
            .current_dir(&self.workspace)
            .timeout_secs(self.timeout_secs)
    }
}

#[async_trait]
impl ValidationBackend for EngineBackend {
    async fn check_syntax(&self, file: &Path) -> Result<Verdict<()>, ProcessError> {
        let spec = self
            .command()
            .args(["-m", "py_compile"])
            .arg(file.to_string_lossy());
        let output = self.runner.run(&spec).await?;
        if output.success() {
            Ok(Verdict::Pass(()))
        } else {
            Ok(Verdict::Fail(failure_text(&output.stderr, &output.stdout)))
        }
    }

    async fn load_collection(&self, folder: &Path) -> Result<CollectionLoad, ProcessError> {
        let spec = self
            .command()
            .args(["-c", LOAD_COLLECTION_SCRIPT])
            .arg(folder.to_string_lossy());
        let output = self.runner.run(&spec).await?;
        debug!(exit_code = output.exit_code, "Collection loader finished");

        match parse_result::<CollectionLoad>(&output.stdout) {
            Some(load) if output.success() => Ok(load),
            _ => Ok(CollectionLoad {
                crash: Some(failure_text(&output.stderr, &output.stdout)),
                ..CollectionLoad::default()
            }),
        }
    }

    async fn check_graph(
        &self,
        folder: &Path,
        file: &Path,
    ) -> Result<Verdict<GraphSummary>, ProcessError> {
        let spec = self
            .command()
            .args(["-c", CHECK_GRAPH_SCRIPT])
            .arg(folder.to_string_lossy())
            .arg(file.to_string_lossy());
        let output = self.runner.run(&spec).await?;

        let Some(result) = parse_result::<GraphCheck>(&output.stdout) else {
            return Ok(Verdict::Fail(failure_text(&output.stderr, &output.stdout)));
        };
        Ok(result.into_verdict(file))
    }
}

/// Wire form of [`CHECK_GRAPH_SCRIPT`]'s result.
#[derive(Debug, Deserialize)]
struct GraphCheck {
    found: bool,
    #[serde(default)]
    graph_id: Option<String>,
    #[serde(default)]
    edges: Vec<TaskEdges>,
    #[serde(default)]
    cycle: Option<String>,
}

impl GraphCheck {
    fn into_verdict(self, file: &Path) -> Verdict<GraphSummary> {
        if !self.found {
            return Verdict::Fail(format!("No DAG found in {}", file.display()));
        }
        if let Some(cycle) = self.cycle {
            return Verdict::Fail(format!("Circular dependency detected: {cycle}"));
        }
        Verdict::Pass(GraphSummary {
            graph_id: self.graph_id.unwrap_or_default(),
            edges: self.edges,
        })
    }
}

/// Decode the last marker line of `stdout`.
pub fn parse_result<T: DeserializeOwned>(stdout: &str) -> Option<T> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim_start().strip_prefix(RESULT_MARKER))
        .and_then(|json| serde_json::from_str(json).ok())
}

fn failure_text(stderr: &str, stdout: &str) -> String {
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    let text = text.trim();
    if text.is_empty() {
        "process exited with a non-zero status".to_string()
    } else {
        text.to_string()
    }
}

/// Factory for [`EngineBackend`].
pub struct EngineBackendFactory {
    runner: Arc<dyn ProcessRunner>,
    timeout_secs: u64,
}

impl EngineBackendFactory {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout_secs: u64) -> Self {
        Self {
            runner,
            timeout_secs,
        }
    }
}

impl BackendFactory for EngineBackendFactory {
    fn create(&self, env: &Environment, workspace: &Path) -> Arc<dyn ValidationBackend> {
        Arc::new(EngineBackend::new(
            env.clone(),
            workspace,
            self.runner.clone(),
            self.timeout_secs,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagci_core::fakes::RecordingRunner;
    use dagci_core::CommandOutput;

    fn env() -> Environment {
        let mut vars = BTreeMap::new();
        vars.insert("AIRFLOW__CORE__LOAD_EXAMPLES".to_string(), "False".to_string());
        Environment {
            python: "/ws/venv/bin/python".to_string(),
            venv_dir: Some(PathBuf::from("/ws/venv")),
            vars,
        }
    }

    fn backend(runner: RecordingRunner) -> (EngineBackend, Arc<RecordingRunner>) {
        let runner = Arc::new(runner);
        (
            EngineBackend::new(env(), "/ws", runner.clone(), 120),
            runner,
        )
    }

    #[test]
    fn test_parse_result_skips_log_noise() {
        let stdout = "INFO - Filling up the DagBag\n\
                      DAGCI_RESULT {\"graphs\": [\"etl\"], \"import_errors\": {}}\n";
        let load: CollectionLoad = parse_result(stdout).unwrap();
        assert_eq!(load.graphs, vec!["etl"]);
        assert!(load.is_clean());
    }

    #[test]
    fn test_parse_result_missing_marker() {
        assert!(parse_result::<CollectionLoad>("Traceback ...").is_none());
        assert!(parse_result::<CollectionLoad>("DAGCI_RESULT {not json").is_none());
    }

    #[tokio::test]
    async fn test_check_syntax_uses_py_compile() {
        let (backend, runner) = backend(RecordingRunner::new());
        let verdict = backend.check_syntax(Path::new("/ws/dags/a.py")).await.unwrap();
        assert!(verdict.is_pass());

        let calls = runner.calls();
        assert_eq!(
            calls[0].display(),
            "/ws/venv/bin/python -m py_compile /ws/dags/a.py"
        );
        assert_eq!(calls[0].cwd.as_deref(), Some(Path::new("/ws")));
        assert_eq!(calls[0].timeout_secs, 120);
        assert!(calls[0].env.contains_key("AIRFLOW__CORE__LOAD_EXAMPLES"));
    }

    #[tokio::test]
    async fn test_check_syntax_failure_carries_stderr() {
        let (backend, _) = backend(RecordingRunner::with_responder(|_| {
            Ok(CommandOutput::failed(
                1,
                "  File \"a.py\", line 3\n    def broken(:\nSyntaxError: invalid syntax\n",
            ))
        }));
        match backend.check_syntax(Path::new("/ws/dags/a.py")).await.unwrap() {
            Verdict::Fail(text) => assert!(text.contains("SyntaxError")),
            Verdict::Pass(()) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_load_collection_reports_import_errors() {
        let (backend, runner) = backend(RecordingRunner::with_responder(|_| {
            Ok(CommandOutput::ok(
                "DAGCI_RESULT {\"graphs\": [\"ok\"], \"import_errors\": \
                 {\"/ws/dags/bad.py\": \"ModuleNotFoundError: No module named 'nope'\"}}",
            ))
        }));
        let load = backend.load_collection(Path::new("/ws/dags")).await.unwrap();
        assert!(!load.is_clean());
        assert!(load.import_errors["/ws/dags/bad.py"].contains("nope"));
        assert_eq!(runner.calls()[0].args.last().map(String::as_str), Some("/ws/dags"));
    }

    #[tokio::test]
    async fn test_load_collection_crash() {
        let (backend, _) = backend(RecordingRunner::with_responder(|_| {
            Ok(CommandOutput::failed(1, "ModuleNotFoundError: No module named 'airflow'"))
        }));
        let load = backend.load_collection(Path::new("/ws/dags")).await.unwrap();
        assert!(!load.is_clean());
        assert!(load.crash.unwrap().contains("airflow"));
    }

    #[tokio::test]
    async fn test_check_graph_verdicts() {
        let (backend, _) = backend(RecordingRunner::with_responder(|spec| {
            let file = spec.args.last().cloned().unwrap_or_default();
            let stdout = if file.ends_with("ok.py") {
                "DAGCI_RESULT {\"found\": true, \"graph_id\": \"ok\", \"edges\": \
                 [{\"task_id\": \"extract\", \"upstream\": [], \"downstream\": [\"load\"]}]}"
            } else if file.ends_with("cycle.py") {
                "DAGCI_RESULT {\"found\": true, \"graph_id\": \"c\", \"edges\": [], \
                 \"cycle\": \"Cycle detected in DAG: c\"}"
            } else {
                "DAGCI_RESULT {\"found\": false}"
            };
            Ok(CommandOutput::ok(stdout))
        }));
        let folder = Path::new("/ws/dags");

        match backend.check_graph(folder, Path::new("/ws/dags/ok.py")).await.unwrap() {
            Verdict::Pass(summary) => {
                assert_eq!(summary.graph_id, "ok");
                assert_eq!(summary.edges[0].downstream, vec!["load"]);
            }
            Verdict::Fail(text) => panic!("unexpected failure: {text}"),
        }
        assert_eq!(
            backend
                .check_graph(folder, Path::new("/ws/dags/cycle.py"))
                .await
                .unwrap(),
            Verdict::Fail("Circular dependency detected: Cycle detected in DAG: c".to_string())
        );
        assert_eq!(
            backend
                .check_graph(folder, Path::new("/ws/dags/helpers.py"))
                .await
                .unwrap(),
            Verdict::Fail("No DAG found in /ws/dags/helpers.py".to_string())
        );
    }

    #[tokio::test]
    async fn test_process_error_propagates() {
        let (backend, _) = backend(RecordingRunner::with_responder(|spec| {
            Err(ProcessError::Timeout {
                program: spec.program.clone(),
                secs: 120,
            })
        }));
        let err = backend
            .check_syntax(Path::new("/ws/dags/a.py"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }
}
