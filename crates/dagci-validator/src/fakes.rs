//! Scripted validation backend (testing only)

use async_trait::async_trait;
use dagci_core::ProcessError;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::backend::{
    BackendFactory, CollectionLoad, GraphSummary, TaskEdges, ValidationBackend, Verdict,
};
use crate::provision::Environment;

#[derive(Debug, Default)]
struct Script {
    syntax_failures: BTreeMap<String, String>,
    import_errors: BTreeMap<String, String>,
    collection_crash: Option<String>,
    graph_failures: BTreeMap<String, String>,
    syntax_calls: usize,
    collection_calls: usize,
    graph_calls: usize,
    environments: Vec<Environment>,
}

/// Backend answering from canned verdicts.
///
/// Failures are keyed by a path suffix (`"dags/a.py"` matches
/// `/any/ws/dags/a.py`); everything else passes. Clones share state, so a
/// test can keep one handle while the pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_syntax(self, file: &str, error: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .syntax_failures
            .insert(file.to_string(), error.to_string());
        self
    }

    /// Report an import error exactly as given (engines report absolute paths).
    pub fn import_error(self, path: &str, error: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .import_errors
            .insert(path.to_string(), error.to_string());
        self
    }

    pub fn crash_collection(self, error: &str) -> Self {
        self.script.lock().unwrap().collection_crash = Some(error.to_string());
        self
    }

    pub fn fail_graph(self, file: &str, error: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .graph_failures
            .insert(file.to_string(), error.to_string());
        self
    }

    pub fn syntax_calls(&self) -> usize {
        self.script.lock().unwrap().syntax_calls
    }

    pub fn collection_calls(&self) -> usize {
        self.script.lock().unwrap().collection_calls
    }

    pub fn graph_calls(&self) -> usize {
        self.script.lock().unwrap().graph_calls
    }

    /// Total backend invocations across all stages.
    pub fn total_calls(&self) -> usize {
        self.syntax_calls() + self.collection_calls() + self.graph_calls()
    }

    /// Environments handed to [`BackendFactory::create`].
    pub fn environments(&self) -> Vec<Environment> {
        self.script.lock().unwrap().environments.clone()
    }
}

fn lookup(failures: &BTreeMap<String, String>, file: &Path) -> Option<String> {
    failures
        .iter()
        .find(|(suffix, _)| file.ends_with(suffix.as_str()))
        .map(|(_, error)| error.clone())
}

#[async_trait]
impl ValidationBackend for ScriptedBackend {
    async fn check_syntax(&self, file: &Path) -> Result<Verdict<()>, ProcessError> {
        let mut script = self.script.lock().unwrap();
        script.syntax_calls += 1;
        Ok(match lookup(&script.syntax_failures, file) {
            Some(error) => Verdict::Fail(error),
            None => Verdict::Pass(()),
        })
    }

    async fn load_collection(&self, _folder: &Path) -> Result<CollectionLoad, ProcessError> {
        let mut script = self.script.lock().unwrap();
        script.collection_calls += 1;
        Ok(CollectionLoad {
            graphs: Vec::new(),
            import_errors: script.import_errors.clone(),
            crash: script.collection_crash.clone(),
        })
    }

    async fn check_graph(
        &self,
        _folder: &Path,
        file: &Path,
    ) -> Result<Verdict<GraphSummary>, ProcessError> {
        let mut script = self.script.lock().unwrap();
        script.graph_calls += 1;
        Ok(match lookup(&script.graph_failures, file) {
            Some(error) => Verdict::Fail(error),
            None => Verdict::Pass(GraphSummary {
                graph_id: file
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default(),
                edges: vec![TaskEdges {
                    task_id: "start".to_string(),
                    upstream: Vec::new(),
                    downstream: Vec::new(),
                }],
            }),
        })
    }
}

impl BackendFactory for ScriptedBackend {
    fn create(&self, env: &Environment, _workspace: &Path) -> Arc<dyn ValidationBackend> {
        self.script.lock().unwrap().environments.push(env.clone());
        Arc::new(self.clone())
    }
}
