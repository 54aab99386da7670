//! Test doubles for the process seam (testing only)

use std::sync::Mutex;

use async_trait::async_trait;

use crate::process::{CommandOutput, CommandSpec, ProcessError, ProcessRunner};

type Responder = Box<dyn Fn(&CommandSpec) -> Result<CommandOutput, ProcessError> + Send + Sync>;

/// Records every command it is asked to run and answers from a responder
/// closure. The default responder reports success with empty output.
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    responder: Responder,
}

impl Default for RecordingRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(CommandOutput::ok("")))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, ProcessError> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    /// Commands run so far, oldest first.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered command lines run so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    /// Number of recorded commands whose rendered line contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.responder)(spec)
    }
}
