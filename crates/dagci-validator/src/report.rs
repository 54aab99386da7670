//! Validation report: the one durable artifact of a run.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::checks::CheckResult;
use crate::stage::Stage;

/// Message recorded when the PR touches no task definitions.
pub const SKIPPED_MESSAGE: &str = "No DAG files modified";

/// Message recorded when every stage passed.
pub const SUCCESS_MESSAGE: &str = "All validations passed";

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Running,
    Skipped,
    Success,
    Failed,
    Error,
}

impl ReportStatus {
    /// Whether the invoking job should be marked successful.
    pub fn is_ok(&self) -> bool {
        matches!(self, ReportStatus::Success | ReportStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Running => "running",
            ReportStatus::Skipped => "skipped",
            ReportStatus::Success => "success",
            ReportStatus::Failed => "failed",
            ReportStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub pr_number: u64,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: ReportStatus,

    /// Results keyed by stage name, for the stages that ran.
    #[serde(default)]
    pub checks: BTreeMap<String, CheckResult>,

    /// PR title, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Task-definition files under validation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dag_files: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationReport {
    pub fn new(pr_number: u64) -> Self {
        Self {
            pr_number,
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            status: ReportStatus::Running,
            checks: BTreeMap::new(),
            title: None,
            dag_files: Vec::new(),
            message: None,
            error: None,
        }
    }

    pub fn record_stage(&mut self, stage: Stage, result: CheckResult) {
        self.checks.insert(stage.name().to_string(), result);
    }

    pub fn stage(&self, stage: Stage) -> Option<&CheckResult> {
        self.checks.get(stage.name())
    }

    pub fn mark_skipped(&mut self) {
        self.status = ReportStatus::Skipped;
        self.message = Some(SKIPPED_MESSAGE.to_string());
    }

    pub fn mark_failed(&mut self, stage: Stage) {
        self.status = ReportStatus::Failed;
        self.message = Some(stage.failure_message().to_string());
    }

    pub fn mark_error(&mut self, error: impl ToString) {
        self.status = ReportStatus::Error;
        self.error = Some(error.to_string());
    }

    pub fn mark_success(&mut self) {
        self.status = ReportStatus::Success;
        self.message = Some(SUCCESS_MESSAGE.to_string());
    }

    /// Write the report as pretty JSON, replacing any previous file.
    pub fn persist(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read report {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse report {}", path.display()))
    }
}
