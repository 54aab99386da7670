//! Pass/fail gate over a finished report.

use serde::{Deserialize, Serialize};

use crate::report::{ReportStatus, ValidationReport};
use crate::stage::Stage;

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Turns a report into the invoking job's verdict.
pub struct ReportGate;

impl ReportGate {
    /// Gate rule:
    /// - `success` and `skipped` pass
    /// - every failed file of every recorded stage is a violation
    /// - an `error` report contributes its error text
    /// - a report still `running` never passes
    pub fn evaluate(report: &ValidationReport) -> GateVerdict {
        let mut violations = Vec::new();

        for stage in Stage::ALL {
            if let Some(result) = report.stage(stage) {
                for failure in &result.failed {
                    let summary = failure.error.lines().last().unwrap_or("").trim();
                    violations.push(format!("{stage}: {}: {summary}", failure.file));
                }
            }
        }

        match report.status {
            ReportStatus::Error => violations.push(format!(
                "run aborted: {}",
                report.error.as_deref().unwrap_or("unknown error")
            )),
            ReportStatus::Running => {
                violations.push("run did not finish".to_string());
            }
            _ => {}
        }

        let passed = report.status.is_ok() && violations.is_empty();
        let message = if passed {
            report
                .message
                .clone()
                .unwrap_or_else(|| report.status.as_str().to_string())
        } else {
            format!(
                "PR #{} {} with {} violation(s)",
                report.pr_number,
                report.status.as_str(),
                violations.len()
            )
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}
