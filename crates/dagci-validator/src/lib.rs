//! dagci validator - pull-request validation for workflow repositories
//!
//! Rebuilds a PR's tree in a scratch workspace and runs it through the
//! workflow engine:
//! - Overlays the PR's changed files onto a base-branch snapshot
//! - Provisions an isolated environment from the repository's requirements
//! - Runs the syntax, imports and structure stages, stopping at the first failure
//! - Persists one JSON report per PR

pub mod backend;
pub mod checks;
pub mod config;
pub mod error;
pub mod fakes;
pub mod fetch;
pub mod gate;
pub mod pipeline;
pub mod provision;
pub mod report;
pub mod stage;
pub mod workspace;

// Re-export key types
pub use backend::{
    BackendFactory, CollectionLoad, EngineBackend, EngineBackendFactory, GraphSummary,
    TaskEdges, ValidationBackend, Verdict,
};
pub use checks::{CheckResult, CheckRunner, FileFailure};
pub use config::ValidatorConfig;
pub use error::{FetchError, ProvisionError, ValidationError};
pub use gate::{GateVerdict, ReportGate};
pub use pipeline::{PrValidator, ValidationRequest};
pub use provision::{Environment, Provisioner};
pub use report::{ReportStatus, ValidationReport};
pub use stage::Stage;
pub use workspace::{ScratchWorkspace, WorkspaceLock};
