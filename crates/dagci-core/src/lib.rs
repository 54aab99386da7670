//! dagci Core Library
//!
//! Shared plumbing for the dagci binaries:
//!
//! - [`process`]: the subprocess seam every external tool goes through
//! - [`deploy`]: the commit-polling auto-deploy job
//! - [`telemetry`]: tracing subscriber setup

pub mod deploy;
pub mod error;
pub mod fakes;
pub mod process;
pub mod telemetry;

pub use deploy::{DeployConfig, DeployJob, DeployOutcome, PendingUpdate, DEFAULT_STATE_KEY};
pub use error::{DeployError, Result};
pub use process::{CommandOutput, CommandSpec, ProcessError, ProcessRunner, SystemRunner};
pub use telemetry::init_tracing;

/// dagci version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
