//! Instance lifecycle orchestration
//!
//! Provisions, starts, stops, inspects and tears down bot instances. Each instance
//! is a workspace directory, a database and a process-manager entry, all driven
//! through a [`fleet_core::CommandRunner`]. Consumed by the fleet-api HTTP service.

pub mod config;
pub mod database;
pub mod diagnostics;
pub mod error;
pub mod instance;
pub mod locks;
pub mod orchestrator;
pub mod process_manager;
pub mod provision;
pub mod registry;
pub mod teardown;
pub mod workspace;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::OrchestratorConfig;
pub use database::DatabaseProbe;
pub use diagnostics::Diagnostics;
pub use error::{OrchestratorError, ProvisionFailure, Result};
pub use instance::{
    Instance, InstanceState, InstanceStatus, Owner, Presence, ProcessSummary, ProvisionRequest,
    DEFAULT_PREFIX,
};
pub use orchestrator::InstanceOrchestrator;
pub use provision::ProvisionStep;
pub use teardown::{StepOutcome, TeardownReport};
