use std::fmt;

use fleet_core::{CommandError, ValidationError};
use serde::Serialize;
use thiserror::Error;

use crate::database::DatabaseProbe;
use crate::diagnostics::Diagnostics;
use crate::provision::ProvisionStep;
use crate::teardown::TeardownReport;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(String),

    #[error("External operation failed: {0}")]
    External(#[from] CommandError),

    #[error("{0}")]
    Provision(Box<ProvisionFailure>),

    #[error("Provisioning of {0} was interrupted")]
    Interrupted(String),
}

impl From<ProvisionFailure> for OrchestratorError {
    fn from(failure: ProvisionFailure) -> Self {
        OrchestratorError::Provision(Box::new(failure))
    }
}

/// A provisioning run that failed part-way and was rolled back.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionFailure {
    pub name: String,
    pub step: ProvisionStep,
    pub cause: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_probe: Option<DatabaseProbe>,
    pub diagnostics: Diagnostics,
    pub rollback: TeardownReport,
}

impl fmt::Display for ProvisionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Provisioning {} failed at step '{}': {}",
            self.name, self.step, self.cause
        )?;
        if let Some(probe) = &self.database_probe {
            writeln!(f, "Database: {}", probe)?;
        }
        writeln!(f, "Disk space:\n{}", self.diagnostics.disk)?;
        writeln!(f, "Memory usage:\n{}", self.diagnostics.memory)?;
        write!(f, "Rollback: {}", self.rollback)
    }
}
