//! Best-effort removal of an instance's external footprints.

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::database::DatabaseServer;
use crate::process_manager::ProcessManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    NothingToDo,
    /// Not attempted because the footprint was never applied.
    Skipped,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Done => write!(f, "removed"),
            StepOutcome::NothingToDo => write!(f, "nothing to remove"),
            StepOutcome::Skipped => write!(f, "skipped"),
            StepOutcome::Failed(e) => write!(f, "failed ({})", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub process: StepOutcome,
    pub database: StepOutcome,
    pub workspace: StepOutcome,
}

impl TeardownReport {
    pub fn has_failures(&self) -> bool {
        self.process.is_failed() || self.database.is_failed() || self.workspace.is_failed()
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "process: {}, database: {}, workspace: {}",
            self.process, self.database, self.workspace
        )
    }
}

/// Which external effects may exist and need removing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footprint {
    pub process: bool,
    pub database: bool,
    pub workspace: bool,
}

impl Footprint {
    pub fn all() -> Self {
        Self {
            process: true,
            database: true,
            workspace: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.process || self.database || self.workspace)
    }
}

/// Remove the process, then the database, then the workspace.
///
/// Each step runs regardless of how the previous one went; failures are logged and
/// reported, never returned.
pub async fn teardown(
    name: &str,
    footprint: Footprint,
    processes: &ProcessManager,
    database: &DatabaseServer,
    workspace: &Path,
) -> TeardownReport {
    let process = if footprint.process {
        remove_process(name, processes).await
    } else {
        StepOutcome::Skipped
    };

    let database = if footprint.database {
        remove_database(name, database).await
    } else {
        StepOutcome::Skipped
    };

    let workspace = if footprint.workspace {
        remove_workspace(workspace).await
    } else {
        StepOutcome::Skipped
    };

    let report = TeardownReport {
        process,
        database,
        workspace,
    };
    info!("Teardown of {}: {}", name, report);
    report
}

async fn remove_process(name: &str, processes: &ProcessManager) -> StepOutcome {
    match processes.find(name).await {
        Ok(None) => return StepOutcome::NothingToDo,
        Ok(Some(_)) => {}
        Err(e) => warn!("Could not list processes, deleting {} anyway: {}", name, e),
    }
    match processes.delete(name).await {
        Ok(()) => StepOutcome::Done,
        Err(e) => {
            warn!("Failed to remove process {}: {}", name, e);
            StepOutcome::Failed(e.to_string())
        }
    }
}

async fn remove_database(name: &str, database: &DatabaseServer) -> StepOutcome {
    if database.presence(name).await.is_absent() {
        return StepOutcome::NothingToDo;
    }
    match database.drop_if_exists(name).await {
        Ok(()) => StepOutcome::Done,
        Err(e) => {
            warn!("Failed to drop database {}: {}", name, e);
            StepOutcome::Failed(e.to_string())
        }
    }
}

async fn remove_workspace(path: &Path) -> StepOutcome {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => StepOutcome::Done,
        Err(e) if e.kind() == ErrorKind::NotFound => StepOutcome::NothingToDo,
        Err(e) => {
            warn!("Failed to remove workspace {}: {}", path.display(), e);
            StepOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display_and_failures() {
        let report = TeardownReport {
            process: StepOutcome::Done,
            database: StepOutcome::Failed("timeout".to_string()),
            workspace: StepOutcome::Skipped,
        };
        assert!(report.has_failures());
        assert_eq!(
            report.to_string(),
            "process: removed, database: failed (timeout), workspace: skipped"
        );
    }

    #[test]
    fn test_footprint() {
        assert!(Footprint::default().is_empty());
        assert!(!Footprint::all().is_empty());
    }

    #[tokio::test]
    async fn test_remove_workspace_missing_is_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("bot1");
        assert_eq!(remove_workspace(&ws).await, StepOutcome::NothingToDo);

        std::fs::create_dir_all(ws.join("venv")).unwrap();
        assert_eq!(remove_workspace(&ws).await, StepOutcome::Done);
        assert!(!ws.exists());
    }
}
