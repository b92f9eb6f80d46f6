use std::path::Path;
use std::sync::Arc;

use fleet_core::validation::validate_instance_name;
use fleet_core::{CommandError, CommandRunner};
use tracing::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::database::DatabaseServer;
use crate::diagnostics;
use crate::error::{OrchestratorError, ProvisionFailure, Result};
use crate::instance::{
    Instance, InstanceState, InstanceStatus, Presence, ProcessSummary, ProvisionRequest,
};
use crate::locks::InstanceLocks;
use crate::process_manager::ProcessManager;
use crate::provision::{ProvisionStep, Provisioner, StepError};
use crate::registry::InstanceRegistry;
use crate::teardown::{self, Footprint, TeardownReport};

/// Lifecycle operations for bot instances.
///
/// Each instance spans three external systems: a workspace directory, a database
/// and a process-manager entry. Mutating operations on the same name are serialized;
/// operations on different names run concurrently.
#[derive(Clone)]
pub struct InstanceOrchestrator {
    config: Arc<OrchestratorConfig>,
    runner: Arc<dyn CommandRunner>,
    locks: Arc<InstanceLocks>,
    registry: Arc<InstanceRegistry>,
    processes: ProcessManager,
    database: DatabaseServer,
}

impl InstanceOrchestrator {
    pub fn new(config: OrchestratorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let processes = ProcessManager::new(runner.clone(), config.pm2.clone());
        let database = DatabaseServer::new(
            runner.clone(),
            config.db_container.clone(),
            config.db_user.clone(),
            config.schema_path.clone(),
        );
        Self {
            config: Arc::new(config),
            runner,
            locks: Arc::new(InstanceLocks::new()),
            registry: Arc::new(InstanceRegistry::new()),
            processes,
            database,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Last known metadata for `name`. Not authoritative; see [`Self::inspect`].
    pub fn cached(&self, name: &str) -> Option<Instance> {
        self.registry.get(name)
    }

    /// Build a complete instance from scratch.
    ///
    /// Anything left over under the same name is torn down first, so a retried
    /// request starts clean. If a step fails, every footprint the run may have
    /// created is removed again and the failure is returned with diagnostics.
    ///
    /// The run happens on its own task: dropping the returned future does not stop
    /// it, so it always ends either complete or rolled back.
    pub async fn provision(&self, request: ProvisionRequest) -> Result<Instance> {
        request.validate()?;
        let name = request.name.clone();
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run_provision(request).await })
            .await
            .map_err(|e| {
                error!("Provisioning task for {} did not finish: {}", name, e);
                OrchestratorError::Interrupted(name)
            })?
    }

    async fn run_provision(&self, request: ProvisionRequest) -> Result<Instance> {
        let name = request.name.clone();
        let _guard = self.locks.acquire(&name).await;
        let workspace = self.config.workspace_path(&name);

        info!("Starting deployment for {}", name);
        let preempt = self.teardown(&name, Footprint::all()).await;
        if preempt.has_failures() {
            warn!("Leftovers of {} could not all be removed: {}", name, preempt);
        }
        self.registry.upsert(Instance::new(
            &name,
            workspace.clone(),
            InstanceStatus::Provisioning,
        ));

        let provisioner = Provisioner {
            config: &self.config,
            runner: self.runner.as_ref(),
            processes: &self.processes,
            database: &self.database,
        };
        let mut footprint = Footprint::default();

        for step in ProvisionStep::ALL {
            info!("{}: {}", name, step);
            step.record(&mut footprint);
            match provisioner.run(step, &request, &workspace).await {
                Ok(()) => {}
                Err(e) if !step.is_critical() => {
                    warn!("Non-critical step '{}' failed for {}: {}", step, name, e);
                }
                Err(e) => {
                    let failure = self.roll_back(&name, step, e, footprint, &workspace).await;
                    return Err(failure.into());
                }
            }
        }

        let mut instance = Instance::new(&name, workspace, InstanceStatus::Active);
        if let Some(cached) = self.registry.get(&name) {
            instance.created_at = cached.created_at;
        }
        self.registry.upsert(instance.clone());
        info!("Deployment for {} completed successfully", name);
        Ok(instance)
    }

    async fn roll_back(
        &self,
        name: &str,
        step: ProvisionStep,
        cause: StepError,
        footprint: Footprint,
        workspace: &Path,
    ) -> ProvisionFailure {
        error!("Deployment failed for {} at step '{}': {}", name, step, cause);

        let database_probe = if step.is_database_step() {
            Some(self.database.probe_failure(name).await)
        } else {
            None
        };
        let diagnostics =
            diagnostics::collect(self.runner.as_ref(), &self.config.instances_root).await;

        info!("Rolling back partial deployment of {}", name);
        let rollback = teardown::teardown(
            name,
            footprint,
            &self.processes,
            &self.database,
            workspace,
        )
        .await;
        self.registry.remove(name);

        ProvisionFailure {
            name: name.to_string(),
            step,
            cause: cause.to_string(),
            database_probe,
            diagnostics,
            rollback,
        }
    }

    async fn teardown(&self, name: &str, footprint: Footprint) -> TeardownReport {
        teardown::teardown(
            name,
            footprint,
            &self.processes,
            &self.database,
            &self.config.workspace_path(name),
        )
        .await
    }

    /// Remove the process, database and workspace of `name`.
    ///
    /// Succeeds even when some or all of them are already gone; sub-step failures
    /// are logged and reported, never returned.
    pub async fn delete(&self, name: &str) -> Result<TeardownReport> {
        validate_instance_name(name)?;
        let _guard = self.locks.acquire(name).await;

        info!("Deleting instance {}", name);
        let report = self.teardown(name, Footprint::all()).await;
        self.registry.remove(name);
        Ok(report)
    }

    /// (Re-)launch the process of an existing workspace.
    pub async fn start(&self, name: &str) -> Result<()> {
        validate_instance_name(name)?;
        let _guard = self.locks.acquire(name).await;
        let workspace = self.config.workspace_path(name);

        match tokio::fs::try_exists(&workspace).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(OrchestratorError::NotFound(format!(
                    "Instance {} not found",
                    name
                )))
            }
            Err(source) => {
                return Err(CommandError::Io {
                    command: format!("stat {}", workspace.display()),
                    source,
                }
                .into())
            }
        }

        match self.processes.find(name).await {
            Ok(Some(_)) => {
                info!("Replacing existing process entry for {}", name);
                self.processes.delete(name).await?;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not list processes before starting {}: {}", name, e),
        }

        info!("Starting instance {}", name);
        self.processes
            .start(name, &workspace, &self.config.entry_point)
            .await?;
        if !self.registry.set_status(name, InstanceStatus::Active) {
            self.registry
                .upsert(Instance::new(name, workspace, InstanceStatus::Active));
        }
        Ok(())
    }

    /// Stop a running process. Fails with `NotFound` when no such process exists.
    pub async fn stop(&self, name: &str) -> Result<()> {
        validate_instance_name(name)?;
        let _guard = self.locks.acquire(name).await;

        if self.processes.find(name).await?.is_none() {
            return Err(OrchestratorError::NotFound(format!(
                "Instance {} not running",
                name
            )));
        }

        info!("Stopping instance {}", name);
        self.processes.stop(name).await?;
        self.registry.set_status(name, InstanceStatus::Stopped);
        Ok(())
    }

    /// Every process the process manager knows about, with live status.
    pub async fn list(&self) -> Result<Vec<ProcessSummary>> {
        Ok(self.processes.list().await?)
    }

    /// Derive the state of `name` from the three external systems.
    pub async fn inspect(&self, name: &str) -> Result<InstanceState> {
        validate_instance_name(name)?;
        let workspace_path = self.config.workspace_path(name);

        let workspace = match tokio::fs::try_exists(&workspace_path).await {
            Ok(true) => Presence::Present,
            Ok(false) => Presence::Absent,
            Err(e) => Presence::CheckFailed(e.to_string()),
        };
        let (process, process_status) = self.processes.presence(name).await;
        let database = self.database.presence(name).await;

        let cached = self.registry.get(name);
        let status = match cached.as_ref().map(|i| i.status) {
            Some(InstanceStatus::Provisioning) if self.locks.is_held(name) => {
                InstanceStatus::Provisioning
            }
            _ => InstanceState::derive_status(
                &workspace,
                &process,
                process_status.as_deref(),
                &database,
            ),
        };

        match (status, cached) {
            (InstanceStatus::Deleted, _) => {
                self.registry.remove(name);
            }
            (status, Some(_)) => {
                self.registry.set_status(name, status);
            }
            (status, None) => {
                self.registry
                    .upsert(Instance::new(name, workspace_path, status));
            }
        }

        Ok(InstanceState {
            name: name.to_string(),
            status,
            workspace,
            process,
            process_status,
            database,
        })
    }
}
