//! The ordered provisioning steps and how each one is carried out.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use fleet_core::{CommandError, CommandRunner, CommandRunnerExt, CommandSpec};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::OrchestratorConfig;
use crate::database::DatabaseServer;
use crate::diagnostics;
use crate::instance::ProvisionRequest;
use crate::process_manager::ProcessManager;
use crate::teardown::Footprint;
use crate::workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    CreateWorkspace,
    CloneTemplate,
    WriteConfig,
    CreateVirtualEnv,
    InstallRequirements,
    InstallSupplementaryPackages,
    InstallClientLibrary,
    WriteCompatibilityFiles,
    CreateDatabase,
    VerifyDatabase,
    ApplySchema,
    InstallBrowserRuntime,
    StartProcess,
}

impl ProvisionStep {
    /// Execution order.
    pub const ALL: [ProvisionStep; 13] = [
        ProvisionStep::CreateWorkspace,
        ProvisionStep::CloneTemplate,
        ProvisionStep::WriteConfig,
        ProvisionStep::CreateVirtualEnv,
        ProvisionStep::InstallRequirements,
        ProvisionStep::InstallSupplementaryPackages,
        ProvisionStep::InstallClientLibrary,
        ProvisionStep::WriteCompatibilityFiles,
        ProvisionStep::CreateDatabase,
        ProvisionStep::VerifyDatabase,
        ProvisionStep::ApplySchema,
        ProvisionStep::InstallBrowserRuntime,
        ProvisionStep::StartProcess,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            ProvisionStep::CreateWorkspace => "create workspace",
            ProvisionStep::CloneTemplate => "clone template",
            ProvisionStep::WriteConfig => "write configuration",
            ProvisionStep::CreateVirtualEnv => "create virtual environment",
            ProvisionStep::InstallRequirements => "install requirements",
            ProvisionStep::InstallSupplementaryPackages => "install supplementary packages",
            ProvisionStep::InstallClientLibrary => "install client library",
            ProvisionStep::WriteCompatibilityFiles => "write compatibility files",
            ProvisionStep::CreateDatabase => "create database",
            ProvisionStep::VerifyDatabase => "verify database",
            ProvisionStep::ApplySchema => "apply schema",
            ProvisionStep::InstallBrowserRuntime => "install browser runtime",
            ProvisionStep::StartProcess => "start process",
        }
    }

    /// A non-critical step logs its failure and provisioning carries on.
    pub fn is_critical(&self) -> bool {
        !matches!(
            self,
            ProvisionStep::WriteCompatibilityFiles | ProvisionStep::InstallBrowserRuntime
        )
    }

    pub fn is_database_step(&self) -> bool {
        matches!(
            self,
            ProvisionStep::CreateDatabase | ProvisionStep::VerifyDatabase | ProvisionStep::ApplySchema
        )
    }

    /// Mark the external effect this step may leave behind, once it has been attempted.
    pub fn record(&self, footprint: &mut Footprint) {
        match self {
            ProvisionStep::CreateWorkspace => footprint.workspace = true,
            ProvisionStep::CreateDatabase => footprint.database = true,
            ProvisionStep::StartProcess => footprint.process = true,
            _ => {}
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Database {0} not found after creation")]
    DatabaseMissing(String),
    #[error("Invalid database address: {0}")]
    Dsn(#[from] url::ParseError),
}

/// Carries out individual steps against the external systems.
pub(crate) struct Provisioner<'a> {
    pub config: &'a OrchestratorConfig,
    pub runner: &'a dyn CommandRunner,
    pub processes: &'a ProcessManager,
    pub database: &'a DatabaseServer,
}

impl Provisioner<'_> {
    fn pip(&self, workspace: &Path) -> CommandSpec {
        let pip: PathBuf = workspace.join("venv").join("bin").join("pip");
        CommandSpec::new(pip.to_string_lossy()).current_dir(workspace)
    }

    async fn checked(&self, spec: CommandSpec) -> Result<(), StepError> {
        let output = self.runner.run_checked(&spec).await?;
        if !output.stdout.is_empty() {
            debug!("{} output:\n{}", spec.program, output.stdout.trim_end());
        }
        Ok(())
    }

    pub async fn run(
        &self,
        step: ProvisionStep,
        request: &ProvisionRequest,
        workspace: &Path,
    ) -> Result<(), StepError> {
        let name = request.name.as_str();
        match step {
            ProvisionStep::CreateWorkspace => {
                tokio::fs::create_dir_all(&self.config.instances_root).await?;
                tokio::fs::create_dir(workspace).await?;
            }
            ProvisionStep::CloneTemplate => {
                let spec = CommandSpec::new("git")
                    .args(["clone", "--depth", "1", "--branch"])
                    .arg(&self.config.template_branch)
                    .arg("--single-branch")
                    .arg(&self.config.template_repo)
                    .arg(workspace.to_string_lossy());
                self.checked(spec).await?;
            }
            ProvisionStep::WriteConfig => {
                let contents =
                    workspace::render_env_file(request, &self.config.database_dsn(name)?);
                workspace::write_env_file(workspace, &contents).await?;
            }
            ProvisionStep::CreateVirtualEnv => {
                let spec = CommandSpec::new(&self.config.python)
                    .args(["-m", "venv", "venv"])
                    .current_dir(workspace);
                self.checked(spec).await?;
            }
            ProvisionStep::InstallRequirements => {
                let spec = self.pip(workspace).args(["install", "-r", "requirements.txt"]);
                self.checked(spec).await?;
            }
            ProvisionStep::InstallSupplementaryPackages => {
                if self.config.extra_packages.is_empty() {
                    debug!("No supplementary packages configured");
                    return Ok(());
                }
                let spec = self
                    .pip(workspace)
                    .arg("install")
                    .args(self.config.extra_packages.iter().cloned());
                self.checked(spec).await?;
            }
            ProvisionStep::InstallClientLibrary => {
                let uninstall = self
                    .pip(workspace)
                    .args(["uninstall", "-y"])
                    .arg(&self.config.client_package);
                let output = self.runner.run(&uninstall).await?;
                if !output.is_success() {
                    debug!(
                        "{} was not installed: {}",
                        self.config.client_package,
                        output.stderr.trim_end()
                    );
                }
                let install = self
                    .pip(workspace)
                    .args(["install", "--force-reinstall"])
                    .arg(&self.config.client_source);
                self.checked(install).await?;
            }
            ProvisionStep::WriteCompatibilityFiles => {
                workspace::write_compat_files(workspace).await?;
            }
            ProvisionStep::CreateDatabase => {
                diagnostics::log_storage(
                    self.runner,
                    &self.config.instances_root,
                    &self.config.db_container,
                )
                .await;
                self.database.create(name).await?;
            }
            ProvisionStep::VerifyDatabase => {
                if !self.database.exists(name).await? {
                    return Err(StepError::DatabaseMissing(name.to_string()));
                }
                info!("Database {} verified", name);
            }
            ProvisionStep::ApplySchema => {
                self.database.apply_schema(name).await?;
            }
            ProvisionStep::InstallBrowserRuntime => {
                let Some(installer) = &self.config.browser_installer else {
                    debug!("No browser installer configured");
                    return Ok(());
                };
                for action in ["install-deps", "install"] {
                    let spec = CommandSpec::new(installer.to_string_lossy())
                        .arg(action)
                        .current_dir(workspace);
                    self.checked(spec).await?;
                }
            }
            ProvisionStep::StartProcess => {
                self.processes
                    .start(name, workspace, &self.config.entry_point)
                    .await?;
            }
        }
        Ok(())
    }
}
