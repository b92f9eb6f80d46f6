//! PostgreSQL adapter. The server runs in a container and is driven with
//! `docker exec -i <container> psql ...`.

use std::path::PathBuf;
use std::sync::Arc;

use fleet_core::validation::{quote_ident, quote_literal};
use fleet_core::{CommandError, CommandRunner, CommandRunnerExt, CommandSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::instance::Presence;

/// What a failed database step most likely ran into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DatabaseProbe {
    AlreadyExists,
    ServerStatus(String),
    ProbeFailed(String),
}

impl std::fmt::Display for DatabaseProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseProbe::AlreadyExists => write!(f, "database already exists"),
            DatabaseProbe::ServerStatus(status) => write!(f, "server status: {}", status),
            DatabaseProbe::ProbeFailed(e) => write!(f, "could not check database status: {}", e),
        }
    }
}

#[derive(Clone)]
pub struct DatabaseServer {
    runner: Arc<dyn CommandRunner>,
    container: String,
    user: String,
    schema_path: PathBuf,
}

impl DatabaseServer {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        container: impl Into<String>,
        user: impl Into<String>,
        schema_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            container: container.into(),
            user: user.into(),
            schema_path: schema_path.into(),
        }
    }

    fn exec(&self, tool: &str) -> CommandSpec {
        CommandSpec::new("docker").args(["exec", "-i", self.container.as_str(), tool])
    }

    fn psql(&self) -> CommandSpec {
        self.exec("psql")
            .args(["-U", self.user.as_str(), "-v", "ON_ERROR_STOP=1"])
    }

    fn sql(&self, statement: String) -> CommandSpec {
        self.psql().args(["-tA", "-c"]).arg(statement)
    }

    pub async fn create(&self, name: &str) -> Result<(), CommandError> {
        let spec = self.sql(format!("CREATE DATABASE {}", quote_ident(name)));
        self.runner.run_checked(&spec).await.map(|_| ())
    }

    pub async fn drop_if_exists(&self, name: &str) -> Result<(), CommandError> {
        let spec = self.sql(format!("DROP DATABASE IF EXISTS {}", quote_ident(name)));
        self.runner.run_checked(&spec).await.map(|_| ())
    }

    /// Catalog lookup with a case-insensitive name match.
    pub async fn exists(&self, name: &str) -> Result<bool, CommandError> {
        let spec = self.sql(format!(
            "SELECT datname FROM pg_database WHERE lower(datname) = lower({})",
            quote_literal(name)
        ));
        let output = self.runner.run_checked(&spec).await?;
        Ok(output
            .stdout
            .lines()
            .any(|line| line.trim().eq_ignore_ascii_case(name)))
    }

    pub async fn presence(&self, name: &str) -> Presence {
        match self.exists(name).await {
            Ok(true) => Presence::Present,
            Ok(false) => Presence::Absent,
            Err(e) => {
                debug!("Database check for {} failed: {}", name, e);
                Presence::CheckFailed(e.to_string())
            }
        }
    }

    /// Feed the schema file to psql connected to the instance database.
    pub async fn apply_schema(&self, name: &str) -> Result<(), CommandError> {
        let spec = self.psql().args(["-d", name]);
        let schema = tokio::fs::read(&self.schema_path)
            .await
            .map_err(|source| CommandError::Io {
                command: format!("read {}", self.schema_path.display()),
                source,
            })?;
        self.runner
            .run_checked(&spec.stdin_bytes(schema))
            .await
            .map(|_| ())
    }

    /// Distinguish "already exists" from an unhealthy server after a failed step.
    pub async fn probe_failure(&self, name: &str) -> DatabaseProbe {
        let listing = self.psql().arg("-lqt");
        match self.runner.run_checked(&listing).await {
            Ok(output) => {
                let exists = output.stdout.lines().any(|line| {
                    line.split('|')
                        .next()
                        .is_some_and(|db| db.trim() == name)
                });
                if exists {
                    error!("Database {} already exists", name);
                    return DatabaseProbe::AlreadyExists;
                }
            }
            Err(e) => {
                error!("Could not check database status: {}", e);
                return DatabaseProbe::ProbeFailed(e.to_string());
            }
        }

        match self.runner.run(&self.exec("pg_isready")).await {
            Ok(output) => {
                let status = if output.stdout.trim().is_empty() {
                    format!("pg_isready exit code {:?}", output.exit_code)
                } else {
                    output.stdout.trim().to_string()
                };
                error!("PostgreSQL status: {}", status);
                DatabaseProbe::ServerStatus(status)
            }
            Err(e) => {
                error!("Could not check database status: {}", e);
                DatabaseProbe::ProbeFailed(e.to_string())
            }
        }
    }
}
