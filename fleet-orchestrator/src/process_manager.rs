//! pm2 adapter.

use std::path::Path;
use std::sync::Arc;

use chrono::DateTime;
use fleet_core::{CommandError, CommandRunner, CommandRunnerExt, CommandSpec};
use serde::Deserialize;
use tracing::debug;

use crate::instance::{Presence, ProcessSummary};

#[derive(Clone)]
pub struct ProcessManager {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

#[derive(Debug, Deserialize)]
struct Pm2Process {
    name: String,
    #[serde(default)]
    pm2_env: Option<Pm2Env>,
    #[serde(default)]
    monit: Option<Pm2Monit>,
}

#[derive(Debug, Deserialize)]
struct Pm2Env {
    status: Option<String>,
    pm_uptime: Option<i64>,
    restart_time: Option<u64>,
    pm_cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Pm2Monit {
    cpu: Option<f64>,
    memory: Option<u64>,
}

impl From<Pm2Process> for ProcessSummary {
    fn from(process: Pm2Process) -> Self {
        let env = process.pm2_env;
        let monit = process.monit;
        Self {
            name: process.name,
            status: env.as_ref().and_then(|e| e.status.clone()),
            uptime_since: env
                .as_ref()
                .and_then(|e| e.pm_uptime)
                .and_then(DateTime::from_timestamp_millis),
            restart_count: env.as_ref().and_then(|e| e.restart_time),
            cpu_usage: monit.as_ref().and_then(|m| m.cpu),
            memory_usage: monit.as_ref().and_then(|m| m.memory),
            working_directory: env.and_then(|e| e.pm_cwd),
        }
    }
}

/// Parse `pm2 jlist` output. pm2 may print banner lines before the JSON array.
pub fn parse_jlist(stdout: &str) -> Result<Vec<ProcessSummary>, serde_json::Error> {
    let mut last_error = None;
    for (start, _) in stdout.match_indices('[') {
        match serde_json::from_str::<Vec<Pm2Process>>(stdout[start..].trim()) {
            Ok(processes) => return Ok(processes.into_iter().map(ProcessSummary::from).collect()),
            Err(e) => last_error = Some(e),
        }
    }
    match last_error {
        Some(e) => Err(e),
        None => serde_json::from_str::<Vec<Pm2Process>>(stdout.trim())
            .map(|processes| processes.into_iter().map(ProcessSummary::from).collect()),
    }
}

impl ProcessManager {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.binary)
    }

    pub async fn list(&self) -> Result<Vec<ProcessSummary>, CommandError> {
        let spec = self.command().arg("jlist");
        let output = self.runner.run_checked(&spec).await?;
        parse_jlist(&output.stdout).map_err(|e| CommandError::UnexpectedOutput {
            command: spec.command_line(),
            detail: format!("unparseable process list: {e}"),
        })
    }

    /// Look up one process by name.
    pub async fn find(&self, name: &str) -> Result<Option<ProcessSummary>, CommandError> {
        Ok(self.list().await?.into_iter().find(|p| p.name == name))
    }

    /// Tri-state existence check plus the process status when present.
    pub async fn presence(&self, name: &str) -> (Presence, Option<String>) {
        match self.find(name).await {
            Ok(Some(process)) => (Presence::Present, process.status),
            Ok(None) => (Presence::Absent, None),
            Err(e) => {
                debug!("Process check for {} failed: {}", name, e);
                (Presence::CheckFailed(e.to_string()), None)
            }
        }
    }

    /// `pm2 start <workspace>/venv/bin/python --name <name> -- <entry_point>`
    pub async fn start(
        &self,
        name: &str,
        workspace: &Path,
        entry_point: &str,
    ) -> Result<(), CommandError> {
        let interpreter = workspace.join("venv").join("bin").join("python");
        let spec = self
            .command()
            .arg("start")
            .arg(interpreter.to_string_lossy())
            .args(["--name", name, "--", entry_point])
            .current_dir(workspace);
        self.runner.run_checked(&spec).await.map(|_| ())
    }

    pub async fn stop(&self, name: &str) -> Result<(), CommandError> {
        let spec = self.command().args(["stop", name]);
        self.runner.run_checked(&spec).await.map(|_| ())
    }

    pub async fn delete(&self, name: &str) -> Result<(), CommandError> {
        let spec = self.command().args(["delete", name]);
        self.runner.run_checked(&spec).await.map(|_| ())
    }
}
