//! In-memory stand-in for git, pip, pm2 and the database container.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use serde_json::json;

use crate::config::OrchestratorConfig;
use crate::orchestrator::InstanceOrchestrator;

#[derive(Debug, Clone)]
struct FakeProcess {
    status: String,
    cwd: Option<PathBuf>,
    restarts: u64,
}

#[derive(Default)]
struct FakeState {
    processes: BTreeMap<String, FakeProcess>,
    databases: BTreeSet<String>,
    history: Vec<String>,
    failures: Vec<String>,
    timeouts: Vec<String>,
    delay: Duration,
}

/// Simulates the external systems an orchestrator drives.
///
/// Commands whose command line contains a registered failure needle exit with
/// status 1 before touching any state.
#[derive(Default)]
pub struct FakeSystem {
    state: Mutex<FakeState>,
}

impl FakeSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_on(&self, needle: &str) {
        self.state().failures.push(needle.to_string());
    }

    pub fn time_out_on(&self, needle: &str) {
        self.state().timeouts.push(needle.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.timeouts.clear();
    }

    /// Sleep before every command, to widen race windows.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    pub fn add_process(&self, name: &str, status: &str) {
        self.state().processes.insert(
            name.to_string(),
            FakeProcess {
                status: status.to_string(),
                cwd: None,
                restarts: 0,
            },
        );
    }

    pub fn add_database(&self, name: &str) {
        self.state().databases.insert(name.to_string());
    }

    pub fn has_process(&self, name: &str) -> bool {
        self.state().processes.contains_key(name)
    }

    pub fn process_status(&self, name: &str) -> Option<String> {
        self.state().processes.get(name).map(|p| p.status.clone())
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.state().databases.contains(name)
    }

    /// Every command line run so far, in order.
    pub fn history(&self) -> Vec<String> {
        self.state().history.clone()
    }

    fn simulate(&self, spec: &CommandSpec) -> CommandOutput {
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let program = Path::new(&spec.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(spec.program.as_str());

        match (program, args.as_slice()) {
            ("git", ["clone", .., dest]) => {
                let dest = Path::new(dest);
                let created = std::fs::create_dir_all(dest)
                    .and_then(|_| std::fs::write(dest.join("requirements.txt"), "discord.py\n"))
                    .and_then(|_| std::fs::write(dest.join("main.py"), "print('hello')\n"));
                match created {
                    Ok(()) => CommandOutput::success(""),
                    Err(e) => CommandOutput::failure(128, format!("fatal: {e}")),
                }
            }
            (_, ["-m", "venv", dir]) => {
                let base = spec.cwd.clone().unwrap_or_default();
                match std::fs::create_dir_all(base.join(dir).join("bin")) {
                    Ok(()) => CommandOutput::success(""),
                    Err(e) => CommandOutput::failure(1, e.to_string()),
                }
            }
            ("pip", _) => CommandOutput::success("Successfully installed\n"),
            ("docker", ["exec", "-i", _container, "pg_isready", ..]) => {
                CommandOutput::success("/var/run/postgresql:5432 - accepting connections\n")
            }
            ("docker", ["exec", "-i", _container, "psql", rest @ ..]) => self.psql(rest, spec),
            ("docker", ["exec", "-i", _container, "df", ..]) => CommandOutput::success(
                "Filesystem      Size  Used Avail Use% Mounted on\n/dev/vdb        20G    4G   16G  20% /var/lib/postgresql/data\n",
            ),
            ("pm2", rest) => self.pm2(rest, spec),
            ("df", _) => CommandOutput::success(
                "Filesystem      Size  Used Avail Use% Mounted on\n/dev/root        50G   20G   30G  40% /\n",
            ),
            ("free", _) => CommandOutput::success(
                "               total        used        free\nMem:           3.8Gi       1.2Gi       2.1Gi\n",
            ),
            _ => CommandOutput::failure(127, format!("{}: command not found", spec.program)),
        }
    }

    fn psql(&self, args: &[&str], spec: &CommandSpec) -> CommandOutput {
        let mut state = self.state();

        if args.contains(&"-lqt") {
            let listing: String = state
                .databases
                .iter()
                .map(|db| format!(" {:<16}| admin | UTF8\n", db))
                .collect();
            return CommandOutput::success(listing);
        }

        if let Some(pos) = args.iter().position(|a| *a == "-d") {
            let db = args.get(pos + 1).copied().unwrap_or_default();
            if !state.databases.contains(db) {
                return CommandOutput::failure(
                    2,
                    format!("psql: FATAL:  database \"{db}\" does not exist"),
                );
            }
            if spec.stdin.is_none() {
                return CommandOutput::failure(1, "no schema on stdin");
            }
            return CommandOutput::success("CREATE TABLE\n");
        }

        let Some(statement) = args
            .iter()
            .position(|a| *a == "-c")
            .and_then(|pos| args.get(pos + 1))
        else {
            return CommandOutput::failure(1, "unsupported psql invocation");
        };

        if let Some(ident) = statement.strip_prefix("CREATE DATABASE ") {
            let db = unquote(ident, '"');
            if !state.databases.insert(db.clone()) {
                return CommandOutput::failure(
                    1,
                    format!("ERROR:  database \"{db}\" already exists"),
                );
            }
            CommandOutput::success("CREATE DATABASE\n")
        } else if let Some(ident) = statement.strip_prefix("DROP DATABASE IF EXISTS ") {
            state.databases.remove(&unquote(ident, '"'));
            CommandOutput::success("DROP DATABASE\n")
        } else if statement.starts_with("SELECT datname FROM pg_database") {
            let wanted = statement
                .rsplit_once("lower(")
                .map(|(_, tail)| unquote(tail.trim_end_matches(')'), '\''))
                .unwrap_or_default();
            let matches: String = state
                .databases
                .iter()
                .filter(|db| db.eq_ignore_ascii_case(&wanted))
                .map(|db| format!("{db}\n"))
                .collect();
            CommandOutput::success(matches)
        } else {
            CommandOutput::failure(1, format!("ERROR:  unsupported statement: {statement}"))
        }
    }

    fn pm2(&self, args: &[&str], spec: &CommandSpec) -> CommandOutput {
        let mut state = self.state();
        match args {
            ["jlist"] => {
                let processes: Vec<_> = state
                    .processes
                    .iter()
                    .enumerate()
                    .map(|(id, (name, p))| {
                        json!({
                            "name": name,
                            "pm_id": id,
                            "pm2_env": {
                                "status": p.status,
                                "pm_uptime": 1_700_000_000_000i64,
                                "restart_time": p.restarts,
                                "pm_cwd": p.cwd.as_ref().map(|c| c.display().to_string()),
                            },
                            "monit": {"cpu": 0.5, "memory": 50_000_000u64},
                        })
                    })
                    .collect();
                CommandOutput::success(serde_json::Value::Array(processes).to_string())
            }
            ["start", _script, "--name", name, ..] => {
                if state.processes.contains_key(*name) {
                    return CommandOutput::failure(
                        1,
                        format!("[PM2][ERROR] Script already launched, add -f option to force re-execution ({name})"),
                    );
                }
                state.processes.insert(
                    name.to_string(),
                    FakeProcess {
                        status: "online".to_string(),
                        cwd: spec.cwd.clone(),
                        restarts: 0,
                    },
                );
                CommandOutput::success(format!("[PM2] Done. {name} online\n"))
            }
            ["stop", name] => match state.processes.get_mut(*name) {
                Some(process) => {
                    process.status = "stopped".to_string();
                    CommandOutput::success("")
                }
                None => not_found(name),
            },
            ["delete", name] => match state.processes.remove(*name) {
                Some(_) => CommandOutput::success(""),
                None => not_found(name),
            },
            _ => CommandOutput::failure(1, "unsupported pm2 invocation"),
        }
    }
}

fn not_found(name: &str) -> CommandOutput {
    CommandOutput::failure(1, format!("[PM2][ERROR] Process or Namespace {name} not found"))
}

fn unquote(quoted: &str, quote: char) -> String {
    let doubled: String = [quote, quote].iter().collect();
    quoted
        .trim()
        .trim_start_matches(quote)
        .trim_end_matches(quote)
        .replace(&doubled, &quote.to_string())
}

#[async_trait]
impl CommandRunner for FakeSystem {
    async fn run(&self, spec: &CommandSpec) -> fleet_core::error::Result<CommandOutput> {
        let command = spec.command_line();
        let (delay, failure, timeout) = {
            let mut state = self.state();
            state.history.push(command.clone());
            let failure = state.failures.iter().find(|n| command.contains(n.as_str())).cloned();
            let timeout = state.timeouts.iter().any(|n| command.contains(n.as_str()));
            (state.delay, failure, timeout)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if timeout {
            return Err(CommandError::TimedOut { command, secs: 0 });
        }
        if let Some(needle) = failure {
            return Ok(CommandOutput::failure(1, format!("injected failure: {needle}")));
        }
        Ok(self.simulate(spec))
    }
}

/// An orchestrator wired to a fresh [`FakeSystem`], with its instances root and
/// schema file under `base`.
pub fn fake_orchestrator(base: &Path) -> (InstanceOrchestrator, Arc<FakeSystem>) {
    let schema_path = base.join("schema.sql");
    std::fs::write(&schema_path, "CREATE TABLE guilds (id BIGINT PRIMARY KEY);\n")
        .expect("Failed to write schema file");

    let config = OrchestratorConfig {
        instances_root: base.join("instances"),
        schema_path,
        ..Default::default()
    };
    let system = FakeSystem::new();
    let orchestrator = InstanceOrchestrator::new(config, system.clone());
    (orchestrator, system)
}
