use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use fleet_orchestrator::OrchestratorConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_SIGNATURE_WINDOW_SECS: u64 = 300;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 900;

/// Service configuration, read once at startup from `FLEET_*` environment variables.
#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Shared secret for request signing.
    pub api_key: String,
    pub signature_window_secs: u64,
    pub command_timeout_secs: u64,
    /// Directory prepended to `PATH` for every external command.
    pub tool_path: Option<PathBuf>,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Unset and blank are treated alike.
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var("FLEET_API_KEY").context("FLEET_API_KEY must be set")?;
        let defaults = OrchestratorConfig::default();

        let orchestrator = OrchestratorConfig {
            instances_root: var("FLEET_INSTANCES_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.instances_root),
            template_repo: var("FLEET_TEMPLATE_REPO").unwrap_or(defaults.template_repo),
            template_branch: var("FLEET_TEMPLATE_BRANCH").unwrap_or(defaults.template_branch),
            python: var("FLEET_PYTHON").unwrap_or(defaults.python),
            entry_point: var("FLEET_ENTRY_POINT").unwrap_or(defaults.entry_point),
            // An explicitly empty list disables the supplementary install.
            extra_packages: lookup("FLEET_EXTRA_PACKAGES")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.extra_packages),
            client_package: var("FLEET_CLIENT_PACKAGE").unwrap_or(defaults.client_package),
            client_source: var("FLEET_CLIENT_SOURCE").unwrap_or(defaults.client_source),
            pm2: var("FLEET_PM2").unwrap_or(defaults.pm2),
            db_container: var("FLEET_DB_CONTAINER").unwrap_or(defaults.db_container),
            db_user: var("FLEET_DB_USER").unwrap_or(defaults.db_user),
            db_host: var("FLEET_DB_HOST").unwrap_or(defaults.db_host),
            db_port: parse_var(&var, "FLEET_DB_PORT", defaults.db_port)?,
            db_password: lookup("FLEET_DB_PASSWORD").unwrap_or(defaults.db_password),
            schema_path: var("FLEET_SCHEMA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.schema_path),
            browser_installer: var("FLEET_BROWSER_INSTALLER").map(PathBuf::from),
        };

        Ok(Self {
            bind_addr: var("FLEET_BIND").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            api_key,
            signature_window_secs: parse_var(
                &var,
                "FLEET_SIGNATURE_WINDOW_SECS",
                DEFAULT_SIGNATURE_WINDOW_SECS,
            )?,
            command_timeout_secs: parse_var(
                &var,
                "FLEET_COMMAND_TIMEOUT_SECS",
                DEFAULT_COMMAND_TIMEOUT_SECS,
            )?,
            tool_path: var("FLEET_TOOL_PATH").map(PathBuf::from),
            orchestrator,
        })
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, value)),
        None => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("api_key", &"<redacted>")
            .field("signature_window_secs", &self.signature_window_secs)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("tool_path", &self.tool_path)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}
