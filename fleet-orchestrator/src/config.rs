use std::path::PathBuf;

use url::Url;

/// Everything the orchestrator needs to know about the host it provisions on.
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Each instance lives in `<instances_root>/<name>`.
    pub instances_root: PathBuf,

    pub template_repo: String,
    pub template_branch: String,

    /// Interpreter used to create each instance's virtual environment.
    pub python: String,
    /// Script started under the process manager, relative to the workspace.
    pub entry_point: String,
    pub extra_packages: Vec<String>,
    /// Package name removed before the pinned fork is installed.
    pub client_package: String,
    /// Install source of the pinned fork.
    pub client_source: String,

    pub pm2: String,

    pub db_container: String,
    pub db_user: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_password: String,
    pub schema_path: PathBuf,

    /// Optional headless-browser installer; its failures never abort provisioning.
    pub browser_installer: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            instances_root: PathBuf::from("/root/instances"),
            template_repo: "git@github.com:EvictServices/evict.git".to_string(),
            template_branch: "evict-instance".to_string(),
            python: "python3".to_string(),
            entry_point: "main.py".to_string(),
            extra_packages: ["matplotlib", "posthog", "scipy", "plotly", "stripe"]
                .into_iter()
                .map(String::from)
                .collect(),
            client_package: "discord.py".to_string(),
            client_source: "git+https://github.com/parelite/discord.py".to_string(),
            pm2: "pm2".to_string(),
            db_container: "setup-postgres-1".to_string(),
            db_user: "admin".to_string(),
            db_host: "localhost".to_string(),
            db_port: 5433,
            db_password: String::new(),
            schema_path: PathBuf::from("/root/setup/latest.sql"),
            browser_installer: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn workspace_path(&self, name: &str) -> PathBuf {
        self.instances_root.join(name)
    }

    /// Connection string written into an instance's env file. User and password
    /// are percent-encoded.
    pub fn database_dsn(&self, name: &str) -> Result<String, url::ParseError> {
        let mut dsn = Url::parse(&format!(
            "postgres://{}:{}/{}",
            self.db_host, self.db_port, name
        ))?;
        dsn.set_username(&self.db_user)
            .map_err(|()| url::ParseError::EmptyHost)?;
        if !self.db_password.is_empty() {
            dsn.set_password(Some(&self.db_password))
                .map_err(|()| url::ParseError::EmptyHost)?;
        }
        Ok(dsn.into())
    }
}

impl std::fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("instances_root", &self.instances_root)
            .field("template_repo", &self.template_repo)
            .field("template_branch", &self.template_branch)
            .field("python", &self.python)
            .field("entry_point", &self.entry_point)
            .field("extra_packages", &self.extra_packages)
            .field("client_package", &self.client_package)
            .field("client_source", &self.client_source)
            .field("pm2", &self.pm2)
            .field("db_container", &self.db_container)
            .field("db_user", &self.db_user)
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_password", &"<redacted>")
            .field("schema_path", &self.schema_path)
            .field("browser_installer", &self.browser_installer)
            .finish()
    }
}
