use std::path::PathBuf;

use chrono::{DateTime, Utc};
use fleet_core::validation::{reject_control_chars, require_non_empty, validate_instance_name};
use fleet_core::ValidationError;
use serde::{Deserialize, Serialize};

/// Default command prefix written into a new instance's configuration.
pub const DEFAULT_PREFIX: &str = ";";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Provisioning,
    Active,
    Stopped,
    Failed,
    Deleted,
}

/// Cached view of an instance. The filesystem, process manager and database server
/// are authoritative; see [`InstanceState`] for the reconciled view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub workspace_path: PathBuf,
    pub database_name: String,
    pub status: InstanceStatus,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(name: &str, workspace_path: PathBuf, status: InstanceStatus) -> Self {
        Self {
            name: name.to_string(),
            workspace_path,
            database_name: name.to_string(),
            status,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub username: String,
    pub email: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub name: String,
    pub token: String,
    pub owner: Owner,
    pub prefix: String,
}

impl ProvisionRequest {
    pub fn new(name: impl Into<String>, token: impl Into<String>, owner: Owner) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            owner,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// All checks run before any side effect.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_instance_name(&self.name)?;
        require_non_empty("token", &self.token)?;
        reject_control_chars("token", &self.token)?;
        reject_control_chars("prefix", &self.prefix)?;
        reject_control_chars("owner.id", &self.owner.id)?;
        reject_control_chars("owner.username", &self.owner.username)?;
        reject_control_chars("owner.email", &self.owner.email)?;
        Ok(())
    }
}

impl std::fmt::Debug for ProvisionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionRequest")
            .field("name", &self.name)
            .field("token", &"<redacted>")
            .field("owner", &self.owner)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Result of an explicit existence check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum Presence {
    Present,
    Absent,
    CheckFailed(String),
}

impl Presence {
    pub fn is_present(&self) -> bool {
        matches!(self, Presence::Present)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Presence::Absent)
    }
}

/// Live view of an instance, derived from the three external systems at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceState {
    pub name: String,
    pub status: InstanceStatus,
    pub workspace: Presence,
    pub process: Presence,
    /// Process-manager status string (`online`, `stopped`, ...) when the process exists.
    pub process_status: Option<String>,
    pub database: Presence,
}

impl InstanceState {
    /// Derive the lifecycle status from the three footprints.
    ///
    /// All absent is `Deleted`; all present is `Active` or `Stopped` depending on the
    /// process; anything in between, including a failed check, is `Failed`.
    pub fn derive_status(
        workspace: &Presence,
        process: &Presence,
        process_status: Option<&str>,
        database: &Presence,
    ) -> InstanceStatus {
        let footprints = [workspace, process, database];
        if footprints.iter().all(|p| p.is_absent()) {
            InstanceStatus::Deleted
        } else if footprints.iter().all(|p| p.is_present()) {
            match process_status {
                Some("online") | Some("launching") => InstanceStatus::Active,
                _ => InstanceStatus::Stopped,
            }
        } else {
            InstanceStatus::Failed
        }
    }
}

/// One process-manager entry, as reported by `list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub name: String,
    pub status: Option<String>,
    #[serde(serialize_with = "serialize_optional_datetime")]
    pub uptime_since: Option<DateTime<Utc>>,
    pub restart_count: Option<u64>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<u64>,
    pub working_directory: Option<String>,
}

// Serialize DateTime as RFC 3339 / ISO 8601 string
fn serialize_datetime<S>(dt: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339())
}

fn serialize_optional_datetime<S>(
    dt: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match dt {
        Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
        None => serializer.serialize_none(),
    }
}
