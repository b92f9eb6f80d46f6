use std::path::Path;

use fleet_core::{CommandRunner, CommandRunnerExt, CommandSpec};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Host snapshot attached to a failed provisioning report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub disk: String,
    pub memory: String,
}

async fn capture(runner: &dyn CommandRunner, spec: CommandSpec) -> String {
    match runner.run_checked(&spec).await {
        Ok(output) => output.stdout.trim_end().to_string(),
        Err(e) => format!("unavailable: {}", e),
    }
}

/// Free disk space under `root` and free memory. Never fails.
pub async fn collect(runner: &dyn CommandRunner, root: &Path) -> Diagnostics {
    let disk = capture(
        runner,
        CommandSpec::new("df").arg("-h").arg(root.to_string_lossy()),
    )
    .await;
    let memory = capture(runner, CommandSpec::new("free").arg("-h")).await;

    error!("Disk space:\n{}", disk);
    error!("Memory usage:\n{}", memory);

    Diagnostics { disk, memory }
}

/// Data directory of the database server, inside its container.
pub const DATABASE_DATA_DIR: &str = "/var/lib/postgresql/data";

/// Log free space on the host and in the database server's data directory.
/// Returns the two snapshots; an unreadable one is reported, never fatal.
pub async fn log_storage(
    runner: &dyn CommandRunner,
    root: &Path,
    container: &str,
) -> (String, String) {
    let host = capture(
        runner,
        CommandSpec::new("df").arg("-h").arg(root.to_string_lossy()),
    )
    .await;
    info!("Disk space status:\n{}", host);

    let database = capture(
        runner,
        CommandSpec::new("docker")
            .args(["exec", "-i", container, "df", "-h", DATABASE_DATA_DIR]),
    )
    .await;
    info!("Database server disk space:\n{}", database);

    (host, database)
}
