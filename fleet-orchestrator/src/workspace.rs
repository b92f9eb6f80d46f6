//! Files written into an instance workspace.

use std::io;
use std::path::Path;

use crate::instance::ProvisionRequest;

pub const ENV_FILE: &str = ".env";
pub const COOKIE_FILE: &str = "cookies.txt";

const ENV_FILE_PERMISSIONS: u32 = 0o600;

const COOKIE_PLACEHOLDER: &str =
    "# Netscape HTTP Cookie File\n# This is an empty cookie file, created for compatibility.\n";

/// Single-quote a value for a dotenv file.
fn env_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

/// Render the env file handed to the bot process.
pub fn render_env_file(request: &ProvisionRequest, database_dsn: &str) -> String {
    let entries = [
        ("DISCORD_TOKEN", request.token.as_str()),
        ("BOT_PREFIX", request.prefix.as_str()),
        ("DATABASE_DSN", database_dsn),
        ("INSTANCE_OWNER_ID", request.owner.id.as_str()),
        ("INSTANCE_OWNER_USERNAME", request.owner.username.as_str()),
        ("INSTANCE_OWNER_EMAIL", request.owner.email.as_str()),
    ];

    let mut contents = String::from("# Generated by fleet-manager\n");
    for (key, value) in entries {
        contents.push_str(key);
        contents.push('=');
        contents.push_str(&env_value(value));
        contents.push('\n');
    }
    contents
}

/// Write the env file readable by the owner only. The file holds the bot token.
pub async fn write_env_file(workspace: &Path, contents: &str) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let path = workspace.join(ENV_FILE);
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(ENV_FILE_PERMISSIONS);

    let mut file = options.open(&path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.flush().await?;

    // `mode` only applies on creation; a file shipped by the template keeps its bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(ENV_FILE_PERMISSIONS))
            .await?;
    }
    Ok(())
}

/// Placeholder files the bot runtime expects to find.
pub async fn write_compat_files(workspace: &Path) -> io::Result<()> {
    tokio::fs::write(workspace.join(COOKIE_FILE), COOKIE_PLACEHOLDER).await
}
