use std::ffi::OsStr;
use std::path::PathBuf;

use tracing::{info, warn};
use which::{which, which_in};

/// Where (or whether) a required tool was found on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCheck {
    pub tool: String,
    pub location: Option<PathBuf>,
}

/// Checks if a command-line tool is available in the system's PATH.
pub fn is_tool_installed(tool_name: &str) -> bool {
    which(tool_name).is_ok()
}

/// Look up each tool and log the result. Missing tools are reported, never fatal:
/// the first command that needs one will fail with a proper error.
///
/// `search_path` overrides the process `PATH`; pass the one commands will run with.
pub fn preflight<I, S>(tools: I, search_path: Option<&OsStr>) -> Vec<ToolCheck>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let cwd = std::env::current_dir().unwrap_or_default();
    tools
        .into_iter()
        .map(|tool| {
            let tool = tool.as_ref();
            let location = match search_path {
                Some(paths) => which_in(tool, Some(paths), &cwd).ok(),
                None => which(tool).ok(),
            };
            match &location {
                Some(path) => info!("Found {} at: {}", tool, path.display()),
                None => warn!("{} not found in PATH", tool),
            }
            ToolCheck {
                tool: tool.to_string(),
                location,
            }
        })
        .collect()
}
