use thiserror::Error;

/// Failure of a single external command.
///
/// A command that ran to completion with a non-zero exit status is reported as
/// [`CommandError::NonZeroExit`] and keeps everything it printed, so callers can
/// attach it to their own error reports.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed with exit code {code:?}: {command}\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Command timed out after {secs}s: {command}")]
    TimedOut { command: String, secs: u64 },

    #[error("Unexpected output from '{command}': {detail}")]
    UnexpectedOutput { command: String, detail: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    Missing(&'static str),

    #[error("Invalid instance name '{name}': {reason}")]
    InstanceName { name: String, reason: &'static str },

    #[error("Field '{field}' contains control characters")]
    ControlCharacters { field: &'static str },
}

pub type Result<T> = std::result::Result<T, CommandError>;
