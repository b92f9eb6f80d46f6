pub mod command;
pub mod error;
pub mod preflight;
pub mod validation;

pub use command::{CommandOutput, CommandRunner, CommandRunnerExt, CommandSpec, TokioCommandRunner};
pub use error::{CommandError, ValidationError};
pub use preflight::{is_tool_installed, preflight};
