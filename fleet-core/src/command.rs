//! External command execution.
//!
//! Every interaction with git, the package installer, the process manager and the
//! database server goes through [`CommandRunner`]. Commands are always described as
//! a program plus an argument vector, never as a shell string, so values supplied by
//! callers cannot be reinterpreted by a shell.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::{CommandError, Result};

/// Description of one external command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin_bytes(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    /// Space-joined command line, used for logs and error reports.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into [`CommandError::NonZeroExit`].
    pub fn into_result(self, spec: &CommandSpec) -> Result<CommandOutput> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CommandError::NonZeroExit {
                command: spec.command_line(),
                code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// The collaborator through which every external system is driven.
///
/// `run` returns `Err` only when no exit status could be obtained (spawn failure,
/// I/O failure, timeout). A non-zero exit is still `Ok`; use [`CommandRunnerExt::run_checked`]
/// to treat it as a failure.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

#[async_trait]
pub trait CommandRunnerExt: CommandRunner {
    /// Run and fail on non-zero exit, carrying captured stdout/stderr.
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec).await?;
        output.into_result(spec).inspect_err(|e| {
            error!("Command failed: {}", spec);
            debug!("Error details: {}", e);
        })
    }
}

impl<T: CommandRunner + ?Sized> CommandRunnerExt for T {}

/// Runs commands as real child processes on the tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    timeout: Duration,
    path_prefix: Option<PathBuf>,
}

impl TokioCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            path_prefix: None,
        }
    }

    /// Prepend `dir` to `PATH` for every command this runner starts.
    pub fn with_path_prefix(mut self, dir: impl Into<PathBuf>) -> Self {
        self.path_prefix = Some(dir.into());
        self
    }

    /// The `PATH` handed to child processes, when a prefix is configured.
    pub fn search_path(&self) -> Option<OsString> {
        let prefix = self.path_prefix.as_ref()?;
        let current = std::env::var_os("PATH").unwrap_or_else(|| {
            OsString::from("/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin")
        });
        let mut paths = vec![prefix.clone()];
        paths.extend(std::env::split_paths(&current));
        std::env::join_paths(paths).ok()
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let command_line = spec.command_line();
        info!("Running command: {}", command_line);
        if let Some(cwd) = &spec.cwd {
            debug!("Working directory: {}", cwd.display());
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(path) = self.search_path() {
            cmd.env("PATH", path);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        // Feed stdin from its own task so a chatty child cannot fill its stdout pipe
        // while we are still blocked writing.
        let writer = match (child.stdin.take(), spec.stdin.clone()) {
            (Some(mut pipe), Some(input)) => Some(tokio::spawn(async move {
                pipe.write_all(&input).await?;
                pipe.shutdown().await
            })),
            _ => None,
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| CommandError::Io {
                command: command_line.clone(),
                source,
            })?,
            Err(_) => {
                error!(
                    "Command timed out after {}s: {}",
                    self.timeout.as_secs(),
                    command_line
                );
                return Err(CommandError::TimedOut {
                    command: command_line,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // A child that exits without draining stdin is judged by its exit status.
                Ok(Err(e)) => debug!("stdin for '{}' closed early: {}", command_line, e),
                Err(e) => debug!("stdin writer for '{}' aborted: {}", command_line, e),
            }
        }

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        debug!("Command output: {}", result.stdout.trim());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> TokioCommandRunner {
        TokioCommandRunner::new(Duration::from_secs(10))
    }

    #[test]
    fn test_command_line_rendering() {
        let spec = CommandSpec::new("pm2")
            .arg("start")
            .args(["--name", "bot1"])
            .current_dir("/tmp");
        assert_eq!(spec.command_line(), "pm2 start --name bot1");
        assert_eq!(spec.to_string(), "pm2 start --name bot1");
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_into_result_maps_non_zero_exit() {
        let spec = CommandSpec::new("false");
        let err = CommandOutput::failure(3, "boom")
            .into_result(&spec)
            .unwrap_err();
        match err {
            CommandError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_runner_captures_stdout() {
        let spec = CommandSpec::new("echo").arg("hello");
        let output = runner().run(&spec).await.unwrap();
        assert!(output.is_success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_runner_reports_non_zero_exit_without_error() {
        let spec = CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 4"]);
        let output = runner().run(&spec).await.unwrap();
        assert_eq!(output.exit_code, Some(4));
        assert_eq!(output.stderr.trim(), "oops");

        let checked = runner().run_checked(&spec).await;
        assert!(matches!(
            checked,
            Err(CommandError::NonZeroExit { code: Some(4), .. })
        ));
    }

    #[tokio::test]
    async fn test_runner_feeds_stdin() {
        let spec = CommandSpec::new("cat").stdin_bytes(b"CREATE TABLE t ();".to_vec());
        let output = runner().run_checked(&spec).await.unwrap();
        assert_eq!(output.stdout, "CREATE TABLE t ();");
    }

    #[tokio::test]
    async fn test_runner_applies_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("sh")
            .args(["-c", "pwd; echo $FLEET_MARKER"])
            .current_dir(dir.path())
            .env("FLEET_MARKER", "present");
        let output = runner().run_checked(&spec).await.unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(output.stdout.contains(canonical.to_str().unwrap()));
        assert!(output.stdout.contains("present"));
    }

    #[tokio::test]
    async fn test_runner_times_out() {
        let runner = TokioCommandRunner::new(Duration::from_millis(200));
        let spec = CommandSpec::new("sleep").arg("5");
        let err = runner.run(&spec).await.unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_runner_spawn_failure() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-fleet");
        let err = runner().run(&spec).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[test]
    fn test_path_prefix_comes_first() {
        let runner = runner().with_path_prefix("/opt/tools/bin");
        let path = runner.search_path().unwrap();
        let first = std::env::split_paths(&path).next().unwrap();
        assert_eq!(first, PathBuf::from("/opt/tools/bin"));
    }
}
