use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

const DEFAULT_LOG_FILE: &str = "/var/log/fleet-manager.log";

// --- Custom "Tee" Writer ---
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A, B> Write for Tee<A, B>
where
    A: Write,
    B: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;
    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub output: LogOutput,
    pub json: bool,
    pub file_path: PathBuf,
}

impl LogSettings {
    /// Read `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT` and `LOG_FILE_PATH`.
    pub fn from_env() -> Self {
        Self::from_values(
            env::var("LOG_LEVEL").ok(),
            env::var("LOG_OUTPUT").ok(),
            env::var("LOG_FORMAT").ok(),
            env::var("LOG_FILE_PATH").ok(),
        )
    }

    fn from_values(
        level: Option<String>,
        output: Option<String>,
        format: Option<String>,
        file_path: Option<String>,
    ) -> Self {
        let output = match output.as_deref() {
            Some("console") => LogOutput::Console,
            Some("file") => LogOutput::File,
            _ => LogOutput::Both,
        };

        Self {
            level: level.unwrap_or_else(|| "info".to_string()),
            output,
            json: format.as_deref() == Some("json"),
            file_path: PathBuf::from(file_path.unwrap_or_else(|| DEFAULT_LOG_FILE.to_string())),
        }
    }

    fn file_parts(&self) -> (&Path, &Path) {
        let dir = self
            .file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = self
            .file_path
            .file_name()
            .map(Path::new)
            .unwrap_or_else(|| Path::new("fleet-manager.log"));
        (dir, name)
    }
}

/// Initializes the global tracing subscriber based on environment variables.
///
/// The returned guard flushes the file writer on drop and must be held for the
/// lifetime of the process.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(&LogSettings::from_env())
}

pub fn init_with(settings: &LogSettings) -> Option<WorkerGuard> {
    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    for directive in ["tokio=warn", "hyper=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let subscriber = registry().with(env_filter);
    let (log_dir, log_filename) = settings.file_parts();

    match settings.output {
        LogOutput::Both => {
            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let tee_writer = MakeTee {
                make_a: std::io::stdout,
                make_b: non_blocking,
            };
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(tee_writer);
            if settings.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
            Some(guard)
        }
        LogOutput::Console => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
            if settings.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
            None
        }
        LogOutput::File => {
            let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            if settings.json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
            Some(guard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = LogSettings::from_values(None, None, None, None);
        assert_eq!(settings.level, "info");
        assert_eq!(settings.output, LogOutput::Both);
        assert!(!settings.json);
        assert_eq!(settings.file_path, PathBuf::from(DEFAULT_LOG_FILE));
    }

    #[test]
    fn test_explicit_values() {
        let settings = LogSettings::from_values(
            Some("debug".into()),
            Some("console".into()),
            Some("json".into()),
            Some("/tmp/fleet/api.log".into()),
        );
        assert_eq!(settings.output, LogOutput::Console);
        assert!(settings.json);
        let (dir, name) = settings.file_parts();
        assert_eq!(dir, Path::new("/tmp/fleet"));
        assert_eq!(name, Path::new("api.log"));
    }

    #[test]
    fn test_bare_file_name_uses_current_dir() {
        let settings = LogSettings::from_values(None, Some("file".into()), None, Some("fleet.log".into()));
        let (dir, name) = settings.file_parts();
        assert_eq!(dir, Path::new("."));
        assert_eq!(name, Path::new("fleet.log"));
    }
}
