//! Subprocess execution for the install pipelines.
//!
//! Commands are described by a [`CommandSpec`] and executed by a
//! [`CommandRunner`]. The default [`ProcessRunner`] spawns real processes and
//! forwards their output line by line into caller-provided sinks, tagged with
//! the pipeline that produced it.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{CostaError, CostaResult};

/// Which provisioning pipeline a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTag {
    /// Module installation (npm).
    Node,
    /// Interpreter environment setup (venv, pip).
    Python,
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Node => "NODE",
            Self::Python => "PYTHON",
        })
    }
}

/// Receiver for subprocess output.
pub trait OutputSink: Send + Sync {
    /// Handle one line (without its trailing newline).
    fn write_line(&self, tag: StreamTag, line: &str);
}

/// Sink that re-emits lines as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    error_stream: bool,
}

impl TracingSink {
    /// Sink for standard output; lines are logged at `info`.
    #[must_use]
    pub fn stdout() -> Self {
        Self { error_stream: false }
    }

    /// Sink for standard error; lines are logged at `warn`.
    #[must_use]
    pub fn stderr() -> Self {
        Self { error_stream: true }
    }
}

impl OutputSink for TracingSink {
    fn write_line(&self, tag: StreamTag, line: &str) {
        if self.error_stream {
            warn!(target: "costa::subprocess", stream = %tag, "{line}");
        } else {
            info!(target: "costa::subprocess", stream = %tag, "{line}");
        }
    }
}

/// A command to run: program, arguments, working directory and extra env.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory; inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Variables added to the inherited environment.
    pub env: Vec<(String, String)>,
    /// Tag applied to forwarded output.
    pub tag: StreamTag,
}

impl CommandSpec {
    /// A command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, tag: StreamTag) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            tag,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Space-joined command line, used in logs and errors.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Executes provisioning commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion, forwarding its output.
    ///
    /// # Errors
    ///
    /// Returns `CostaError::CommandFailed` on a non-zero exit and
    /// `CostaError::Io` if the process cannot be spawned.
    async fn run(
        &self,
        spec: &CommandSpec,
        stdout: &dyn OutputSink,
        stderr: &dyn OutputSink,
    ) -> CostaResult<()>;
}

/// Spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        stdout: &dyn OutputSink,
        stderr: &dyn OutputSink,
    ) -> CostaResult<()> {
        let command_line = spec.command_line();
        debug!(command = %command_line, "spawning subprocess");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            CostaError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to spawn `{command_line}`: {e}"),
            ))
        })?;
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        let (_, _, status) = tokio::join!(
            forward_lines(child_stdout, spec.tag, stdout),
            forward_lines(child_stderr, spec.tag, stderr),
            child.wait(),
        );
        let status = status?;

        if status.success() {
            Ok(())
        } else {
            warn!(command = %command_line, code = ?status.code(), "subprocess failed");
            Err(CostaError::CommandFailed {
                command: command_line,
                code: status.code(),
            })
        }
    }
}

async fn forward_lines<R>(reader: Option<R>, tag: StreamTag, sink: &dyn OutputSink)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => sink.write_line(tag, &line),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "stopped reading subprocess output");
                break;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<(StreamTag, String)>>);

    impl OutputSink for CollectingSink {
        fn write_line(&self, tag: StreamTag, line: &str) {
            self.0.lock().unwrap().push((tag, line.to_string()));
        }
    }

    #[test]
    fn command_line_joins_program_and_args() {
        let spec = CommandSpec::new("npm", StreamTag::Node)
            .args(["install", "demo@1.0.0"])
            .arg("--save");
        assert_eq!(spec.command_line(), "npm install demo@1.0.0 --save");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forwards_tagged_lines_from_both_streams() {
        let out = CollectingSink::default();
        let err = CollectingSink::default();
        let spec = CommandSpec::new("sh", StreamTag::Python)
            .args(["-c", "echo one; echo two; echo oops >&2"])
            .env("COSTA_TEST", "1");

        ProcessRunner.run(&spec, &out, &err).await.unwrap();

        assert_eq!(
            *out.0.lock().unwrap(),
            [
                (StreamTag::Python, "one".to_string()),
                (StreamTag::Python, "two".to_string())
            ]
        );
        assert_eq!(*err.0.lock().unwrap(), [(StreamTag::Python, "oops".to_string())]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_command_failed() {
        let sink = CollectingSink::default();
        let spec = CommandSpec::new("sh", StreamTag::Node).args(["-c", "exit 3"]);

        let err = ProcessRunner.run(&spec, &sink, &sink).await.unwrap_err();
        match err {
            CostaError::CommandFailed { command, code } => {
                assert_eq!(command, "sh -c exit 3");
                assert_eq!(code, Some(3));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let sink = CollectingSink::default();
        let spec = CommandSpec::new("/nonexistent/costa-test-binary", StreamTag::Node);
        let err = ProcessRunner.run(&spec, &sink, &sink).await.unwrap_err();
        assert!(matches!(err, CostaError::Io(_)));
    }
}
