//! External tool invocation
//!
//! Every external program (text2pcap, editcap, mergecap, tshark, gcov, a
//! generated checker) is run through [`ToolRunner`]. Calls are blocking; the
//! caller owns timeouts and retries.

use crate::error::{EngineError, EngineResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A single external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Program name or path
    pub program: String,
    /// Arguments, passed without a shell
    pub args: Vec<String>,
    /// Bytes written to the child's stdin
    pub stdin: Option<Vec<u8>>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
}

impl ToolInvocation {
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

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Shell-like rendering for logs and error reports
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(quote(&self.program));
        parts.extend(self.args.iter().map(|a| quote(a)));
        parts.join(" ")
    }

    /// Short tool name (file name of the program)
    pub fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.clone())
    }
}

fn quote(part: &str) -> String {
    shlex::try_quote(part)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| part.to_string())
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when terminated by a signal
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

/// Runs external programs. Implemented by [`SystemToolRunner`]; tests provide
/// scripted runners.
pub trait ToolRunner: Send + Sync {
    /// Run to completion. Returns `Err` only when the process could not be
    /// launched; a nonzero exit is reported through [`ToolOutput::status`].
    fn run(&self, invocation: &ToolInvocation) -> EngineResult<ToolOutput>;
}

/// Runs programs with `std::process::Command`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> EngineResult<ToolOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }

        let launch_error = |e: std::io::Error| {
            EngineError::tooling(
                invocation.tool_name(),
                invocation.command_line(),
                None,
                format!("Failed to execute: {e}"),
            )
        };

        let mut child = cmd.spawn().map_err(launch_error)?;
        if let Some(bytes) = &invocation.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // Dropping the handle closes the pipe so the child sees EOF.
                stdin.write_all(bytes).map_err(launch_error)?;
            }
        }
        let output = child.wait_with_output().map_err(launch_error)?;

        Ok(ToolOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run an invocation and turn any nonzero exit into [`EngineError::Tooling`]
pub fn run_checked(
    runner: &dyn ToolRunner,
    invocation: &ToolInvocation,
) -> EngineResult<ToolOutput> {
    tracing::debug!(command = %invocation.command_line(), "Running external tool");
    let output = runner.run(invocation)?;
    if !output.success() {
        tracing::warn!(
            tool = %invocation.tool_name(),
            status = ?output.status,
            "External tool failed"
        );
        return Err(EngineError::tooling(
            invocation.tool_name(),
            invocation.command_line(),
            output.status,
            output.stderr,
        ));
    }
    Ok(output)
}
