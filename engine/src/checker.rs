//! Per-dump external checker
//!
//! A compiled validator takes one dump path and prints `ACCEPTED` when the
//! bytes satisfy its specification. Any other output, including a nonzero
//! exit, is a rejection whose diagnostic is the combined output. A checker
//! killed by a signal is a tooling failure.

use crate::corpus::LayerDump;
use crate::error::{EngineError, EngineResult};
use crate::toolchain::{ToolInvocation, ToolRunner};
use crate::verdict::{FrameVerdict, Severity, Verdict};
use std::path::{Path, PathBuf};

const ACCEPTED_TOKEN: &str = "ACCEPTED";

pub struct CheckerInvoker<'a> {
    runner: &'a dyn ToolRunner,
    executable: PathBuf,
}

impl<'a> CheckerInvoker<'a> {
    pub fn new(runner: &'a dyn ToolRunner, executable: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn check(&self, dump: &LayerDump) -> EngineResult<FrameVerdict> {
        let invocation = ToolInvocation::new(self.executable.display().to_string()).path_arg(dump.path());
        tracing::debug!(command = %invocation.command_line(), "Running checker");
        let output = self.runner.run(&invocation)?;

        if output.status.is_none() {
            return Err(EngineError::tooling(
                invocation.tool_name(),
                invocation.command_line(),
                None,
                output.stderr,
            ));
        }

        let stdout = output.stdout_lossy();
        let verdict = if stdout.contains(ACCEPTED_TOKEN) {
            Verdict::accepted(Severity::None, "")
        } else {
            let combined = [stdout.trim(), output.stderr.trim()]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join("\n");
            Verdict::rejected(Severity::Error, combined)
        };

        tracing::info!(
            input = %dump.id(),
            valid = verdict.is_accepted(),
            status = ?output.status,
            "Checker verdict"
        );
        Ok(FrameVerdict::new(dump.id(), verdict))
    }

    /// Check every dump in order, stopping at the first tooling failure
    pub fn check_all(&self, dumps: &[LayerDump]) -> EngineResult<Vec<FrameVerdict>> {
        dumps.iter().map(|d| self.check(d)).collect()
    }
}
