//! Dissector line coverage
//!
//! tshark built with gcov instrumentation writes `.gcda` files under
//! `GCOV_PREFIX`. Each run points that at its own scratch directory, copies
//! the dissector's object and notes files next to the counters, and asks gcov
//! for a per-file summary.

use crate::config::EngineConfig;
use crate::dissector::dissector_protocol;
use crate::error::{EngineError, EngineResult};
use crate::toolchain::{run_checked, ToolInvocation, ToolRunner};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Object directory of the dissectors inside an instrumented build tree
const OBJECT_SUBDIR: &str = "epan/dissectors/CMakeFiles/dissectors.dir";

/// Line coverage of one dissector source file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DissectorCoverage {
    pub dissector: String,
    pub source_file: String,
    pub percent: f64,
    pub lines: u32,
}

/// Dissector source name for a protocol tag
pub fn dissector_alias(protocol: &str) -> String {
    match dissector_protocol(protocol).as_str() {
        "nbns" => "nbt".to_string(),
        other => other.to_string(),
    }
}

/// Coverage collection bound to one run's scratch directory
pub struct CoverageProbe<'a> {
    config: &'a EngineConfig,
    runner: &'a dyn ToolRunner,
    scratch: PathBuf,
}

impl<'a> CoverageProbe<'a> {
    pub fn new(config: &'a EngineConfig, runner: &'a dyn ToolRunner, scratch: impl Into<PathBuf>) -> Self {
        Self {
            config,
            runner,
            scratch: scratch.into(),
        }
    }

    /// Environment the dissector needs to write counters into the scratch dir
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("GCOV_PREFIX".to_string(), self.scratch.display().to_string()),
            (
                "GCOV_PREFIX_STRIP".to_string(),
                self.config.coverage.validate_prefix_strip.to_string(),
            ),
        ]
    }

    pub fn object_dir(&self) -> PathBuf {
        self.scratch.join(OBJECT_SUBDIR)
    }

    /// Run gcov for the dissector of `protocol`. Call after dissection.
    pub fn collect(&self, protocol: &str) -> EngineResult<DissectorCoverage> {
        let dissector = dissector_alias(protocol);
        let source_dir = &self.config.coverage.dissector_source_dir;
        let object_dir = self.object_dir();
        let source_name = format!("packet-{dissector}.c");

        std::fs::create_dir_all(&object_dir)?;
        for suffix in ["o", "gcno"] {
            let name = format!("{source_name}.{suffix}");
            copy_artifact(&source_dir.join(&name), &object_dir.join(&name))?;
        }

        let gcov = ToolInvocation::new(&self.config.tools.gcov)
            .arg("-o")
            .path_arg(&object_dir.join(format!("{source_name}.o")))
            .path_arg(&source_dir.join(&source_name))
            .arg("-f")
            .current_dir(&self.scratch);
        let output = run_checked(self.runner, &gcov)?;

        let coverage = parse_gcov_summary(&output.stdout_lossy(), &dissector).ok_or_else(|| {
            EngineError::tooling(
                gcov.tool_name(),
                gcov.command_line(),
                output.status,
                format!("no line summary for {source_name} in gcov output"),
            )
        })?;
        tracing::info!(
            dissector = %coverage.dissector,
            percent = coverage.percent,
            lines = coverage.lines,
            "Dissector coverage"
        );
        Ok(coverage)
    }
}

fn copy_artifact(from: &Path, to: &Path) -> EngineResult<()> {
    std::fs::copy(from, to).map(|_| ()).map_err(|e| {
        EngineError::tooling(
            "gcov",
            format!("copy {} {}", from.display(), to.display()),
            None,
            format!("cannot stage coverage artifact: {e}"),
        )
    })
}

/// Find the `Lines executed` line that follows `File '...packet-<d>.c'`
pub fn parse_gcov_summary(output: &str, dissector: &str) -> Option<DissectorCoverage> {
    let pattern = format!(
        r"File '([^']*packet-{}\.c)'\s*\n\s*Lines executed:\s*([0-9]+(?:\.[0-9]+)?)% of ([0-9]+)",
        regex::escape(dissector)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(output)?;
    Some(DissectorCoverage {
        dissector: dissector.to_string(),
        source_file: caps[1].to_string(),
        percent: caps[2].parse().ok()?,
        lines: caps[3].parse().ok()?,
    })
}
