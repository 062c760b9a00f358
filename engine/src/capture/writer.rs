//! Frame container writer and merger
//!
//! ```text
//! frame ─ od hex ─▶ text2pcap ─▶ editcap -a 1:<id> ─┐
//! frame ─ od hex ─▶ text2pcap ─▶ editcap -a 1:<id> ─┼─▶ mergecap -a ─▶ aggregate
//! frame ─ od hex ─▶ text2pcap ─▶ editcap -a 1:<id> ─┘
//! ```
//!
//! One text2pcap and one editcap call per frame, one mergecap call per run.
//! Any nonzero exit fails the run. The merged file is then read back and must
//! hold exactly one frame per input, each annotated with its source id, in
//! input order. Only a merge that passes those checks is copied to the
//! caller's output path.

use super::hexdump::od_hex;
use super::pcapng::read_capture;
use crate::assembly::{AssembledFrame, ExportRule};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::toolchain::{run_checked, ToolInvocation, ToolRunner};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const MERGED_UNIT: &str = "merged.pcapng";

/// The merged capture of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateCapture {
    pub path: PathBuf,
    /// Per-frame annotations in file order
    pub annotations: Vec<String>,
}

impl AggregateCapture {
    pub fn frame_count(&self) -> usize {
        self.annotations.len()
    }
}

/// Serializes frames into single-frame captures and merges them
pub struct CaptureWriter<'a> {
    config: &'a EngineConfig,
    runner: &'a dyn ToolRunner,
}

impl<'a> CaptureWriter<'a> {
    pub fn new(config: &'a EngineConfig, runner: &'a dyn ToolRunner) -> Self {
        Self { config, runner }
    }

    /// Write `frames` into `output`, using `scratch` for intermediates
    pub fn write(
        &self,
        frames: &[AssembledFrame],
        rule: &ExportRule,
        scratch: &Path,
        output: &Path,
    ) -> EngineResult<AggregateCapture> {
        if frames.is_empty() {
            return Err(EngineError::structural("no frames to write"));
        }

        let mut units = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            units.push(self.write_unit(index, frame, rule, scratch)?);
        }

        let merged = scratch.join(MERGED_UNIT);
        self.merge(&units, &merged)?;
        let mut capture = verify_merged(&merged, frames)?;
        std::fs::copy(&merged, output)?;
        capture.path = output.to_path_buf();

        tracing::info!(
            output = %output.display(),
            frames = capture.frame_count(),
            "Wrote aggregate capture"
        );
        Ok(capture)
    }

    fn write_unit(
        &self,
        index: usize,
        frame: &AssembledFrame,
        rule: &ExportRule,
        scratch: &Path,
    ) -> EngineResult<PathBuf> {
        let raw_path = scratch.join(format!("{index:06}.raw.pcap"));
        let unit_path = scratch.join(format!("{index:06}.pcapng"));

        let text2pcap = ToolInvocation::new(&self.config.tools.text2pcap)
            .arg("-q")
            .args(rule.capture_argv())
            .arg("-")
            .path_arg(&raw_path)
            .stdin(od_hex(frame.bytes()).into_bytes())
            .current_dir(scratch);
        run_checked(self.runner, &text2pcap)?;

        // editcap numbers frames from 1
        let editcap = ToolInvocation::new(&self.config.tools.editcap)
            .args(["-F", "pcapng", "-a"])
            .arg(format!("1:{}", frame.source_id()))
            .path_arg(&raw_path)
            .path_arg(&unit_path)
            .current_dir(scratch);
        run_checked(self.runner, &editcap)?;

        tracing::debug!(frame = %frame.source_id(), unit = %unit_path.display(), "Wrote frame unit");
        Ok(unit_path)
    }

    fn merge(&self, units: &[PathBuf], output: &Path) -> EngineResult<()> {
        let mut mergecap = ToolInvocation::new(&self.config.tools.mergecap)
            .args(["-a", "-F", "pcapng", "-w"])
            .path_arg(output);
        for unit in units {
            mergecap = mergecap.path_arg(unit);
        }
        run_checked(self.runner, &mergecap)?;
        Ok(())
    }
}

/// Check count, annotation presence, uniqueness and order of a merged file
pub fn verify_merged(path: &Path, frames: &[AssembledFrame]) -> EngineResult<AggregateCapture> {
    let captured = read_capture(path)?;
    if captured.len() != frames.len() {
        return Err(EngineError::structural(format!(
            "merged capture holds {} frames, expected {}",
            captured.len(),
            frames.len()
        )));
    }

    let mut seen = HashSet::with_capacity(captured.len());
    let mut annotations = Vec::with_capacity(captured.len());
    for (frame, source) in captured.iter().zip(frames) {
        let annotation = match frame.annotation.as_deref() {
            Some(a) if !a.is_empty() => a,
            _ => {
                return Err(EngineError::structural(format!(
                    "frame {} has no annotation",
                    frame.number
                )))
            }
        };
        if !seen.insert(annotation) {
            return Err(EngineError::structural(format!(
                "annotation {annotation} appears more than once"
            )));
        }
        if annotation != source.source_id() {
            return Err(EngineError::structural(format!(
                "frame {} is annotated {annotation}, expected {}",
                frame.number,
                source.source_id()
            )));
        }
        annotations.push(annotation.to_string());
    }

    Ok(AggregateCapture {
        path: path.to_path_buf(),
        annotations,
    })
}
