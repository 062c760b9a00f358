//! Engine facade
//!
//! Wires loader, assembler, writer, dissector, classifier and reconciler into
//! the run-level operations. Each run gets its own scratch directory under
//! `scratch_root`, so concurrent runs never share intermediates.

use crate::assembly::FrameAssembler;
use crate::capture::{AggregateCapture, CaptureWriter};
use crate::checker::CheckerInvoker;
use crate::config::EngineConfig;
use crate::corpus::{corpus_digest, load_layer_dumps, GroundTruth, LayerDump};
use crate::coverage::{CoverageProbe, DissectorCoverage};
use crate::dissector::{DissectOptions, DissectionResult, DissectorInvoker};
use crate::error::{EngineError, EngineResult};
use crate::reconcile::{reconcile, CoverageReport, SUCCESS_MARKER};
use crate::toolchain::ToolRunner;
use crate::verdict::{aggregate_score, FrameVerdict};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

/// File name of the aggregate capture inside a run's scratch directory
const SCRATCH_CAPTURE: &str = "aggregate.pcapng";

/// Exit code reserved for tooling failures, above any score
pub const TOOLING_EXIT_CODE: u8 = 101;

/// Result of `assemble`
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub run_id: Uuid,
    /// Digest of the (id, bytes) pairs that went in
    pub corpus_digest: String,
    pub frames: usize,
    pub degenerate: usize,
    pub capture: AggregateCapture,
}

/// Options for `validate`
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    pub strict: bool,
    pub debug: bool,
}

/// Result of `validate`
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub run_id: Uuid,
    pub results: Vec<DissectionResult>,
    pub verdicts: Vec<FrameVerdict>,
    pub score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<DissectorCoverage>,
}

impl ValidationReport {
    /// Process exit code: the score itself
    pub fn exit_code(&self) -> u8 {
        self.score
    }
}

/// Where per-frame verdicts come from during evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictSource {
    /// Assemble, merge and dissect
    Dissector,
    /// Run a generated validator per dump
    Checker(PathBuf),
}

/// One evaluation of a corpus against its labels
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub protocol: String,
    pub input_dir: PathBuf,
    pub labels: PathBuf,
    pub strict: bool,
    pub source: VerdictSource,
}

/// Run-level outcome
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunVerdict {
    Accepted {
        report: CoverageReport,
    },
    Rejected {
        report: CoverageReport,
    },
    ToolingError {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },
}

impl RunVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// 0 when accepted, the score (at least 1) when rejected, 101 on tooling failure
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Accepted { .. } => 0,
            Self::Rejected { report } => report.score.max(1),
            Self::ToolingError { .. } => TOOLING_EXIT_CODE,
        }
    }

    /// Text for the caller driving the next specification revision
    pub fn feedback(&self) -> String {
        match self {
            Self::Accepted { .. } => SUCCESS_MARKER.to_string(),
            Self::Rejected { report } => report.feedback(),
            Self::ToolingError { tool, status, stderr } => {
                let status = status.map_or_else(|| "none".to_string(), |s| s.to_string());
                format!("{tool} failed (exit status {status}): {stderr}")
            }
        }
    }
}

pub struct Engine<'a> {
    config: &'a EngineConfig,
    runner: &'a dyn ToolRunner,
}

impl<'a> Engine<'a> {
    pub fn new(config: &'a EngineConfig, runner: &'a dyn ToolRunner) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    /// Load `input_dir`, build one frame per dump and merge them into `output`.
    /// `output` must be absolute.
    pub fn assemble(&self, input_dir: &Path, protocol: &str, output: &Path) -> EngineResult<AssemblyReport> {
        if !output.is_absolute() {
            return Err(EngineError::RelativeOutputPath {
                path: output.to_path_buf(),
            });
        }
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, protocol, input = %input_dir.display(), "Assembly run started");

        let dumps = load_layer_dumps(input_dir, protocol, &self.config.dump_extension)?;
        let scratch = self.scratch_dir(run_id)?;
        let report = self.assemble_dumps(run_id, &dumps, protocol, scratch.path(), output)?;

        tracing::info!(%run_id, frames = report.frames, degenerate = report.degenerate, "Assembly run finished");
        Ok(report)
    }

    /// Dissect `capture` and classify every frame
    pub fn validate(&self, capture: &Path, protocol: &str, options: ValidateOptions) -> EngineResult<ValidationReport> {
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, protocol, capture = %capture.display(), strict = options.strict, "Validation run started");
        let scratch = self.scratch_dir(run_id)?;
        let report = self.validate_capture(run_id, capture, protocol, options, scratch.path())?;
        tracing::info!(%run_id, frames = report.verdicts.len(), score = report.score, "Validation run finished");
        Ok(report)
    }

    /// Assemble and validate `input_dir`, then store every frame's verdict as
    /// its ground truth in `labels_out`
    pub fn label(&self, input_dir: &Path, protocol: &str, strict: bool, labels_out: &Path) -> EngineResult<GroundTruth> {
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, protocol, input = %input_dir.display(), "Labelling run started");

        let dumps = load_layer_dumps(input_dir, protocol, &self.config.dump_extension)?;
        let scratch = self.scratch_dir(run_id)?;
        let capture = scratch.path().join(SCRATCH_CAPTURE);
        self.assemble_dumps(run_id, &dumps, protocol, scratch.path(), &capture)?;
        let options = ValidateOptions { strict, debug: false };
        let report = self.validate_capture(run_id, &capture, protocol, options, scratch.path())?;

        let truth = GroundTruth::from_verdicts(&report.verdicts);
        truth.save(labels_out)?;
        Ok(truth)
    }

    /// Score a corpus against its labels. Tooling failures become
    /// [`RunVerdict::ToolingError`]; corpus and invariant errors propagate.
    pub fn evaluate(&self, request: &EvaluationRequest) -> EngineResult<RunVerdict> {
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, protocol = %request.protocol, input = %request.input_dir.display(), "Evaluation run started");

        match self.evaluate_run(run_id, request) {
            Ok(report) => {
                tracing::info!(%run_id, "{}", report.summary());
                if report.is_success() {
                    Ok(RunVerdict::Accepted { report })
                } else {
                    Ok(RunVerdict::Rejected { report })
                }
            }
            Err(EngineError::Tooling {
                tool, status, stderr, ..
            }) => {
                tracing::warn!(%run_id, tool = %tool, "Evaluation aborted by tooling failure");
                Ok(RunVerdict::ToolingError { tool, status, stderr })
            }
            Err(e) => Err(e),
        }
    }

    fn evaluate_run(&self, run_id: Uuid, request: &EvaluationRequest) -> EngineResult<CoverageReport> {
        let truth = GroundTruth::load(&request.labels)?;
        let dumps = load_layer_dumps(&request.input_dir, &request.protocol, &self.config.dump_extension)?;

        let verdicts = match &request.source {
            VerdictSource::Dissector => {
                let scratch = self.scratch_dir(run_id)?;
                let capture = scratch.path().join(SCRATCH_CAPTURE);
                self.assemble_dumps(run_id, &dumps, &request.protocol, scratch.path(), &capture)?;
                let options = ValidateOptions {
                    strict: request.strict,
                    debug: false,
                };
                self.validate_capture(run_id, &capture, &request.protocol, options, scratch.path())?
                    .verdicts
            }
            VerdictSource::Checker(executable) => CheckerInvoker::new(self.runner, executable).check_all(&dumps)?,
        };

        reconcile(
            &verdicts,
            &truth,
            &dumps,
            self.config.reconcile_mode,
            &self.config.negative_marker,
        )
    }

    fn assemble_dumps(
        &self,
        run_id: Uuid,
        dumps: &[LayerDump],
        protocol: &str,
        scratch: &Path,
        output: &Path,
    ) -> EngineResult<AssemblyReport> {
        let assembler = FrameAssembler::for_protocol(protocol);
        let frames = assembler.assemble_all(dumps);
        let capture = CaptureWriter::new(self.config, self.runner).write(&frames, assembler.rule(), scratch, output)?;
        Ok(AssemblyReport {
            run_id,
            corpus_digest: corpus_digest(dumps),
            frames: frames.len(),
            degenerate: frames.iter().filter(|f| f.is_degenerate()).count(),
            capture,
        })
    }

    fn validate_capture(
        &self,
        run_id: Uuid,
        capture: &Path,
        protocol: &str,
        options: ValidateOptions,
        scratch: &Path,
    ) -> EngineResult<ValidationReport> {
        let probe = self
            .config
            .coverage
            .enabled
            .then(|| CoverageProbe::new(self.config, self.runner, scratch));
        let dissect = DissectOptions {
            strict: options.strict,
            debug: options.debug,
            env: probe.as_ref().map(|p| p.env()).unwrap_or_default(),
        };

        let results = DissectorInvoker::new(self.config, self.runner).dissect(capture, protocol, &dissect)?;
        let verdicts: Vec<FrameVerdict> = results.iter().map(FrameVerdict::from_dissection).collect();
        let score = aggregate_score(&verdicts, &self.config.negative_marker);
        let coverage = probe.map(|p| p.collect(protocol)).transpose()?;

        Ok(ValidationReport {
            run_id,
            results,
            verdicts,
            score,
            coverage,
        })
    }

    fn scratch_dir(&self, run_id: Uuid) -> EngineResult<TempDir> {
        std::fs::create_dir_all(&self.config.scratch_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("framebench-{run_id}-"))
            .tempdir_in(&self.config.scratch_root)?;
        tracing::debug!(%run_id, scratch = %dir.path().display(), "Created run scratch directory");
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{Mismatch, ReconcileMode};
    use crate::toolchain::SystemToolRunner;
    use chrono::Utc;

    fn report(score: u8, mismatches: Vec<Mismatch>) -> CoverageReport {
        CoverageReport {
            timestamp: Utc::now(),
            score,
            frames_checked: 1,
            mode: ReconcileMode::FailFast,
            mismatches,
        }
    }

    #[test]
    fn test_relative_output_path_is_rejected_before_any_work() {
        let config = EngineConfig::default();
        let engine = Engine::new(&config, &SystemToolRunner);
        let err = engine
            .assemble(Path::new("/does/not/exist"), "udp", Path::new("out.pcapng"))
            .unwrap_err();
        assert_eq!(err.code(), "RELATIVE_OUTPUT_PATH");
    }

    #[test]
    fn test_run_verdict_exit_codes() {
        let accepted = RunVerdict::Accepted { report: report(0, vec![]) };
        assert_eq!(accepted.exit_code(), 0);
        assert_eq!(accepted.feedback(), SUCCESS_MARKER);

        let mismatch = Mismatch {
            frame: "edge_1.dat".to_string(),
            raw_bytes: vec![1],
            expected_accepted: true,
            message: "Bad length".to_string(),
            hint: "legal".to_string(),
        };
        let rejected = RunVerdict::Rejected { report: report(0, vec![mismatch]) };
        assert_eq!(rejected.exit_code(), 1);
        assert!(rejected.feedback().contains("edge_1.dat"));

        let tooling = RunVerdict::ToolingError {
            tool: "mergecap".to_string(),
            status: Some(2),
            stderr: "cannot open".to_string(),
        };
        assert_eq!(tooling.exit_code(), TOOLING_EXIT_CODE);
        assert_eq!(tooling.feedback(), "mergecap failed (exit status 2): cannot open");
    }

    #[test]
    fn test_scratch_dirs_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            scratch_root: root.path().join("runs"),
            ..EngineConfig::default()
        };
        let engine = Engine::new(&config, &SystemToolRunner);
        let a = engine.scratch_dir(Uuid::new_v4()).unwrap();
        let b = engine.scratch_dir(Uuid::new_v4()).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path().join("runs")));
    }
}
