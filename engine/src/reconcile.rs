//! Coverage / label reconciler
//!
//! Compares computed verdicts against the ground-truth labels, frame by frame
//! in capture order. A frame without a label aborts the run. A frame whose
//! acceptance differs from its label becomes a [`Mismatch`], which is the
//! feedback a caller feeds into its next specification revision.

use crate::corpus::{GroundTruth, LayerDump};
use crate::error::{EngineError, EngineResult};
use crate::verdict::{aggregate_score, FrameVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

/// Text reported when every frame matches its label
pub const SUCCESS_MARKER: &str = "All packets accepted";

/// How far reconciliation goes after the first mismatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Stop at the first mismatch
    #[default]
    FailFast,
    /// Report every mismatch
    CollectAll,
}

impl std::fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::CollectAll => write!(f, "collect_all"),
        }
    }
}

/// A frame whose computed acceptance differs from its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub frame: String,
    /// Raw layer bytes of the source dump (empty if the frame has no dump)
    pub raw_bytes: Vec<u8>,
    pub expected_accepted: bool,
    /// Dissector diagnostic for the frame
    pub message: String,
    /// Ground-truth hint
    pub hint: String,
}

impl Mismatch {
    /// "passes" or "fails", what the frame should have done
    pub fn expected_action(&self) -> &'static str {
        if self.expected_accepted {
            "passes"
        } else {
            "fails"
        }
    }

    /// Directed feedback for the author of the specification under test
    pub fn feedback_text(&self) -> String {
        let diagnostic = if self.message.is_empty() {
            "none"
        } else {
            self.message.as_str()
        };
        format!(
            "The specification must change so that packet {} {}. Diagnostic: {}. Packet bytes: {}. Why it {}: {}",
            self.frame,
            self.expected_action(),
            diagnostic,
            hex(&self.raw_bytes),
            self.expected_action(),
            self.hint
        )
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Outcome of reconciling one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    pub timestamp: DateTime<Utc>,
    /// Aggregate severity score, 0..=100
    pub score: u8,
    /// Frames compared before reconciliation stopped
    pub frames_checked: usize,
    pub mode: ReconcileMode,
    /// Mismatches in capture order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<Mismatch>,
}

impl CoverageReport {
    pub fn is_success(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn first_mismatch(&self) -> Option<&Mismatch> {
        self.mismatches.first()
    }

    /// The success marker, or the feedback of every mismatch
    pub fn feedback(&self) -> String {
        if self.is_success() {
            return SUCCESS_MARKER.to_string();
        }
        self.mismatches
            .iter()
            .map(Mismatch::feedback_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        if self.is_success() {
            format!("{SUCCESS_MARKER} ({} frames, score {})", self.frames_checked, self.score)
        } else {
            format!(
                "{} mismatch(es) in {} frames checked, score {}",
                self.mismatches.len(),
                self.frames_checked,
                self.score
            )
        }
    }
}

/// Reconcile `verdicts` against `truth`.
///
/// `dumps` supplies raw bytes for mismatch records. A frame missing from
/// `truth` is an error in every mode.
pub fn reconcile(
    verdicts: &[FrameVerdict],
    truth: &GroundTruth,
    dumps: &[LayerDump],
    mode: ReconcileMode,
    negative_marker: &str,
) -> EngineResult<CoverageReport> {
    let bytes_by_id: HashMap<&str, &[u8]> = dumps.iter().map(|d| (d.id(), d.bytes())).collect();

    let mut mismatches = Vec::new();
    let mut frames_checked = 0;
    for verdict in verdicts {
        let label = truth
            .get(&verdict.frame)
            .ok_or_else(|| EngineError::missing_ground_truth(verdict.frame.as_str()))?;
        frames_checked += 1;

        if label.expected_accepted == verdict.accepted() {
            tracing::debug!(frame = %verdict.frame, "Frame matches ground truth");
            continue;
        }

        tracing::info!(
            frame = %verdict.frame,
            expected = label.expected_accepted,
            severity = %verdict.severity(),
            "Verdict mismatch"
        );
        mismatches.push(Mismatch {
            frame: verdict.frame.clone(),
            raw_bytes: bytes_by_id
                .get(verdict.frame.as_str())
                .map(|b| b.to_vec())
                .unwrap_or_default(),
            expected_accepted: label.expected_accepted,
            message: verdict.message().to_string(),
            hint: label.hint.clone(),
        });
        if mode == ReconcileMode::FailFast {
            break;
        }
    }

    Ok(CoverageReport {
        timestamp: Utc::now(),
        score: aggregate_score(verdicts, negative_marker),
        frames_checked,
        mode,
        mismatches,
    })
}
