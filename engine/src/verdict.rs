//! Verdict classifier
//!
//! Maps dissector findings to accept/reject plus a penalty weight, and folds
//! per-frame penalties into the run score.
//!
//! # Severity taxonomy
//!
//! | raw value    | label   | penalty |
//! |--------------|---------|---------|
//! | `0x00000000` | None    | 0       |
//! | `0x00200000` | Chat    | 0       |
//! | `0x00400000` | Note    | 0       |
//! | `0x00600000` | Warning | 10      |
//! | `0x00800000` | Error   | 100     |
//!
//! Only Error rejects. The run score is the maximum contribution over all
//! frames, where a negative-test frame contributes `100 - penalty`.

use crate::corpus::is_negative_id;
use crate::dissector::DissectionResult;
use serde::{Deserialize, Serialize};

/// Dissector diagnostic severity, ordered from harmless to rejecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Chat,
    Note,
    Warning,
    Error,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::None,
        Severity::Chat,
        Severity::Note,
        Severity::Warning,
        Severity::Error,
    ];

    /// Raw dissector value
    pub fn raw(self) -> u32 {
        match self {
            Self::None => 0x0000_0000,
            Self::Chat => 0x0020_0000,
            Self::Note => 0x0040_0000,
            Self::Warning => 0x0060_0000,
            Self::Error => 0x0080_0000,
        }
    }

    /// Exact taxonomy lookup
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.raw() == raw)
    }

    /// Lookup that floors values between taxonomy levels to the level below
    pub fn from_raw_floor(raw: u32) -> Self {
        Self::ALL
            .into_iter()
            .rev()
            .find(|s| raw >= s.raw())
            .unwrap_or(Self::None)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Chat => "Chat",
            Self::Note => "Note",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }

    /// Score penalty of a frame at this severity
    pub fn penalty(self) -> u8 {
        match self {
            Self::None | Self::Chat | Self::Note => 0,
            Self::Warning => 10,
            Self::Error => 100,
        }
    }

    pub fn rejects(self) -> bool {
        self >= Self::Error
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Accept/reject decision for a single frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verdict {
    Accepted { severity: Severity, message: String },
    Rejected { severity: Severity, reason: String },
}

impl Verdict {
    pub fn accepted(severity: Severity, message: impl Into<String>) -> Self {
        Self::Accepted {
            severity,
            message: message.into(),
        }
    }

    pub fn rejected(severity: Severity, reason: impl Into<String>) -> Self {
        Self::Rejected {
            severity,
            reason: reason.into(),
        }
    }

    /// Classify a dissection: absent protocol is Error, otherwise only an
    /// Error severity rejects
    pub fn classify(result: &DissectionResult) -> Self {
        let severity = if result.present {
            result.severity
        } else {
            Severity::Error
        };
        if severity.rejects() {
            Self::rejected(severity, result.message.clone())
        } else {
            Self::accepted(severity, result.message.clone())
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Accepted { severity, .. } | Self::Rejected { severity, .. } => *severity,
        }
    }

    /// Diagnostic text (empty for a clean accept)
    pub fn message(&self) -> &str {
        match self {
            Self::Accepted { message, .. } => message,
            Self::Rejected { reason, .. } => reason,
        }
    }
}

/// A verdict bound to the frame it was computed for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameVerdict {
    /// Frame identity (source dump id, or positional index)
    pub frame: String,
    pub verdict: Verdict,
}

impl FrameVerdict {
    pub fn new(frame: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            frame: frame.into(),
            verdict,
        }
    }

    pub fn from_dissection(result: &DissectionResult) -> Self {
        Self::new(result.frame.clone(), Verdict::classify(result))
    }

    pub fn accepted(&self) -> bool {
        self.verdict.is_accepted()
    }

    pub fn severity(&self) -> Severity {
        self.verdict.severity()
    }

    pub fn message(&self) -> &str {
        self.verdict.message()
    }

    /// Penalty of this frame's severity
    pub fn weight(&self) -> u8 {
        self.severity().penalty()
    }

    /// Score contribution: the penalty, inverted for negative-test frames
    pub fn score_contribution(&self, negative_marker: &str) -> u8 {
        score_contribution(&self.frame, self.weight(), negative_marker)
    }
}

/// `weight` for an ordinary frame, `100 - weight` for a negative-test frame
pub fn score_contribution(frame: &str, weight: u8, negative_marker: &str) -> u8 {
    let weight = weight.min(100);
    if is_negative_id(frame, negative_marker) {
        100 - weight
    } else {
        weight
    }
}

/// Run score: the worst contribution over all frames, 0 for an empty run
pub fn aggregate_score(verdicts: &[FrameVerdict], negative_marker: &str) -> u8 {
    verdicts
        .iter()
        .map(|v| v.score_contribution(negative_marker))
        .max()
        .unwrap_or(0)
}
