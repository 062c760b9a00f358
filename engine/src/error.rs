//! Engine error types
//!
//! Fatal conditions of a run. Per-dump encapsulation failures and verdict
//! mismatches are not errors: the first degrades to a raw-bytes frame, the
//! second is the feedback the run exists to produce.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that abort a run
#[derive(Error, Debug)]
pub enum EngineError {
    /// An external assembly, merge, dissection or coverage step failed
    #[error("{tool} failed (exit status {}): {stderr}", status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()))]
    Tooling {
        tool: String,
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// A frame has no entry in the ground-truth label store
    #[error("no ground truth for frame {frame}")]
    MissingGroundTruth { frame: String },

    /// Frame count or annotation invariant broken after merge
    #[error("Structural invariant violated: {message}")]
    StructuralInvariant { message: String },

    /// Output capture path is not absolute
    #[error("Output capture path must be absolute: {}", path.display())]
    RelativeOutputPath { path: PathBuf },

    /// Layer dump directory is missing, unreadable or empty
    #[error("Invalid layer store at {}: {message}", path.display())]
    InvalidLayerStore { path: PathBuf, message: String },

    /// Ground-truth label file could not be interpreted
    #[error("Invalid label store: {message}")]
    InvalidLabels { message: String },

    /// Capture file could not be parsed
    #[error("Malformed capture: {message}")]
    MalformedCapture { message: String },

    /// Dissector produced output that does not match its JSON contract
    #[error("Unexpected dissector output: {message}")]
    DissectorOutput { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    /// Create a tooling error from a finished or unlaunchable process
    pub fn tooling(
        tool: impl Into<String>,
        command: impl Into<String>,
        status: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Tooling {
            tool: tool.into(),
            command: command.into(),
            status,
            stderr: stderr.into(),
        }
    }

    /// Create a missing ground truth error
    pub fn missing_ground_truth(frame: impl Into<String>) -> Self {
        Self::MissingGroundTruth {
            frame: frame.into(),
        }
    }

    /// Create a structural invariant error
    pub fn structural(message: impl Into<String>) -> Self {
        Self::StructuralInvariant {
            message: message.into(),
        }
    }

    /// Create an invalid layer store error
    pub fn invalid_layer_store(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidLayerStore {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid labels error
    pub fn invalid_labels(message: impl Into<String>) -> Self {
        Self::InvalidLabels {
            message: message.into(),
        }
    }

    /// Create a malformed capture error
    pub fn malformed_capture(message: impl Into<String>) -> Self {
        Self::MalformedCapture {
            message: message.into(),
        }
    }

    /// Create a dissector output error
    pub fn dissector_output(message: impl Into<String>) -> Self {
        Self::DissectorOutput {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error came from an external tool
    pub fn is_tooling(&self) -> bool {
        matches!(self, Self::Tooling { .. })
    }

    /// Short machine-readable code for logs and reports
    pub fn code(&self) -> &'static str {
        match self {
            Self::Tooling { .. } => "TOOLING_FAILED",
            Self::MissingGroundTruth { .. } => "MISSING_GROUND_TRUTH",
            Self::StructuralInvariant { .. } => "STRUCTURAL_INVARIANT",
            Self::RelativeOutputPath { .. } => "RELATIVE_OUTPUT_PATH",
            Self::InvalidLayerStore { .. } => "INVALID_LAYER_STORE",
            Self::InvalidLabels { .. } => "INVALID_LABELS",
            Self::MalformedCapture { .. } => "MALFORMED_CAPTURE",
            Self::DissectorOutput { .. } => "DISSECTOR_OUTPUT",
            Self::Config { .. } => "CONFIG",
            Self::Io(_) => "IO",
            Self::Json(_) => "JSON",
            Self::Toml(_) => "TOML",
        }
    }
}
