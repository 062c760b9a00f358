//! Frame Engine
//!
//! Scores a generated protocol specification against a labelled corpus of
//! single-layer dumps:
//! - Load raw layer dumps from a directory (one file per message)
//! - Wrap each dump in the outer layers a dissector needs to find it
//! - Serialize every frame with text2pcap, tag it with its source file name
//!   and merge all frames into one capture
//! - Dissect the capture with tshark and classify each frame by the severity
//!   of its expert diagnostics
//! - Compare verdicts with ground-truth labels and turn the first (or every)
//!   mismatch into feedback for the next specification revision
//!
//! # Usage
//!
//! ```no_run
//! use frame_engine::{Engine, EngineConfig, EvaluationRequest, SystemToolRunner, VerdictSource};
//!
//! let config = EngineConfig::load(None)?;
//! let engine = Engine::new(&config, &SystemToolRunner);
//! let verdict = engine.evaluate(&EvaluationRequest {
//!     protocol: "udp".to_string(),
//!     input_dir: "/corpus/udp/z3".into(),
//!     labels: "/corpus/udp/z3/z3_packet_labels.json".into(),
//!     strict: false,
//!     source: VerdictSource::Dissector,
//! })?;
//! println!("{}", verdict.feedback());
//! # Ok::<(), frame_engine::EngineError>(())
//! ```

pub mod assembly;
pub mod capture;
pub mod checker;
pub mod config;
pub mod corpus;
pub mod coverage;
pub mod dissector;
pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod toolchain;
pub mod verdict;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use pipeline::{
    AssemblyReport, Engine, EvaluationRequest, RunVerdict, ValidateOptions, ValidationReport,
    VerdictSource, TOOLING_EXIT_CODE,
};
pub use reconcile::{CoverageReport, Mismatch, ReconcileMode, SUCCESS_MARKER};
pub use toolchain::{SystemToolRunner, ToolInvocation, ToolOutput, ToolRunner};
pub use verdict::{FrameVerdict, Severity, Verdict};
