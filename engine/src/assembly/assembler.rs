//! Frame assembler
//!
//! One dump in, one frame out. A dump whose surrounding layers cannot be
//! synthesized is passed on as its raw bytes and marked degenerate, so a
//! malformed input still reaches the dissector instead of aborting the run.

use super::encapsulation::{rule_for, ExportRule};
use crate::corpus::LayerDump;
use serde::Serialize;

/// A frame ready for serialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssembledFrame {
    source_id: String,
    #[serde(skip)]
    bytes: Vec<u8>,
    degenerate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    degenerate_reason: Option<String>,
}

impl AssembledFrame {
    /// Id of the dump this frame was built from
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// True when encapsulation failed and the raw dump bytes were used
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    pub fn degenerate_reason(&self) -> Option<&str> {
        self.degenerate_reason.as_deref()
    }
}

/// Builds frames for one protocol's rule
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    rule: ExportRule,
}

impl FrameAssembler {
    pub fn new(rule: ExportRule) -> Self {
        Self { rule }
    }

    pub fn for_protocol(protocol: &str) -> Self {
        Self::new(rule_for(protocol))
    }

    pub fn rule(&self) -> &ExportRule {
        &self.rule
    }

    pub fn assemble(&self, dump: &LayerDump) -> AssembledFrame {
        match self.rule.encapsulation.apply(dump.bytes()) {
            Ok(bytes) => AssembledFrame {
                source_id: dump.id().to_string(),
                bytes,
                degenerate: false,
                degenerate_reason: None,
            },
            Err(e) => {
                tracing::warn!(
                    dump = %dump.id(),
                    protocol = %self.rule.protocol,
                    reason = %e,
                    "Encapsulation failed, using raw layer bytes"
                );
                AssembledFrame {
                    source_id: dump.id().to_string(),
                    bytes: dump.bytes().to_vec(),
                    degenerate: true,
                    degenerate_reason: Some(e.to_string()),
                }
            }
        }
    }

    /// Assemble every dump, preserving order
    pub fn assemble_all(&self, dumps: &[LayerDump]) -> Vec<AssembledFrame> {
        let frames: Vec<AssembledFrame> = dumps.iter().map(|d| self.assemble(d)).collect();
        let degenerate = frames.iter().filter(|f| f.degenerate).count();
        tracing::info!(
            protocol = %self.rule.protocol,
            frames = frames.len(),
            degenerate,
            "Assembled frames"
        );
        frames
    }
}
