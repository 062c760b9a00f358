//! Frame assembly: per-protocol encapsulation of single-layer dumps

pub mod assembler;
pub mod encapsulation;

pub use assembler::{AssembledFrame, FrameAssembler};
pub use encapsulation::{known_protocols, rule_for, Encapsulation, EncapsulationError, ExportRule};
