//! Test corpus: raw layer dumps and their ground-truth labels

pub mod labels;
pub mod loader;

pub use labels::{GroundTruth, GroundTruthLabel};
pub use loader::{corpus_digest, is_negative_id, load_layer_dumps, LayerDump};
