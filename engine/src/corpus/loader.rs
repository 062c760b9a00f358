//! Layer store loader
//!
//! Reads a directory of raw single-layer dumps. Only files with the dump
//! extension are considered, in lexicographic file-name order so frame order
//! is deterministic.

use crate::error::{EngineError, EngineResult};
use std::path::{Path, PathBuf};

/// Raw bytes of one protocol layer, identified by its file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDump {
    id: String,
    protocol: String,
    bytes: Vec<u8>,
    path: PathBuf,
}

impl LayerDump {
    pub fn new(
        id: impl Into<String>,
        protocol: impl Into<String>,
        bytes: Vec<u8>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            protocol: protocol.into().to_lowercase(),
            bytes,
            path: path.into(),
        }
    }

    /// File name of the dump (not the full path)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lowercase protocol tag
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the id carries the negative-test marker
    pub fn is_negative(&self, marker: &str) -> bool {
        is_negative_id(&self.id, marker)
    }
}

/// Negative-test detection shared by dumps, frames and verdicts
pub fn is_negative_id(id: &str, marker: &str) -> bool {
    !marker.is_empty() && id.contains(marker)
}

/// Load every `*.<extension>` file of `dir` as a dump of `protocol`.
///
/// Fails when the directory cannot be read or holds no dumps: an empty
/// corpus would produce an empty capture that nothing downstream can score.
pub fn load_layer_dumps(dir: &Path, protocol: &str, extension: &str) -> EngineResult<Vec<LayerDump>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| EngineError::invalid_layer_store(dir, e.to_string()))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let matches = Path::new(&name)
            .extension()
            .map(|ext| ext == extension)
            .unwrap_or(false);
        if matches {
            names.push(name);
        }
    }
    names.sort();

    if names.is_empty() {
        return Err(EngineError::invalid_layer_store(
            dir,
            format!("no .{extension} files found"),
        ));
    }

    let mut dumps = Vec::with_capacity(names.len());
    for name in names {
        let path = dir.join(&name);
        let bytes = std::fs::read(&path)?;
        tracing::debug!(dump = %name, len = bytes.len(), "Loaded layer dump");
        dumps.push(LayerDump::new(name, protocol, bytes, path));
    }

    tracing::info!(
        dir = %dir.display(),
        protocol = %protocol,
        count = dumps.len(),
        "Loaded layer store"
    );
    Ok(dumps)
}

/// Stable digest over the (id, bytes) pairs of a dump set
pub fn corpus_digest(dumps: &[LayerDump]) -> String {
    let mut hasher = blake3::Hasher::new();
    for dump in dumps {
        hasher.update(&(dump.id.len() as u64).to_le_bytes());
        hasher.update(dump.id.as_bytes());
        hasher.update(&(dump.bytes.len() as u64).to_le_bytes());
        hasher.update(&dump.bytes);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_loads_only_dump_files_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_2.dat"), [2u8]).unwrap();
        fs::write(dir.path().join("a_1.dat"), [1u8]).unwrap();
        fs::write(dir.path().join("labels.json"), b"{}").unwrap();
        fs::write(dir.path().join("notes.dat.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub.dat")).unwrap();

        let dumps = load_layer_dumps(dir.path(), "UDP", "dat").unwrap();
        let ids: Vec<&str> = dumps.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["a_1.dat", "b_2.dat"]);
        assert_eq!(dumps[0].bytes(), &[1u8]);
        assert_eq!(dumps[0].protocol(), "udp");
        assert_eq!(dumps[1].path(), dir.path().join("b_2.dat"));
    }

    #[test]
    fn test_empty_store_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), b"x").unwrap();
        let err = load_layer_dumps(dir.path(), "udp", "dat").unwrap_err();
        assert_eq!(err.code(), "INVALID_LAYER_STORE");
    }

    #[test]
    fn test_missing_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_layer_dumps(&dir.path().join("nope"), "udp", "dat").unwrap_err();
        assert_eq!(err.code(), "INVALID_LAYER_STORE");
    }

    #[test]
    fn test_negative_marker() {
        let dump = LayerDump::new("udp_NEG_short.dat", "udp", vec![], "/x");
        assert!(dump.is_negative("NEG"));
        assert!(!dump.is_negative("BAD"));
        assert!(!is_negative_id("anything", ""));
    }

    #[test]
    fn test_corpus_digest_is_order_and_content_sensitive() {
        let a = LayerDump::new("a.dat", "udp", vec![1, 2], "/a");
        let b = LayerDump::new("b.dat", "udp", vec![3], "/b");
        let d1 = corpus_digest(&[a.clone(), b.clone()]);
        assert_eq!(d1, corpus_digest(&[a.clone(), b.clone()]));
        assert_ne!(d1, corpus_digest(&[b.clone(), a.clone()]));
        let a2 = LayerDump::new("a.dat", "udp", vec![1, 3], "/a");
        assert_ne!(d1, corpus_digest(&[a2, b]));
    }
}
