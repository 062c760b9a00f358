//! Engine configuration
//!
//! Built once per process and passed by reference into every run.

use crate::error::EngineResult;
use crate::reconcile::ReconcileMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Program names (or absolute paths) of the external toolchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub text2pcap: String,
    pub editcap: String,
    pub mergecap: String,
    pub tshark: String,
    pub gcov: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            text2pcap: "text2pcap".to_string(),
            editcap: "editcap".to_string(),
            mergecap: "mergecap".to_string(),
            tshark: "tshark".to_string(),
            gcov: "gcov".to_string(),
        }
    }
}

/// Dissector line-coverage collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Collect gcov coverage of the target dissector during validation
    pub enabled: bool,
    /// Directory holding `packet-<dissector>.c`, `.c.o` and `.c.gcno`
    pub dissector_source_dir: PathBuf,
    /// Leading path components gcov strips from the instrumented build paths
    pub validate_prefix_strip: u32,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dissector_source_dir: PathBuf::from("/usr/include/wireshark/epan/dissectors"),
            validate_prefix_strip: 7,
        }
    }
}

/// Configuration shared by all runs of one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// External toolchain
    pub tools: ToolPaths,
    /// Parent directory for run-scoped scratch directories
    pub scratch_root: PathBuf,
    /// File extension of raw layer dumps (without the dot)
    pub dump_extension: String,
    /// Substring marking a dump as a deliberately malformed input
    pub negative_marker: String,
    /// Dissector preference overrides (`name:value`), checksum checks off
    pub dissector_prefs: Vec<String>,
    /// Stop at the first mismatch or collect them all
    pub reconcile_mode: ReconcileMode,
    /// Dissector coverage collection
    pub coverage: CoverageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            scratch_root: std::env::temp_dir(),
            dump_extension: "dat".to_string(),
            negative_marker: "NEG".to_string(),
            dissector_prefs: vec![
                "dccp.check_checksum:FALSE".to_string(),
                "udp.check_checksum:FALSE".to_string(),
                "udp.ignore_ipv6_zero_checksum:FALSE".to_string(),
            ],
            reconcile_mode: ReconcileMode::FailFast,
            coverage: CoverageConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a TOML configuration file; unspecified keys keep their defaults
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a TOML configuration document
    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Defaults, then the optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("FRAMEBENCH_TSHARK") {
            self.tools.tshark = v;
        }
        if let Ok(v) = std::env::var("FRAMEBENCH_TEXT2PCAP") {
            self.tools.text2pcap = v;
        }
        if let Ok(v) = std::env::var("FRAMEBENCH_EDITCAP") {
            self.tools.editcap = v;
        }
        if let Ok(v) = std::env::var("FRAMEBENCH_MERGECAP") {
            self.tools.mergecap = v;
        }
        if let Ok(v) = std::env::var("FRAMEBENCH_GCOV") {
            self.tools.gcov = v;
        }
        if let Ok(dir) = std::env::var("FRAMEBENCH_SCRATCH_ROOT") {
            self.scratch_root = PathBuf::from(dir);
        }
        if let Ok(marker) = std::env::var("FRAMEBENCH_NEGATIVE_MARKER") {
            if !marker.is_empty() {
                self.negative_marker = marker;
            }
        }
        if let Ok(val) = std::env::var("FRAMEBENCH_COVERAGE") {
            self.coverage.enabled = val.to_lowercase() == "true" || val == "1";
        }
    }
}
