//! Concurrent evaluation of several corpora
//!
//! ```toml
//! max_parallel = 4
//!
//! [[run]]
//! protocol = "udp"
//! input = "/corpus/udp/z3"
//! labels = "/corpus/udp/z3/z3_packet_labels.json"
//!
//! [[run]]
//! protocol = "tcp"
//! input = "/corpus/tcp/z3"
//! labels = "/corpus/tcp/z3/z3_packet_labels.json"
//! strict = true
//! checker = "/build/tcp/test.exe"
//! ```
//!
//! Each run is a blocking pipeline on its own worker thread with its own
//! scratch directory; the engine configuration is shared read-only.

use anyhow::{Context, Result};
use frame_engine::{Engine, EngineConfig, EvaluationRequest, ToolRunner, VerdictSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Exit code of a run that failed with a non-tooling engine error
pub const ERROR_EXIT_CODE: u8 = 102;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Upper bound on concurrently executing runs
    #[serde(default)]
    pub max_parallel: Option<usize>,
    #[serde(rename = "run", default)]
    pub runs: Vec<RunSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunSpec {
    pub protocol: String,
    pub input: PathBuf,
    pub labels: PathBuf,
    #[serde(default)]
    pub strict: bool,
    /// Score with a generated validator instead of the dissector
    #[serde(default)]
    pub checker: Option<PathBuf>,
}

impl RunSpec {
    fn request(&self) -> EvaluationRequest {
        EvaluationRequest {
            protocol: self.protocol.clone(),
            input_dir: self.input.clone(),
            labels: self.labels.clone(),
            strict: self.strict,
            source: match &self.checker {
                Some(path) => VerdictSource::Checker(path.clone()),
                None => VerdictSource::Dissector,
            },
        }
    }
}

impl Manifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn parallelism(&self) -> usize {
        self.max_parallel
            .filter(|n| *n > 0)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
    }
}

/// Outcome of one manifest entry
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub index: usize,
    pub protocol: String,
    pub input: PathBuf,
    pub exit_code: u8,
    pub summary: String,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {} exit={} {}",
            self.index,
            self.protocol,
            self.input.display(),
            self.exit_code,
            self.summary
        )
    }
}

fn run_one(index: usize, spec: &RunSpec, config: &EngineConfig, runner: &dyn ToolRunner) -> RunOutcome {
    let engine = Engine::new(config, runner);
    let (exit_code, summary) = match engine.evaluate(&spec.request()) {
        Ok(verdict) => {
            let summary = match &verdict {
                frame_engine::RunVerdict::Accepted { report }
                | frame_engine::RunVerdict::Rejected { report } => report.summary(),
                frame_engine::RunVerdict::ToolingError { .. } => verdict.feedback(),
            };
            (verdict.exit_code(), summary)
        }
        Err(e) => (ERROR_EXIT_CODE, e.to_string()),
    };
    RunOutcome {
        index,
        protocol: spec.protocol.clone(),
        input: spec.input.clone(),
        exit_code,
        summary,
    }
}

/// Evaluate every run, at most `max_parallel` at a time. Outcomes come back
/// in manifest order.
pub async fn run_batch(
    manifest: Manifest,
    config: Arc<EngineConfig>,
    runner: Arc<dyn ToolRunner>,
) -> Vec<RunOutcome> {
    let sem = Arc::new(Semaphore::new(manifest.parallelism()));
    let mut join_set: JoinSet<Option<RunOutcome>> = JoinSet::new();

    for (index, spec) in manifest.runs.into_iter().enumerate() {
        let sem = sem.clone();
        let config = config.clone();
        let runner = runner.clone();
        join_set.spawn(async move {
            let _permit = sem.acquire_owned().await.ok()?;
            tokio::task::spawn_blocking(move || run_one(index, &spec, &config, runner.as_ref()))
                .await
                .ok()
        });
    }

    let mut outcomes = Vec::new();
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok(Some(outcome)) => {
                info!(index = outcome.index, protocol = %outcome.protocol, exit_code = outcome.exit_code, "Run finished");
                outcomes.push(outcome);
            }
            Ok(None) | Err(_) => warn!("Batch worker did not complete"),
        }
    }
    outcomes.sort_by_key(|o| o.index);
    outcomes
}

/// Process exit code of a batch: the worst run
pub fn batch_exit_code(outcomes: &[RunOutcome], expected: usize) -> u8 {
    if outcomes.len() < expected {
        return ERROR_EXIT_CODE;
    }
    outcomes.iter().map(|o| o.exit_code).max().unwrap_or(0)
}
