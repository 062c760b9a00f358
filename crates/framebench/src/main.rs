//! framebench: assemble, validate and score layer-dump corpora
//!
//! # Usage
//!
//! ```bash
//! # Merge every .dat dump of a corpus into one annotated capture
//! framebench assemble --protocol udp --input ./z3 --output /tmp/udp.pcapng
//!
//! # Dissect a capture; exit code is the 0-100 severity score
//! framebench validate --protocol udp --capture /tmp/udp.pcapng --strict
//!
//! # Score a corpus against its labels
//! framebench evaluate --protocol udp --input ./z3 --labels ./z3/z3_packet_labels.json
//!
//! # Several corpora at once
//! framebench batch --manifest runs.toml
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`; results go to stdout.

mod batch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use frame_engine::{
    Engine, EngineConfig, EngineError, EvaluationRequest, ReconcileMode, SystemToolRunner,
    ValidateOptions, VerdictSource, TOOLING_EXIT_CODE,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (FRAMEBENCH_* variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Report every label mismatch instead of stopping at the first
    #[arg(long, global = true, default_value_t = false)]
    collect_all: bool,

    /// Print reports as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build one frame per dump and merge them into a single capture
    Assemble {
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        input: PathBuf,
        /// Absolute path of the merged capture
        #[arg(long)]
        output: PathBuf,
    },
    /// Dissect a capture and classify each frame
    Validate {
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        capture: PathBuf,
        /// Reject frames carrying any malformation marker
        #[arg(long, default_value_t = false)]
        strict: bool,
        /// Log the layer tree of rejected frames
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
    /// Compare verdicts for a corpus with its ground-truth labels
    Evaluate {
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        labels: PathBuf,
        #[arg(long, default_value_t = false)]
        strict: bool,
        /// Generated validator to run per dump instead of the dissector
        #[arg(long)]
        checker: Option<PathBuf>,
    },
    /// Write the dissector's verdicts for a corpus as its labels
    Label {
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        labels_out: PathBuf,
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Evaluate every run of a manifest concurrently
    Batch {
        #[arg(long)]
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            let tooling = e
                .downcast_ref::<EngineError>()
                .is_some_and(EngineError::is_tooling);
            ExitCode::from(if tooling {
                TOOLING_EXIT_CODE
            } else {
                batch::ERROR_EXIT_CODE
            })
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: Args) -> Result<u8> {
    let mut config = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if args.collect_all {
        config.reconcile_mode = ReconcileMode::CollectAll;
    }
    info!(
        tshark = %config.tools.tshark,
        scratch = %config.scratch_root.display(),
        mode = %config.reconcile_mode,
        "framebench starting"
    );

    let runner = SystemToolRunner;
    match args.command {
        Command::Assemble {
            protocol,
            input,
            output,
        } => {
            let report = Engine::new(&config, &runner).assemble(&input, &protocol, &output)?;
            if args.json {
                print_json(&report)?;
            } else {
                println!(
                    "{} frames ({} degenerate) -> {}",
                    report.frames,
                    report.degenerate,
                    report.capture.path.display()
                );
            }
            Ok(0)
        }
        Command::Validate {
            protocol,
            capture,
            strict,
            debug,
        } => {
            let report = Engine::new(&config, &runner).validate(
                &capture,
                &protocol,
                ValidateOptions { strict, debug },
            )?;
            if args.json {
                print_json(&report)?;
            } else {
                for v in &report.verdicts {
                    println!(
                        "input: {}, proto: {}, valid: {}, severity: {}, message: {}",
                        v.frame,
                        protocol,
                        v.accepted(),
                        v.severity(),
                        v.message()
                    );
                }
                if let Some(cov) = &report.coverage {
                    println!("coverage: {} {:.2}% of {} lines", cov.source_file, cov.percent, cov.lines);
                }
                println!("score: {}", report.score);
            }
            Ok(report.exit_code())
        }
        Command::Evaluate {
            protocol,
            input,
            labels,
            strict,
            checker,
        } => {
            let request = EvaluationRequest {
                protocol,
                input_dir: input,
                labels,
                strict,
                source: checker.map_or(VerdictSource::Dissector, VerdictSource::Checker),
            };
            let verdict = Engine::new(&config, &runner).evaluate(&request)?;
            if args.json {
                print_json(&verdict)?;
            } else {
                println!("{}", verdict.feedback());
            }
            Ok(verdict.exit_code())
        }
        Command::Label {
            protocol,
            input,
            labels_out,
            strict,
        } => {
            let truth = Engine::new(&config, &runner).label(&input, &protocol, strict, &labels_out)?;
            println!("{} labels -> {}", truth.len(), labels_out.display());
            Ok(0)
        }
        Command::Batch { manifest } => {
            let manifest = batch::Manifest::from_file(&manifest)?;
            let expected = manifest.runs.len();
            let outcomes = batch::run_batch(manifest, Arc::new(config), Arc::new(runner)).await;
            if args.json {
                print_json(&outcomes)?;
            } else {
                for outcome in &outcomes {
                    println!("{outcome}");
                }
            }
            Ok(batch::batch_exit_code(&outcomes, expected))
        }
    }
}
