//! AVDTP signaling conformance peer.
//!
//! Runs catalog scenarios against the reference subject. Built with the
//! `cli` feature.
//!
//! # Usage
//!
//! Run every scenario:
//! ```bash
//! avdtp-spec-peer
//! ```
//!
//! Run one scenario:
//! ```bash
//! avdtp-spec-peer --case /TP/SIG/SMG/BV-10-C
//! ```
//!
//! List scenarios:
//! ```bash
//! avdtp-spec-peer --list --format json
//! ```
//!
//! # Exit Codes
//!
//! - 0: All scenarios passed
//! - 1: At least one scenario failed
//! - 2: Usage or internal error

use std::time::Duration;

use avdtp_spec_peer::{Outcome, Registry, RunConfig};
use avdtp_spec_subject::Subject;
use clap::{Parser, ValueEnum};
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "avdtp-spec-peer")]
#[command(about = "AVDTP signaling conformance peer")]
struct Args {
    /// Run a single scenario (e.g., "/TP/SIG/SMG/BV-06-C")
    #[arg(long)]
    case: Option<String>,

    /// List available scenarios
    #[arg(long)]
    list: bool,

    /// Run deadline per scenario in milliseconds (0 waits forever)
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// JSON output for a scenario listing.
#[derive(Serialize)]
struct ScenarioJson {
    name: &'static str,
    procedure: &'static str,
    frames: usize,
}

/// JSON output for a scenario result.
#[derive(Serialize)]
struct TestResultJson<'a> {
    test: &'a str,
    passed: bool,
    error: Option<&'a str>,
}

fn main() {
    // Logs go to stderr without timestamps; stdout carries results.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let args = Args::parse();
    let registry = Registry::new();

    if args.list {
        list_scenarios(&registry, args.format);
        return;
    }

    let config = if args.timeout_ms == 0 {
        RunConfig::default()
    } else {
        RunConfig::with_deadline(Duration::from_millis(args.timeout_ms))
    };

    if let Some(case) = &args.case
        && registry.find(case).is_none()
    {
        eprintln!("unknown scenario: {}", case);
        eprintln!("Run `avdtp-spec-peer --list` to see available scenarios");
        std::process::exit(2);
    }

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create runtime: {}", e);
            std::process::exit(2);
        }
    };

    let outcomes = rt.block_on(async {
        match &args.case {
            Some(case) => vec![Outcome {
                name: registry.find(case).map(|s| s.name).unwrap_or_default(),
                result: registry.run_one::<Subject>(case, &config).await,
            }],
            None => registry.run_all::<Subject>(&config).await,
        }
    });

    report(&outcomes, args.format);

    let passed = outcomes.iter().all(|o| o.result.passed);
    std::process::exit(if passed { 0 } else { 1 });
}

fn list_scenarios(registry: &Registry, format: Format) {
    match format {
        Format::Json => {
            let output: Vec<ScenarioJson> = registry
                .list()
                .iter()
                .map(|s| ScenarioJson {
                    name: s.name,
                    procedure: s.procedure.name(),
                    frames: s.frames.len(),
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string(&output).expect("JSON serialization failed")
            );
        }
        Format::Text => {
            println!("Available scenarios:\n");
            for scenario in registry.list() {
                println!(
                    "  {:<22} {:<18} {} frames",
                    scenario.name,
                    scenario.procedure.name(),
                    scenario.frames.len()
                );
            }
            println!("\nTotal: {} scenarios", registry.list().len());
        }
    }
}

fn report(outcomes: &[Outcome], format: Format) {
    match format {
        Format::Json => {
            for outcome in outcomes {
                let output = TestResultJson {
                    test: outcome.name,
                    passed: outcome.result.passed,
                    error: outcome.result.error.as_deref(),
                };
                println!(
                    "{}",
                    serde_json::to_string(&output).expect("JSON serialization failed")
                );
            }
        }
        Format::Text => {
            for outcome in outcomes {
                if outcome.result.passed {
                    println!("{} {}", "PASS".green(), outcome.name);
                } else {
                    println!("{} {}", "FAIL".red(), outcome.name);
                    if let Some(error) = &outcome.result.error {
                        println!("  {}", error);
                    }
                    print!("{}", outcome.result.trace.format_hex_dump());
                }
            }

            let failed = outcomes.iter().filter(|o| !o.result.passed).count();
            println!(
                "\n{} passed, {} failed",
                outcomes.len() - failed,
                failed
            );
        }
    }
}
