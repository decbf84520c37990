use super::Result;

use clap::error::ErrorKind;
use clap::Parser;
use eyre::eyre;
use std::time::Duration;

use crate::harness::{HarnessConfig, TERMINATE_ITERATIONS};

/// Conformance harness for vector-signal delivery across a negotiated map
#[derive(Debug, Parser)]
#[command(name = "sigvec-harness")]
#[command(about = "Verifies delivery of vector signal updates across a negotiated map")]
#[command(version)]
pub struct Cli {
    /// Fast mode: shrink the destination poll budget to 1 ms
    #[arg(short = 'f', long)]
    pub fast: bool,

    /// Quiet: suppress verbose logs, show a compact progress line
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Terminate automatically after a fixed number of iterations
    #[arg(short = 't', long)]
    pub terminate: bool,

    /// Destination poll budget per iteration (ms); overridden by --fast
    #[arg(long, default_value = "100")]
    pub period_ms: u64,

    /// Bound the wait for device readiness (seconds); unbounded when absent
    #[arg(long)]
    pub ready_timeout_secs: Option<u64>,
}

/// Exit status for an argument-parse outcome that stops the run before it
/// starts. Printing usage is not a passing run, so help exits 1; version
/// display and malformed arguments keep clap's conventional statuses.
fn parse_error_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp => 1,
        ErrorKind::DisplayVersion => 0,
        _ => 2,
    }
}

/// Parses the command line, exiting directly when parsing does not yield a
/// runnable configuration (help, version, or a usage error).
pub fn parse_args() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(parse_error_exit_code(&err));
        }
    }
}

/// Runtime configuration derived from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    /// Suppress verbose logs and show the compact progress line
    pub quiet: bool,
    /// Settings consumed by the harness phases
    pub harness: HarnessConfig,
}

impl Config {
    /// Parse command line arguments into configuration
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.period_ms == 0 {
            return Err(eyre!("--period-ms must be nonzero"));
        }
        let period = if cli.fast {
            Duration::from_millis(1)
        } else {
            Duration::from_millis(cli.period_ms)
        };

        Ok(Config {
            quiet: cli.quiet,
            harness: HarnessConfig {
                period,
                iterations: cli.terminate.then_some(TERMINATE_ITERATIONS),
                ready_timeout: cli.ready_timeout_secs.map(Duration::from_secs),
                progress_line: cli.quiet,
                ..Default::default()
            },
        })
    }
}
