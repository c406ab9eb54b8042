//! Command-line trace driver.
//!
//! ```text
//! trace-runner <config-file> <trace-file> <cycles> [KEY=value ...]
//! ```
//!
//! `<cycles>` is measured in input (CPU) cycles and scaled to memory
//! cycles by `CPUFreq / CLK`; 0 runs to the end of the trace. Overrides
//! apply after the config file is read. Exits 0 on normal completion, 1 on
//! configuration or simulation error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use trace_runner::{parse_override, run_trace, RunOptions};

#[derive(Parser)]
#[command(name = "trace-runner")]
#[command(about = "Cycle-accurate trace simulation of a main-memory subsystem")]
struct Cli {
    /// Configuration file (Key Value lines).
    config: PathBuf,

    /// Trace file (NVMV format).
    trace: PathBuf,

    /// Input cycles to simulate; 0 runs the whole trace.
    cycles: u64,

    /// Configuration overrides, e.g. `RANKS=2 UseRefresh=true`.
    #[arg(value_parser = parse_override)]
    overrides: Vec<(String, String)>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Echo the invocation so stats files are self-describing.
    let command_line: Vec<String> = std::env::args().collect();
    eprintln!("command line: {}", command_line.join(" "));

    let options = RunOptions {
        config: cli.config,
        trace: cli.trace,
        cycles: cli.cycles,
        overrides: cli.overrides,
    };

    match run_trace(&options) {
        Ok(summary) => {
            eprintln!(
                "simulated {} memory cycles: {} issued, {} completed",
                summary.memory_cycles, summary.issued_requests, summary.completed_requests
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
