//! Trace replay against the simulator.
//!
//! The trace cycle column is in host (CPU) cycles; the requested cycle
//! budget is scaled to memory cycles by `CPUFreq / CLK`. The driver stalls
//! on backpressure (a full transaction queue) and drains all outstanding
//! requests once the trace ends.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use format_nvt::{TraceLine, TraceReader};
use mem_control::Simulator;
use sim_core::{Address, Config, Cycle, ModulePath, Request, RequestStatus};

/// Inputs of one trace run.
pub struct RunOptions {
    pub config: PathBuf,
    pub trace: PathBuf,
    /// Simulation budget in input (CPU) cycles; 0 runs to the end of the
    /// trace.
    pub cycles: Cycle,
    /// `KEY=value` overrides applied after the config file is read.
    pub overrides: Vec<(String, String)>,
}

/// What happened during a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub issued_requests: u64,
    pub completed_requests: u64,
    pub memory_cycles: Cycle,
}

fn build_request(line: &TraceLine, ignore_data: bool) -> Request {
    let mut req = Request::new(line.op(), Address::new(line.address), ModulePath::Driver);
    req.thread_id = line.thread_id;
    req.status = RequestStatus::Incomplete;
    if !ignore_data {
        req.data = line.data.clone();
        req.old_data = line.old_data.clone();
    }
    req
}

/// Replay `opts.trace` against `opts.config` and dump statistics.
pub fn run_trace(opts: &RunOptions) -> Result<RunSummary> {
    let mut config = Config::read(&opts.config)?;
    for (key, value) in &opts.overrides {
        info!(key, value, "overriding configuration");
        config.set(key, value);
    }

    let mut sim = Simulator::new(&config)?;

    if let Some(dir) = config.get_str("RestoreCheckpoint") {
        let dir = config.resolve_path(dir);
        sim.restore_checkpoint(&dir)
            .with_context(|| format!("restoring checkpoint from {}", dir.display()))?;
    }

    let mut trace = TraceReader::open(&opts.trace)?;

    let params = sim.system().params().clone();
    let ignore_data = params.ignore_data;
    let ignore_trace_cycle = params.ignore_trace_cycle;

    // Scale the CPU-cycle budget to memory cycles.
    let simulate_cycles = if opts.cycles == 0 {
        0
    } else {
        (opts.cycles as f64 * (params.cpu_freq / params.clk)).ceil() as Cycle
    };
    info!(
        input_cycles = opts.cycles,
        memory_cycles = simulate_cycles,
        "simulating"
    );

    let mut summary = RunSummary::default();
    let mut current: Cycle = 0;
    let budget_left = |current: Cycle| simulate_cycles == 0 || current < simulate_cycles;

    loop {
        let Some(mut line) = trace.next_access()? else {
            // Trace exhausted: drain what is in flight.
            info!("end of trace, draining outstanding requests");
            while sim.outstanding() > 0 {
                sim.cycle(1)?;
                current += 1;
            }
            break;
        };

        if ignore_trace_cycle {
            line.cycle = 0;
        }

        // A request past the budget ends the run after the remaining
        // cycles execute.
        if simulate_cycles != 0 && line.cycle > simulate_cycles {
            sim.cycle(simulate_cycles.saturating_sub(current))?;
            current = simulate_cycles;
            break;
        }

        // Catch the clock up to the trace.
        if line.cycle > current {
            sim.cycle(line.cycle - current)?;
            current = sim.global_cycle();
            if !budget_left(current) {
                break;
            }
        }

        let req = build_request(&line, ignore_data);

        // Stall until the transaction queue takes the request.
        while !sim.is_issuable(&req) {
            if !budget_left(current) {
                break;
            }
            sim.cycle(1)?;
            current = sim.global_cycle();
        }
        if !budget_left(current) {
            break;
        }

        if sim.issue(req)? {
            summary.issued_requests += 1;
        }
        summary.completed_requests += sim.drain_completed().len() as u64;
    }

    summary.completed_requests += sim.drain_completed().len() as u64;
    summary.memory_cycles = sim.memory_cycle();
    sim.system_mut().flush_pre_trace();

    if let Some(dir) = config.get_str("CheckpointDirectory") {
        let dir = config.resolve_path(dir);
        sim.create_checkpoint(&dir)
            .with_context(|| format!("writing checkpoint to {}", dir.display()))?;
    }

    dump_stats(&mut sim, &config)?;
    Ok(summary)
}

fn dump_stats(sim: &mut Simulator, config: &Config) -> Result<()> {
    match config.get_str("StatsFile") {
        Some(path) if !path.is_empty() => {
            let path = config.resolve_path(path);
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening stats file {}", path.display()))?;
            sim.print_stats(&mut file)?;
            file.flush()?;
        }
        _ => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            sim.print_stats(&mut out)?;
        }
    }
    Ok(())
}

/// Parse a `KEY=value` command-line override.
pub fn parse_override(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=value, got `{arg}`")),
    }
}

/// Convenience for tests: run with overrides against paths.
pub fn run_paths(
    config: &Path,
    trace: &Path,
    cycles: Cycle,
    overrides: &[(&str, &str)],
) -> Result<RunSummary> {
    run_trace(&RunOptions {
        config: config.to_owned(),
        trace: trace.to_owned(),
        cycles,
        overrides: overrides
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect(),
    })
}
