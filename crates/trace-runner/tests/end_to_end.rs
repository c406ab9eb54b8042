//! Whole-stack runs: config file + trace file in, statistics out.

use std::path::{Path, PathBuf};

use trace_runner::run_paths;

const CONFIG: &str = "\
; single-channel test memory
CHANNELS 1
RANKS 1
BANKS 2
ROWS 1024
COLS 256
BusWidth 64
tBURST 4
RATE 2
CPUFreq 1000
CLK 1000
tRCD 5
tCAS 6
tRAS 20
tRP 5
tRTP 3
tWR 6
tCWD 4
tRC 25
tRTRS 1
tRFC 50
tREFI 100
UseRefresh false
MEM_CTL FRFCFS
";

fn hex(byte: u8) -> String {
    format!("{byte:02x}").repeat(64)
}

fn write_files(dir: &Path, config_extra: &str, lines: &[String]) -> (PathBuf, PathBuf) {
    let config = dir.join("memory.config");
    std::fs::write(&config, format!("{CONFIG}{config_extra}")).expect("write config");

    let trace = dir.join("run.nvt");
    let mut text = String::from("NVMV1\n");
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    std::fs::write(&trace, text).expect("write trace");
    (config, trace)
}

fn trace_lines() -> Vec<String> {
    vec![
        format!("0 W 0x1000 {} {} 0", hex(0xaa), hex(0x00)),
        format!("10 R 0x1000 {} {} 0", hex(0x00), hex(0x00)),
        format!("20 R 0x4000 {} {} 1", hex(0x00), hex(0x00)),
    ]
}

#[test]
fn replays_a_trace_to_completion() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (config, trace) = write_files(dir.path(), "", &trace_lines());

    let summary = run_paths(&config, &trace, 0, &[]).expect("run");
    assert_eq!(summary.issued_requests, 3);
    assert_eq!(summary.completed_requests, 3);
    assert!(summary.memory_cycles > 0);
}

#[test]
fn stats_file_receives_interval_lines() {
    let dir = tempfile::tempdir().expect("temp dir");
    let stats = dir.path().join("out.stats");
    let extra = format!("StatsFile {}\n", stats.display());
    let (config, trace) = write_files(dir.path(), &extra, &trace_lines());

    run_paths(&config, &trace, 0, &[]).expect("run");

    let text = std::fs::read_to_string(&stats).expect("stats file");
    assert!(text.contains("i0.defaultMemory.simulation_cycles"), "{text}");
    assert!(
        text.contains("i0.defaultMemory.channel0.FRFCFS.mem_reads 2"),
        "{text}"
    );
    assert!(
        text.contains("i0.defaultMemory.channel0.FRFCFS.mem_writes 1"),
        "{text}"
    );
}

#[test]
fn overrides_apply_after_the_config_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (config, trace) = write_files(dir.path(), "", &trace_lines());

    // Shrink the queue through an override; the run must still finish.
    let summary = run_paths(&config, &trace, 0, &[("MaxQueue", "1")]).expect("run");
    assert_eq!(summary.completed_requests, 3);
}

#[test]
fn cycle_budget_cuts_the_run_short() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (config, trace) = write_files(dir.path(), "", &trace_lines());

    // One input cycle: only the cycle-0 write fits the budget.
    let summary = run_paths(&config, &trace, 1, &[]).expect("run");
    assert_eq!(summary.issued_requests, 1);
}

#[test]
fn pre_trace_replay_reproduces_the_request_mix() {
    let dir = tempfile::tempdir().expect("temp dir");
    let pre = dir.path().join("pre.nvt");
    let extra = format!("PrintPreTrace true\nPreTraceFile {}\n", pre.display());
    let (config, trace) = write_files(dir.path(), &extra, &trace_lines());

    let first = run_paths(&config, &trace, 0, &[]).expect("first run");

    // Replay the emitted pre-trace under the same geometry.
    let (config_b, _) = write_files(dir.path(), "", &[]);
    let second = run_paths(&config_b, &pre, 0, &[]).expect("replay");

    assert_eq!(first.issued_requests, second.issued_requests);
    assert_eq!(first.completed_requests, second.completed_requests);
}

#[test]
fn missing_required_key_is_a_configuration_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = dir.path().join("broken.config");
    std::fs::write(&config, "CHANNELS 1\nRANKS 1\n").expect("write config");
    let trace = dir.path().join("run.nvt");
    std::fs::write(&trace, "NVMV1\n").expect("write trace");

    assert!(run_paths(&config, &trace, 0, &[]).is_err());
}

#[test]
fn checkpoint_directory_is_written_at_exit() {
    let dir = tempfile::tempdir().expect("temp dir");
    let ckpt = dir.path().join("ckpt");
    let extra = format!(
        "DataEncoder FlipNWrite\nCheckpointDirectory {}\n",
        ckpt.display()
    );
    let (config, trace) = write_files(dir.path(), &extra, &trace_lines());

    run_paths(&config, &trace, 0, &[]).expect("run");
    assert!(ckpt.join("memory_state.json").is_file());
}
