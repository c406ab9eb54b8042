//! Line-oriented key/value configuration and its strongly-typed view.
//!
//! Format: one `Key Value` per line, `;` starts a comment, blank lines are
//! skipped. `AddHook <name>` may repeat. `CONFIG_CHANNELn <path>` names a
//! per-channel overlay, resolved relative to the parent file when the path
//! is not absolute.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("missing required key `{0}`")]
    MissingKey(&'static str),
    #[error("key `{key}` has invalid value `{value}`")]
    InvalidValue { key: String, value: String },
    #[error("invalid address mapping scheme: {0}")]
    InvalidMapping(String),
    #[error("unknown module name `{0}`")]
    UnknownModule(String),
}

/// Raw configuration: a flat map plus the ordered hook list.
#[derive(Debug, Clone, Default)]
pub struct Config {
    file_name: PathBuf,
    values: BTreeMap<String, String>,
    hooks: Vec<String>,
    /// Keys already warned about, so defaults are reported once.
    warned: RefCell<BTreeSet<String>>,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a configuration file into a fresh config.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::new();
        config.read_into(path)?;
        Ok(config)
    }

    /// Read a configuration file over the current values; later keys win.
    pub fn read_into(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_owned(),
            source,
        })?;
        self.file_name = path.to_owned();

        for line in text.lines() {
            let line = match line.find(';') {
                Some(at) => &line[..at],
                None => line,
            };
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else { continue };
            let value = parts.next().unwrap_or_else(|| {
                warn!(key, "config: missing value for key");
                ""
            });

            if key == "AddHook" {
                self.hooks.push(value.to_owned());
            } else {
                self.values.insert(key.to_owned(), value.to_owned());
            }
        }

        Ok(())
    }

    /// File this config was read from.
    #[must_use]
    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    /// Resolve a referenced path against this config file's directory.
    #[must_use]
    pub fn resolve_path(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.file_name
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(path)
        }
    }

    /// Set or override one key (command-line `KEY=value`).
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }

    #[must_use]
    pub fn key_exists(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Ordered `AddHook` names.
    #[must_use]
    pub fn hooks(&self) -> &[String] {
        &self.hooks
    }

    fn warn_default<T: Display>(&self, key: &str, default: &T) {
        if self.warned.borrow_mut().insert(key.to_owned()) {
            warn!(key, %default, "config: key not set, using default");
        }
    }

    /// Typed getter with a warn-once default.
    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Display,
    {
        match self.values.get(key) {
            None => {
                self.warn_default(key, &default);
                Ok(default)
            }
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_owned(),
                value: raw.clone(),
            }),
        }
    }

    /// Typed getter for a required key.
    pub fn get_required<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr,
    {
        let raw = self
            .values
            .get(key)
            .ok_or(ConfigError::MissingKey(key))?;
        raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_owned(),
            value: raw.clone(),
        })
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.values.get(key) {
            None => {
                self.warn_default(key, &default);
                Ok(default)
            }
            Some(raw) => match raw.as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_owned(),
                    value: raw.clone(),
                }),
            },
        }
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            None => {
                self.warn_default(key, &default.to_owned());
                default.to_owned()
            }
            Some(raw) => raw.clone(),
        }
    }
}

/// Command-queue discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueModel {
    PerRank,
    #[default]
    PerBank,
    PerSubArray,
}

impl FromStr for QueueModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PerRank" => Ok(Self::PerRank),
            "PerBank" => Ok(Self::PerBank),
            "PerSubArray" => Ok(Self::PerSubArray),
            other => Err(format!("unknown queue model `{other}`")),
        }
    }
}

impl Display for QueueModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PerRank => "PerRank",
            Self::PerBank => "PerBank",
            Self::PerSubArray => "PerSubArray",
        };
        f.write_str(name)
    }
}

/// Which standby powerdown state idle ranks enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerDownMode {
    #[default]
    FastExit,
    SlowExit,
}

impl FromStr for PowerDownMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FASTEXIT" => Ok(Self::FastExit),
            "SLOWEXIT" => Ok(Self::SlowExit),
            other => Err(format!("unknown power-down mode `{other}`")),
        }
    }
}

impl Display for PowerDownMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::FastExit => "FASTEXIT",
            Self::SlowExit => "SLOWEXIT",
        })
    }
}

/// The strongly-typed view of a configuration.
///
/// Geometry keys are required; everything else falls back to defaults with
/// a one-time warning so sparse config files stay usable.
#[derive(Debug, Clone)]
pub struct Params {
    // Geometry.
    pub channels: u64,
    pub ranks: u64,
    pub banks: u64,
    pub rows: u64,
    pub cols: u64,
    /// Rows per subarray MAT; subarrays per bank = rows / mat_height.
    pub mat_height: u64,

    // Transfer.
    pub bus_width: u64,
    /// Burst duration in memory cycles.
    pub t_burst: u64,
    /// Data rate (2 for DDR).
    pub rate: u64,

    // Frequencies in MHz.
    pub cpu_freq: f64,
    pub clk: f64,

    // Timing, in memory cycles.
    pub t_rcd: u64,
    pub t_cas: u64,
    pub t_ras: u64,
    pub t_rp: u64,
    pub t_rtp: u64,
    pub t_wr: u64,
    pub t_cwd: u64,
    pub t_rc: u64,
    pub t_refi: u64,
    pub t_rtrs: u64,
    pub t_rfc: u64,
    /// NVM cell write-pulse duration.
    pub t_wp: u64,
    /// Powerdown entry.
    pub t_pd: u64,
    /// Fast powerdown exit.
    pub t_xp: u64,
    /// Slow powerdown exit.
    pub t_xpdll: u64,

    /// Cell levels; writes program in this many iterations.
    pub mlc_levels: u64,
    /// Columns muxed to the sense amps at once.
    pub rb_size: u64,

    pub address_mapping_scheme: String,
    pub mem_ctl: String,
    pub interconnect: String,
    pub decoder: String,

    pub queue_model: QueueModel,
    /// 0 = fixed from queue 0, 1 = rank-first round robin, 2 = bank-first.
    pub schedule_scheme: u64,
    /// 0 = open page, 1 = relaxed close, 2 = restricted close.
    pub close_page: u64,

    pub use_precharge: bool,
    pub use_refresh: bool,
    pub use_low_power: bool,
    pub write_pausing: bool,

    pub banks_per_refresh: u64,
    pub delayed_refresh_threshold: u64,
    pub refresh_rows: u64,

    pub power_down_mode: PowerDownMode,
    /// Start with every rank powered down.
    pub init_pd: bool,

    pub deadlock_timer: u64,
    pub queue_size: u64,
    pub starvation_threshold: u64,

    pub stats_file: Option<String>,
    pub endurance_model: String,
    /// Initial write-life of every endurance granule.
    pub max_writes: u64,
    pub data_encoder: String,
    /// Abort on a write to a worn-out granule instead of logging.
    pub endurance_fatal: bool,
    /// FlipNWrite partition size in bits.
    pub flip_n_write_granularity: u64,

    pub ignore_data: bool,
    pub ignore_trace_cycle: bool,
    pub print_pre_trace: bool,
    pub echo_pre_trace: bool,
    pub pre_trace_file: String,
}

impl Params {
    /// Subarrays per bank.
    #[must_use]
    pub fn subarray_count(&self) -> u64 {
        if self.mat_height == 0 {
            1
        } else {
            (self.rows / self.mat_height).max(1)
        }
    }

    /// Rows per subarray.
    #[must_use]
    pub fn subarray_rows(&self) -> u64 {
        self.mat_height.max(1)
    }

    /// Memory word size in bytes: bus width × burst cycles × rate / 8.
    #[must_use]
    pub fn word_size(&self) -> u64 {
        (self.bus_width * self.t_burst * self.rate) / 8
    }

    /// Burst length in beats, for the translator.
    #[must_use]
    pub fn burst_length(&self) -> u64 {
        self.t_burst * self.rate
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let rows: u64 = config.get_required("ROWS")?;
        let mat_height = config.get_or("MATHeight", rows)?;
        let banks: u64 = config.get_required("BANKS")?;
        let cols: u64 = config.get_required("COLS")?;

        let queue_model = match config.get_str("QueueModel") {
            None => QueueModel::default(),
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "QueueModel".to_owned(),
                value: raw.to_owned(),
            })?,
        };
        let power_down_mode = match config.get_str("PowerDownMode") {
            None => PowerDownMode::default(),
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PowerDownMode".to_owned(),
                value: raw.to_owned(),
            })?,
        };

        Ok(Self {
            channels: config.get_required("CHANNELS")?,
            ranks: config.get_required("RANKS")?,
            banks,
            rows,
            cols,
            mat_height,
            bus_width: config.get_or("BusWidth", 64)?,
            t_burst: config.get_or("tBURST", 4)?,
            rate: config.get_or("RATE", 2)?,
            cpu_freq: config.get_or("CPUFreq", 2000.0)?,
            clk: config.get_or("CLK", 666.0)?,
            t_rcd: config.get_or("tRCD", 9)?,
            t_cas: config.get_or("tCAS", 10)?,
            t_ras: config.get_or("tRAS", 24)?,
            t_rp: config.get_or("tRP", 9)?,
            t_rtp: config.get_or("tRTP", 5)?,
            t_wr: config.get_or("tWR", 10)?,
            t_cwd: config.get_or("tCWD", 7)?,
            t_rc: config.get_or("tRC", 33)?,
            t_refi: config.get_or("tREFI", 5200)?,
            t_rtrs: config.get_or("tRTRS", 1)?,
            t_rfc: config.get_or("tRFC", 107)?,
            t_wp: config.get_or("tWP", 0)?,
            t_pd: config.get_or("tPD", 5)?,
            t_xp: config.get_or("tXP", 5)?,
            t_xpdll: config.get_or("tXPDLL", 17)?,
            mlc_levels: config.get_or("MLCLevels", 1)?,
            rb_size: config.get_or("RBSize", cols)?,
            address_mapping_scheme: config.get_string_or("AddressMappingScheme", "R:RK:BK:CH:C:SA"),
            mem_ctl: config.get_string_or("MEM_CTL", "FRFCFS"),
            interconnect: config.get_string_or("INTERCONNECT", "OffChipBus"),
            decoder: config.get_string_or("Decoder", "Default"),
            queue_model,
            schedule_scheme: config.get_or("ScheduleScheme", 2)?,
            close_page: config.get_or("ClosePage", 0)?,
            use_precharge: config.get_bool_or("UsePrecharge", true)?,
            use_refresh: config.get_bool_or("UseRefresh", false)?,
            use_low_power: config.get_bool_or("UseLowPower", false)?,
            write_pausing: config.get_bool_or("WritePausing", false)?,
            banks_per_refresh: config.get_or("BanksPerRefresh", banks)?,
            delayed_refresh_threshold: config.get_or("DelayedRefreshThreshold", 1)?,
            refresh_rows: config.get_or("RefreshRows", 4)?,
            power_down_mode,
            init_pd: config.get_bool_or("InitPD", false)?,
            deadlock_timer: config.get_or("DeadlockTimer", 10_000)?,
            queue_size: config.get_or("MaxQueue", 32)?,
            starvation_threshold: config.get_or("StarvationThreshold", 4)?,
            stats_file: config.get_str("StatsFile").map(str::to_owned),
            endurance_model: config.get_string_or("EnduranceModel", "none"),
            max_writes: config.get_or("MaxWrites", 100_000_000)?,
            data_encoder: config.get_string_or("DataEncoder", "none"),
            endurance_fatal: config.get_bool_or("EnduranceFatal", false)?,
            flip_n_write_granularity: config.get_or("FlipNWriteGranularity", 32)?,
            ignore_data: config.get_bool_or("IgnoreData", false)?,
            ignore_trace_cycle: config.get_bool_or("IgnoreTraceCycle", false)?,
            print_pre_trace: config.get_bool_or("PrintPreTrace", false)?,
            echo_pre_trace: config.get_bool_or("EchoPreTrace", false)?,
            pre_trace_file: config.get_string_or("PreTraceFile", "trace.nvt"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("test.config");
        let mut file = std::fs::File::create(&path).expect("create config");
        file.write_all(text.as_bytes()).expect("write config");
        (dir, path)
    }

    const MINIMAL: &str = "\
; geometry
CHANNELS 1
RANKS 2
BANKS 8
ROWS 1024 ; inline comment
COLS 256

AddHook RequestTracer
AddHook RequestTracer
UseRefresh true
";

    #[test]
    fn parses_comments_hooks_and_values() {
        let (_dir, path) = write_config(MINIMAL);
        let config = Config::read(&path).expect("read");
        assert_eq!(config.get_str("ROWS"), Some("1024"));
        assert!(!config.key_exists("; geometry"));
        assert_eq!(config.hooks(), ["RequestTracer", "RequestTracer"]);

        let params = Params::from_config(&config).expect("params");
        assert_eq!(params.ranks, 2);
        assert!(params.use_refresh);
        // Defaults with warning.
        assert_eq!(params.queue_size, 32);
        assert_eq!(params.subarray_count(), 1);
    }

    #[test]
    fn missing_geometry_key_is_terminal() {
        let (_dir, path) = write_config("CHANNELS 1\nRANKS 1\nBANKS 8\nROWS 512\n");
        let config = Config::read(&path).expect("read");
        match Params::from_config(&config) {
            Err(ConfigError::MissingKey(key)) => assert_eq!(key, "COLS"),
            other => panic!("expected MissingKey, got {other:?}"),
        }
    }

    #[test]
    fn overrides_replace_file_values() {
        let (_dir, path) = write_config(MINIMAL);
        let mut config = Config::read(&path).expect("read");
        config.set("RANKS", "4");
        let params = Params::from_config(&config).expect("params");
        assert_eq!(params.ranks, 4);
    }

    #[test]
    fn mat_height_divides_rows_into_subarrays() {
        let (_dir, path) = write_config(MINIMAL);
        let mut config = Config::read(&path).expect("read");
        config.set("MATHeight", "256");
        let params = Params::from_config(&config).expect("params");
        assert_eq!(params.subarray_count(), 4);
        assert_eq!(params.subarray_rows(), 256);
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let (_dir, path) = write_config(MINIMAL);
        let config = Config::read(&path).expect("read");
        let resolved = config.resolve_path("channel1.config");
        assert_eq!(
            resolved.parent(),
            path.parent(),
            "must resolve next to the parent config"
        );
        assert!(config.resolve_path("/abs/path.config").is_absolute());
    }

    #[test]
    fn word_size_matches_jedec_defaults() {
        let (_dir, path) = write_config(MINIMAL);
        let mut config = Config::read(&path).expect("read");
        config.set("BusWidth", "64");
        config.set("tBURST", "4");
        config.set("RATE", "2");
        let params = Params::from_config(&config).expect("params");
        assert_eq!(params.word_size(), 64);
        assert_eq!(params.burst_length(), 8);
    }
}
