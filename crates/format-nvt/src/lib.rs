//! The `NVMV` memory trace format.
//!
//! First line: `NVMV<version>`. Each data line is one request:
//!
//! ```text
//! <cycle> <op> 0x<hex-address> <data-hex> <oldData-hex> <threadId>
//! ```
//!
//! `op` is `R` or `W`; the data fields are two lower-hex characters per
//! byte in address order (128 characters for a 64-byte word). Version 0
//! omits `<oldData-hex>`; the reader zero-fills old data for those traces.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use sim_core::{Cycle, DataBlock, OpType};

/// Version emitted by [`TraceWriter`].
pub const TRACE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("could not open trace file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("trace i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {message}")]
    Malformed { line: u64, message: String },
}

/// One parsed trace line.
#[derive(Debug, Clone, Default)]
pub struct TraceLine {
    pub cycle: Cycle,
    pub is_write: bool,
    pub address: u64,
    pub data: DataBlock,
    pub old_data: DataBlock,
    pub thread_id: u64,
}

impl TraceLine {
    #[must_use]
    pub fn op(&self) -> OpType {
        if self.is_write {
            OpType::Write
        } else {
            OpType::Read
        }
    }
}

/// Streaming reader for `NVMV` traces.
pub struct TraceReader {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    version: u32,
    line_number: u64,
}

impl TraceReader {
    /// Open a trace and consume the version header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path).map_err(|source| TraceError::Unreadable {
            path: path.clone(),
            source,
        })?;
        let mut lines = BufReader::new(file).lines();

        let mut version = 0;
        let mut line_number = 0;
        if let Some(first) = lines.next() {
            let first = first?;
            line_number += 1;
            if let Some(rest) = first.strip_prefix("NVMV") {
                version = rest.trim().parse().map_err(|_| TraceError::Malformed {
                    line: line_number,
                    message: format!("bad version header `{first}`"),
                })?;
            } else {
                // Headerless traces are treated as version 0; the stray
                // first line is consumed, as the original reader did.
                warn!(path = %path.display(), "trace has no NVMV header, assuming version 0");
            }
        }

        Ok(Self {
            path,
            lines,
            version,
            line_number,
        })
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next request, or `None` at end of trace.
    pub fn next_access(&mut self) -> Result<Option<TraceLine>, TraceError> {
        loop {
            let Some(line) = self.lines.next() else {
                info!(path = %self.path.display(), "reached end of trace");
                return Ok(None);
            };
            let line = line?;
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            return self.parse_line(&line).map(Some);
        }
    }

    fn malformed(&self, message: impl Into<String>) -> TraceError {
        TraceError::Malformed {
            line: self.line_number,
            message: message.into(),
        }
    }

    fn parse_line(&self, line: &str) -> Result<TraceLine, TraceError> {
        let mut fields = line.split_whitespace();

        let cycle = fields
            .next()
            .ok_or_else(|| self.malformed("missing cycle"))?
            .parse()
            .map_err(|_| self.malformed("bad cycle"))?;

        let is_write = match fields.next() {
            Some("R") => false,
            Some("W") => true,
            Some(other) => return Err(self.malformed(format!("unknown operation `{other}`"))),
            None => return Err(self.malformed("missing operation")),
        };

        let address_text = fields
            .next()
            .ok_or_else(|| self.malformed("missing address"))?;
        let address = u64::from_str_radix(address_text.trim_start_matches("0x"), 16)
            .map_err(|_| self.malformed(format!("bad address `{address_text}`")))?;

        let data_text = fields.next().ok_or_else(|| self.malformed("missing data"))?;
        let data = DataBlock::parse_hex(data_text)
            .map_err(|message| self.malformed(message))?;

        let (old_data, thread_id) = if self.version == 0 {
            // Version 0: the fourth field is the thread id and there is no
            // old data.
            let thread_id = fields
                .next()
                .unwrap_or("0")
                .parse()
                .map_err(|_| self.malformed("bad thread id"))?;
            (DataBlock::new(data.len()), thread_id)
        } else {
            let old_text = fields
                .next()
                .ok_or_else(|| self.malformed("missing old data"))?;
            let old_data = DataBlock::parse_hex(old_text)
                .map_err(|message| self.malformed(message))?;
            let thread_id = fields
                .next()
                .unwrap_or("0")
                .parse()
                .map_err(|_| self.malformed("bad thread id"))?;
            (old_data, thread_id)
        };

        Ok(TraceLine {
            cycle,
            is_write,
            address,
            data,
            old_data,
            thread_id,
        })
    }
}

/// Streaming writer for `NVMV` traces.
pub struct TraceWriter {
    out: Option<BufWriter<File>>,
    path: PathBuf,
    /// Echo every line through the log as well.
    echo: bool,
}

impl TraceWriter {
    /// Create the trace file and emit the version header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref().to_owned();
        let file = File::create(&path).map_err(|source| TraceError::Unreadable {
            path: path.clone(),
            source,
        })?;
        let mut out = BufWriter::new(file);
        writeln!(out, "NVMV{TRACE_VERSION}")?;
        Ok(Self {
            out: Some(out),
            path,
            echo: false,
        })
    }

    /// Writer that only echoes to the log (no file).
    #[must_use]
    pub fn echo_only() -> Self {
        Self {
            out: None,
            path: PathBuf::new(),
            echo: true,
        }
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one request. Only reads and writes are recorded.
    pub fn record(&mut self, line: &TraceLine) -> Result<(), TraceError> {
        let text = format!(
            "{} {} {:#x} {} {} {}",
            line.cycle,
            if line.is_write { "W" } else { "R" },
            line.address,
            line.data,
            line.old_data,
            line.thread_id
        );
        if let Some(out) = &mut self.out {
            writeln!(out, "{text}")?;
        }
        if self.echo {
            info!(target: "pre_trace", "{text}");
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TraceError> {
        if let Some(out) = &mut self.out {
            out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(byte: u8) -> DataBlock {
        DataBlock::from_bytes(vec![byte; 64])
    }

    fn write_trace(lines: &[TraceLine]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("test.nvt");
        let mut writer = TraceWriter::create(&path).expect("create");
        for line in lines {
            writer.record(line).expect("record");
        }
        writer.flush().expect("flush");
        (dir, path)
    }

    #[test]
    fn round_trips_reads_and_writes() {
        let lines = vec![
            TraceLine {
                cycle: 10,
                is_write: false,
                address: 0x1f00,
                data: block(0x12),
                old_data: block(0x00),
                thread_id: 1,
            },
            TraceLine {
                cycle: 25,
                is_write: true,
                address: 0x2000,
                data: block(0xff),
                old_data: block(0x12),
                thread_id: 2,
            },
        ];
        let (_dir, path) = write_trace(&lines);

        let mut reader = TraceReader::open(&path).expect("open");
        assert_eq!(reader.version(), TRACE_VERSION);

        for expected in &lines {
            let got = reader.next_access().expect("read").expect("line");
            assert_eq!(got.cycle, expected.cycle);
            assert_eq!(got.is_write, expected.is_write);
            assert_eq!(got.address, expected.address);
            assert_eq!(got.data, expected.data);
            assert_eq!(got.old_data, expected.old_data);
            assert_eq!(got.thread_id, expected.thread_id);
        }
        assert!(reader.next_access().expect("read").is_none());
    }

    #[test]
    fn version_zero_lines_zero_fill_old_data() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("v0.nvt");
        let data_hex = "ab".repeat(64);
        std::fs::write(&path, format!("NVMV0\n42 W 0x1000 {data_hex} 3\n")).expect("write");

        let mut reader = TraceReader::open(&path).expect("open");
        assert_eq!(reader.version(), 0);
        let line = reader.next_access().expect("read").expect("line");
        assert_eq!(line.cycle, 42);
        assert!(line.is_write);
        assert_eq!(line.thread_id, 3);
        assert_eq!(line.data, block(0xab));
        assert_eq!(line.old_data, DataBlock::new(64));
    }

    #[test]
    fn word_is_128_hex_chars() {
        let (_dir, path) = write_trace(&[TraceLine {
            cycle: 1,
            is_write: true,
            address: 0x40,
            data: block(0x5a),
            old_data: block(0xa5),
            thread_id: 0,
        }]);
        let text = std::fs::read_to_string(&path).expect("read");
        let data_field = text.lines().nth(1).expect("line").split(' ').nth(3).expect("field");
        assert_eq!(data_field.len(), 128);
    }

    #[test]
    fn malformed_operation_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bad.nvt");
        std::fs::write(&path, "NVMV1\n1 X 0x0 00 00 0\n").expect("write");
        let mut reader = TraceReader::open(&path).expect("open");
        assert!(matches!(
            reader.next_access(),
            Err(TraceError::Malformed { line: 2, .. })
        ));
    }
}
