//! The statistics registry.
//!
//! Modules contribute named values through a `StatSink` visitor at dump
//! time; the registry prefixes names with the module path, subtracts the
//! reset baseline, and prints one `i{interval}.{name} {value}{units}` line
//! per entry.

use std::collections::HashMap;
use std::io::{self, Write};

/// A statistic's value.
#[derive(Debug, Clone, PartialEq)]
pub enum StatValue {
    Counter(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

/// One named statistic collected from the tree.
#[derive(Debug, Clone)]
pub struct StatEntry {
    pub name: String,
    pub value: StatValue,
    pub units: &'static str,
}

/// Collector passed down the module tree.
#[derive(Default)]
pub struct StatSink {
    prefix: Vec<String>,
    entries: Vec<StatEntry>,
}

impl StatSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_prefix(&mut self, segment: &str) {
        self.prefix.push(segment.to_owned());
    }

    pub fn pop_prefix(&mut self) {
        self.prefix.pop();
    }

    fn qualified(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{name}", self.prefix.join("."))
        }
    }

    fn push(&mut self, name: &str, value: StatValue, units: &'static str) {
        self.entries.push(StatEntry {
            name: self.qualified(name),
            value,
            units,
        });
    }

    pub fn counter(&mut self, name: &str, value: u64) {
        self.push(name, StatValue::Counter(value), "");
    }

    pub fn counter_with_units(&mut self, name: &str, value: u64, units: &'static str) {
        self.push(name, StatValue::Counter(value), units);
    }

    pub fn signed(&mut self, name: &str, value: i64) {
        self.push(name, StatValue::Signed(value), "");
    }

    pub fn float(&mut self, name: &str, value: f64) {
        self.push(name, StatValue::Float(value), "");
    }

    pub fn float_with_units(&mut self, name: &str, value: f64, units: &'static str) {
        self.push(name, StatValue::Float(value), units);
    }

    pub fn text(&mut self, name: &str, value: &str) {
        self.push(name, StatValue::Text(value.to_owned()), "");
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<StatEntry> {
        self.entries
    }
}

/// The registry: print interval plus the reset baseline.
#[derive(Default)]
pub struct Stats {
    interval: u64,
    baseline: HashMap<String, StatValue>,
}

impl Stats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dumps printed so far.
    #[must_use]
    pub fn interval(&self) -> u64 {
        self.interval
    }

    fn adjusted(&self, entry: &StatEntry) -> StatValue {
        match (&entry.value, self.baseline.get(&entry.name)) {
            (StatValue::Counter(v), Some(StatValue::Counter(b))) => {
                StatValue::Counter(v.saturating_sub(*b))
            }
            (StatValue::Signed(v), Some(StatValue::Signed(b))) => StatValue::Signed(v - b),
            (StatValue::Float(v), Some(StatValue::Float(b))) => StatValue::Float(v - b),
            (value, _) => value.clone(),
        }
    }

    /// Print every entry as `i{interval}.{name} {value}{units}` and advance
    /// the interval.
    pub fn print_all(&mut self, out: &mut dyn Write, entries: &[StatEntry]) -> io::Result<()> {
        for entry in entries {
            let interval = self.interval;
            match self.adjusted(entry) {
                StatValue::Counter(v) => {
                    writeln!(out, "i{interval}.{} {v}{}", entry.name, entry.units)?;
                }
                StatValue::Signed(v) => {
                    writeln!(out, "i{interval}.{} {v}{}", entry.name, entry.units)?;
                }
                StatValue::Float(v) => {
                    writeln!(out, "i{interval}.{} {v}{}", entry.name, entry.units)?;
                }
                StatValue::Text(v) => {
                    writeln!(out, "i{interval}.{} {v}{}", entry.name, entry.units)?;
                }
            }
        }
        self.interval += 1;
        Ok(())
    }

    /// Make the current values the zero point for subsequent dumps.
    pub fn reset_all(&mut self, entries: &[StatEntry]) {
        for entry in entries {
            self.baseline
                .insert(entry.name.clone(), entry.value.clone());
        }
    }
}
