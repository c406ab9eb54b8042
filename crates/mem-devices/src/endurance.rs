//! Endurance models: remaining write-life per storage granule.
//!
//! A model maps an endurance key (the whole row, or row plus column) to the
//! writes the granule has left. A write against a dead granule returns the
//! negative-cycle failure sentinel; the subarray decides whether that is
//! fatal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sim_core::{ConfigError, Cycles, Params, Request, StatSink};

/// Write-life bookkeeping shared by the granularity variants.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LifeMap {
    /// Remaining writes per granule; granules not present are at full life.
    life: BTreeMap<u64, u64>,
    /// Initial life of every granule.
    max_writes: u64,
    /// Granules that have hit zero.
    dead_granules: u64,
    total_writes: u64,
}

impl LifeMap {
    fn new(max_writes: u64) -> Self {
        Self {
            max_writes,
            ..Self::default()
        }
    }

    fn is_dead(&self, key: u64) -> bool {
        self.life.get(&key).is_some_and(|&left| left == 0)
    }

    /// Decrement the granule's life. Returns false if it was already dead.
    fn decrement(&mut self, key: u64) -> bool {
        self.total_writes += 1;
        let left = self.life.entry(key).or_insert(self.max_writes);
        if *left == 0 {
            return false;
        }
        *left -= 1;
        if *left == 0 {
            self.dead_granules += 1;
        }
        true
    }

    fn register_stats(&self, sink: &mut StatSink) {
        sink.counter("total_writes", self.total_writes);
        sink.counter("dead_granules", self.dead_granules);
    }
}

/// A pluggable endurance model.
pub trait EnduranceModel {
    fn name(&self) -> &str;

    /// Read cost; negative when the granule is dead.
    fn read(&self, req: &Request) -> Cycles;

    /// Write cost; negative when the granule was already dead.
    fn write(&mut self, req: &Request) -> Cycles;

    fn register_stats(&self, sink: &mut StatSink);

    /// State that must survive a checkpoint.
    fn checkpoint(&self) -> serde_json::Value;

    fn restore(&mut self, state: &serde_json::Value);
}

/// Row-granularity endurance: the key is the row index.
#[derive(Debug)]
pub struct RowModel {
    life: LifeMap,
}

impl RowModel {
    #[must_use]
    pub fn new(max_writes: u64) -> Self {
        Self {
            life: LifeMap::new(max_writes),
        }
    }
}

impl EnduranceModel for RowModel {
    fn name(&self) -> &str {
        "RowModel"
    }

    fn read(&self, req: &Request) -> Cycles {
        if self.life.is_dead(req.address.indices().row) {
            -1
        } else {
            0
        }
    }

    fn write(&mut self, req: &Request) -> Cycles {
        if self.life.decrement(req.address.indices().row) {
            0
        } else {
            -1
        }
    }

    fn register_stats(&self, sink: &mut StatSink) {
        self.life.register_stats(sink);
    }

    fn checkpoint(&self) -> serde_json::Value {
        serde_json::to_value(&self.life).unwrap_or(serde_json::Value::Null)
    }

    fn restore(&mut self, state: &serde_json::Value) {
        if let Ok(life) = serde_json::from_value(state.clone()) {
            self.life = life;
        }
    }
}

/// Row-plus-column granularity: one granule per memory word.
#[derive(Debug)]
pub struct WordModel {
    life: LifeMap,
    cols: u64,
}

impl WordModel {
    #[must_use]
    pub fn new(max_writes: u64, cols: u64) -> Self {
        Self {
            life: LifeMap::new(max_writes),
            cols: cols.max(1),
        }
    }

    fn key(&self, req: &Request) -> u64 {
        let indices = req.address.indices();
        indices.row * self.cols + indices.col
    }
}

impl EnduranceModel for WordModel {
    fn name(&self) -> &str {
        "WordModel"
    }

    fn read(&self, req: &Request) -> Cycles {
        if self.life.is_dead(self.key(req)) {
            -1
        } else {
            0
        }
    }

    fn write(&mut self, req: &Request) -> Cycles {
        if self.life.decrement(self.key(req)) {
            0
        } else {
            -1
        }
    }

    fn register_stats(&self, sink: &mut StatSink) {
        self.life.register_stats(sink);
    }

    fn checkpoint(&self) -> serde_json::Value {
        serde_json::to_value(&self.life).unwrap_or(serde_json::Value::Null)
    }

    fn restore(&mut self, state: &serde_json::Value) {
        if let Ok(life) = serde_json::from_value(state.clone()) {
            self.life = life;
        }
    }
}

/// Build the configured endurance model, or none.
pub fn make_endurance(
    params: &Params,
) -> Result<Option<Box<dyn EnduranceModel>>, ConfigError> {
    match params.endurance_model.as_str() {
        "none" | "NullModel" => Ok(None),
        "RowModel" => Ok(Some(Box::new(RowModel::new(params.max_writes)))),
        "WordModel" => Ok(Some(Box::new(WordModel::new(
            params.max_writes,
            params.cols,
        )))),
        other => Err(ConfigError::UnknownModule(other.to_owned())),
    }
}
