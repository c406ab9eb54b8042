//! The top-level memory system: one controller per channel.
//!
//! Routes by the channel field of its translator, carries the aggregate
//! request counters, and optionally mirrors every accepted transaction
//! into a pre-trace for later replay.

use std::rc::Rc;

use serde_json::json;
use tracing::warn;

use format_nvt::{TraceLine, TraceWriter};
use sim_core::{
    mlog2, AddressTranslator, Completion, Config, ConfigError, Cycle, EventQueue, FailReason,
    Module, ModulePath, OpType, Params, Request, RequestId, RequestPool, SimContext, StatSink,
    TranslationField, TranslationMethod,
};

use crate::controller::MemoryController;

/// The memory system behind one host-facing port.
pub struct MemorySystem {
    name: String,
    params: Rc<Params>,
    translator: AddressTranslator,
    controllers: Vec<MemoryController>,
    pre_tracer: Option<TraceWriter>,

    total_read_requests: u64,
    total_write_requests: u64,
}

impl MemorySystem {
    /// Build the full tree from a configuration, applying per-channel
    /// overlays (`CONFIG_CHANNELn`).
    pub fn new(
        config: &Config,
        queue: &mut EventQueue,
        pool: &mut RequestPool,
    ) -> Result<Self, ConfigError> {
        let params = Rc::new(Params::from_config(config)?);

        let mut method = TranslationMethod::new();
        let rows = params.subarray_rows();
        let subarrays = params.subarray_count();
        method.set_bit_widths(
            mlog2(rows),
            mlog2(params.cols),
            mlog2(params.banks),
            mlog2(params.ranks),
            mlog2(params.channels),
            mlog2(subarrays),
        );
        method.set_count(
            rows,
            params.cols,
            params.banks,
            params.ranks,
            params.channels,
            subarrays,
        );
        method.set_address_mapping_scheme(&params.address_mapping_scheme)?;
        let mut translator = AddressTranslator::new(method);
        translator.set_bus_width(params.bus_width);
        translator.set_burst_length(params.burst_length());
        translator.set_default_field(Some(TranslationField::Channel));

        let mut controllers = Vec::with_capacity(params.channels as usize);
        for channel in 0..params.channels as usize {
            // Channels may carry their own overlay config.
            let overlay_key = format!("CONFIG_CHANNEL{channel}");
            let channel_params = match config.get_str(&overlay_key) {
                None | Some("") => Rc::clone(&params),
                Some(path) => {
                    let mut channel_config = config.clone();
                    channel_config.read_into(config.resolve_path(path))?;
                    Rc::new(Params::from_config(&channel_config)?)
                }
            };
            controllers.push(MemoryController::new(channel, channel_params, queue, pool)?);
        }

        let pre_tracer = if params.print_pre_trace {
            let path = config.resolve_path(&params.pre_trace_file);
            let mut writer = TraceWriter::create(&path).map_err(|source| {
                warn!(error = %source, "could not open pre-trace file");
                ConfigError::InvalidValue {
                    key: "PreTraceFile".to_owned(),
                    value: params.pre_trace_file.clone(),
                }
            })?;
            writer.set_echo(params.echo_pre_trace);
            Some(writer)
        } else if params.echo_pre_trace {
            Some(TraceWriter::echo_only())
        } else {
            None
        };

        Ok(Self {
            name: "defaultMemory".to_owned(),
            params,
            translator,
            controllers,
            pre_tracer,
            total_read_requests: 0,
            total_write_requests: 0,
        })
    }

    #[must_use]
    pub fn params(&self) -> &Rc<Params> {
        &self.params
    }

    #[must_use]
    pub fn translator(&self) -> &AddressTranslator {
        &self.translator
    }

    #[must_use]
    pub fn controller(&self, index: usize) -> Option<&MemoryController> {
        self.controllers.get(index)
    }

    pub fn controller_mut(&mut self, index: usize) -> Option<&mut MemoryController> {
        self.controllers.get_mut(index)
    }

    /// Resolve a tree path to its module for event dispatch.
    pub fn resolve_mut(&mut self, path: ModulePath) -> Option<&mut dyn Module> {
        match path {
            ModulePath::Driver => None,
            ModulePath::System => Some(self),
            ModulePath::Controller(c) => self
                .controllers
                .get_mut(c)
                .map(|m| m as &mut dyn Module),
            ModulePath::Channel(c) => self
                .controllers
                .get_mut(c)
                .map(|m| m.channel_mut() as &mut dyn Module),
            ModulePath::Rank(c, r) => self
                .controllers
                .get_mut(c)
                .and_then(|m| m.channel_mut().rank_mut(r))
                .map(|m| m as &mut dyn Module),
            ModulePath::Bank(c, r, b) => self
                .controllers
                .get_mut(c)
                .and_then(|m| m.channel_mut().rank_mut(r))
                .and_then(|m| m.bank_mut(b))
                .map(|m| m as &mut dyn Module),
            ModulePath::SubArray(c, r, b, s) => self
                .controllers
                .get_mut(c)
                .and_then(|m| m.channel_mut().rank_mut(r))
                .and_then(|m| m.bank_mut(b))
                .and_then(|m| m.subarray_mut(s))
                .map(|m| m as &mut dyn Module),
        }
    }

    fn record_pre_trace(&mut self, req: &Request, now: Cycle) {
        let Some(tracer) = &mut self.pre_tracer else {
            return;
        };
        let line = TraceLine {
            cycle: now,
            is_write: req.op == OpType::Write,
            address: req.address.physical(),
            data: req.data.clone(),
            old_data: req.old_data.clone(),
            thread_id: req.thread_id,
        };
        if let Err(error) = tracer.record(&line) {
            warn!(%error, "pre-trace write failed; disabling");
            self.pre_tracer = None;
        }
    }

    /// Checkpointable state of the whole tree.
    #[must_use]
    pub fn checkpoint(&self) -> serde_json::Value {
        json!({
            "channels": self
                .controllers
                .iter()
                .map(|c| c.channel().checkpoint())
                .collect::<Vec<_>>(),
        })
    }

    pub fn restore(&mut self, state: &serde_json::Value) {
        if let Some(channels) = state.get("channels").and_then(|v| v.as_array()) {
            for (controller, state) in self.controllers.iter_mut().zip(channels) {
                controller.channel_mut().restore(state);
            }
        }
    }

    pub fn flush_pre_trace(&mut self) {
        if let Some(tracer) = &mut self.pre_tracer {
            let _ = tracer.flush();
        }
    }
}

impl Module for MemorySystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> ModulePath {
        ModulePath::System
    }

    fn is_issuable(&self, req: &Request, now: Cycle) -> Result<(), FailReason> {
        let channel = self.translator.translate(req.address.physical()).channel as usize;
        self.controllers
            .get(channel)
            .ok_or(FailReason::Unsupported)?
            .is_issuable(req, now)
    }

    fn next_issuable(&self, req: &Request, now: Cycle) -> Cycle {
        let channel = self.translator.translate(req.address.physical()).channel as usize;
        self.controllers
            .get(channel)
            .map_or(now, |c| c.next_issuable(req, now))
    }

    fn issue_command(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> bool {
        let now = ctx.now();
        let (channel, op) = {
            let req = ctx.pool.get_mut(id);
            let indices = self.translator.translate(req.address.physical());
            req.address.set_translated(indices);
            (indices.channel as usize, req.op)
        };

        let Some(controller) = self.controllers.get_mut(channel) else {
            return false;
        };
        let accepted = controller.issue_command(id, ctx);

        if accepted {
            match op {
                OpType::Read => self.total_read_requests += 1,
                OpType::Write => self.total_write_requests += 1,
                _ => {}
            }
            let req = ctx.pool.get(id).clone();
            self.record_pre_trace(&req, now);
        }
        accepted
    }

    fn request_complete(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> Completion {
        if ctx.pool.get(id).owner == ModulePath::System {
            ctx.pool.remove(id);
            Completion::Owned
        } else {
            Completion::Forward
        }
    }

    fn cycle(&mut self, steps: Cycle, ctx: &mut SimContext<'_>) {
        for controller in &mut self.controllers {
            controller.cycle(steps, ctx);
        }
    }

    fn register_stats(&self, sink: &mut StatSink) {
        sink.counter("total_read_requests", self.total_read_requests);
        sink.counter("total_write_requests", self.total_write_requests);
        for (index, controller) in self.controllers.iter().enumerate() {
            sink.push_prefix(&format!("channel{index}"));
            sink.push_prefix(controller.name());
            controller.register_stats(sink);
            sink.pop_prefix();
            sink.pop_prefix();
        }
    }
}
