//! The simulator: event loop, completion routing and checkpointing.
//!
//! Owns the event queue, global clock, request pool, statistics and hook
//! chains alongside the memory system, and dispatches every fired event to
//! its recipient module. Completions walk the ownership chain from the
//! response recipient toward the driver; the module whose path matches
//! `request.owner` releases the request, and completions that climb past
//! the system root are handed back to the caller.

use std::io::Write;
use std::path::Path;

use thiserror::Error;
use tracing::{error, info};

use sim_core::{
    CallbackKind, Config, ConfigError, Cycle, Event, EventKind, EventQueue, GlobalEventQueue,
    HookRegistry, CommandTracerHook, Module, ModulePath, Request, RequestId, RequestPool,
    SimContext, SimFault, StatSink, Stats, SystemId,
};

use crate::system::MemorySystem;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("fatal fault in {module}: {message}")]
    Fault { module: String, message: String },
    #[error("request completed with no owner in the tree")]
    AbandonedRequest,
    #[error("stats i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The assembled simulation.
pub struct Simulator {
    queue: EventQueue,
    global: GlobalEventQueue,
    system_id: SystemId,
    pool: RequestPool,
    stats: Stats,
    hooks: HookRegistry,
    system: MemorySystem,
    fault: Option<SimFault>,

    completed: Vec<Request>,
    outstanding: u64,
}

impl Simulator {
    /// Build the tree from a configuration and install its hooks.
    pub fn new(config: &Config) -> Result<Self, SimError> {
        let mut queue = EventQueue::new();
        let mut pool = RequestPool::new();
        let system = MemorySystem::new(config, &mut queue, &mut pool)?;

        let mut hooks = HookRegistry::new();
        for hook in config.hooks() {
            match hook.as_str() {
                "RequestTracer" => hooks.add(Box::new(CommandTracerHook::new())),
                other => tracing::warn!(hook = other, "could not create hook"),
            }
        }

        // The global clock runs at the host CPU rate; the memory system
        // ticks at CLK.
        let params = system.params();
        let mut global = GlobalEventQueue::new(params.cpu_freq * 1_000_000.0);
        let system_id = global.add_system(params.clk * 1_000_000.0);

        Ok(Self {
            queue,
            global,
            system_id,
            pool,
            stats: Stats::new(),
            hooks,
            system,
            fault: None,
            completed: Vec::new(),
            outstanding: 0,
        })
    }

    /// Memory-clock cycle.
    #[must_use]
    pub fn memory_cycle(&self) -> Cycle {
        self.queue.current_cycle()
    }

    /// Reference (CPU) clock cycle.
    #[must_use]
    pub fn global_cycle(&self) -> Cycle {
        self.global.current_cycle()
    }

    /// Requests accepted but not yet completed back to the driver.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.outstanding
    }

    #[must_use]
    pub fn system(&self) -> &MemorySystem {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut MemorySystem {
        &mut self.system
    }

    /// Completions that reached the driver since the last drain.
    pub fn drain_completed(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.completed)
    }

    /// Whether the system would accept this request right now.
    #[must_use]
    pub fn is_issuable(&self, req: &Request) -> bool {
        self.system
            .is_issuable(req, self.queue.current_cycle())
            .is_ok()
    }

    /// Hand a driver request to the memory system. Returns `false` on
    /// backpressure; the request is given back through `drain_completed`
    /// only when accepted.
    pub fn issue(&mut self, req: Request) -> Result<bool, SimError> {
        let id = self.pool.insert(req);
        let accepted = {
            let mut ctx = SimContext {
                queue: &mut self.queue,
                pool: &mut self.pool,
                hooks: &mut self.hooks,
                fault: &mut self.fault,
            };
            self.system.issue_command(id, &mut ctx)
        };
        if accepted {
            self.outstanding += 1;
        } else {
            self.pool.remove(id);
        }
        self.check_fault()?;
        Ok(accepted)
    }

    /// Advance the reference clock by `steps` CPU cycles, running every
    /// subsystem event that falls due.
    pub fn cycle(&mut self, steps: Cycle) -> Result<(), SimError> {
        for (system, ticks) in self.global.cycle(steps) {
            if system == self.system_id && ticks > 0 {
                self.run_memory_cycles(ticks)?;
            }
        }
        Ok(())
    }

    fn run_memory_cycles(&mut self, ticks: Cycle) -> Result<(), SimError> {
        let target = self.queue.current_cycle() + ticks;
        while let Some(event) = self.queue.pop_due(target) {
            self.dispatch(&event)?;
            self.check_fault()?;
        }
        self.queue.sync_to(target);
        Ok(())
    }

    fn check_fault(&mut self) -> Result<(), SimError> {
        match self.fault.take() {
            Some(fault) => Err(SimError::Fault {
                module: fault.module,
                message: fault.message,
            }),
            None => Ok(()),
        }
    }

    fn dispatch(&mut self, event: &Event) -> Result<(), SimError> {
        match event.kind {
            EventKind::Cycle => {
                let mut ctx = SimContext {
                    queue: &mut self.queue,
                    pool: &mut self.pool,
                    hooks: &mut self.hooks,
                    fault: &mut self.fault,
                };
                if let Some(module) = self.system.resolve_mut(event.recipient) {
                    module.cycle(1, &mut ctx);
                }
                Ok(())
            }
            EventKind::Callback(kind) => self.dispatch_callback(event, kind),
            EventKind::Response => {
                let id = event
                    .payload
                    .expect("response event without a request");
                self.complete(event.recipient, id)
            }
            EventKind::Unknown => Ok(()),
        }
    }

    fn dispatch_callback(&mut self, event: &Event, kind: CallbackKind) -> Result<(), SimError> {
        let ModulePath::Controller(index) = event.recipient else {
            // Callbacks are a controller concern in this tree.
            return Ok(());
        };
        let mut ctx = SimContext {
            queue: &mut self.queue,
            pool: &mut self.pool,
            hooks: &mut self.hooks,
            fault: &mut self.fault,
        };
        let Some(controller) = self.system.controller_mut(index) else {
            return Ok(());
        };
        match kind {
            CallbackKind::CommandQueueWake | CallbackKind::LowPowerWake => {
                controller.command_queue_callback(&mut ctx);
            }
            CallbackKind::RefreshPulse => {
                let pulse = event.payload.expect("refresh pulse without a request");
                controller.refresh_callback(pulse, &mut ctx);
            }
            CallbackKind::Cleanup => controller.cleanup_callback(&mut ctx),
        }
        Ok(())
    }

    /// Walk a completion up the tree from the response recipient.
    fn complete(&mut self, recipient: ModulePath, id: RequestId) -> Result<(), SimError> {
        let mut path = Some(recipient);
        while let Some(at) = path {
            if at == ModulePath::Driver {
                // Back at the producer: the request leaves the pool.
                let request = self.pool.remove(id);
                self.outstanding = self.outstanding.saturating_sub(1);
                self.completed.push(request);
                return Ok(());
            }

            let mut ctx = SimContext {
                queue: &mut self.queue,
                pool: &mut self.pool,
                hooks: &mut self.hooks,
                fault: &mut self.fault,
            };
            let Some(module) = self.system.resolve_mut(at) else {
                return Err(SimError::AbandonedRequest);
            };
            match module.request_complete(id, &mut ctx) {
                sim_core::Completion::Owned => return Ok(()),
                sim_core::Completion::Forward => path = at.parent(),
            }
        }
        error!("completion walked past the root without an owner");
        Err(SimError::AbandonedRequest)
    }

    // ---- statistics -----------------------------------------------------

    fn collect_stats(&self) -> Vec<sim_core::StatEntry> {
        let mut sink = StatSink::new();
        sink.push_prefix(self.system.name());
        sink.counter("simulation_cycles", self.queue.current_cycle());
        self.system.register_stats(&mut sink);
        sink.pop_prefix();
        self.hooks.register_stats(&mut sink);
        sink.into_entries()
    }

    /// Dump all counters as `i{interval}.{name} {value}{units}` lines.
    pub fn print_stats(&mut self, out: &mut dyn Write) -> Result<(), SimError> {
        let entries = self.collect_stats();
        self.stats.print_all(out, &entries)?;
        Ok(())
    }

    /// Zero the counters for the next interval.
    pub fn reset_stats(&mut self) {
        let entries = self.collect_stats();
        self.stats.reset_all(&entries);
    }

    // ---- checkpointing --------------------------------------------------

    /// Persist restorable state (endurance maps, encoder inversion sets,
    /// written contents) under `dir`.
    pub fn create_checkpoint(&mut self, dir: &Path) -> Result<(), SimError> {
        std::fs::create_dir_all(dir)?;
        let state = self.system.checkpoint();
        let path = dir.join("memory_state.json");
        std::fs::write(&path, serde_json::to_string_pretty(&state).unwrap_or_default())?;
        info!(path = %path.display(), "checkpoint written");
        Ok(())
    }

    /// Restore state written by [`Self::create_checkpoint`].
    pub fn restore_checkpoint(&mut self, dir: &Path) -> Result<(), SimError> {
        let path = dir.join("memory_state.json");
        let text = std::fs::read_to_string(&path)?;
        let state: serde_json::Value = serde_json::from_str(&text)
            .map_err(|err| SimError::Fault {
                module: "checkpoint".to_owned(),
                message: err.to_string(),
            })?;
        self.system.restore(&state);
        info!(path = %path.display(), "checkpoint restored");
        Ok(())
    }
}
