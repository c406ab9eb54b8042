//! Rank: a set of banks sharing a chip-select and a power state.
//!
//! Powerdown is orthogonal to the bank state machines and tracked here:
//! `POWERDOWN_PDA` while banks are open, `POWERDOWN_PDPF`/`PDPS` from an
//! all-precharged rank, `POWERUP` with a fast (`tXP`) or slow (`tXPDLL`)
//! exit. Refresh commands address the head bank of a group; the rank fans
//! the refresh over `BanksPerRefresh` banks.

use std::rc::Rc;

use serde_json::json;
use tracing::debug;

use sim_core::{
    Completion, Cycle, EventKind, FailReason, Module, ModulePath, OpType, Params, Request,
    RequestId, SimContext, StatSink,
};

use crate::bank::Bank;

/// Rank power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    Up,
    ActivePowerDown,
    FastExitPowerDown,
    SlowExitPowerDown,
}

/// One rank of a channel.
pub struct Rank {
    name: String,
    path: ModulePath,
    params: Rc<Params>,
    banks: Vec<Bank>,
    power: PowerState,
    /// Cycle at which the current power transition settles.
    power_ready: Cycle,

    powerdowns: u64,
    powerups: u64,
    refreshes: u64,
}

impl Rank {
    pub fn new(channel: usize, rank: usize, params: &Rc<Params>, banks: Vec<Bank>) -> Self {
        let power = if params.use_low_power && params.init_pd {
            PowerState::FastExitPowerDown
        } else {
            PowerState::Up
        };
        Self {
            name: format!("rank{rank}"),
            path: ModulePath::Rank(channel, rank),
            params: Rc::clone(params),
            banks,
            power,
            power_ready: 0,
            powerdowns: 0,
            powerups: 0,
            refreshes: 0,
        }
    }

    /// Every bank is precharged.
    #[must_use]
    pub fn idle(&self) -> bool {
        self.banks.iter().all(Bank::idle)
    }

    #[must_use]
    pub fn power_state(&self) -> PowerState {
        self.power
    }

    #[must_use]
    pub fn bank(&self, index: usize) -> Option<&Bank> {
        self.banks.get(index)
    }

    pub fn bank_mut(&mut self, index: usize) -> Option<&mut Bank> {
        self.banks.get_mut(index)
    }

    fn target(&self, req: &Request) -> Result<&Bank, FailReason> {
        self.banks
            .get(req.address.indices().bank as usize)
            .ok_or(FailReason::Unsupported)
    }

    /// Banks covered by the refresh group headed at `bank_head`.
    fn refresh_group(&self, bank_head: usize) -> impl Iterator<Item = usize> + '_ {
        let banks = self.banks.len();
        let per = (self.params.banks_per_refresh as usize).clamp(1, banks.max(1));
        (0..per).map(move |offset| (bank_head + offset) % banks)
    }

    /// Checkpointable state of every bank.
    #[must_use]
    pub fn checkpoint(&self) -> serde_json::Value {
        json!(self.banks.iter().map(Bank::checkpoint).collect::<Vec<_>>())
    }

    pub fn restore(&mut self, state: &serde_json::Value) {
        if let Some(list) = state.as_array() {
            for (bank, state) in self.banks.iter_mut().zip(list) {
                bank.restore(state);
            }
        }
    }
}

impl Module for Rank {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> ModulePath {
        self.path
    }

    fn is_issuable(&self, req: &Request, now: Cycle) -> Result<(), FailReason> {
        match req.op {
            OpType::Powerup => {
                if self.power == PowerState::Up {
                    Err(FailReason::State)
                } else {
                    Ok(())
                }
            }
            OpType::PowerdownPda | OpType::PowerdownPdpf | OpType::PowerdownPdps => {
                if self.power != PowerState::Up {
                    return Err(FailReason::State);
                }
                // Standby powerdown needs every row closed.
                if req.op != OpType::PowerdownPda && !self.idle() {
                    return Err(FailReason::State);
                }
                Ok(())
            }
            _ => {
                if self.power != PowerState::Up {
                    return Err(FailReason::PoweredDown);
                }
                if now < self.power_ready {
                    return Err(FailReason::Timing);
                }
                match req.op {
                    OpType::Refresh => {
                        let head = req.address.indices().bank as usize;
                        for bank in self.refresh_group(head) {
                            self.banks[bank].is_issuable(req, now)?;
                        }
                        Ok(())
                    }
                    OpType::CachedRead | OpType::CachedWrite => Err(FailReason::Unsupported),
                    _ => self.target(req)?.is_issuable(req, now),
                }
            }
        }
    }

    fn next_issuable(&self, req: &Request, now: Cycle) -> Cycle {
        let earliest = now.max(self.power_ready);
        match req.op {
            OpType::Powerup | OpType::PowerdownPda | OpType::PowerdownPdpf
            | OpType::PowerdownPdps => earliest,
            OpType::Refresh => {
                let head = req.address.indices().bank as usize;
                self.refresh_group(head)
                    .map(|bank| self.banks[bank].next_issuable(req, now))
                    .max()
                    .unwrap_or(now)
                    .max(earliest)
            }
            _ => self
                .target(req)
                .map_or(earliest, |bank| bank.next_issuable(req, now))
                .max(earliest),
        }
    }

    fn issue_command(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> bool {
        let now = ctx.now();
        let op = ctx.pool.get(id).op;
        match op {
            OpType::PowerdownPda | OpType::PowerdownPdpf | OpType::PowerdownPdps => {
                self.power = match op {
                    OpType::PowerdownPda => PowerState::ActivePowerDown,
                    OpType::PowerdownPdps => PowerState::SlowExitPowerDown,
                    _ => PowerState::FastExitPowerDown,
                };
                self.power_ready = now + self.params.t_pd;
                self.powerdowns += 1;
                debug!(rank = %self.name, cycle = now, state = ?self.power, "powerdown");
                ctx.queue.insert_event(
                    EventKind::Response,
                    self.path,
                    self.power_ready,
                    Some(id),
                    0,
                );
                true
            }
            OpType::Powerup => {
                let exit = if self.power == PowerState::SlowExitPowerDown {
                    self.params.t_xpdll
                } else {
                    self.params.t_xp
                };
                self.power = PowerState::Up;
                self.power_ready = now + exit;
                self.powerups += 1;
                debug!(rank = %self.name, cycle = now, "powerup");
                ctx.queue.insert_event(
                    EventKind::Response,
                    self.path,
                    self.power_ready,
                    Some(id),
                    0,
                );
                true
            }
            OpType::Refresh => {
                let head = ctx.pool.get(id).address.indices().bank as usize;
                let group: Vec<usize> = self.refresh_group(head).collect();
                for bank in group {
                    self.banks[bank].refresh_apply(now);
                }
                self.refreshes += 1;
                ctx.queue.insert_event(
                    EventKind::Response,
                    self.path,
                    now + self.params.t_rfc,
                    Some(id),
                    0,
                );
                true
            }
            _ => {
                let index = ctx.pool.get(id).address.indices().bank as usize;
                match self.banks.get_mut(index) {
                    Some(bank) => bank.issue_command(id, ctx),
                    None => false,
                }
            }
        }
    }

    fn request_complete(&mut self, _id: RequestId, _ctx: &mut SimContext<'_>) -> Completion {
        Completion::Forward
    }

    fn cycle(&mut self, steps: Cycle, ctx: &mut SimContext<'_>) {
        for bank in &mut self.banks {
            bank.cycle(steps, ctx);
        }
    }

    fn register_stats(&self, sink: &mut StatSink) {
        sink.counter("powerdowns", self.powerdowns);
        sink.counter("powerups", self.powerups);
        sink.counter("refreshes", self.refreshes);
        for bank in &self.banks {
            sink.push_prefix(bank.name());
            bank.register_stats(sink);
            sink.pop_prefix();
        }
    }
}
