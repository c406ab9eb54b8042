//! Bank: a set of subarrays sharing command decoding.
//!
//! State machine: `Idle` → `Active(row, subarray)` on activate, back to
//! `Idle` via precharge, and `Idle` → `Refreshing` → `Idle` around the
//! `tRFC` window. The row-buffer deadlines themselves live in the
//! subarrays; the bank contributes the refresh window and the fan-out of
//! `PRECHARGE_ALL`.

use std::rc::Rc;

use serde_json::json;

use sim_core::{
    Completion, Cycle, EventKind, FailReason, Module, ModulePath, OpType, Params, Request,
    RequestId, SimContext, StatSink,
};

use crate::subarray::SubArray;

/// Bank state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankState {
    Idle,
    Active,
    Refreshing,
}

/// One bank of a rank.
pub struct Bank {
    name: String,
    path: ModulePath,
    params: Rc<Params>,
    subarrays: Vec<SubArray>,
    state: BankState,
    /// End of the current refresh window.
    refresh_until: Cycle,

    activates: u64,
    refreshes: u64,
    precharge_alls: u64,
}

impl Bank {
    pub fn new(
        channel: usize,
        rank: usize,
        bank: usize,
        params: &Rc<Params>,
        subarrays: Vec<SubArray>,
    ) -> Self {
        Self {
            name: format!("bank{bank}"),
            path: ModulePath::Bank(channel, rank, bank),
            params: Rc::clone(params),
            subarrays,
            state: BankState::Idle,
            refresh_until: 0,
            activates: 0,
            refreshes: 0,
            precharge_alls: 0,
        }
    }

    /// No subarray holds an open row.
    #[must_use]
    pub fn idle(&self) -> bool {
        self.subarrays.iter().all(|sa| sa.open_row().is_none())
    }

    #[must_use]
    pub fn state(&self, now: Cycle) -> BankState {
        if self.state == BankState::Refreshing && now >= self.refresh_until {
            BankState::Idle
        } else {
            self.state
        }
    }

    #[must_use]
    pub fn subarray(&self, index: usize) -> Option<&SubArray> {
        self.subarrays.get(index)
    }

    pub fn subarray_mut(&mut self, index: usize) -> Option<&mut SubArray> {
        self.subarrays.get_mut(index)
    }

    fn target(&self, req: &Request) -> Result<&SubArray, FailReason> {
        self.subarrays
            .get(req.address.indices().subarray as usize)
            .ok_or(FailReason::Unsupported)
    }

    /// Refresh every subarray without scheduling a completion; the rank
    /// coordinates the bank group and owns the response.
    pub fn refresh_apply(&mut self, now: Cycle) {
        self.refreshes += 1;
        self.state = BankState::Refreshing;
        self.refresh_until = now + self.params.t_rfc;
        for subarray in &mut self.subarrays {
            subarray.refresh(now);
        }
    }

    /// Checkpointable state of every subarray.
    #[must_use]
    pub fn checkpoint(&self) -> serde_json::Value {
        json!(self
            .subarrays
            .iter()
            .map(SubArray::checkpoint)
            .collect::<Vec<_>>())
    }

    pub fn restore(&mut self, state: &serde_json::Value) {
        if let Some(list) = state.as_array() {
            for (subarray, state) in self.subarrays.iter_mut().zip(list) {
                subarray.restore(state);
            }
        }
    }
}

impl Module for Bank {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> ModulePath {
        self.path
    }

    fn is_issuable(&self, req: &Request, now: Cycle) -> Result<(), FailReason> {
        if now < self.refresh_until {
            return Err(FailReason::Refreshing);
        }
        match req.op {
            OpType::Refresh | OpType::PrechargeAll => {
                // Every subarray must accept (closed for refresh, past its
                // precharge deadline for precharge-all).
                for subarray in &self.subarrays {
                    subarray.is_issuable(req, now)?;
                }
                Ok(())
            }
            _ => self.target(req)?.is_issuable(req, now),
        }
    }

    fn next_issuable(&self, req: &Request, now: Cycle) -> Cycle {
        let earliest = now.max(self.refresh_until);
        match req.op {
            OpType::Refresh | OpType::PrechargeAll => self
                .subarrays
                .iter()
                .map(|sa| sa.next_issuable(req, now))
                .max()
                .unwrap_or(now)
                .max(earliest),
            _ => self
                .target(req)
                .map_or(earliest, |sa| sa.next_issuable(req, now))
                .max(earliest),
        }
    }

    fn issue_command(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> bool {
        let now = ctx.now();
        let op = ctx.pool.get(id).op;
        match op {
            OpType::Refresh => {
                self.refresh_apply(now);
                ctx.queue.insert_event(
                    EventKind::Response,
                    self.path,
                    now + self.params.t_rfc,
                    Some(id),
                    0,
                );
                true
            }
            OpType::PrechargeAll => {
                self.precharge_alls += 1;
                for subarray in &mut self.subarrays {
                    subarray.close(now);
                }
                self.state = BankState::Idle;
                ctx.queue.insert_event(
                    EventKind::Response,
                    self.path,
                    now + self.params.t_rp,
                    Some(id),
                    0,
                );
                true
            }
            _ => {
                let index = ctx.pool.get(id).address.indices().subarray as usize;
                let Some(subarray) = self.subarrays.get_mut(index) else {
                    return false;
                };
                let accepted = subarray.issue_command(id, ctx);
                if accepted {
                    match op {
                        OpType::Activate => {
                            self.activates += 1;
                            self.state = BankState::Active;
                        }
                        OpType::Precharge | OpType::ReadPrecharge | OpType::WritePrecharge => {
                            if self.idle() {
                                self.state = BankState::Idle;
                            }
                        }
                        _ => {}
                    }
                }
                accepted
            }
        }
    }

    fn request_complete(&mut self, _id: RequestId, _ctx: &mut SimContext<'_>) -> Completion {
        // Completions are walked module by module from the response
        // recipient upward; the bank has no per-completion bookkeeping.
        Completion::Forward
    }

    fn cycle(&mut self, steps: Cycle, ctx: &mut SimContext<'_>) {
        if self.state == BankState::Refreshing && ctx.now() >= self.refresh_until {
            self.state = BankState::Idle;
        }
        for subarray in &mut self.subarrays {
            subarray.cycle(steps, ctx);
        }
    }

    fn register_stats(&self, sink: &mut StatSink) {
        sink.counter("activates", self.activates);
        sink.counter("refreshes", self.refreshes);
        sink.counter("precharge_alls", self.precharge_alls);
        for subarray in &self.subarrays {
            sink.push_prefix(subarray.name());
            subarray.register_stats(sink);
            sink.pop_prefix();
        }
    }
}
