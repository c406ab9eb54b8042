//! Channel: the interconnect between one memory controller and its ranks.
//!
//! The ranks share the data bus, so back-to-back bursts from different
//! ranks need a `tRTRS` gap on top of the burst itself. The channel tracks
//! the bus occupancy and otherwise routes by the rank field.

use std::rc::Rc;

use serde_json::json;

use sim_core::{
    Completion, ConfigError, Cycle, FailReason, Module, ModulePath, OpType, Params, Request,
    RequestId, SimContext, StatSink,
};

use crate::bank::Bank;
use crate::encoder::make_encoder;
use crate::endurance::make_endurance;
use crate::rank::Rank;
use crate::subarray::SubArray;

/// One channel's worth of devices.
pub struct Channel {
    name: String,
    path: ModulePath,
    params: Rc<Params>,
    ranks: Vec<Rank>,

    /// Rank that last drove the data bus.
    last_bus_rank: Option<usize>,
    /// First cycle the data bus is free again.
    bus_free: Cycle,

    bus_bursts: u64,
    rank_switches: u64,
}

impl Channel {
    /// Build the full device tree for `channel`.
    pub fn new(channel: usize, params: &Rc<Params>) -> Result<Self, ConfigError> {
        let mut ranks = Vec::with_capacity(params.ranks as usize);
        for r in 0..params.ranks as usize {
            let mut banks = Vec::with_capacity(params.banks as usize);
            for b in 0..params.banks as usize {
                let mut subarrays = Vec::with_capacity(params.subarray_count() as usize);
                for s in 0..params.subarray_count() as usize {
                    subarrays.push(SubArray::new(
                        ModulePath::SubArray(channel, r, b, s),
                        format!("subarray{s}"),
                        Rc::clone(params),
                        make_encoder(params)?,
                        make_endurance(params)?,
                    ));
                }
                banks.push(Bank::new(channel, r, b, params, subarrays));
            }
            ranks.push(Rank::new(channel, r, params, banks));
        }

        Ok(Self {
            name: format!("channel{channel}"),
            path: ModulePath::Channel(channel),
            params: Rc::clone(params),
            ranks,
            last_bus_rank: None,
            bus_free: 0,
            bus_bursts: 0,
            rank_switches: 0,
        })
    }

    #[must_use]
    pub fn rank(&self, index: usize) -> Option<&Rank> {
        self.ranks.get(index)
    }

    pub fn rank_mut(&mut self, index: usize) -> Option<&mut Rank> {
        self.ranks.get_mut(index)
    }

    fn target(&self, req: &Request) -> Result<&Rank, FailReason> {
        self.ranks
            .get(req.address.indices().rank as usize)
            .ok_or(FailReason::Unsupported)
    }

    /// When the request's data burst would start.
    fn burst_start(&self, req: &Request, now: Cycle) -> Option<Cycle> {
        match req.op {
            OpType::Read | OpType::ReadPrecharge => Some(now + self.params.t_cas),
            OpType::Write | OpType::WritePrecharge => Some(now + self.params.t_cwd),
            _ => None,
        }
    }

    /// Earliest allowed burst start given the current bus owner.
    fn bus_ready(&self, rank: usize) -> Cycle {
        if self.last_bus_rank.is_some_and(|last| last != rank) {
            self.bus_free + self.params.t_rtrs
        } else {
            self.bus_free
        }
    }

    /// Checkpointable state of every rank.
    #[must_use]
    pub fn checkpoint(&self) -> serde_json::Value {
        json!(self.ranks.iter().map(Rank::checkpoint).collect::<Vec<_>>())
    }

    pub fn restore(&mut self, state: &serde_json::Value) {
        if let Some(list) = state.as_array() {
            for (rank, state) in self.ranks.iter_mut().zip(list) {
                rank.restore(state);
            }
        }
    }
}

impl Module for Channel {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> ModulePath {
        self.path
    }

    fn is_issuable(&self, req: &Request, now: Cycle) -> Result<(), FailReason> {
        let rank = req.address.indices().rank as usize;
        if let Some(start) = self.burst_start(req, now) {
            if start < self.bus_ready(rank) {
                return Err(FailReason::Timing);
            }
        }
        self.target(req)?.is_issuable(req, now)
    }

    fn next_issuable(&self, req: &Request, now: Cycle) -> Cycle {
        let rank = req.address.indices().rank as usize;
        let base = self
            .target(req)
            .map_or(now, |r| r.next_issuable(req, now));
        match self.burst_start(req, now) {
            Some(start) => {
                let ready = self.bus_ready(rank);
                // Shift the issue point so the burst lands after the bus
                // frees up.
                let bus_wait = ready.saturating_sub(start);
                base.max(now + bus_wait)
            }
            None => base,
        }
    }

    fn issue_command(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> bool {
        let now = ctx.now();
        let (rank, burst_start) = {
            let req = ctx.pool.get(id);
            (
                req.address.indices().rank as usize,
                self.burst_start(req, now),
            )
        };
        let Some(target) = self.ranks.get_mut(rank) else {
            return false;
        };
        let accepted = target.issue_command(id, ctx);
        if accepted {
            if let Some(start) = burst_start {
                if self.last_bus_rank.is_some_and(|last| last != rank) {
                    self.rank_switches += 1;
                }
                self.bus_free = start + self.params.t_burst;
                self.last_bus_rank = Some(rank);
                self.bus_bursts += 1;
            }
        }
        accepted
    }

    fn request_complete(&mut self, _id: RequestId, _ctx: &mut SimContext<'_>) -> Completion {
        Completion::Forward
    }

    fn cycle(&mut self, steps: Cycle, ctx: &mut SimContext<'_>) {
        for rank in &mut self.ranks {
            rank.cycle(steps, ctx);
        }
    }

    fn register_stats(&self, sink: &mut StatSink) {
        sink.counter("bus_bursts", self.bus_bursts);
        sink.counter("rank_switches", self.rank_switches);
        for rank in &self.ranks {
            sink.push_prefix(rank.name());
            rank.register_stats(sink);
            sink.pop_prefix();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{Address, Config, Flags, Translated};

    fn params(extra: &[(&str, &str)]) -> Rc<Params> {
        let mut config = Config::new();
        for (key, value) in [
            ("CHANNELS", "1"),
            ("RANKS", "2"),
            ("BANKS", "2"),
            ("ROWS", "1024"),
            ("COLS", "256"),
            ("tRCD", "5"),
            ("tCAS", "6"),
            ("tBURST", "4"),
            ("tCWD", "4"),
            ("tRTRS", "2"),
            ("tRP", "5"),
            ("tRAS", "20"),
            ("tRC", "25"),
        ] {
            config.set(key, value);
        }
        for (key, value) in extra {
            config.set(key, value);
        }
        Rc::new(Params::from_config(&config).expect("params"))
    }

    struct Fixture {
        queue: sim_core::EventQueue,
        pool: sim_core::RequestPool,
        hooks: sim_core::HookRegistry,
        channel: Channel,
    }

    impl Fixture {
        fn new(extra: &[(&str, &str)]) -> Self {
            let params = params(extra);
            Self {
                queue: sim_core::EventQueue::new(),
                pool: sim_core::RequestPool::new(),
                hooks: sim_core::HookRegistry::new(),
                channel: Channel::new(0, &params).expect("channel"),
            }
        }

        fn request(&mut self, op: OpType, rank: u64, bank: u64, row: u64) -> RequestId {
            let mut req = Request::new(op, Address::new(0), ModulePath::Driver);
            req.address.set_translated(Translated {
                row,
                rank,
                bank,
                ..Translated::default()
            });
            if op.is_read() {
                req.flags.set(Flags::IS_READ);
            }
            self.pool.insert(req)
        }

        fn issue(&mut self, id: RequestId) -> bool {
            let mut fault = None;
            let mut ctx = SimContext {
                queue: &mut self.queue,
                pool: &mut self.pool,
                hooks: &mut self.hooks,
                fault: &mut fault,
            };
            self.channel.issue_command(id, &mut ctx)
        }

        fn advance(&mut self, cycle: Cycle) {
            while self.queue.pop_due(cycle).is_some() {}
            self.queue.sync_to(cycle);
        }
    }

    #[test]
    fn rank_switch_needs_trtrs_on_the_bus() {
        let mut fx = Fixture::new(&[]);
        for rank in 0..2 {
            let act = fx.request(OpType::Activate, rank, 0, 1);
            assert!(fx.issue(act));
        }
        fx.advance(5);

        // Read on rank 0: burst occupies [11, 15).
        let read0 = fx.request(OpType::Read, 0, 0, 1);
        assert!(fx
            .channel
            .is_issuable(fx.pool.get(read0), 5)
            .is_ok());
        fx.issue(read0);

        // Same-rank read can pipeline as soon as the subarray allows;
        // cross-rank read must leave the tRTRS gap.
        let read1 = fx.request(OpType::Read, 1, 0, 1);
        assert_eq!(
            fx.channel.is_issuable(fx.pool.get(read1), 5),
            Err(FailReason::Timing)
        );
        // Bus free at 15, +tRTRS = 17, burst start = now + tCAS.
        assert_eq!(fx.channel.next_issuable(fx.pool.get(read1), 5), 11);
    }

    #[test]
    fn powered_down_rank_rejects_commands() {
        let mut fx = Fixture::new(&[("UseLowPower", "true")]);
        let pd = fx.request(OpType::PowerdownPdpf, 0, 0, 0);
        assert!(fx.issue(pd));

        let act = fx.request(OpType::Activate, 0, 0, 1);
        assert_eq!(
            fx.channel.is_issuable(fx.pool.get(act), 10),
            Err(FailReason::PoweredDown)
        );

        let up = fx.request(OpType::Powerup, 0, 0, 0);
        assert!(fx.channel.is_issuable(fx.pool.get(up), 10).is_ok());
        fx.advance(10);
        fx.issue(up);
        // Exit latency tXP (default 5) gates the next activate.
        assert_eq!(
            fx.channel.is_issuable(fx.pool.get(act), 12),
            Err(FailReason::Timing)
        );
        assert!(fx.channel.is_issuable(fx.pool.get(act), 15).is_ok());
    }

    #[test]
    fn refresh_covers_the_bank_group() {
        let mut fx = Fixture::new(&[("BanksPerRefresh", "2"), ("tRFC", "30")]);
        let refresh = fx.request(OpType::Refresh, 0, 0, 0);
        assert!(fx.channel.is_issuable(fx.pool.get(refresh), 0).is_ok());
        fx.issue(refresh);

        // Both banks of rank 0 are inside the refresh window.
        for bank in 0..2 {
            let act = fx.request(OpType::Activate, 0, bank, 1);
            assert_eq!(
                fx.channel.is_issuable(fx.pool.get(act), 10),
                Err(FailReason::Refreshing)
            );
        }
        // The other rank is untouched.
        let act = fx.request(OpType::Activate, 1, 0, 1);
        assert!(fx.channel.is_issuable(fx.pool.get(act), 10).is_ok());
    }
}
