//! The memory controller: transaction scheduling and command generation.
//!
//! Two queue levels. The transaction queue holds incoming reads and writes
//! in arrival order; on each transaction wake, one entry is chosen by the
//! FR-FCFS discipline (cached shortcut, write-paused read, starved request,
//! row-buffer hit, oldest ready, closed bank) and decomposed into the
//! precharge/activate/column commands its bank state requires. The command
//! queues hold those commands per rank, bank or subarray; a command wake
//! drains at most one issuable head per cycle, with refresh taking
//! precedence through the bank-group fences.

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, error, warn};

use sim_core::{
    mlog2, AddressTranslator, Completion, Cycle, EventKind, FailReason, Flags, Module, ModulePath,
    OpType, Params, PowerDownMode, QueueModel, Request, RequestId, RequestStatus, SimContext,
    StatSink, Translated, TranslationMethod, CallbackKind, EventQueue, RequestPool, NEVER,
    PRIORITY_COMMAND_QUEUE, PRIORITY_REFRESH, PRIORITY_TRANSACTION_QUEUE, PRIORITY_CLEANUP,
};

use mem_devices::Channel;
use sim_core::ConfigError;

/// Outcome of one scheduling pass over the transaction queue.
enum Selection {
    /// Nothing ready.
    None,
    /// A write is mid-iteration; hold the scheduler until it can pause.
    Stall,
    /// The transaction at this queue position was chosen.
    Found(usize, SelectionKind),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SelectionKind {
    Cached,
    WriteStalledRead,
    Starved,
    RowBufferHit,
    OldestReady,
    ClosedBank,
}

/// Per-channel memory controller.
pub struct MemoryController {
    name: String,
    path: ModulePath,
    /// Channel index; doubles as the channel field of synthesized
    /// command addresses.
    id: usize,
    params: Rc<Params>,
    translator: AddressTranslator,
    channel: Channel,

    transaction_queue: VecDeque<RequestId>,
    command_queues: Vec<VecDeque<RequestId>>,
    subarray_num: usize,

    // The controller's scheduling view of the bank state. The devices hold
    // the authoritative timing state; every issued command updates both.
    activate_queued: Vec<Vec<bool>>,
    refresh_queued: Vec<Vec<bool>>,
    bank_need_refresh: Vec<Vec<bool>>,
    active_subarray: Vec<Vec<Vec<bool>>>,
    effective_row: Vec<Vec<Vec<Option<u64>>>>,
    effective_muxed_row: Vec<Vec<Vec<Option<u64>>>>,
    starvation_counter: Vec<Vec<Vec<u64>>>,
    rank_power_down: Vec<bool>,

    delayed_refresh_counter: Vec<Vec<u64>>,
    /// Bank groups per rank.
    refresh_bank_num: usize,
    next_refresh_rank: usize,
    next_refresh_bank: usize,
    handled_refresh: Option<Cycle>,

    cur_queue: usize,
    last_issue_cycle: Option<Cycle>,
    last_command_wake: Cycle,

    // Statistics.
    wakeup_count: u64,
    mem_reads: u64,
    mem_writes: u64,
    rb_hits: u64,
    rb_miss: u64,
    starvation_precharges: u64,
    write_pauses_granted: u64,
    average_latency: f64,
    average_queue_latency: f64,
    measured_latencies: u64,
    measured_queue_latencies: u64,
}

impl MemoryController {
    /// Build the controller and its channel subtree, and arm the staggered
    /// refresh pulses.
    pub fn new(
        id: usize,
        params: Rc<Params>,
        queue: &mut EventQueue,
        pool: &mut RequestPool,
    ) -> Result<Self, ConfigError> {
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
        translator.set_default_field(None);

        let channel = Channel::new(id, &params)?;

        let ranks = params.ranks as usize;
        let banks = params.banks as usize;
        let subarray_num = subarrays as usize;
        let command_queue_count = match params.queue_model {
            QueueModel::PerRank => ranks,
            QueueModel::PerBank => ranks * banks,
            QueueModel::PerSubArray => ranks * banks * subarray_num,
        };
        debug!(controller = id, command_queue_count, "creating command queues");

        let banks_per_refresh = (params.banks_per_refresh as usize).clamp(1, banks);
        let refresh_bank_num = banks / banks_per_refresh;

        let mut controller = Self {
            name: params.mem_ctl.clone(),
            path: ModulePath::Controller(id),
            id,
            params: Rc::clone(&params),
            translator,
            channel,
            transaction_queue: VecDeque::new(),
            command_queues: vec![VecDeque::new(); command_queue_count],
            subarray_num,
            activate_queued: vec![vec![false; banks]; ranks],
            refresh_queued: vec![vec![false; banks]; ranks],
            bank_need_refresh: vec![vec![false; banks]; ranks],
            active_subarray: vec![vec![vec![false; subarray_num]; banks]; ranks],
            effective_row: vec![vec![vec![None; subarray_num]; banks]; ranks],
            effective_muxed_row: vec![vec![vec![None; subarray_num]; banks]; ranks],
            starvation_counter: vec![vec![vec![0; subarray_num]; banks]; ranks],
            rank_power_down: vec![params.use_low_power && params.init_pd; ranks],
            delayed_refresh_counter: vec![vec![0; refresh_bank_num.max(1)]; ranks],
            refresh_bank_num: refresh_bank_num.max(1),
            next_refresh_rank: 0,
            next_refresh_bank: 0,
            handled_refresh: None,
            cur_queue: 0,
            last_issue_cycle: None,
            last_command_wake: 0,
            wakeup_count: 0,
            mem_reads: 0,
            mem_writes: 0,
            rb_hits: 0,
            rb_miss: 0,
            starvation_precharges: 0,
            write_pauses_granted: 0,
            average_latency: 0.0,
            average_queue_latency: 0.0,
            measured_latencies: 0,
            measured_queue_latencies: 0,
        };

        if params.use_refresh {
            controller.arm_refresh_pulses(queue, pool);
        }

        Ok(controller)
    }

    /// One refresh countdown per (rank, bank group), staggered evenly so
    /// the pulses spread across the `tREFI` window.
    fn arm_refresh_pulses(&mut self, queue: &mut EventQueue, pool: &mut RequestPool) {
        let per_refresh = self.params.banks_per_refresh.max(1) as usize;
        let slice = self.params.t_refi / (self.params.ranks * self.refresh_bank_num as u64).max(1);

        for rank in 0..self.params.ranks as usize {
            for group in 0..self.refresh_bank_num {
                let bank_head = group * per_refresh;
                let pulse = self.make_refresh_request(pool, bank_head, rank, 0);
                let offset = (rank * self.refresh_bank_num + group) as u64 * slice;
                queue.insert_callback(
                    self.path,
                    CallbackKind::RefreshPulse,
                    queue.current_cycle() + self.params.t_refi + offset,
                    Some(pulse),
                    PRIORITY_REFRESH,
                );
            }
        }
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }

    /// Front-insert a transaction ahead of the queue (priority injection).
    pub fn prequeue(&mut self, id: RequestId) {
        self.transaction_queue.push_front(id);
    }

    fn command_queue_id(&self, t: &Translated) -> usize {
        let ranks = self.params.ranks as usize;
        let banks = self.params.banks as usize;
        let (rank, bank, subarray) = (t.rank as usize, t.bank as usize, t.subarray as usize);
        match self.params.queue_model {
            QueueModel::PerRank => rank,
            QueueModel::PerBank => {
                if self.params.schedule_scheme == 1 {
                    // Rank-first round robin.
                    bank * ranks + rank
                } else {
                    // Bank-first round robin (and fixed scheduling).
                    rank * banks + bank
                }
            }
            QueueModel::PerSubArray => {
                rank * banks * self.subarray_num + bank * self.subarray_num + subarray
            }
        }
    }

    fn mux_level(&self, col: u64) -> u64 {
        col / self.params.rb_size.max(1)
    }

    /// The queue is empty, or holds only an already-issued head awaiting
    /// cleanup.
    fn effectively_empty(&self, queue_id: usize, pool: &RequestPool) -> bool {
        let queue = &self.command_queues[queue_id];
        match queue.front() {
            None => true,
            Some(&head) => queue.len() == 1 && pool.get(head).flags.contains(Flags::ISSUED),
        }
    }

    fn transaction_available(&self, queue_id: usize, pool: &RequestPool) -> bool {
        self.transaction_queue
            .iter()
            .any(|&id| self.command_queue_id(&pool.get(id).address.indices()) == queue_id)
    }

    fn rank_queue_empty(&self, rank: usize, pool: &RequestPool) -> bool {
        (0..self.params.banks as usize).all(|bank| {
            let t = Translated {
                rank: rank as u64,
                bank: bank as u64,
                ..Translated::default()
            };
            self.effectively_empty(self.command_queue_id(&t), pool)
        })
    }

    // ---- refresh bookkeeping -------------------------------------------

    fn refresh_group(&self, bank: usize) -> usize {
        bank / self.params.banks_per_refresh.max(1) as usize
    }

    fn need_refresh(&self, bank: usize, rank: usize) -> bool {
        self.params.use_refresh
            && self.delayed_refresh_counter[rank][self.refresh_group(bank)]
                >= self.params.delayed_refresh_threshold
    }

    fn group_banks(&self, bank: usize) -> impl Iterator<Item = usize> + '_ {
        let per = self.params.banks_per_refresh.max(1) as usize;
        let head = (bank / per) * per;
        (head..head + per).map(move |b| b % self.params.banks as usize)
    }

    fn set_refresh(&mut self, bank: usize, rank: usize) {
        for b in self.group_banks(bank).collect::<Vec<_>>() {
            self.bank_need_refresh[rank][b] = true;
        }
    }

    fn reset_refresh(&mut self, bank: usize, rank: usize) {
        for b in self.group_banks(bank).collect::<Vec<_>>() {
            self.bank_need_refresh[rank][b] = false;
        }
    }

    fn reset_refresh_queued(&mut self, bank: usize, rank: usize) {
        for b in self.group_banks(bank).collect::<Vec<_>>() {
            debug_assert!(self.refresh_queued[rank][b]);
            self.refresh_queued[rank][b] = false;
        }
    }

    fn is_refresh_bank_queue_empty(&self, bank: usize, rank: usize) -> bool {
        self.group_banks(bank).collect::<Vec<_>>().iter().all(|&b| {
            let t = Translated {
                rank: rank as u64,
                bank: b as u64,
                ..Translated::default()
            };
            self.command_queues[self.command_queue_id(&t)].is_empty()
        })
    }

    /// The periodic countdown: bump the group counter, mark the group when
    /// it crosses the threshold, re-arm the pulse.
    fn process_refresh_pulse(&mut self, pulse: RequestId, ctx: &mut SimContext<'_>) {
        let t = ctx.pool.get(pulse).address.indices();
        let (bank, rank) = (t.bank as usize, t.rank as usize);

        let group = self.refresh_group(bank);
        self.delayed_refresh_counter[rank][group] += 1;
        if self.need_refresh(bank, rank) {
            self.set_refresh(bank, rank);
        }

        let next = ctx.now() + self.params.t_refi;
        ctx.queue
            .insert_callback(self.path, CallbackKind::RefreshPulse, next, Some(pulse), PRIORITY_REFRESH);
    }

    /// Push the commands for one pending bank-group refresh, if any group
    /// is due. Returns whether a refresh was queued.
    fn handle_refresh(&mut self, ctx: &mut SimContext<'_>) -> bool {
        let ranks = self.params.ranks as usize;
        let banks = self.params.banks as usize;
        let per_refresh = self.params.banks_per_refresh.max(1) as usize;

        for rank_idx in 0..ranks {
            let i = (self.next_refresh_rank + rank_idx) % ranks;
            for bank_idx in 0..self.refresh_bank_num {
                let j = (self.next_refresh_bank + bank_idx * per_refresh) % banks;

                if !self.need_refresh(j, i) {
                    continue;
                }

                let now = ctx.now();

                // Close any open banks in the group first.
                if self.params.use_precharge {
                    for ref_bank in self.group_banks(j).collect::<Vec<_>>() {
                        if self.activate_queued[i][ref_bank] {
                            let queue_id = self.command_queue_id(&Translated {
                                rank: i as u64,
                                bank: ref_bank as u64,
                                ..Translated::default()
                            });
                            let pre = self.make_precharge_all_request(ctx.pool, ref_bank, i);
                            ctx.pool.get_mut(pre).issue_cycle = now;
                            self.command_queues[queue_id].push_back(pre);

                            for sa in 0..self.subarray_num {
                                self.active_subarray[i][ref_bank][sa] = false;
                                self.effective_row[i][ref_bank][sa] = None;
                                self.effective_muxed_row[i][ref_bank][sa] = None;
                            }
                            self.activate_queued[i][ref_bank] = false;
                        }
                    }
                }

                let refresh = self.make_refresh_request(ctx.pool, j, i, 0);
                ctx.pool.get_mut(refresh).issue_cycle = now;
                let queue_id = self.command_queue_id(&Translated {
                    rank: i as u64,
                    bank: j as u64,
                    ..Translated::default()
                });
                self.command_queues[queue_id].push_back(refresh);

                // Fence new activates against the whole group.
                for ref_bank in self.group_banks(j).collect::<Vec<_>>() {
                    self.refresh_queued[i][ref_bank] = true;
                }

                let group = self.refresh_group(j);
                self.delayed_refresh_counter[i][group] -= 1;
                if !self.need_refresh(j, i) {
                    self.reset_refresh(j, i);
                }

                self.next_refresh_bank += per_refresh;
                if self.next_refresh_bank >= banks {
                    self.next_refresh_bank = 0;
                    self.next_refresh_rank = (self.next_refresh_rank + 1) % ranks;
                }

                self.handled_refresh = Some(now);
                debug!(controller = self.id, rank = i, bank_head = j, cycle = now, "refresh queued");
                return true;
            }
        }
        false
    }

    // ---- low power ------------------------------------------------------

    fn power_down(&mut self, rank_id: usize, ctx: &mut SimContext<'_>) {
        let mut op = match self.params.power_down_mode {
            PowerDownMode::SlowExit => OpType::PowerdownPdps,
            PowerDownMode::FastExit => OpType::PowerdownPdpf,
        };

        // Open banks force active powerdown.
        let idle = self
            .channel
            .rank(rank_id)
            .is_some_and(mem_devices::Rank::idle);
        if !idle {
            op = OpType::PowerdownPda;
        }

        let request = self.make_power_request(ctx.pool, op, rank_id);
        let issuable = self.rank_queue_empty(rank_id, ctx.pool)
            && self
                .channel
                .is_issuable(ctx.pool.get(request), ctx.now())
                .is_ok();
        if issuable {
            self.channel.issue_command(request, ctx);
            self.rank_power_down[rank_id] = true;
        } else {
            ctx.pool.remove(request);
        }
    }

    fn power_up(&mut self, rank_id: usize, ctx: &mut SimContext<'_>) {
        let request = self.make_power_request(ctx.pool, OpType::Powerup, rank_id);
        let issuable = !self.rank_queue_empty(rank_id, ctx.pool)
            && self
                .channel
                .is_issuable(ctx.pool.get(request), ctx.now())
                .is_ok();
        if issuable {
            self.channel.issue_command(request, ctx);
            self.rank_power_down[rank_id] = false;
        } else {
            ctx.pool.remove(request);
        }
    }

    fn handle_low_power(&mut self, ctx: &mut SimContext<'_>) {
        for rank_id in 0..self.params.ranks as usize {
            let mut pending_refresh = false;
            if self.params.use_refresh {
                let per_refresh = self.params.banks_per_refresh.max(1) as usize;
                for group in 0..self.refresh_bank_num {
                    if self.need_refresh(group * per_refresh, rank_id) {
                        pending_refresh = true;
                        break;
                    }
                }
            }

            if pending_refresh {
                // A rank cannot refresh from powerdown.
                if self.rank_power_down[rank_id] {
                    let request = self.make_power_request(ctx.pool, OpType::Powerup, rank_id);
                    if self
                        .channel
                        .is_issuable(ctx.pool.get(request), ctx.now())
                        .is_ok()
                    {
                        self.channel.issue_command(request, ctx);
                        self.rank_power_down[rank_id] = false;
                    } else {
                        ctx.pool.remove(request);
                    }
                }
            } else if self.rank_power_down[rank_id] {
                self.power_up(rank_id, ctx);
            } else {
                self.power_down(rank_id, ctx);
            }
        }
    }

    // ---- command synthesis ---------------------------------------------

    fn synthesized_address(&self, row: u64, col: u64, bank: usize, rank: usize, subarray: usize) -> sim_core::Address {
        let t = Translated {
            row,
            col,
            bank: bank as u64,
            rank: rank as u64,
            channel: self.id as u64,
            subarray: subarray as u64,
        };
        sim_core::Address::with_translation(self.translator.reverse_translate(&t), t)
    }

    fn make_command(&self, pool: &mut RequestPool, op: OpType, address: sim_core::Address) -> RequestId {
        pool.insert(Request::new(op, address, self.path))
    }

    fn make_activate_request(&self, pool: &mut RequestPool, trigger: RequestId, now: Cycle) -> RequestId {
        let address = pool.get(trigger).address;
        let id = self.make_command(pool, OpType::Activate, address);
        pool.get_mut(id).issue_cycle = now;
        id
    }

    fn make_precharge_request(
        &self,
        pool: &mut RequestPool,
        row: u64,
        bank: usize,
        rank: usize,
        subarray: usize,
        now: Cycle,
    ) -> RequestId {
        let address = self.synthesized_address(row, 0, bank, rank, subarray);
        let id = self.make_command(pool, OpType::Precharge, address);
        pool.get_mut(id).issue_cycle = now;
        id
    }

    fn make_precharge_all_request(&self, pool: &mut RequestPool, bank: usize, rank: usize) -> RequestId {
        let address = self.synthesized_address(0, 0, bank, rank, 0);
        self.make_command(pool, OpType::PrechargeAll, address)
    }

    fn make_refresh_request(&self, pool: &mut RequestPool, bank: usize, rank: usize, subarray: usize) -> RequestId {
        let address = self.synthesized_address(0, 0, bank, rank, subarray);
        self.make_command(pool, OpType::Refresh, address)
    }

    fn make_power_request(&self, pool: &mut RequestPool, op: OpType, rank: usize) -> RequestId {
        let address = self.synthesized_address(0, 0, 0, rank, 0);
        self.make_command(pool, op, address)
    }

    /// Turn a column request into its implicit-precharge form.
    fn make_implicit_precharge(&self, pool: &mut RequestPool, trigger: RequestId, now: Cycle) -> RequestId {
        let req = pool.get_mut(trigger);
        req.op = match req.op {
            OpType::Read => OpType::ReadPrecharge,
            OpType::Write => OpType::WritePrecharge,
            other => other,
        };
        req.issue_cycle = now;
        trigger
    }

    /// Probe request used by the cached-hit shortcut.
    fn cached_probe(&self, req: &Request) -> Request {
        let mut probe = req.clone();
        probe.op = if req.op == OpType::Read {
            OpType::CachedRead
        } else {
            OpType::CachedWrite
        };
        probe.owner = self.path;
        probe
    }

    // ---- transaction selection -----------------------------------------

    /// Close-page policy: is `candidate` the last queued request for its
    /// row?
    fn is_last_request(&self, pool: &RequestPool, candidate: &Request) -> bool {
        match self.params.close_page {
            0 => false,
            1 => {
                let t = candidate.address.indices();
                !self.transaction_queue.iter().any(|&other| {
                    let o = pool.get(other).address.indices();
                    o.rank == t.rank
                        && o.bank == t.bank
                        && o.row == t.row
                        && o.subarray == t.subarray
                })
            }
            _ => true,
        }
    }

    fn find_cached_request(&self, ctx: &SimContext<'_>) -> Option<usize> {
        let now = ctx.queue.current_cycle();
        for (index, &id) in self.transaction_queue.iter().enumerate() {
            let req = ctx.pool.get(id);
            let queue_id = self.command_queue_id(&req.address.indices());
            if !self.command_queues[queue_id].is_empty() {
                continue;
            }
            let probe = self.cached_probe(req);
            if self.channel.is_issuable(&probe, now).is_ok() && req.arrival_cycle != now {
                return Some(index);
            }
        }
        None
    }

    fn find_write_stalled_read(&self, ctx: &SimContext<'_>) -> Selection {
        if !self.params.write_pausing {
            return Selection::None;
        }
        let now = ctx.queue.current_cycle();

        for (index, &id) in self.transaction_queue.iter().enumerate() {
            let req = ctx.pool.get(id);
            if req.op != OpType::Read {
                continue;
            }
            let t = req.address.indices();
            let queue_id = self.command_queue_id(&t);
            if !self.command_queues[queue_id].is_empty() {
                continue;
            }
            let (rank, bank) = (t.rank as usize, t.bank as usize);

            let Some(subarray) = self
                .channel
                .rank(rank)
                .and_then(|r| r.bank(bank))
                .and_then(|b| b.subarray(t.subarray as usize))
            else {
                return Selection::None;
            };

            if self.bank_need_refresh[rank][bank]
                || self.refresh_queued[rank][bank]
                || !subarray.is_writing(now)
                || req.arrival_cycle == now
            {
                continue;
            }

            // The write must be at a pausable point before anything can
            // preempt it.
            if !subarray.between_write_iterations(now) {
                return Selection::Stall;
            }

            // Pause via a row-buffer hit, or via a priority activate.
            let mut read_probe = req.clone();
            read_probe.flags.set(Flags::PRIORITY);
            let mut activate_probe = Request::new(OpType::Activate, req.address, self.path);
            activate_probe.flags.set(Flags::PRIORITY);

            if self.channel.is_issuable(&read_probe, now).is_ok()
                || self.channel.is_issuable(&activate_probe, now).is_ok()
            {
                return Selection::Found(index, SelectionKind::WriteStalledRead);
            }
        }
        Selection::None
    }

    fn find_starved_request(&self, ctx: &SimContext<'_>) -> Option<usize> {
        let now = ctx.queue.current_cycle();
        for (index, &id) in self.transaction_queue.iter().enumerate() {
            let req = ctx.pool.get(id);
            let t = req.address.indices();
            let queue_id = self.command_queue_id(&t);
            if !self.command_queues[queue_id].is_empty() {
                continue;
            }
            let (rank, bank, sa) = (t.rank as usize, t.bank as usize, t.subarray as usize);
            let mux = self.mux_level(t.col);

            if self.activate_queued[rank][bank]
                && (!self.active_subarray[rank][bank][sa]
                    || self.effective_row[rank][bank][sa] != Some(t.row)
                    || self.effective_muxed_row[rank][bank][sa] != Some(mux))
                && !self.bank_need_refresh[rank][bank]
                && !self.refresh_queued[rank][bank]
                && self.starvation_counter[rank][bank][sa] >= self.params.starvation_threshold
                && req.arrival_cycle != now
            {
                return Some(index);
            }
        }
        None
    }

    fn find_row_buffer_hit(&self, ctx: &SimContext<'_>) -> Option<usize> {
        let now = ctx.queue.current_cycle();
        for (index, &id) in self.transaction_queue.iter().enumerate() {
            let req = ctx.pool.get(id);
            let t = req.address.indices();
            let queue_id = self.command_queue_id(&t);
            if !self.command_queues[queue_id].is_empty() {
                continue;
            }
            let (rank, bank, sa) = (t.rank as usize, t.bank as usize, t.subarray as usize);
            let mux = self.mux_level(t.col);

            if self.activate_queued[rank][bank]
                && self.active_subarray[rank][bank][sa]
                && self.effective_row[rank][bank][sa] == Some(t.row)
                && self.effective_muxed_row[rank][bank][sa] == Some(mux)
                && !self.bank_need_refresh[rank][bank]
                && !self.refresh_queued[rank][bank]
                && req.arrival_cycle != now
            {
                return Some(index);
            }
        }
        None
    }

    fn find_oldest_ready_request(&self, ctx: &SimContext<'_>) -> Option<usize> {
        let now = ctx.queue.current_cycle();
        for (index, &id) in self.transaction_queue.iter().enumerate() {
            let req = ctx.pool.get(id);
            let t = req.address.indices();
            let queue_id = self.command_queue_id(&t);
            if !self.command_queues[queue_id].is_empty() {
                continue;
            }
            let (rank, bank) = (t.rank as usize, t.bank as usize);

            if self.activate_queued[rank][bank]
                && !self.bank_need_refresh[rank][bank]
                && !self.refresh_queued[rank][bank]
                && req.arrival_cycle != now
            {
                return Some(index);
            }
        }
        None
    }

    fn find_closed_bank_request(&self, ctx: &SimContext<'_>) -> Option<usize> {
        let now = ctx.queue.current_cycle();
        for (index, &id) in self.transaction_queue.iter().enumerate() {
            let req = ctx.pool.get(id);
            let t = req.address.indices();
            let queue_id = self.command_queue_id(&t);
            if !self.command_queues[queue_id].is_empty() {
                continue;
            }
            let (rank, bank) = (t.rank as usize, t.bank as usize);

            if !self.activate_queued[rank][bank]
                && !self.bank_need_refresh[rank][bank]
                && !self.refresh_queued[rank][bank]
                && req.arrival_cycle != now
            {
                return Some(index);
            }
        }
        None
    }

    fn select_transaction(&self, ctx: &SimContext<'_>) -> Selection {
        if let Some(index) = self.find_cached_request(ctx) {
            return Selection::Found(index, SelectionKind::Cached);
        }
        match self.find_write_stalled_read(ctx) {
            Selection::Stall => return Selection::Stall,
            Selection::Found(index, kind) => return Selection::Found(index, kind),
            Selection::None => {}
        }
        if let Some(index) = self.find_starved_request(ctx) {
            return Selection::Found(index, SelectionKind::Starved);
        }
        if let Some(index) = self.find_row_buffer_hit(ctx) {
            return Selection::Found(index, SelectionKind::RowBufferHit);
        }
        if let Some(index) = self.find_oldest_ready_request(ctx) {
            return Selection::Found(index, SelectionKind::OldestReady);
        }
        if let Some(index) = self.find_closed_bank_request(ctx) {
            return Selection::Found(index, SelectionKind::ClosedBank);
        }
        Selection::None
    }

    // ---- command generation --------------------------------------------

    /// Decompose one selected transaction into commands on its queue.
    fn issue_memory_commands(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> bool {
        let now = ctx.now();
        let t = ctx.pool.get(id).address.indices();
        let (rank, bank, sa) = (t.rank as usize, t.bank as usize, t.subarray as usize);
        let mux = self.mux_level(t.col);
        let queue_id = self.command_queue_id(&t);

        let target_writing = self
            .channel
            .rank(rank)
            .and_then(|r| r.bank(bank))
            .and_then(|b| b.subarray(sa))
            .is_some_and(|s| s.is_writing(now));

        // Cached shortcut: accessible without touching the bank state.
        let probe = self.cached_probe(ctx.pool.get(id));
        if self.channel.is_issuable(&probe, now).is_ok()
            && (!self.activate_queued[rank][bank]
                || !self.active_subarray[rank][bank][sa]
                || self.effective_row[rank][bank][sa] != Some(t.row)
                || self.effective_muxed_row[rank][bank][sa] != Some(mux))
        {
            ctx.pool.get_mut(id).issue_cycle = now;
            self.command_queues[queue_id].push_back(id);
            self.schedule_command_wake(ctx);
            return true;
        }

        let issued = if !self.activate_queued[rank][bank] && self.command_queues[queue_id].is_empty()
        {
            // Closed bank: activate then the column op.
            self.activate_queued[rank][bank] = true;
            self.active_subarray[rank][bank][sa] = true;
            self.effective_row[rank][bank][sa] = Some(t.row);
            self.effective_muxed_row[rank][bank][sa] = Some(mux);
            self.starvation_counter[rank][bank][sa] = 0;

            ctx.pool.get_mut(id).issue_cycle = now;

            let activate = self.make_activate_request(ctx.pool, id, now);
            if target_writing {
                ctx.pool.get_mut(activate).flags.set(Flags::PRIORITY);
            }
            self.command_queues[queue_id].push_back(activate);

            if ctx.pool.get(id).flags.contains(Flags::LAST_REQUEST) && self.params.use_precharge {
                let implicit = self.make_implicit_precharge(ctx.pool, id, now);
                self.command_queues[queue_id].push_back(implicit);
                self.active_subarray[rank][bank][sa] = false;
                self.effective_row[rank][bank][sa] = None;
                self.effective_muxed_row[rank][bank][sa] = None;
                self.activate_queued[rank][bank] = false;
            } else {
                self.command_queues[queue_id].push_back(id);
            }
            true
        } else if self.activate_queued[rank][bank]
            && (!self.active_subarray[rank][bank][sa]
                || self.effective_row[rank][bank][sa] != Some(t.row)
                || self.effective_muxed_row[rank][bank][sa] != Some(mux))
            && self.command_queues[queue_id].is_empty()
        {
            // Row miss: close the old row (unless a priority read is
            // stealing it from a pausable write), open the new one.
            self.starvation_counter[rank][bank][sa] = 0;
            self.activate_queued[rank][bank] = true;

            ctx.pool.get_mut(id).issue_cycle = now;

            let priority_steal =
                ctx.pool.get(id).flags.contains(Flags::PRIORITY) && target_writing;
            if self.active_subarray[rank][bank][sa] && self.params.use_precharge && !priority_steal
            {
                if let Some(old_row) = self.effective_row[rank][bank][sa] {
                    let precharge =
                        self.make_precharge_request(ctx.pool, old_row, bank, rank, sa, now);
                    self.command_queues[queue_id].push_back(precharge);
                }
            }

            let activate = self.make_activate_request(ctx.pool, id, now);
            if target_writing {
                ctx.pool.get_mut(activate).flags.set(Flags::PRIORITY);
            }
            self.command_queues[queue_id].push_back(activate);
            self.command_queues[queue_id].push_back(id);
            self.active_subarray[rank][bank][sa] = true;
            self.effective_row[rank][bank][sa] = Some(t.row);
            self.effective_muxed_row[rank][bank][sa] = Some(mux);
            true
        } else if self.activate_queued[rank][bank]
            && self.active_subarray[rank][bank][sa]
            && self.effective_row[rank][bank][sa] == Some(t.row)
            && self.effective_muxed_row[rank][bank][sa] == Some(mux)
        {
            // Row hit.
            self.starvation_counter[rank][bank][sa] += 1;

            ctx.pool.get_mut(id).issue_cycle = now;

            if ctx.pool.get(id).flags.contains(Flags::LAST_REQUEST) && self.params.use_precharge {
                // Restricted close-page never reaches the hit path.
                debug_assert_ne!(self.params.close_page, 2);

                let implicit = self.make_implicit_precharge(ctx.pool, id, now);
                self.command_queues[queue_id].push_back(implicit);
                self.active_subarray[rank][bank][sa] = false;
                self.effective_row[rank][bank][sa] = None;
                self.effective_muxed_row[rank][bank][sa] = None;

                if !self.active_subarray[rank][bank].iter().any(|&a| a) {
                    self.activate_queued[rank][bank] = false;
                }
            } else {
                self.command_queues[queue_id].push_back(id);
            }
            true
        } else {
            false
        };

        if issued {
            self.schedule_command_wake(ctx);
        }
        issued
    }

    // ---- wakes and queue drain -----------------------------------------

    fn schedule_transaction_wake(&self, ctx: &mut SimContext<'_>, cycle: Cycle) {
        if ctx
            .queue
            .find_event(EventKind::Cycle, self.path, None, cycle)
            .is_none()
        {
            ctx.queue
                .insert_event(EventKind::Cycle, self.path, cycle, None, PRIORITY_TRANSACTION_QUEUE);
        }
    }

    fn schedule_command_wake(&mut self, ctx: &mut SimContext<'_>) {
        let wake = self.next_wakeup(ctx);
        if wake != NEVER
            && !ctx
                .queue
                .find_callback(self.path, CallbackKind::CommandQueueWake, wake, None)
        {
            ctx.queue.insert_callback(
                self.path,
                CallbackKind::CommandQueueWake,
                wake,
                None,
                PRIORITY_COMMAND_QUEUE,
            );
        }
    }

    /// Earliest cycle any command-queue head (or pending refresh) needs
    /// service. Queues pending refreshes as a side effect, giving them
    /// priority over data commands.
    fn next_wakeup(&mut self, ctx: &mut SimContext<'_>) -> Cycle {
        let now = ctx.now();

        // Give refresh priority.
        let mut wake = NEVER;
        for rank in 0..self.params.ranks as usize {
            for group in 0..self.refresh_bank_num {
                let bank = group * self.params.banks_per_refresh.max(1) as usize;
                if self.need_refresh(bank, rank) && self.is_refresh_bank_queue_empty(bank, rank) {
                    if self.last_issue_cycle != Some(now) {
                        self.handle_refresh(ctx);
                    } else {
                        wake = wake.min(now + 1);
                    }
                }
            }
        }

        for queue in &self.command_queues {
            // The head may be issued and awaiting cleanup; the next entry
            // is what will actually be at the front.
            let head = queue
                .iter()
                .find(|&&id| !ctx.pool.get(id).flags.contains(Flags::ISSUED));
            if let Some(&head) = head {
                wake = wake.min(self.channel.next_issuable(ctx.pool.get(head), now));
            }
        }

        if wake != NEVER && wake <= now {
            wake = now + 1;
        }
        wake
    }

    /// Drain pass: issue at most one issuable queue head.
    fn cycle_command_queues(&mut self, ctx: &mut SimContext<'_>) {
        let now = ctx.now();

        // A refresh handled this cycle takes the issue slot.
        if self.handled_refresh == Some(now) {
            return;
        }

        let count = self.command_queues.len();
        for offset in 0..count {
            let queue_id = (self.cur_queue + offset) % count;
            let Some(&head) = self.command_queues[queue_id].front() else {
                continue;
            };
            if ctx.pool.get(head).flags.contains(Flags::ISSUED) {
                continue;
            }

            if self.last_issue_cycle != Some(now)
                && self
                    .channel
                    .is_issuable(ctx.pool.get(head), now)
                    .is_ok()
            {
                {
                    let req = ctx.pool.get(head);
                    debug!(
                        controller = self.id,
                        cycle = now,
                        op = ?req.op,
                        address = format_args!("{:#x}", req.address.physical()),
                        queue = queue_id,
                        "issue"
                    );
                }

                let name = self.name.clone();
                let req_snapshot = ctx.pool.get(head).clone();
                ctx.hooks.notify_pre_issue(&name, &req_snapshot, now);
                let accepted = self.channel.issue_command(head, ctx);
                ctx.hooks.notify_post_issue(&name, &req_snapshot, now, accepted);

                ctx.pool.get_mut(head).flags.set(Flags::ISSUED);

                if req_snapshot.op == OpType::Refresh {
                    let t = req_snapshot.address.indices();
                    self.reset_refresh_queued(t.bank as usize, t.rank as usize);
                }

                self.last_issue_cycle = Some(now);

                // Two-phase issue: purge issued entries next cycle so
                // same-cycle observers still see them in flight.
                let cleanup = now + 1;
                if !ctx
                    .queue
                    .find_callback(self.path, CallbackKind::Cleanup, cleanup, None)
                {
                    ctx.queue.insert_callback(
                        self.path,
                        CallbackKind::Cleanup,
                        cleanup,
                        None,
                        PRIORITY_CLEANUP,
                    );
                }

                // The queue drains next cycle; wake a transaction for it.
                if self.command_queues[queue_id].len() == 1
                    && self.transaction_available(queue_id, ctx.pool)
                {
                    ctx.queue.insert_event(
                        EventKind::Cycle,
                        self.path,
                        now + 1,
                        None,
                        PRIORITY_TRANSACTION_QUEUE,
                    );
                }

                self.move_current_queue();
                return;
            }

            // Deadlock watchdog.
            let head_req = ctx.pool.get(head);
            let (op, physical, arrival, issued) = (
                head_req.op,
                head_req.address.physical(),
                head_req.arrival_cycle,
                head_req.issue_cycle,
            );
            let t = head_req.address.indices();
            if now.saturating_sub(issued) > self.params.deadlock_timer {
                error!(
                    controller = self.id,
                    address = format_args!("{physical:#x}"),
                    op = ?op,
                    rank = t.rank,
                    bank = t.bank,
                    subarray = t.subarray,
                    row = t.row,
                    col = t.col,
                    queued = arrival,
                    issued,
                    cycle = now,
                    "command stuck beyond the deadlock timer"
                );
                ctx.raise_fault(
                    &self.name,
                    format!(
                        "command {op:?} at {physical:#x} not issuable for {} cycles",
                        now - issued
                    ),
                );
                return;
            }
        }
    }

    fn move_current_queue(&mut self) {
        if self.params.schedule_scheme != 0 {
            self.cur_queue = (self.cur_queue + 1) % self.command_queues.len().max(1);
        }
    }

    // ---- callbacks ------------------------------------------------------

    /// Command-queue wake: re-arm, drain, run low power, catch up devices.
    pub fn command_queue_callback(&mut self, ctx: &mut SimContext<'_>) {
        let now = ctx.now();
        let real_steps = now - self.last_command_wake;
        self.last_command_wake = now;
        self.wakeup_count += 1;

        self.schedule_command_wake(ctx);
        self.cycle_command_queues(ctx);
        if self.params.use_low_power {
            self.handle_low_power(ctx);
        }

        self.channel.cycle(real_steps, ctx);
    }

    /// Staggered refresh pulse fired.
    pub fn refresh_callback(&mut self, pulse: RequestId, ctx: &mut SimContext<'_>) {
        let now = ctx.now();
        let real_steps = now - self.last_command_wake;
        self.last_command_wake = now;
        self.wakeup_count += 1;

        self.process_refresh_pulse(pulse, ctx);
        if self.handle_refresh(ctx) {
            self.schedule_command_wake(ctx);
        }

        self.channel.cycle(real_steps, ctx);
    }

    /// Purge issued command-queue entries.
    pub fn cleanup_callback(&mut self, ctx: &mut SimContext<'_>) {
        for queue in &mut self.command_queues {
            queue.retain(|&id| !ctx.pool.get(id).flags.contains(Flags::ISSUED));
        }
    }

    /// Re-check the transaction queues for work that can start now that a
    /// command queue drained.
    fn recheck_transactions(&self, ctx: &mut SimContext<'_>) {
        let next = ctx.now() + 1;
        if ctx
            .queue
            .find_event(EventKind::Cycle, self.path, None, next)
            .is_some()
        {
            return;
        }
        for queue_id in 0..self.command_queues.len() {
            if self.effectively_empty(queue_id, ctx.pool)
                && self.transaction_available(queue_id, ctx.pool)
            {
                ctx.queue.insert_event(
                    EventKind::Cycle,
                    self.path,
                    next,
                    None,
                    PRIORITY_TRANSACTION_QUEUE,
                );
                break;
            }
        }
    }
}

impl Module for MemoryController {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> ModulePath {
        self.path
    }

    /// Whether the transaction queue can accept another request.
    fn is_issuable(&self, _req: &Request, _now: Cycle) -> Result<(), FailReason> {
        if self.transaction_queue.len() >= self.params.queue_size as usize {
            Err(FailReason::QueueFull)
        } else {
            Ok(())
        }
    }

    fn next_issuable(&self, _req: &Request, now: Cycle) -> Cycle {
        if self.transaction_queue.len() >= self.params.queue_size as usize {
            now + 1
        } else {
            now
        }
    }

    /// Accept a read or write into the transaction queue.
    fn issue_command(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> bool {
        if self.transaction_queue.len() >= self.params.queue_size as usize {
            return false;
        }

        let now = ctx.now();
        // Retranslate with the controller's own decoder; the routed
        // channel is authoritative, deeper fields may differ.
        let (queue_id, op) = {
            let req = ctx.pool.get_mut(id);
            let channel = req
                .address
                .translated()
                .map_or(self.id as u64, |t| t.channel);
            let mut t = self.translator.translate(req.address.physical());
            t.channel = channel;
            req.address.set_translated(t);

            req.arrival_cycle = now;
            req.queue_cycle = now;
            match req.op {
                OpType::Read => req.flags.set(Flags::IS_READ),
                OpType::Write => req.flags.set(Flags::IS_WRITE),
                other => warn!(?other, "transaction queue received a non-column request"),
            }
            (self.command_queue_id(&t), req.op)
        };

        match op {
            OpType::Read => self.mem_reads += 1,
            OpType::Write => self.mem_writes += 1,
            _ => {}
        }

        self.transaction_queue.push_back(id);

        // An effectively empty command queue can take work immediately.
        if self.effectively_empty(queue_id, ctx.pool) {
            self.schedule_transaction_wake(ctx, now);
        }
        true
    }

    fn request_complete(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> Completion {
        let now = ctx.now();
        let (op, owner, issue_cycle, arrival_cycle) = {
            let req = ctx.pool.get_mut(id);
            if req.op.is_column() {
                req.status = RequestStatus::Complete;
                req.completion_cycle = now;
            }
            (req.op, req.owner, req.issue_cycle, req.arrival_cycle)
        };

        if op.is_column() {
            self.average_latency = (self.average_latency * self.measured_latencies as f64
                + (now - issue_cycle) as f64)
                / (self.measured_latencies + 1) as f64;
            self.measured_latencies += 1;

            self.average_queue_latency = (self.average_queue_latency
                * self.measured_queue_latencies as f64
                + (issue_cycle - arrival_cycle) as f64)
                / (self.measured_queue_latencies + 1) as f64;
            self.measured_queue_latencies += 1;
        }

        if owner == self.path {
            // Synthesized activate/precharge/refresh commands come home to
            // die here.
            ctx.pool.remove(id);
            Completion::Owned
        } else {
            Completion::Forward
        }
    }

    /// Transaction wake: pick one transaction, decompose it, drain.
    fn cycle(&mut self, _steps: Cycle, ctx: &mut SimContext<'_>) {
        let selection = match self.select_transaction(ctx) {
            Selection::Found(index, kind) => Some((index, kind)),
            Selection::Stall | Selection::None => None,
        };

        if let Some((index, kind)) = selection {
            let id = self
                .transaction_queue
                .remove(index)
                .expect("selected transaction vanished");

            match kind {
                SelectionKind::Starved => {
                    self.rb_miss += 1;
                    self.starvation_precharges += 1;
                }
                SelectionKind::RowBufferHit => self.rb_hits += 1,
                SelectionKind::WriteStalledRead => {
                    self.write_pauses_granted += 1;
                    ctx.pool.get_mut(id).flags.set(Flags::PRIORITY);
                }
                SelectionKind::Cached => {}
                SelectionKind::OldestReady | SelectionKind::ClosedBank => self.rb_miss += 1,
            }

            if self.is_last_request(ctx.pool, ctx.pool.get(id)) {
                ctx.pool.get_mut(id).flags.set(Flags::LAST_REQUEST);
            }

            self.issue_memory_commands(id, ctx);
        }

        self.cycle_command_queues(ctx);
        self.recheck_transactions(ctx);
    }

    fn register_stats(&self, sink: &mut StatSink) {
        sink.counter("mem_reads", self.mem_reads);
        sink.counter("mem_writes", self.mem_writes);
        sink.counter("rb_hits", self.rb_hits);
        sink.counter("rb_miss", self.rb_miss);
        sink.counter("starvation_precharges", self.starvation_precharges);
        sink.counter("write_pauses_granted", self.write_pauses_granted);
        sink.counter("wakeup_count", self.wakeup_count);
        sink.float("average_latency", self.average_latency);
        sink.float("average_queue_latency", self.average_queue_latency);
        sink.counter("measured_latencies", self.measured_latencies);
        sink.counter("measured_queue_latencies", self.measured_queue_latencies);
        sink.push_prefix(self.channel.name());
        self.channel.register_stats(sink);
        sink.pop_prefix();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{Address, Config, HookRegistry, SimFault};

    fn build(extra: &[(&str, &str)]) -> (MemoryController, EventQueue, RequestPool) {
        let mut config = Config::new();
        for (key, value) in [
            ("CHANNELS", "1"),
            ("RANKS", "2"),
            ("BANKS", "4"),
            ("ROWS", "1024"),
            ("COLS", "256"),
            ("MaxQueue", "4"),
        ] {
            config.set(key, value);
        }
        for (key, value) in extra {
            config.set(key, value);
        }
        let params = Rc::new(Params::from_config(&config).expect("params"));
        let mut queue = EventQueue::new();
        let mut pool = RequestPool::new();
        let controller =
            MemoryController::new(0, params, &mut queue, &mut pool).expect("controller");
        (controller, queue, pool)
    }

    fn translated(rank: u64, bank: u64, subarray: u64) -> Translated {
        Translated {
            rank,
            bank,
            subarray,
            ..Translated::default()
        }
    }

    #[test]
    fn per_bank_queue_ids_follow_the_schedule_scheme() {
        // Bank-first round robin: rank-major indexing.
        let (bank_first, _, _) = build(&[("ScheduleScheme", "2")]);
        assert_eq!(bank_first.command_queue_id(&translated(1, 2, 0)), 6);

        // Rank-first round robin: bank-major indexing.
        let (rank_first, _, _) = build(&[("ScheduleScheme", "1")]);
        assert_eq!(rank_first.command_queue_id(&translated(1, 2, 0)), 5);
    }

    #[test]
    fn per_subarray_queues_index_by_subarray() {
        let (controller, _, _) = build(&[
            ("QueueModel", "PerSubArray"),
            ("MATHeight", "512"),
        ]);
        // 2 subarrays per bank: (rank, bank, sa) flattens rank-major.
        assert_eq!(controller.command_queue_id(&translated(0, 0, 1)), 1);
        assert_eq!(controller.command_queue_id(&translated(1, 3, 1)), 15);
    }

    #[test]
    fn prequeued_transactions_jump_the_line() {
        let (mut controller, mut queue, mut pool) = build(&[]);
        let mut hooks = HookRegistry::new();
        let mut fault: Option<SimFault> = None;

        let first = pool.insert(Request::new(
            OpType::Read,
            Address::new(0x1000),
            ModulePath::Driver,
        ));
        let urgent = pool.insert(Request::new(
            OpType::Read,
            Address::new(0x2000),
            ModulePath::Driver,
        ));

        let mut ctx = SimContext {
            queue: &mut queue,
            pool: &mut pool,
            hooks: &mut hooks,
            fault: &mut fault,
        };
        assert!(controller.issue_command(first, &mut ctx));
        controller.prequeue(urgent);

        assert_eq!(controller.transaction_queue.front(), Some(&urgent));
        assert_eq!(controller.transaction_queue.back(), Some(&first));
    }

    #[test]
    fn transaction_queue_bound_reports_queue_full() {
        let (mut controller, mut queue, mut pool) = build(&[("MaxQueue", "1")]);
        let mut hooks = HookRegistry::new();
        let mut fault: Option<SimFault> = None;

        let probe = Request::new(OpType::Read, Address::new(0), ModulePath::Driver);
        assert!(controller.is_issuable(&probe, 0).is_ok());

        let id = pool.insert(probe.clone());
        let mut ctx = SimContext {
            queue: &mut queue,
            pool: &mut pool,
            hooks: &mut hooks,
            fault: &mut fault,
        };
        assert!(controller.issue_command(id, &mut ctx));
        assert_eq!(
            controller.is_issuable(&probe, 0),
            Err(FailReason::QueueFull)
        );
    }

    #[test]
    fn relaxed_close_page_marks_only_the_last_row_reference() {
        let (mut controller, mut queue, mut pool) = build(&[("ClosePage", "1")]);
        let mut hooks = HookRegistry::new();
        let mut fault: Option<SimFault> = None;

        // Two requests to the same row, one to another row.
        let same_row_a = pool.insert(Request::new(
            OpType::Read,
            Address::new(0x1000),
            ModulePath::Driver,
        ));
        let same_row_b = pool.insert(Request::new(
            OpType::Read,
            Address::new(0x1040),
            ModulePath::Driver,
        ));
        let other_row = pool.insert(Request::new(
            OpType::Read,
            Address::new(0x20000),
            ModulePath::Driver,
        ));

        let mut ctx = SimContext {
            queue: &mut queue,
            pool: &mut pool,
            hooks: &mut hooks,
            fault: &mut fault,
        };
        for id in [same_row_a, same_row_b, other_row] {
            assert!(controller.issue_command(id, &mut ctx));
        }

        // With its twin still queued, row A is not "last"; the lone
        // request to the other row is.
        assert!(!controller.is_last_request(ctx.pool, ctx.pool.get(same_row_a)));
        assert!(controller.is_last_request(ctx.pool, ctx.pool.get(other_row)));
    }
}
