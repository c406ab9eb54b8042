//! Subarray: one row buffer's worth of cells.
//!
//! The subarray owns the row-buffer state and the command deadlines that
//! follow from it. Every issued command pushes deadlines forward; checks
//! compare the current cycle against them:
//!
//! - `ACTIVATE`: needs a closed array past `next_activate`; opens the row,
//!   arms `tRCD` (column ops), `tRAS` (precharge) and `tRC` (next activate).
//! - `READ`: needs the open row past `next_read`; data returns after
//!   `tCAS + tBURST`, precharge allowed after `tRTP`.
//! - `WRITE`: as read but with `tCWD` and write recovery `tWR`; on NVM the
//!   cells then program for `tWP` more cycles, split into `MLCLevels`
//!   iterations between which the write may be paused or cancelled.
//! - `PRECHARGE`: closes the row, arms `tRP`.
//!
//! The subarray also holds the written contents (so reads observe the last
//! write), the data encoder, and the endurance model.

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::json;
use tracing::{debug, error};

use sim_core::{
    Completion, Cycle, DataBlock, FailReason, Flags, Module, ModulePath, OpType, Params, Request,
    RequestId, SimContext, StatSink,
};

use crate::encoder::DataEncoder;
use crate::endurance::EnduranceModel;

/// An in-flight cell write.
struct WriteState {
    req: RequestId,
    /// Pending completion event, rescheduled when the write is paused.
    response: sim_core::EventId,
    /// Cycle the completion event currently sits at.
    response_cycle: Cycle,
    /// Cell programming start (after the data burst).
    start: Cycle,
    /// Cell programming end.
    end: Cycle,
    /// Iteration length; pause points fall on multiples of it.
    iter_len: Cycle,
    /// A forced write may not be paused or cancelled.
    forced: bool,
}

/// A write displaced by a priority read, waiting to resume.
struct PausedWrite {
    req: RequestId,
    /// Programming cycles still owed.
    remaining: Cycle,
    forced: bool,
}

/// One subarray of a bank.
pub struct SubArray {
    name: String,
    path: ModulePath,
    params: Rc<Params>,

    open_row: Option<u64>,
    next_activate: Cycle,
    next_read: Cycle,
    next_write: Cycle,
    next_precharge: Cycle,

    current_write: Option<WriteState>,
    paused_write: Option<PausedWrite>,

    /// Stored (encoded) contents per (row, col).
    contents: HashMap<(u64, u64), DataBlock>,
    encoder: Option<Box<dyn DataEncoder>>,
    endurance: Option<Box<dyn EnduranceModel>>,

    activates: u64,
    reads: u64,
    writes: u64,
    precharges: u64,
    refreshes: u64,
    write_pauses: u64,
    write_cancels: u64,
    endurance_faults: u64,
}

impl SubArray {
    #[must_use]
    pub fn new(
        path: ModulePath,
        name: String,
        params: Rc<Params>,
        encoder: Option<Box<dyn DataEncoder>>,
        endurance: Option<Box<dyn EnduranceModel>>,
    ) -> Self {
        Self {
            name,
            path,
            params,
            open_row: None,
            next_activate: 0,
            next_read: 0,
            next_write: 0,
            next_precharge: 0,
            current_write: None,
            paused_write: None,
            contents: HashMap::new(),
            encoder,
            endurance,
            activates: 0,
            reads: 0,
            writes: 0,
            precharges: 0,
            refreshes: 0,
            write_pauses: 0,
            write_cancels: 0,
            endurance_faults: 0,
        }
    }

    /// Which row, if any, is at the sense amplifiers.
    #[must_use]
    pub fn open_row(&self) -> Option<u64> {
        self.open_row
    }

    /// A cell write is in progress (data burst or programming).
    #[must_use]
    pub fn is_writing(&self, now: Cycle) -> bool {
        self.current_write.as_ref().is_some_and(|w| now < w.end)
    }

    /// The in-progress write sits at an iteration boundary where it may be
    /// paused or cancelled.
    #[must_use]
    pub fn between_write_iterations(&self, now: Cycle) -> bool {
        self.current_write
            .as_ref()
            .is_some_and(|w| now >= w.start && now < w.end && (now - w.start) % w.iter_len == 0)
    }

    fn pausable_by(&self, req: &Request, now: Cycle) -> bool {
        req.flags.contains(Flags::PRIORITY)
            && self.is_writing(now)
            && self.between_write_iterations(now)
            && !self.current_write.as_ref().is_some_and(|w| w.forced)
    }

    fn iter_len(&self) -> Cycle {
        (self.params.t_wp / self.params.mlc_levels.max(1)).max(1)
    }

    /// Earliest upcoming pause point of the in-progress write.
    fn next_pause_point(&self, now: Cycle) -> Cycle {
        self.current_write.as_ref().map_or(now, |w| {
            if now <= w.start {
                w.start
            } else {
                let into = now - w.start;
                w.start + into.next_multiple_of(w.iter_len).min(w.end - w.start)
            }
        })
    }

    fn schedule_response(
        &self,
        ctx: &mut SimContext<'_>,
        id: RequestId,
        cycle: Cycle,
    ) -> sim_core::EventId {
        ctx.queue
            .insert_event(sim_core::EventKind::Response, self.path, cycle, Some(id), 0)
    }

    /// Suspend the in-progress write. `restart` drops the progress made so
    /// far (row is being stolen), a plain pause keeps it.
    fn suspend_write(&mut self, ctx: &mut SimContext<'_>, now: Cycle, restart: bool) {
        let Some(write) = self.current_write.take() else {
            return;
        };
        ctx.queue.remove_event(write.response, write.response_cycle);

        let remaining = if restart {
            self.write_cancels += 1;
            write.end - write.start
        } else {
            self.write_pauses += 1;
            write.end - now
        };

        let req = ctx.pool.get_mut(write.req);
        req.flags.set(if restart {
            Flags::CANCELLED
        } else {
            Flags::PAUSED
        });
        req.cancellations += 1;
        req.write_progress = remaining;
        debug!(
            subarray = %self.name,
            cycle = now,
            remaining,
            restart,
            "write suspended"
        );

        self.paused_write = Some(PausedWrite {
            req: write.req,
            remaining,
            forced: write.forced,
        });
    }

    fn endurance_check(&mut self, ctx: &mut SimContext<'_>, req: &Request, cost: i64) {
        if cost >= 0 {
            return;
        }
        self.endurance_faults += 1;
        error!(
            subarray = %self.name,
            address = format_args!("{:#x}", req.address.physical()),
            "write to worn-out granule"
        );
        if self.params.endurance_fatal {
            ctx.raise_fault(
                &self.name,
                format!(
                    "endurance exhausted at {:#x}",
                    req.address.physical()
                ),
            );
        }
    }

    fn activate(&mut self, id: RequestId, ctx: &mut SimContext<'_>) {
        let now = ctx.now();
        let req = ctx.pool.get(id);
        let row = req.address.indices().row;
        let priority = req.flags.contains(Flags::PRIORITY);

        if self.open_row.is_some() && priority && self.pausable_by(ctx.pool.get(id), now) {
            // Stealing the row from an in-progress write: it restarts.
            self.suspend_write(ctx, now, true);
        }

        self.activates += 1;
        self.open_row = Some(row);
        self.next_read = self.next_read.max(now + self.params.t_rcd);
        self.next_write = self.next_write.max(now + self.params.t_rcd);
        self.next_precharge = self.next_precharge.max(now + self.params.t_ras);
        self.next_activate = self.next_activate.max(now + self.params.t_rc);

        self.schedule_response(ctx, id, now + self.params.t_rcd);
    }

    fn read(&mut self, id: RequestId, ctx: &mut SimContext<'_>) {
        let now = ctx.now();
        if self.is_writing(now) {
            self.suspend_write(ctx, now, false);
        }

        self.reads += 1;

        let indices = ctx.pool.get(id).address.indices();
        let cost = self
            .endurance
            .as_ref()
            .map_or(0, |model| model.read(ctx.pool.get(id)));
        if cost < 0 {
            let req = ctx.pool.get(id).clone();
            self.endurance_check(ctx, &req, cost);
        }

        if let Some(stored) = self.contents.get(&(indices.row, indices.col)) {
            ctx.pool.get_mut(id).data = stored.clone();
        }
        let extra = match &mut self.encoder {
            Some(encoder) => encoder.read(ctx.pool.get_mut(id)),
            None => 0,
        };

        self.next_precharge = self.next_precharge.max(now + self.params.t_rtp);
        self.next_read = self.next_read.max(now + self.params.t_burst);
        self.next_write = self.next_write.max(
            now + (self.params.t_cas + self.params.t_burst + self.params.t_rtrs)
                .saturating_sub(self.params.t_cwd),
        );

        let mut done = now + self.params.t_cas + self.params.t_burst + extra;
        if ctx.pool.get(id).op == OpType::ReadPrecharge {
            // The implicit precharge is part of the request; it completes
            // once the row is closed again.
            done += self.params.t_rp;
            self.precharges += 1;
            self.open_row = None;
            self.next_activate = self
                .next_activate
                .max(now + self.params.t_rtp + self.params.t_rp);
        }
        self.schedule_response(ctx, id, done);
    }

    fn write(&mut self, id: RequestId, ctx: &mut SimContext<'_>) {
        let now = ctx.now();
        self.writes += 1;

        let cost = match &mut self.endurance {
            Some(model) => model.write(ctx.pool.get(id)),
            None => 0,
        };
        if cost < 0 {
            let req = ctx.pool.get(id).clone();
            self.endurance_check(ctx, &req, cost);
        }

        let extra = match &mut self.encoder {
            Some(encoder) => encoder.write(ctx.pool.get_mut(id)),
            None => 0,
        };

        let req = ctx.pool.get(id);
        let indices = req.address.indices();
        let forced = req.flags.contains(Flags::FORCED);
        self.contents
            .insert((indices.row, indices.col), req.data.clone());

        let data_done = now + self.params.t_cwd + self.params.t_burst + extra;
        let program = self.params.t_wp;
        let end = data_done + program;

        self.next_read = self.next_read.max(data_done);
        self.next_write = self.next_write.max(data_done);
        self.next_precharge = self
            .next_precharge
            .max(now + self.params.t_cwd + self.params.t_burst + self.params.t_wr);

        let implicit_precharge = ctx.pool.get(id).op == OpType::WritePrecharge;
        let completion = if implicit_precharge {
            end.max(now + self.params.t_cwd + self.params.t_burst + self.params.t_wr)
                + self.params.t_rp
        } else {
            end
        };
        let response = self.schedule_response(ctx, id, completion);
        if program > 0 {
            self.current_write = Some(WriteState {
                req: id,
                response,
                response_cycle: completion,
                start: data_done,
                end,
                iter_len: self.iter_len(),
                forced,
            });
        }

        if implicit_precharge {
            self.precharges += 1;
            self.open_row = None;
            self.next_activate = self.next_activate.max(
                end.max(now + self.params.t_cwd + self.params.t_burst + self.params.t_wr)
                    + self.params.t_rp,
            );
        }
    }

    fn precharge(&mut self, id: RequestId, ctx: &mut SimContext<'_>) {
        let now = ctx.now();
        self.close(now);
        self.schedule_response(ctx, id, now + self.params.t_rp);
    }

    /// Close the row without a completion event (precharge-all fan-out).
    pub fn close(&mut self, now: Cycle) {
        if self.open_row.is_some() {
            self.precharges += 1;
            self.open_row = None;
            self.next_activate = self.next_activate.max(now + self.params.t_rp);
        }
    }

    /// Block the array for the refresh window (driven from the bank).
    pub fn refresh(&mut self, now: Cycle) {
        self.refreshes += 1;
        self.next_activate = self.next_activate.max(now + self.params.t_rfc);
    }

    /// Checkpointable state: contents, encoder and endurance.
    #[must_use]
    pub fn checkpoint(&self) -> serde_json::Value {
        let contents: serde_json::Map<String, serde_json::Value> = self
            .contents
            .iter()
            .map(|((row, col), data)| (format!("{row}:{col}"), json!(data.to_string())))
            .collect();
        json!({
            "contents": contents,
            "encoder": self.encoder.as_ref().map(|e| e.checkpoint()),
            "endurance": self.endurance.as_ref().map(|e| e.checkpoint()),
        })
    }

    pub fn restore(&mut self, state: &serde_json::Value) {
        self.contents.clear();
        if let Some(contents) = state.get("contents").and_then(|v| v.as_object()) {
            for (key, value) in contents {
                let Some((row, col)) = key.split_once(':') else {
                    continue;
                };
                let (Ok(row), Ok(col)) = (row.parse(), col.parse()) else {
                    continue;
                };
                if let Some(hex) = value.as_str() {
                    if let Ok(data) = DataBlock::parse_hex(hex) {
                        self.contents.insert((row, col), data);
                    }
                }
            }
        }
        if let (Some(encoder), Some(state)) = (self.encoder.as_mut(), state.get("encoder")) {
            encoder.restore(state);
        }
        if let (Some(endurance), Some(state)) = (self.endurance.as_mut(), state.get("endurance")) {
            endurance.restore(state);
        }
    }
}

impl Module for SubArray {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> ModulePath {
        self.path
    }

    fn is_issuable(&self, req: &Request, now: Cycle) -> Result<(), FailReason> {
        match req.op {
            OpType::Activate => match self.open_row {
                None if now >= self.next_activate => Ok(()),
                None => Err(FailReason::Timing),
                Some(_) if self.pausable_by(req, now) => Ok(()),
                Some(_) => Err(FailReason::State),
            },
            OpType::Read | OpType::ReadPrecharge => {
                let row = req.address.indices().row;
                if self.open_row != Some(row) {
                    return Err(FailReason::RowMismatch);
                }
                if self.is_writing(now) && !self.pausable_by(req, now) {
                    return Err(FailReason::State);
                }
                if now < self.next_read {
                    return Err(FailReason::Timing);
                }
                Ok(())
            }
            OpType::Write | OpType::WritePrecharge => {
                let row = req.address.indices().row;
                if self.open_row != Some(row) {
                    return Err(FailReason::RowMismatch);
                }
                if self.is_writing(now) {
                    return Err(FailReason::State);
                }
                if now < self.next_write {
                    return Err(FailReason::Timing);
                }
                Ok(())
            }
            OpType::Precharge | OpType::PrechargeAll => {
                if self.is_writing(now) {
                    return Err(FailReason::State);
                }
                if self.open_row.is_some() && now < self.next_precharge {
                    return Err(FailReason::Timing);
                }
                Ok(())
            }
            OpType::Refresh => {
                if self.open_row.is_some() {
                    Err(FailReason::State)
                } else if now < self.next_activate {
                    Err(FailReason::Timing)
                } else {
                    Ok(())
                }
            }
            _ => Err(FailReason::Unsupported),
        }
    }

    fn next_issuable(&self, req: &Request, now: Cycle) -> Cycle {
        let writing_until = self.current_write.as_ref().map_or(now, |w| w.end);
        match req.op {
            OpType::Activate => {
                if self.open_row.is_some() && self.is_writing(now) {
                    self.next_pause_point(now)
                } else {
                    now.max(self.next_activate)
                }
            }
            OpType::Read | OpType::ReadPrecharge => {
                if self.is_writing(now) {
                    if req.flags.contains(Flags::PRIORITY) {
                        self.next_pause_point(now).max(self.next_read)
                    } else {
                        writing_until.max(self.next_read)
                    }
                } else {
                    now.max(self.next_read)
                }
            }
            OpType::Write | OpType::WritePrecharge => writing_until.max(self.next_write).max(now),
            OpType::Precharge | OpType::PrechargeAll => {
                if self.open_row.is_some() {
                    writing_until.max(self.next_precharge).max(now)
                } else {
                    now
                }
            }
            OpType::Refresh => now.max(self.next_activate),
            _ => now,
        }
    }

    fn issue_command(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> bool {
        match ctx.pool.get(id).op {
            OpType::Activate => self.activate(id, ctx),
            OpType::Read | OpType::ReadPrecharge => self.read(id, ctx),
            OpType::Write | OpType::WritePrecharge => self.write(id, ctx),
            OpType::Precharge | OpType::PrechargeAll => self.precharge(id, ctx),
            _ => return false,
        }
        true
    }

    fn request_complete(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> Completion {
        let op = ctx.pool.get(id).op;

        if op.is_write() && self.current_write.as_ref().is_some_and(|w| w.req == id) {
            self.current_write = None;
        }

        // A completed priority read lets a displaced write resume.
        if op.is_read() {
            if let Some(paused) = self.paused_write.take() {
                let now = ctx.now();
                let end = now + paused.remaining;
                let response = self.schedule_response(ctx, paused.req, end);
                ctx.pool.get_mut(paused.req).flags.clear(Flags::PAUSED);
                self.current_write = Some(WriteState {
                    req: paused.req,
                    response,
                    response_cycle: end,
                    start: now,
                    end,
                    iter_len: self.iter_len(),
                    forced: paused.forced,
                });
            }
        }

        Completion::Forward
    }

    fn cycle(&mut self, _steps: Cycle, _ctx: &mut SimContext<'_>) {}

    fn register_stats(&self, sink: &mut StatSink) {
        sink.counter("activates", self.activates);
        sink.counter("reads", self.reads);
        sink.counter("writes", self.writes);
        sink.counter("precharges", self.precharges);
        sink.counter("refreshes", self.refreshes);
        sink.counter("write_pauses", self.write_pauses);
        sink.counter("write_cancels", self.write_cancels);
        sink.counter("endurance_faults", self.endurance_faults);
        if let Some(encoder) = &self.encoder {
            sink.push_prefix(encoder.name());
            encoder.register_stats(sink);
            sink.pop_prefix();
        }
        if let Some(endurance) = &self.endurance {
            sink.push_prefix(endurance.name());
            endurance.register_stats(sink);
            sink.pop_prefix();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{Address, Config, EventQueue, HookRegistry, RequestPool, Translated};

    fn params(extra: &[(&str, &str)]) -> Rc<Params> {
        let mut config = Config::new();
        for (key, value) in [
            ("CHANNELS", "1"),
            ("RANKS", "1"),
            ("BANKS", "1"),
            ("ROWS", "1024"),
            ("COLS", "256"),
            ("tRCD", "5"),
            ("tCAS", "6"),
            ("tBURST", "4"),
            ("RATE", "2"),
            ("tRAS", "20"),
            ("tRP", "5"),
            ("tRTP", "3"),
            ("tWR", "6"),
            ("tCWD", "4"),
            ("tRC", "25"),
            ("tRFC", "50"),
        ] {
            config.set(key, value);
        }
        for (key, value) in extra {
            config.set(key, value);
        }
        Rc::new(Params::from_config(&config).expect("params"))
    }

    struct Fixture {
        queue: EventQueue,
        pool: RequestPool,
        hooks: HookRegistry,
        subarray: SubArray,
    }

    impl Fixture {
        fn new(extra: &[(&str, &str)]) -> Self {
            let params = params(extra);
            Self {
                queue: EventQueue::new(),
                pool: RequestPool::new(),
                hooks: HookRegistry::new(),
                subarray: SubArray::new(
                    ModulePath::SubArray(0, 0, 0, 0),
                    "subarray0".to_owned(),
                    params,
                    None,
                    None,
                ),
            }
        }

        fn request(&mut self, op: OpType, row: u64, col: u64) -> RequestId {
            let mut req = Request::new(op, Address::new(0), ModulePath::Driver);
            req.address.set_translated(Translated {
                row,
                col,
                ..Translated::default()
            });
            if op.is_read() {
                req.flags.set(Flags::IS_READ);
            }
            if op.is_write() {
                req.flags.set(Flags::IS_WRITE);
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
            self.subarray.issue_command(id, &mut ctx)
        }

        fn advance(&mut self, cycle: Cycle) {
            while self.queue.pop_due(cycle).is_some() {}
            self.queue.sync_to(cycle);
        }

        fn check(&self, id: RequestId) -> Result<(), FailReason> {
            self.subarray
                .is_issuable(self.pool.get(id), self.queue.current_cycle())
        }
    }

    #[test]
    fn activate_then_read_obeys_trcd() {
        let mut fx = Fixture::new(&[]);
        let act = fx.request(OpType::Activate, 3, 0);
        let read = fx.request(OpType::Read, 3, 0);

        assert!(fx.check(act).is_ok());
        assert!(fx.issue(act));
        assert_eq!(fx.subarray.open_row(), Some(3));

        // Column read blocked until tRCD.
        assert_eq!(fx.check(read), Err(FailReason::Timing));
        assert_eq!(
            fx.subarray.next_issuable(fx.pool.get(read), 0),
            5,
            "read becomes issuable at tRCD"
        );
        fx.advance(5);
        assert!(fx.check(read).is_ok());
    }

    #[test]
    fn read_to_wrong_row_is_a_row_mismatch() {
        let mut fx = Fixture::new(&[]);
        let act = fx.request(OpType::Activate, 3, 0);
        fx.issue(act);
        fx.advance(5);
        let read = fx.request(OpType::Read, 4, 0);
        assert_eq!(fx.check(read), Err(FailReason::RowMismatch));
    }

    #[test]
    fn activate_after_precharge_obeys_trp() {
        let mut fx = Fixture::new(&[]);
        let act = fx.request(OpType::Activate, 1, 0);
        fx.issue(act);
        fx.advance(20); // past tRAS

        let pre = fx.request(OpType::Precharge, 1, 0);
        assert!(fx.check(pre).is_ok());
        assert!(fx.issue(pre));
        assert_eq!(fx.subarray.open_row(), None);

        let act2 = fx.request(OpType::Activate, 2, 0);
        assert_eq!(fx.check(act2), Err(FailReason::Timing));
        assert_eq!(fx.subarray.next_issuable(fx.pool.get(act2), 20), 25);
    }

    #[test]
    fn read_after_write_waits_for_data_phase() {
        let mut fx = Fixture::new(&[]);
        let act = fx.request(OpType::Activate, 1, 0);
        fx.issue(act);
        fx.advance(5);

        let write = fx.request(OpType::Write, 1, 0);
        assert!(fx.check(write).is_ok());
        fx.issue(write);

        let read = fx.request(OpType::Read, 1, 0);
        assert_eq!(fx.check(read), Err(FailReason::Timing));
        // Data phase ends at 5 + tCWD + tBURST = 13.
        fx.advance(13);
        assert!(fx.check(read).is_ok());
    }

    #[test]
    fn reads_return_last_written_data() {
        let mut fx = Fixture::new(&[]);
        let act = fx.request(OpType::Activate, 1, 7);
        fx.issue(act);
        fx.advance(5);

        let write = fx.request(OpType::Write, 1, 7);
        fx.pool.get_mut(write).data = DataBlock::from_bytes(vec![0xab; 64]);
        fx.issue(write);
        fx.advance(13);

        let read = fx.request(OpType::Read, 1, 7);
        fx.issue(read);
        assert_eq!(fx.pool.get(read).data.as_slice(), &[0xab; 64]);
    }

    #[test]
    fn priority_read_pauses_nvm_write_between_iterations() {
        // tWP = 12 over 4 levels: pause points every 3 cycles from the end
        // of the data phase.
        let mut fx = Fixture::new(&[("tWP", "12"), ("MLCLevels", "4"), ("WritePausing", "true")]);
        let act = fx.request(OpType::Activate, 1, 0);
        fx.issue(act);
        fx.advance(5);

        let write = fx.request(OpType::Write, 1, 0);
        fx.issue(write);
        // Data phase 5..13, programming 13..25.
        fx.advance(14);
        assert!(fx.subarray.is_writing(14));
        assert!(!fx.subarray.between_write_iterations(14));

        let read = fx.request(OpType::Read, 1, 1);
        fx.pool.get_mut(read).flags.set(Flags::PRIORITY);
        // Mid-iteration: not issuable even with priority.
        assert_eq!(fx.check(read), Err(FailReason::State));
        assert_eq!(fx.subarray.next_issuable(fx.pool.get(read), 14), 16);

        fx.queue.sync_to(16);
        assert!(fx.subarray.between_write_iterations(16));
        assert!(fx.check(read).is_ok());
        fx.issue(read);

        let wreq = fx.pool.get(write);
        assert!(wreq.flags.contains(Flags::PAUSED));
        assert_eq!(wreq.cancellations, 1);
        assert!(!fx.subarray.is_writing(16));
    }

    #[test]
    fn paused_write_resumes_after_the_read_completes() {
        let mut fx = Fixture::new(&[("tWP", "12"), ("MLCLevels", "4"), ("WritePausing", "true")]);
        let act = fx.request(OpType::Activate, 1, 0);
        fx.issue(act);
        fx.advance(5);
        let write = fx.request(OpType::Write, 1, 0);
        fx.issue(write);
        fx.advance(16);

        let read = fx.request(OpType::Read, 1, 1);
        fx.pool.get_mut(read).flags.set(Flags::PRIORITY);
        fx.issue(read);

        // Completion of the read resumes the write with 25 - 16 = 9 cycles
        // of programming left.
        let mut fault = None;
        let mut ctx = SimContext {
            queue: &mut fx.queue,
            pool: &mut fx.pool,
            hooks: &mut fx.hooks,
            fault: &mut fault,
        };
        ctx.queue.sync_to(26);
        fx.subarray.request_complete(read, &mut ctx);
        assert!(fx.subarray.is_writing(30));
        assert!(!fx.subarray.is_writing(26 + 9));
        assert!(!fx.pool.get(write).flags.contains(Flags::PAUSED));
    }

    #[test]
    fn non_priority_read_cannot_interrupt_a_write() {
        let mut fx = Fixture::new(&[("tWP", "12"), ("MLCLevels", "4")]);
        let act = fx.request(OpType::Activate, 1, 0);
        fx.issue(act);
        fx.advance(5);
        let write = fx.request(OpType::Write, 1, 0);
        fx.issue(write);
        fx.advance(16);

        let read = fx.request(OpType::Read, 1, 1);
        assert_eq!(fx.check(read), Err(FailReason::State));
        // Becomes issuable when the cells finish at 25.
        assert_eq!(fx.subarray.next_issuable(fx.pool.get(read), 16), 25);
    }

    #[test]
    fn read_precharge_closes_the_row() {
        // Short tRC so the implicit precharge dominates the next activate.
        let mut fx = Fixture::new(&[("tRC", "8")]);
        let act = fx.request(OpType::Activate, 1, 0);
        fx.issue(act);
        fx.advance(5);

        let read = fx.request(OpType::ReadPrecharge, 1, 0);
        fx.issue(read);
        assert_eq!(fx.subarray.open_row(), None);
        // tRTP + tRP after issue.
        let act2 = fx.request(OpType::Activate, 2, 0);
        assert_eq!(fx.subarray.next_issuable(fx.pool.get(act2), 5), 5 + 3 + 5);
    }

    #[test]
    fn refresh_blocks_activates_for_trfc() {
        let mut fx = Fixture::new(&[]);
        fx.subarray.refresh(0);
        let act = fx.request(OpType::Activate, 1, 0);
        assert_eq!(fx.check(act), Err(FailReason::Timing));
        assert_eq!(fx.subarray.next_issuable(fx.pool.get(act), 0), 50);
    }

    #[test]
    fn checkpoint_restores_contents() {
        let mut fx = Fixture::new(&[]);
        let act = fx.request(OpType::Activate, 1, 7);
        fx.issue(act);
        fx.advance(5);
        let write = fx.request(OpType::Write, 1, 7);
        fx.pool.get_mut(write).data = DataBlock::from_bytes(vec![0x5a; 64]);
        fx.issue(write);

        let state = fx.subarray.checkpoint();

        let mut other = Fixture::new(&[]);
        other.subarray.restore(&state);
        let act = other.request(OpType::Activate, 1, 7);
        other.issue(act);
        other.advance(5);
        let read = other.request(OpType::Read, 1, 7);
        other.issue(read);
        assert_eq!(other.pool.get(read).data.as_slice(), &[0x5a; 64]);
    }
}
