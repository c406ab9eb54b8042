//! The per-subsystem event queue.
//!
//! Events are keyed on `(cycle, priority, insertion order)`: cycles fire in
//! ascending order, higher priority first within a cycle, insertion order
//! within a priority. Every site that schedules a wake first queries the
//! queue for an equivalent pending event, so duplicate wakes never pile up.

use std::collections::BTreeMap;

use crate::{Cycle, ModulePath, RequestId};

/// Command-queue drain wakes.
pub const PRIORITY_COMMAND_QUEUE: i32 = 40;
/// Transaction decomposition wakes.
pub const PRIORITY_TRANSACTION_QUEUE: i32 = 30;
/// Refresh pulses.
pub const PRIORITY_REFRESH: i32 = 20;
/// Low-power state evaluation.
pub const PRIORITY_LOW_POWER: i32 = 10;
/// Issued-entry purging; runs after everything else in a cycle.
pub const PRIORITY_CLEANUP: i32 = -10;

/// Named callback targets, standing in for the member-function pointers of
/// a dynamic dispatch design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Drain the command queues.
    CommandQueueWake,
    /// A staggered refresh countdown pulse.
    RefreshPulse,
    /// Purge issued command-queue entries.
    Cleanup,
    /// Evaluate powerdown/powerup per rank.
    LowPowerWake,
}

/// What firing an event means to its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Tick the recipient's `cycle` entry point once.
    Cycle,
    /// Invoke a named callback on the recipient.
    Callback(CallbackKind),
    /// A request completion travelling back up the tree.
    Response,
    /// Placeholder for externally defined events.
    Unknown,
}

/// Identifier for a scheduled event, used by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

/// A scheduled event.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub recipient: ModulePath,
    pub cycle: Cycle,
    pub priority: i32,
    /// Request payload, if the event concerns one.
    pub payload: Option<RequestId>,
    id: EventId,
    seq: u64,
}

impl Event {
    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }
}

/// Priority-ordered event timeline for one subsystem.
pub struct EventQueue {
    current_cycle: Cycle,
    /// Pending events per cycle, each vector kept in firing order.
    events: BTreeMap<Cycle, Vec<Event>>,
    next_seq: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_cycle: 0,
            events: BTreeMap::new(),
            next_seq: 0,
        }
    }

    #[must_use]
    pub fn current_cycle(&self) -> Cycle {
        self.current_cycle
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Schedule an event. `cycle` must not be in the past.
    pub fn insert_event(
        &mut self,
        kind: EventKind,
        recipient: ModulePath,
        cycle: Cycle,
        payload: Option<RequestId>,
        priority: i32,
    ) -> EventId {
        debug_assert!(
            cycle >= self.current_cycle,
            "event scheduled in the past: {cycle} < {}",
            self.current_cycle
        );
        let id = EventId(self.next_seq);
        let seq = self.next_seq;
        self.next_seq += 1;

        let event = Event {
            kind,
            recipient,
            cycle,
            priority,
            payload,
            id,
            seq,
        };

        let slot = self.events.entry(cycle).or_default();
        // Firing order: priority descending, then insertion order. New
        // events go after existing events of equal priority.
        let at = slot
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(slot.len());
        slot.insert(at, event);
        id
    }

    /// Schedule a named callback.
    pub fn insert_callback(
        &mut self,
        recipient: ModulePath,
        callback: CallbackKind,
        cycle: Cycle,
        payload: Option<RequestId>,
        priority: i32,
    ) -> EventId {
        self.insert_event(EventKind::Callback(callback), recipient, cycle, payload, priority)
    }

    /// Cancel a scheduled event. Returns whether it was found; an event
    /// that already fired cannot be removed.
    pub fn remove_event(&mut self, id: EventId, cycle: Cycle) -> bool {
        let Some(slot) = self.events.get_mut(&cycle) else {
            return false;
        };
        let Some(at) = slot.iter().position(|e| e.id == id) else {
            return false;
        };
        slot.remove(at);
        if slot.is_empty() {
            self.events.remove(&cycle);
        }
        true
    }

    /// Find a pending event matching `(kind, recipient, payload, cycle)`.
    #[must_use]
    pub fn find_event(
        &self,
        kind: EventKind,
        recipient: ModulePath,
        payload: Option<RequestId>,
        cycle: Cycle,
    ) -> Option<&Event> {
        self.events.get(&cycle)?.iter().find(|e| {
            e.kind == kind && e.recipient == recipient && e.payload == payload
        })
    }

    /// Duplicate-wake check for callbacks.
    #[must_use]
    pub fn find_callback(
        &self,
        recipient: ModulePath,
        callback: CallbackKind,
        cycle: Cycle,
        payload: Option<RequestId>,
    ) -> bool {
        self.find_event(EventKind::Callback(callback), recipient, payload, cycle)
            .is_some()
    }

    /// Earliest scheduled cycle, if any event is pending.
    #[must_use]
    pub fn next_event_cycle(&self) -> Option<Cycle> {
        self.events.keys().next().copied()
    }

    /// Pop the next event due at or before `limit`, advancing the current
    /// cycle to the event's cycle. Returns `None` once no event remains in
    /// the window.
    pub fn pop_due(&mut self, limit: Cycle) -> Option<Event> {
        let (&cycle, _) = self.events.iter().next()?;
        if cycle > limit {
            return None;
        }
        let slot = self.events.get_mut(&cycle)?;
        let event = slot.remove(0);
        if slot.is_empty() {
            self.events.remove(&cycle);
        }
        self.current_cycle = self.current_cycle.max(cycle);
        Some(event)
    }

    /// Advance the current cycle to `cycle` after a processing window, even
    /// if no event fired that late.
    pub fn sync_to(&mut self, cycle: Cycle) {
        self.current_cycle = self.current_cycle.max(cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(events: &[(Cycle, i32)]) -> EventQueue {
        let mut queue = EventQueue::new();
        for &(cycle, priority) in events {
            queue.insert_event(EventKind::Cycle, ModulePath::System, cycle, None, priority);
        }
        queue
    }

    #[test]
    fn fires_in_cycle_then_priority_order() {
        let mut queue = queue_with(&[
            (5, PRIORITY_REFRESH),
            (3, PRIORITY_CLEANUP),
            (5, PRIORITY_COMMAND_QUEUE),
            (5, PRIORITY_TRANSACTION_QUEUE),
        ]);
        let order: Vec<(Cycle, i32)> = std::iter::from_fn(|| queue.pop_due(10))
            .map(|e| (e.cycle, e.priority))
            .collect();
        assert_eq!(
            order,
            vec![
                (3, PRIORITY_CLEANUP),
                (5, PRIORITY_COMMAND_QUEUE),
                (5, PRIORITY_TRANSACTION_QUEUE),
                (5, PRIORITY_REFRESH),
            ]
        );
        assert_eq!(queue.current_cycle(), 5);
    }

    #[test]
    fn equal_priority_fires_in_insertion_order() {
        let mut queue = EventQueue::new();
        let first = queue.insert_event(
            EventKind::Cycle,
            ModulePath::System,
            4,
            None,
            PRIORITY_TRANSACTION_QUEUE,
        );
        let second = queue.insert_event(
            EventKind::Cycle,
            ModulePath::System,
            4,
            None,
            PRIORITY_TRANSACTION_QUEUE,
        );
        assert_eq!(queue.pop_due(4).map(|e| e.id()), Some(first));
        assert_eq!(queue.pop_due(4).map(|e| e.id()), Some(second));
    }

    #[test]
    fn removed_event_never_fires() {
        let mut queue = EventQueue::new();
        let id = queue.insert_event(EventKind::Cycle, ModulePath::System, 7, None, 0);
        assert!(queue.remove_event(id, 7));
        assert!(queue.pop_due(100).is_none());
        // Second removal reports not-found.
        assert!(!queue.remove_event(id, 7));
    }

    #[test]
    fn find_callback_prevents_duplicates() {
        let mut queue = EventQueue::new();
        assert!(!queue.find_callback(ModulePath::System, CallbackKind::Cleanup, 2, None));
        queue.insert_callback(
            ModulePath::System,
            CallbackKind::Cleanup,
            2,
            None,
            PRIORITY_CLEANUP,
        );
        assert!(queue.find_callback(ModulePath::System, CallbackKind::Cleanup, 2, None));
    }

    #[test]
    fn pop_due_respects_limit() {
        let mut queue = queue_with(&[(3, 0), (8, 0)]);
        assert!(queue.pop_due(5).is_some());
        assert!(queue.pop_due(5).is_none());
        queue.sync_to(5);
        assert_eq!(queue.current_cycle(), 5);
        assert_eq!(queue.next_event_cycle(), Some(8));
    }
}
