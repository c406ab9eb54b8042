//! The module dispatch surface and the tree addressing scheme.
//!
//! The hierarchy is driver → system → controller (per channel) → channel →
//! rank → bank → subarray. Parents own their children; the upward link is
//! not a pointer but a `ModulePath`, from which the parent path is derived.

use crate::{Cycle, EventQueue, HookRegistry, Request, RequestId, RequestPool, StatSink};

/// Position of a module in the tree.
///
/// The channel index is carried on every level below the system so a path
/// alone is enough to route an event or walk a completion chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModulePath {
    /// The external producer (trace driver or host adapter).
    Driver,
    /// The top-level memory system.
    System,
    /// Memory controller of channel `.0`.
    Controller(usize),
    /// Interconnect of channel `.0`.
    Channel(usize),
    /// Rank `.1` of channel `.0`.
    Rank(usize, usize),
    /// Bank `.2` of rank `.1` of channel `.0`.
    Bank(usize, usize, usize),
    /// Subarray `.3` of bank `.2` of rank `.1` of channel `.0`.
    SubArray(usize, usize, usize, usize),
}

impl ModulePath {
    /// The parent in the tree; `None` above the driver.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Driver => None,
            Self::System => Some(Self::Driver),
            Self::Controller(_) => Some(Self::System),
            Self::Channel(c) => Some(Self::Controller(c)),
            Self::Rank(c, _) => Some(Self::Channel(c)),
            Self::Bank(c, r, _) => Some(Self::Rank(c, r)),
            Self::SubArray(c, r, b, _) => Some(Self::Bank(c, r, b)),
        }
    }
}

/// Why a command cannot issue right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// A timing deadline has not elapsed yet.
    Timing,
    /// The target is in the wrong state for the operation (e.g. activate
    /// against an open bank).
    State,
    /// The open row does not match the request.
    RowMismatch,
    /// The rank is powered down.
    PoweredDown,
    /// The bank group is refreshing.
    Refreshing,
    /// A queue bound rejected the request.
    QueueFull,
    /// The operation is not supported at this level of the hierarchy.
    Unsupported,
}

/// Result of handing a completion to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The module owned the request; the chain stops here.
    Owned,
    /// Not the owner; the completion continues to the parent.
    Forward,
}

/// A fatal condition raised by a module mid-dispatch (endurance
/// exhaustion under `EnduranceFatal`, watchdog expiry). The simulator
/// surfaces it as an error after the event finishes.
#[derive(Debug, Clone)]
pub struct SimFault {
    pub module: String,
    pub message: String,
}

/// Shared simulation state threaded through every dispatch.
///
/// Holding the event queue, request pool and hook chains outside the module
/// tree lets any module schedule wakes and inspect requests while the tree
/// itself is mutably borrowed.
pub struct SimContext<'a> {
    pub queue: &'a mut EventQueue,
    pub pool: &'a mut RequestPool,
    pub hooks: &'a mut HookRegistry,
    pub fault: &'a mut Option<SimFault>,
}

impl SimContext<'_> {
    /// Current cycle of the subsystem clock.
    #[must_use]
    pub fn now(&self) -> Cycle {
        self.queue.current_cycle()
    }

    /// Record a fatal condition; the first one wins.
    pub fn raise_fault(&mut self, module: &str, message: String) {
        if self.fault.is_none() {
            *self.fault = Some(SimFault {
                module: module.to_owned(),
                message,
            });
        }
    }
}

/// Capability set every module in the tree implements.
pub trait Module {
    /// Name used to prefix this module's statistics.
    fn name(&self) -> &str;

    /// This module's position in the tree.
    fn path(&self) -> ModulePath;

    /// Whether `req` could issue this cycle. `Err` carries the reason.
    fn is_issuable(&self, req: &Request, now: Cycle) -> Result<(), FailReason>;

    /// Earliest cycle at which `req` could issue given the timing history.
    fn next_issuable(&self, req: &Request, now: Cycle) -> Cycle;

    /// Accept a request. Returns `false` for backpressure; the caller must
    /// retry later.
    fn issue_command(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> bool;

    /// A completion reached this module on its way to the owner.
    fn request_complete(&mut self, id: RequestId, ctx: &mut SimContext<'_>) -> Completion;

    /// Advance housekeeping by `steps` cycles (driven by `Cycle` events and
    /// catch-up calls, not a free-running clock).
    fn cycle(&mut self, steps: Cycle, ctx: &mut SimContext<'_>);

    /// Contribute statistics under this module's prefix.
    fn register_stats(&self, sink: &mut StatSink);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_chain_reaches_driver() {
        let mut path = ModulePath::SubArray(1, 2, 3, 0);
        let mut chain = vec![path];
        while let Some(parent) = path.parent() {
            chain.push(parent);
            path = parent;
        }
        assert_eq!(
            chain,
            vec![
                ModulePath::SubArray(1, 2, 3, 0),
                ModulePath::Bank(1, 2, 3),
                ModulePath::Rank(1, 2),
                ModulePath::Channel(1),
                ModulePath::Controller(1),
                ModulePath::System,
                ModulePath::Driver,
            ]
        );
        assert_eq!(ModulePath::Driver.parent(), None);
    }
}
