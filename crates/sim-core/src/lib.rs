//! Core types for cycle-accurate memory-subsystem simulation.
//!
//! Everything in the hierarchy advances on a shared event queue. Modules
//! never tick speculatively: a module that is waiting schedules a wake at
//! the earliest cycle its preconditions can change, and the queue fires it
//! there. All timing derives from the memory clock; the global queue scales
//! it against the host CPU clock.

mod address;
mod config;
mod data;
mod event;
mod global;
mod hooks;
mod module;
mod pool;
mod request;
mod stats;
mod translator;

pub use address::{Address, Translated, TranslationField};
pub use config::{Config, ConfigError, Params, PowerDownMode, QueueModel};
pub use data::DataBlock;
pub use event::{
    CallbackKind, Event, EventId, EventKind, EventQueue, PRIORITY_CLEANUP, PRIORITY_COMMAND_QUEUE,
    PRIORITY_LOW_POWER, PRIORITY_REFRESH, PRIORITY_TRANSACTION_QUEUE,
};
pub use global::{GlobalEventQueue, SystemId};
pub use hooks::{CommandTracerHook, Hook, HookPhase, HookRegistry};
pub use module::{Completion, FailReason, Module, ModulePath, SimContext, SimFault};
pub use pool::{RequestId, RequestPool};
pub use request::{Flags, OpType, Request, RequestStatus};
pub use stats::{StatEntry, StatSink, StatValue, Stats};
pub use translator::{mlog2, AddressTranslator, TranslationMethod};

/// A point on the memory-cycle timeline.
pub type Cycle = u64;

/// A signed cycle count. Negative values are the failure sentinel used by
/// endurance models.
pub type Cycles = i64;

/// Cycle value meaning "no event scheduled" / "never issuable as computed".
pub const NEVER: Cycle = Cycle::MAX;
