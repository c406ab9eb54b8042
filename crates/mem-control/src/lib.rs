//! The memory controller, the top-level memory system and the simulator
//! event loop.
//!
//! The controller turns reads and writes into explicit command sequences
//! under FR-FCFS scheduling with starvation protection; the system fans
//! channels out to per-channel controllers; the simulator owns the event
//! queue, the request pool and the dispatch loop that ties it together.

mod controller;
mod sim;
mod system;

pub use controller::MemoryController;
pub use sim::{SimError, Simulator};
pub use system::MemorySystem;
