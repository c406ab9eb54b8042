//! Timing models for the device side of the hierarchy.
//!
//! A channel owns ranks, a rank owns banks, a bank owns subarrays. Each
//! level enforces its own slice of the JEDEC-style timing constraints and
//! answers two questions for any command: can it issue right now, and if
//! not, when is the earliest cycle it could.

mod bank;
mod channel;
mod encoder;
mod endurance;
mod rank;
mod subarray;

pub use bank::{Bank, BankState};
pub use channel::Channel;
pub use encoder::{make_encoder, DataEncoder, FlipNWrite};
pub use endurance::{make_endurance, EnduranceModel, RowModel, WordModel};
pub use rank::{PowerState, Rank};
pub use subarray::SubArray;
