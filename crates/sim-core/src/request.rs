//! The request entity: the fundamental unit of work in the hierarchy.

use crate::{Address, Cycle, DataBlock, ModulePath};

/// Operation carried by a request.
///
/// `Read`/`Write` arrive from the outside; the memory controller decomposes
/// them into the explicit command sequences (`Activate`, `Precharge`,
/// `Refresh`, ...) the timing model requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// No operation.
    Nop,
    /// Open a row into a subarray's sense amplifiers (RAS).
    Activate,
    /// Column read (CAS-R).
    Read,
    /// Column read with implicit precharge.
    ReadPrecharge,
    /// Column write (CAS-W).
    Write,
    /// Column write with implicit precharge.
    WritePrecharge,
    /// Close the active row of one subarray.
    Precharge,
    /// Close every active subarray in a bank.
    PrechargeAll,
    /// Active powerdown (some banks open).
    PowerdownPda,
    /// Precharge powerdown, fast exit.
    PowerdownPdpf,
    /// Precharge powerdown, slow exit.
    PowerdownPdps,
    /// Leave a powerdown state.
    Powerup,
    /// Refresh a bank group.
    Refresh,
    /// Data bus read burst.
    BusRead,
    /// Data bus write burst.
    BusWrite,
    /// Probe: can this read be served from a cache in the hierarchy?
    CachedRead,
    /// Probe: can this write be absorbed by a cache in the hierarchy?
    CachedWrite,
}

impl OpType {
    /// True for the read-class column operations.
    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadPrecharge)
    }

    /// True for the write-class column operations.
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::WritePrecharge)
    }

    /// True for the four operations that return data to the request owner.
    #[must_use]
    pub fn is_column(self) -> bool {
        self.is_read() || self.is_write()
    }
}

/// Completion state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestStatus {
    /// Not yet completed.
    #[default]
    Incomplete,
    /// Completion has reached the owner.
    Complete,
    /// Rejected with backpressure; the producer must retry.
    Retry,
}

/// Request flag bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u64);

impl Flags {
    /// Last request for its row in the transaction queue (close-page).
    pub const LAST_REQUEST: u64 = 1;
    /// Read-class request.
    pub const IS_READ: u64 = 1 << 1;
    /// Write-class request.
    pub const IS_WRITE: u64 = 1 << 2;
    /// This write was cancelled before the cells finished programming.
    pub const CANCELLED: u64 = 1 << 3;
    /// This write was paused between iterations.
    pub const PAUSED: u64 = 1 << 4;
    /// May not be paused or cancelled.
    pub const FORCED: u64 = 1 << 5;
    /// Takes priority over in-progress writes (write pausing).
    pub const PRIORITY: u64 = 1 << 6;
    /// Has left the command queue (two-phase issue).
    pub const ISSUED: u64 = 1 << 7;

    #[must_use]
    pub fn contains(self, flag: u64) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u64) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u64) {
        self.0 &= !flag;
    }

    #[must_use]
    pub fn bits(self) -> u64 {
        self.0
    }
}

/// A memory request travelling through the module tree.
///
/// Ownership: the module whose path equals `owner` releases the request
/// when the completion reaches it; completions that climb past the system
/// root are handed back to the external driver.
#[derive(Debug, Clone)]
pub struct Request {
    /// Physical plus (once translated) decomposed address.
    pub address: Address,
    /// Operation type.
    pub op: OpType,
    /// Thread ID of the issuing application.
    pub thread_id: u64,
    /// Data to be written, or data that would be read.
    pub data: DataBlock,
    /// Data previously at this address (pre-write).
    pub old_data: DataBlock,
    /// Complete, incomplete, retry.
    pub status: RequestStatus,
    /// Backend flags.
    pub flags: Flags,
    /// Whether this request is a prefetch.
    pub is_prefetch: bool,
    /// Address that triggered this prefetch.
    pub pf_trigger: Address,
    /// Program counter of the CPU instruction issuing the request.
    pub program_counter: u64,
    /// Number of bursts (variable-size requests).
    pub burst_count: u64,
    /// Module that created the request and destroys it on completion.
    pub owner: ModulePath,

    /// When the request arrived at the memory controller.
    pub arrival_cycle: Cycle,
    /// When the memory controller accepted (queued) the request.
    pub queue_cycle: Cycle,
    /// When the request was issued to the interconnect (dequeued).
    pub issue_cycle: Cycle,
    /// When the request was sent back to the requestor.
    pub completion_cycle: Cycle,

    /// Cycles of cell programming still outstanding for a paused write.
    pub write_progress: Cycle,
    /// Number of times this write was paused or cancelled.
    pub cancellations: u64,
}

impl Request {
    /// New request with every field at its reset value.
    #[must_use]
    pub fn new(op: OpType, address: Address, owner: ModulePath) -> Self {
        Self {
            address,
            op,
            thread_id: 0,
            data: DataBlock::default(),
            old_data: DataBlock::default(),
            status: RequestStatus::Incomplete,
            flags: Flags::default(),
            is_prefetch: false,
            pf_trigger: Address::default(),
            program_counter: 0,
            burst_count: 1,
            owner,
            arrival_cycle: 0,
            queue_cycle: 0,
            issue_cycle: 0,
            completion_cycle: 0,
            write_progress: 0,
            cancellations: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_set_and_clear() {
        let mut flags = Flags::default();
        flags.set(Flags::ISSUED);
        flags.set(Flags::PRIORITY);
        assert!(flags.contains(Flags::ISSUED));
        flags.clear(Flags::ISSUED);
        assert!(!flags.contains(Flags::ISSUED));
        assert!(flags.contains(Flags::PRIORITY));
    }

    #[test]
    fn op_classes() {
        assert!(OpType::ReadPrecharge.is_read());
        assert!(OpType::WritePrecharge.is_write());
        assert!(!OpType::Activate.is_column());
        assert!(OpType::Read.is_column());
    }
}
