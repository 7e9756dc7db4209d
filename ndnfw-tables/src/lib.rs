//! Forwarding tables of the NDN forwarder.
//!
//! * [`ndt`]: the name dispatch table that shards names across workers.
//! * [`fib`]: the FIB with two-stage longest prefix match, readable
//!   concurrently under an epoch guard while one writer updates it.
//! * [`strategy`]: loaded forwarding strategies and their reference counts.
//! * [`pcct`], [`pit`], [`cs`]: the per-worker PIT-CS composite table.
//! * [`disk`]: the disk tier behind the CS.

pub mod cs;
pub mod disk;
pub mod error;
pub mod fib;
pub mod ndt;
pub mod pcct;
pub mod pit;
pub mod strategy;

pub use cs::{CsList, DiskCompletion};
pub use disk::{DiskBackend, DiskSizing, DiskStore, MemDiskBackend, ThreadedDiskStore};
pub use error::TableError;
pub use fib::{Fib, FibConfig, FibEntry, FibEntryCounters, FibReplicas};
pub use ndt::{Ndt, NdtConfig, NdtQuerier, NdtUpdater};
pub use pcct::{Pcct, PcctConfig, PcctCountersSnapshot, SuppressConfig, TOKEN_MASK};
pub use pit::{ForwardError, PitEntry, PitInsertResult, PitNackResult, PitRef, PitSatisfied};
pub use strategy::{
    FaceStatus, StrategyAction, StrategyContext, StrategyEvent, StrategyHandle, StrategyId, StrategyInfo,
    StrategyProgram, StrategyRuntime, StrategyTable,
};

pub type Result<T> = std::result::Result<T, TableError>;
