//! Forwarding plane of the NDN forwarder.
//!
//! Input threads decode frames and hand them to an [`InputDemux`], which
//! picks the owning worker: Interests through the NDT, Data and Nacks
//! through the worker id carried in the PIT token. Each [`FwdWorker`] owns
//! one PCCT and runs the Interest, Data and Nack pipelines, consulting the
//! FIB replica of its socket and the strategy bound to the matched entry.
//! [`Forwarder`] wires the tables together and exposes management.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod face;
pub mod forwarder;
pub mod fwd;
pub mod strategies;

pub use config::ForwarderConfig;
pub use dispatch::{fw_token, token_pcc, token_worker, DemuxCountersSnapshot, InputDemux, RxPacket, WorkerQueues};
pub use error::{FwdError, Result};
pub use face::{FaceTable, FaceTx, QueueFace};
pub use forwarder::{pin_to_cpu, Forwarder, ForwarderCounters, ForwarderHandle, RouteInfo};
pub use fwd::{FwdCountersSnapshot, FwdWorker, WorkerCountersSnapshot};
pub use strategies::{BestRoute, BuiltinRuntime, Multicast, Reject};
