//! Input demultiplexing and forwarding tokens.
//!
//! Interests are spread over workers by the NDT. Every Interest a worker
//! sends upstream carries a token whose top octet is the worker index and
//! whose low 48 bits are the PCC token, so the Data or Nack that echoes it
//! goes straight back to the worker owning the PIT entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use log::debug;
use ndnfw_core::{FaceId, LpPacket, Mbuf, Packet};
use ndnfw_tables::{NdtQuerier, TOKEN_MASK};
use serde::Serialize;

/// Bit position of the worker index inside a forwarding token.
pub const WORKER_SHIFT: u32 = 56;

/// Token placed on an Interest sent by `worker` for PCC token `pcc`.
pub fn fw_token(worker: u8, pcc: u64) -> u64 {
    (u64::from(worker) << WORKER_SHIFT) | (pcc & TOKEN_MASK)
}

pub fn token_worker(token: u64) -> u8 {
    (token >> WORKER_SHIFT) as u8
}

pub fn token_pcc(token: u64) -> u64 {
    token & TOKEN_MASK
}

/// A classified packet waiting for a worker.
#[derive(Debug, Clone)]
pub struct RxPacket {
    pub face: FaceId,
    pub token: Option<u64>,
    pub packet: Packet,
    pub arrival: Instant,
}

/// Input rings of one worker, one per packet type.
pub struct WorkerQueues {
    pub interests: ArrayQueue<RxPacket>,
    pub data: ArrayQueue<RxPacket>,
    pub nacks: ArrayQueue<RxPacket>,
}

impl WorkerQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            interests: ArrayQueue::new(capacity),
            data: ArrayQueue::new(capacity),
            nacks: ArrayQueue::new(capacity),
        }
    }

    fn ring(&self, packet: &Packet) -> &ArrayQueue<RxPacket> {
        match packet {
            Packet::Interest(_) => &self.interests,
            Packet::Data(_) => &self.data,
            Packet::Nack(_) => &self.nacks,
        }
    }

    pub fn len(&self) -> usize {
        self.interests.len() + self.data.len() + self.nacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters of one input thread.
#[derive(Debug)]
pub struct DemuxCounters {
    pub n_interests: AtomicU64,
    pub n_data: AtomicU64,
    pub n_nacks: AtomicU64,
    pub n_decode_err: AtomicU64,
    pub n_no_token: AtomicU64,
    pub n_bad_token: AtomicU64,
    /// Drops on a full worker ring, per worker.
    pub n_queue_drops: Box<[AtomicU64]>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DemuxCountersSnapshot {
    pub n_interests: u64,
    pub n_data: u64,
    pub n_nacks: u64,
    pub n_decode_err: u64,
    pub n_no_token: u64,
    pub n_bad_token: u64,
    pub n_queue_drops: Vec<u64>,
}

impl DemuxCounters {
    fn new(workers: usize) -> Self {
        Self {
            n_interests: AtomicU64::new(0),
            n_data: AtomicU64::new(0),
            n_nacks: AtomicU64::new(0),
            n_decode_err: AtomicU64::new(0),
            n_no_token: AtomicU64::new(0),
            n_bad_token: AtomicU64::new(0),
            n_queue_drops: (0..workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn snapshot(&self) -> DemuxCountersSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DemuxCountersSnapshot {
            n_interests: read(&self.n_interests),
            n_data: read(&self.n_data),
            n_nacks: read(&self.n_nacks),
            n_decode_err: read(&self.n_decode_err),
            n_no_token: read(&self.n_no_token),
            n_bad_token: read(&self.n_bad_token),
            n_queue_drops: self.n_queue_drops.iter().map(read).collect(),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Demultiplexer of one input thread.
pub struct InputDemux {
    querier: NdtQuerier,
    workers: Vec<Arc<WorkerQueues>>,
    counters: Arc<DemuxCounters>,
}

impl InputDemux {
    pub fn new(querier: NdtQuerier, workers: Vec<Arc<WorkerQueues>>) -> Self {
        let counters = Arc::new(DemuxCounters::new(workers.len()));
        Self {
            querier,
            workers,
            counters,
        }
    }

    pub fn counters(&self) -> Arc<DemuxCounters> {
        self.counters.clone()
    }

    /// Accept a received frame. The buffer goes back to its pool before
    /// the packet is queued.
    pub fn on_packet(&mut self, face: FaceId, mbuf: Mbuf) -> bool {
        let wire = Bytes::copy_from_slice(mbuf.as_slice());
        drop(mbuf);
        self.on_frame(face, wire)
    }

    /// Accept a received frame held in `wire`.
    pub fn on_frame(&mut self, face: FaceId, wire: Bytes) -> bool {
        match LpPacket::decode(wire) {
            Ok(lp) => self.dispatch(face, lp, Instant::now()),
            Err(e) => {
                debug!("Dropping undecodable frame from face {}: {}", face, e);
                bump(&self.counters.n_decode_err);
                false
            }
        }
    }

    /// Worker that owns a packet, if it can be determined.
    pub fn route(&mut self, lp: &LpPacket) -> Option<usize> {
        match &lp.packet {
            Packet::Interest(interest) => {
                bump(&self.counters.n_interests);
                Some(self.querier.lookup(&interest.name) as usize % self.workers.len())
            }
            Packet::Data(_) | Packet::Nack(_) => {
                if matches!(lp.packet, Packet::Data(_)) {
                    bump(&self.counters.n_data);
                } else {
                    bump(&self.counters.n_nacks);
                }
                let Some(token) = lp.token else {
                    bump(&self.counters.n_no_token);
                    return None;
                };
                let worker = token_worker(token) as usize;
                if worker >= self.workers.len() {
                    bump(&self.counters.n_bad_token);
                    return None;
                }
                Some(worker)
            }
        }
    }

    /// Queue a decoded packet to its worker. Returns false when dropped.
    pub fn dispatch(&mut self, face: FaceId, lp: LpPacket, arrival: Instant) -> bool {
        let Some(worker) = self.route(&lp) else {
            return false;
        };
        let rx = RxPacket {
            face,
            token: lp.token,
            packet: lp.packet,
            arrival,
        };
        let queues = &self.workers[worker];
        if queues.ring(&rx.packet).push(rx).is_err() {
            bump(&self.counters.n_queue_drops[worker]);
            return false;
        }
        true
    }
}
