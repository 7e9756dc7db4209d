//! Face table: where workers send packets and which faces are up.
//!
//! Real transports live outside the forwarder; they register a [`FaceTx`]
//! for each face and feed received frames to an input demultiplexer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use log::info;
use ndnfw_core::{FaceId, LpPacket, Mbuf};
use ndnfw_tables::FaceStatus;
use parking_lot::RwLock;

use crate::error::{FwdError, Result};

/// Transmit side of a face.
pub trait FaceTx: Send + Sync {
    /// Queue a frame. The frame is handed back when the queue is full; the
    /// caller drops it.
    fn transmit(&self, mbuf: Mbuf) -> std::result::Result<(), Mbuf>;
}

struct FaceSlot {
    tx: Arc<dyn FaceTx>,
    up: AtomicBool,
}

/// Registered faces, shared by every worker.
#[derive(Default)]
pub struct FaceTable {
    faces: RwLock<HashMap<FaceId, Arc<FaceSlot>>>,
}

impl FaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a face; it starts up. Replaces an earlier face with the same id.
    pub fn add(&self, id: FaceId, tx: Arc<dyn FaceTx>) {
        let slot = Arc::new(FaceSlot {
            tx,
            up: AtomicBool::new(true),
        });
        if self.faces.write().insert(id, slot).is_some() {
            info!("Replaced face {}", id);
        } else {
            info!("Added face {}", id);
        }
    }

    pub fn remove(&self, id: FaceId) -> Result<()> {
        self.faces.write().remove(&id).ok_or(FwdError::UnknownFace(id))?;
        info!("Removed face {}", id);
        Ok(())
    }

    pub fn set_up(&self, id: FaceId, up: bool) -> Result<()> {
        let faces = self.faces.read();
        let slot = faces.get(&id).ok_or(FwdError::UnknownFace(id))?;
        if slot.up.swap(up, Ordering::AcqRel) != up {
            info!("Face {} is now {}", id, if up { "up" } else { "down" });
        }
        Ok(())
    }

    pub fn contains(&self, id: FaceId) -> bool {
        self.faces.read().contains_key(&id)
    }

    /// Registered face ids, sorted.
    pub fn ids(&self) -> Vec<FaceId> {
        let mut ids: Vec<_> = self.faces.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.faces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.read().is_empty()
    }

    /// Send a frame; an unknown face or a full queue hands it back.
    pub fn transmit(&self, id: FaceId, mbuf: Mbuf) -> std::result::Result<(), Mbuf> {
        let slot = self.faces.read().get(&id).cloned();
        match slot {
            Some(slot) => slot.tx.transmit(mbuf),
            None => Err(mbuf),
        }
    }
}

impl FaceStatus for FaceTable {
    fn is_up(&self, face: FaceId) -> bool {
        self.faces
            .read()
            .get(&face)
            .is_some_and(|slot| slot.up.load(Ordering::Acquire))
    }
}

/// A face whose transmit side is a bounded queue, drained by its owner.
///
/// Used for in-process application faces and in tests.
pub struct QueueFace {
    queue: ArrayQueue<Bytes>,
    n_tx: AtomicU64,
    n_drops: AtomicU64,
}

impl QueueFace {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            n_tx: AtomicU64::new(0),
            n_drops: AtomicU64::new(0),
        }
    }

    /// Next transmitted frame.
    pub fn pop(&self) -> Option<Bytes> {
        self.queue.pop()
    }

    /// Next transmitted frame, decoded.
    pub fn pop_packet(&self) -> Option<LpPacket> {
        self.pop().and_then(|wire| LpPacket::decode(wire).ok())
    }

    /// Every queued frame, decoded; undecodable frames are skipped.
    pub fn drain_packets(&self) -> Vec<LpPacket> {
        std::iter::from_fn(|| self.pop()).filter_map(|wire| LpPacket::decode(wire).ok()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn n_tx(&self) -> u64 {
        self.n_tx.load(Ordering::Relaxed)
    }

    pub fn n_drops(&self) -> u64 {
        self.n_drops.load(Ordering::Relaxed)
    }
}

impl FaceTx for QueueFace {
    fn transmit(&self, mbuf: Mbuf) -> std::result::Result<(), Mbuf> {
        if self.queue.is_full() {
            self.n_drops.fetch_add(1, Ordering::Relaxed);
            return Err(mbuf);
        }
        // the frame leaves the pool here so the queue never pins pool buffers
        let wire = Bytes::copy_from_slice(mbuf.as_slice());
        match self.queue.push(wire) {
            Ok(()) => {
                self.n_tx.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.n_drops.fetch_add(1, Ordering::Relaxed);
                Err(mbuf)
            }
        }
    }
}
