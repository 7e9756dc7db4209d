//! Name Dispatch Table.
//!
//! The NDT maps the hash of a name's first `prefix_len` components to the
//! index of the forwarding worker that owns every PIT and CS entry for that
//! name. Slots are single bytes updated in place; readers never block and a
//! stale read lasting one packet is acceptable.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::info;
use ndnfw_core::Name;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// NDT parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NdtConfig {
    /// Number of leading name components that are hashed.
    pub prefix_len: usize,
    /// Number of slots; must be a power of two.
    pub capacity: usize,
    /// A querier records one hit every `sample_interval` lookups; must be a power of two.
    pub sample_interval: u32,
}

impl Default for NdtConfig {
    fn default() -> Self {
        Self {
            prefix_len: 2,
            capacity: 65536,
            sample_interval: 1024,
        }
    }
}

impl NdtConfig {
    pub fn validate(&self) -> Result<(), TableError> {
        if self.prefix_len == 0 {
            return Err(TableError::InvalidConfig("ndt.prefix_len must be positive".into()));
        }
        if !self.capacity.is_power_of_two() || self.capacity > 1 << 24 {
            return Err(TableError::InvalidConfig(format!(
                "ndt.capacity {} must be a power of two up to 2^24",
                self.capacity
            )));
        }
        if !self.sample_interval.is_power_of_two() {
            return Err(TableError::InvalidConfig(format!(
                "ndt.sample_interval {} must be a power of two",
                self.sample_interval
            )));
        }
        Ok(())
    }
}

struct NdtShared {
    slots: Box<[AtomicU8]>,
    mask: u64,
    prefix_len: usize,
    sample_mask: u64,
    /// Hit arrays of live queriers.
    queriers: Mutex<Vec<Weak<[AtomicU32]>>>,
}

/// Shared handle to the dispatch table.
#[derive(Clone)]
pub struct Ndt {
    inner: Arc<NdtShared>,
}

impl Ndt {
    /// Create a table with every slot pointing at worker 0.
    pub fn new(config: NdtConfig) -> Result<Self, TableError> {
        config.validate()?;
        let slots = (0..config.capacity).map(|_| AtomicU8::new(0)).collect();
        Ok(Self {
            inner: Arc::new(NdtShared {
                slots,
                mask: config.capacity as u64 - 1,
                prefix_len: config.prefix_len,
                sample_mask: config.sample_interval as u64 - 1,
                queriers: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn prefix_len(&self) -> usize {
        self.inner.prefix_len
    }

    /// Slot index for a name.
    pub fn index_of(&self, name: &Name) -> usize {
        (name.prefix_hash(self.inner.prefix_len) & self.inner.mask) as usize
    }

    /// Value of slot `index`.
    pub fn read(&self, index: usize) -> u8 {
        self.inner.slots[index].load(Ordering::Acquire)
    }

    /// Worker index for a name, without hit counting.
    pub fn lookup(&self, name: &Name) -> u8 {
        self.read(self.index_of(name))
    }

    /// Point slot `index` at worker `value` and return the previous value.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn update(&self, index: usize, value: u8) -> u8 {
        assert!(
            index < self.capacity(),
            "NDT index {} out of range (capacity {})",
            index,
            self.capacity()
        );
        self.inner.slots[index].swap(value, Ordering::AcqRel)
    }

    /// Fill every slot with a random worker index below `max`.
    pub fn randomize(&self, max: u8) {
        assert!(max > 0, "NDT randomize needs at least one worker");
        let mut rng = rand::thread_rng();
        for slot in self.inner.slots.iter() {
            slot.store(rng.gen_range(0..max), Ordering::Release);
        }
        info!("NDT randomized over {} workers", max);
    }

    /// Copy of every slot value.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.slots.iter().map(|s| s.load(Ordering::Acquire)).collect()
    }

    /// Create a lookup handle for one input thread.
    pub fn querier(&self) -> NdtQuerier {
        let hits: Arc<[AtomicU32]> = (0..self.capacity()).map(|_| AtomicU32::new(0)).collect();
        let mut queriers = self.inner.queriers.lock();
        queriers.retain(|q| q.strong_count() > 0);
        queriers.push(Arc::downgrade(&hits));
        drop(queriers);
        NdtQuerier {
            ndt: self.clone(),
            hits,
            queries: 0,
        }
    }

    /// Sampled hit counts per slot, summed over every live querier.
    pub fn counters(&self) -> Vec<u64> {
        let mut sums = vec![0u64; self.capacity()];
        self.inner.queriers.lock().retain(|q| {
            let Some(hits) = q.upgrade() else {
                return false;
            };
            for (sum, hit) in sums.iter_mut().zip(hits.iter()) {
                *sum += hit.load(Ordering::Relaxed) as u64;
            }
            true
        });
        sums
    }

    /// Number of live queriers.
    pub fn querier_count(&self) -> usize {
        let mut queriers = self.inner.queriers.lock();
        queriers.retain(|q| q.strong_count() > 0);
        queriers.len()
    }
}

/// Per-input-thread NDT reader that samples hit counts.
///
/// The hit array is written only by its owner, so counting costs one
/// uncontended relaxed add per sample.
pub struct NdtQuerier {
    ndt: Ndt,
    hits: Arc<[AtomicU32]>,
    queries: u64,
}

impl NdtQuerier {
    /// Worker index for a name, recording a sampled hit.
    pub fn lookup(&mut self, name: &Name) -> u8 {
        let index = self.ndt.index_of(name);
        self.queries = self.queries.wrapping_add(1);
        if self.queries & self.ndt.inner.sample_mask == 0 {
            self.hits[index].fetch_add(1, Ordering::Relaxed);
        }
        self.ndt.read(index)
    }

    pub fn ndt(&self) -> &Ndt {
        &self.ndt
    }
}

/// Relocates NDT slots and waits for packets queued under the old
/// assignment to drain before returning.
pub struct NdtUpdater {
    ndt: Ndt,
    drain: Duration,
}

impl NdtUpdater {
    pub fn new(ndt: Ndt, drain: Duration) -> Self {
        Self { ndt, drain }
    }

    /// Update a slot, then sleep for the drain interval. Returns the old value.
    pub fn update_and_drain(&self, index: usize, value: u8) -> u8 {
        let old = self.ndt.update(index, value);
        if old != value {
            info!("NDT slot {} relocated from worker {} to {}", index, old, value);
            std::thread::sleep(self.drain);
        }
        old
    }
}
