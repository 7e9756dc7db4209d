//! The PIT-CS composite table.
//!
//! One PCCT belongs to one forwarding worker. Every entry is keyed by the
//! Interest name plus forwarding hint and can hold up to two PIT entries
//! (MustBeFresh clear and set) and one CS entry, so the PIT and the CS
//! share one hash table and one slot allocator. Each entry is also
//! reachable through a 48-bit token that is echoed by upstream nodes on
//! Data and Nack.
//!
//! PIT operations live in [`crate::pit`], CS operations in [`crate::cs`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndnfw_core::{Interest, Name};
use serde::{Deserialize, Serialize};

use crate::cs::{CsEntry, CsState};
use crate::error::TableError;
use crate::pit::PitEntry;

/// Mask of the token bits assigned by a PCCT.
pub const TOKEN_MASK: u64 = (1 << 48) - 1;

/// Durations written as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Retransmission suppression: the window starts at `min` and is
/// multiplied on every forwarding, up to `max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressConfig {
    #[serde(with = "duration_ms")]
    pub min: Duration,
    #[serde(with = "duration_ms")]
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for SuppressConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(10),
            max: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }
}

impl SuppressConfig {
    pub fn validate(&self) -> Result<(), TableError> {
        if self.min > self.max {
            return Err(TableError::InvalidConfig("suppress.min exceeds suppress.max".into()));
        }
        if !(self.multiplier >= 1.0) {
            return Err(TableError::InvalidConfig(format!(
                "suppress.multiplier {} must be at least 1",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Window after a forwarding, given the window before it.
    pub fn next(&self, previous: Option<Duration>) -> Duration {
        match previous {
            None => self.min,
            Some(window) => window.mul_f64(self.multiplier).min(self.max),
        }
    }
}

/// PCCT parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcctConfig {
    /// Maximum number of entries, PIT and CS together.
    pub capacity: usize,
    /// In-memory direct CS entries.
    pub cs_direct_capacity: usize,
    /// Indirect CS entries.
    pub cs_indirect_capacity: usize,
    /// Direct CS entries on disk; zero disables the disk tier.
    pub cs_disk_capacity: usize,
    /// Maximum indirect entries pointing at one direct entry.
    pub cs_assoc_limit: usize,
    /// Touches per recency bucket.
    pub cs_bucket_span: u64,
    pub suppress: SuppressConfig,
}

impl Default for PcctConfig {
    fn default() -> Self {
        Self {
            capacity: 65536,
            cs_direct_capacity: 16384,
            cs_indirect_capacity: 16384,
            cs_disk_capacity: 0,
            cs_assoc_limit: 4,
            cs_bucket_span: 64,
            suppress: SuppressConfig::default(),
        }
    }
}

impl PcctConfig {
    pub fn validate(&self) -> Result<(), TableError> {
        self.suppress.validate()?;
        if self.cs_direct_capacity == 0 || self.cs_indirect_capacity == 0 {
            return Err(TableError::InvalidConfig("CS list capacities must be positive".into()));
        }
        let cs_total = self.cs_direct_capacity + self.cs_indirect_capacity + self.cs_disk_capacity;
        if cs_total >= self.capacity || self.capacity > u32::MAX as usize {
            return Err(TableError::InvalidConfig(format!(
                "pcct.capacity {} must exceed the CS capacities ({})",
                self.capacity, cs_total
            )));
        }
        if self.cs_assoc_limit == 0 || self.cs_bucket_span == 0 {
            return Err(TableError::InvalidConfig(
                "cs_assoc_limit and cs_bucket_span must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// PIT counters.
#[derive(Debug, Default)]
pub struct PitCounters {
    pub n_entries: AtomicU64,
    pub n_insert: AtomicU64,
    pub n_found: AtomicU64,
    pub n_expired: AtomicU64,
    pub n_cs_match: AtomicU64,
    pub n_alloc_err: AtomicU64,
    pub n_data_hit: AtomicU64,
    pub n_data_miss: AtomicU64,
    pub n_nack_hit: AtomicU64,
    pub n_nack_miss: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PitCountersSnapshot {
    pub n_entries: u64,
    pub n_insert: u64,
    pub n_found: u64,
    pub n_expired: u64,
    pub n_cs_match: u64,
    pub n_alloc_err: u64,
    pub n_data_hit: u64,
    pub n_data_miss: u64,
    pub n_nack_hit: u64,
    pub n_nack_miss: u64,
}

impl PitCounters {
    pub fn snapshot(&self) -> PitCountersSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PitCountersSnapshot {
            n_entries: read(&self.n_entries),
            n_insert: read(&self.n_insert),
            n_found: read(&self.n_found),
            n_expired: read(&self.n_expired),
            n_cs_match: read(&self.n_cs_match),
            n_alloc_err: read(&self.n_alloc_err),
            n_data_hit: read(&self.n_data_hit),
            n_data_miss: read(&self.n_data_miss),
            n_nack_hit: read(&self.n_nack_hit),
            n_nack_miss: read(&self.n_nack_miss),
        }
    }
}

/// CS counters.
#[derive(Debug, Default)]
pub struct CsCounters {
    pub n_direct: AtomicU64,
    pub n_indirect: AtomicU64,
    pub n_disk: AtomicU64,
    pub n_hit_memory: AtomicU64,
    pub n_hit_indirect: AtomicU64,
    pub n_hit_disk: AtomicU64,
    pub n_miss: AtomicU64,
    pub n_disk_insert: AtomicU64,
    pub n_disk_delete: AtomicU64,
    pub n_disk_full: AtomicU64,
    /// Disk operations not started because the completion queue was full.
    pub n_disk_busy: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CsCountersSnapshot {
    pub n_direct: u64,
    pub n_indirect: u64,
    pub n_disk: u64,
    pub n_hit_memory: u64,
    pub n_hit_indirect: u64,
    pub n_hit_disk: u64,
    pub n_miss: u64,
    pub n_disk_insert: u64,
    pub n_disk_delete: u64,
    pub n_disk_full: u64,
    pub n_disk_busy: u64,
}

impl CsCounters {
    pub fn snapshot(&self) -> CsCountersSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CsCountersSnapshot {
            n_direct: read(&self.n_direct),
            n_indirect: read(&self.n_indirect),
            n_disk: read(&self.n_disk),
            n_hit_memory: read(&self.n_hit_memory),
            n_hit_indirect: read(&self.n_hit_indirect),
            n_hit_disk: read(&self.n_hit_disk),
            n_miss: read(&self.n_miss),
            n_disk_insert: read(&self.n_disk_insert),
            n_disk_delete: read(&self.n_disk_delete),
            n_disk_full: read(&self.n_disk_full),
            n_disk_busy: read(&self.n_disk_busy),
        }
    }
}

/// Counters of one PCCT, readable from any thread.
#[derive(Debug, Default)]
pub struct PcctCounters {
    pub n_entries: AtomicU64,
    pub pit: PitCounters,
    pub cs: CsCounters,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PcctCountersSnapshot {
    pub n_entries: u64,
    pub pit: PitCountersSnapshot,
    pub cs: CsCountersSnapshot,
}

impl PcctCounters {
    pub fn snapshot(&self) -> PcctCountersSnapshot {
        PcctCountersSnapshot {
            n_entries: self.n_entries.load(Ordering::Relaxed),
            pit: self.pit.snapshot(),
            cs: self.cs.snapshot(),
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Lookup key of a PCC entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PccKey {
    pub name: Name,
    pub fwhint: Option<Name>,
}

impl PccKey {
    pub fn new(name: Name, fwhint: Option<Name>) -> Self {
        Self { name, fwhint }
    }

    pub fn of(interest: &Interest) -> Self {
        Self::new(interest.name.clone(), interest.fwhint.clone())
    }
}

pub(crate) struct PccEntry {
    pub(crate) key: PccKey,
    pub(crate) token: u64,
    /// Indexed by MustBeFresh.
    pub(crate) pit: [Option<PitEntry>; 2],
    pub(crate) cs: Option<CsEntry>,
}

impl PccEntry {
    fn is_empty(&self) -> bool {
        self.pit.iter().all(Option::is_none) && self.cs.is_none()
    }
}

/// Deadline queue item: (deadline, slot, token, PIT index).
pub(crate) type Deadline = Reverse<(Instant, u32, u64, u8)>;

/// The PIT-CS composite table of one worker.
pub struct Pcct {
    pub(crate) config: PcctConfig,
    pub(crate) slots: Vec<Option<PccEntry>>,
    free: Vec<u32>,
    by_key: HashMap<PccKey, u32>,
    by_token: HashMap<u64, u32>,
    last_token: u64,
    pub(crate) n_pit: usize,
    pub(crate) expiry: BinaryHeap<Deadline>,
    pub(crate) timers: BinaryHeap<Deadline>,
    pub(crate) cs: CsState,
    pub(crate) counters: Arc<PcctCounters>,
}

impl Pcct {
    pub fn new(config: PcctConfig) -> Result<Self, TableError> {
        config.validate()?;
        let cs = CsState::new(&config);
        Ok(Self {
            config,
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
            by_token: HashMap::new(),
            last_token: 0,
            n_pit: 0,
            expiry: BinaryHeap::new(),
            timers: BinaryHeap::new(),
            cs,
            counters: Arc::new(PcctCounters::default()),
        })
    }

    pub fn config(&self) -> &PcctConfig {
        &self.config
    }

    /// Number of live PCC entries.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Number of live PIT entries.
    pub fn pit_len(&self) -> usize {
        self.n_pit
    }

    /// Shared counters, for management threads.
    pub fn counters(&self) -> Arc<PcctCounters> {
        self.counters.clone()
    }

    pub(crate) fn slot_of(&self, key: &PccKey) -> Option<u32> {
        self.by_key.get(key).copied()
    }

    pub(crate) fn slot_by_token(&self, token: u64) -> Option<u32> {
        self.by_token.get(&(token & TOKEN_MASK)).copied()
    }

    pub(crate) fn entry(&self, slot: u32) -> Option<&PccEntry> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    pub(crate) fn entry_mut(&mut self, slot: u32) -> Option<&mut PccEntry> {
        self.slots.get_mut(slot as usize).and_then(Option::as_mut)
    }

    /// Find or create the entry for `key`. `None` when the table is full.
    pub(crate) fn alloc(&mut self, key: &PccKey) -> Option<u32> {
        if let Some(slot) = self.slot_of(key) {
            return Some(slot);
        }
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.slots.len() < self.config.capacity => {
                self.slots.push(None);
                (self.slots.len() - 1) as u32
            }
            None => return None,
        };
        self.last_token = (self.last_token + 1) & TOKEN_MASK;
        if self.last_token == 0 {
            self.last_token = 1;
        }
        let token = self.last_token;
        self.slots[slot as usize] = Some(PccEntry {
            key: key.clone(),
            token,
            pit: [None, None],
            cs: None,
        });
        self.by_key.insert(key.clone(), slot);
        self.by_token.insert(token, slot);
        self.counters.n_entries.store(self.by_key.len() as u64, Ordering::Relaxed);
        Some(slot)
    }

    /// Free an entry that holds neither PIT nor CS state.
    pub(crate) fn release_if_empty(&mut self, slot: u32) {
        let empty = self.entry(slot).is_some_and(PccEntry::is_empty);
        if !empty {
            return;
        }
        if let Some(entry) = self.slots[slot as usize].take() {
            self.by_key.remove(&entry.key);
            self.by_token.remove(&entry.token);
            self.free.push(slot);
            self.counters.n_entries.store(self.by_key.len() as u64, Ordering::Relaxed);
        }
    }
}
