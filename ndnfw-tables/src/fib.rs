//! Forwarding Information Base with two-stage longest prefix match.
//!
//! Records live in a fixed array of hash buckets. Each bucket is an
//! immutable vector published through an epoch-protected pointer: readers
//! pin an epoch and probe without locking, the single writer copies a
//! bucket, edits the copy and swaps it in, and the old bucket is freed
//! only after every reader that could still see it has unpinned.
//!
//! Every name longer than `start_depth` components also keeps a record at
//! its `start_depth` prefix whose `height` tells how many levels below it
//! hold real entries. When no real entry exists at that prefix, the record
//! is virtual: it has neither nexthops nor strategy.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use crossbeam::utils::CachePadded;
use log::{debug, info};
use ndnfw_core::{FaceId, Name};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::strategy::StrategyHandle;

/// Longest name, in components, accepted as a FIB entry.
pub const MAX_FIB_NAME_LEN: usize = 32;

/// FIB parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FibConfig {
    /// Maximum number of records, real and virtual.
    pub capacity: usize,
    /// Depth of the first LPM stage.
    pub start_depth: usize,
    pub max_nexthops: usize,
}

impl Default for FibConfig {
    fn default() -> Self {
        Self {
            capacity: 65536,
            start_depth: 8,
            max_nexthops: 8,
        }
    }
}

impl FibConfig {
    pub fn validate(&self) -> Result<(), TableError> {
        if self.capacity == 0 {
            return Err(TableError::InvalidConfig("fib.capacity must be positive".into()));
        }
        if self.start_depth == 0 || self.start_depth > MAX_FIB_NAME_LEN {
            return Err(TableError::InvalidConfig(format!(
                "fib.start_depth {} must be within 1..={}",
                self.start_depth, MAX_FIB_NAME_LEN
            )));
        }
        if self.max_nexthops == 0 {
            return Err(TableError::InvalidConfig("fib.max_nexthops must be positive".into()));
        }
        Ok(())
    }
}

/// Counters of one worker for one FIB entry.
#[derive(Debug, Default)]
pub struct FibCounterSlot {
    pub n_rx_interests: AtomicU64,
    pub n_rx_data: AtomicU64,
    pub n_rx_nacks: AtomicU64,
    pub n_tx_interests: AtomicU64,
}

/// Summed entry counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FibEntryCounters {
    pub n_rx_interests: u64,
    pub n_rx_data: u64,
    pub n_rx_nacks: u64,
    pub n_tx_interests: u64,
}

/// Per-worker counters of a FIB entry, one cache line per worker.
///
/// Shared by successive versions of the entry, so replacing nexthops or
/// strategy keeps the counts.
pub struct FibCounters {
    slots: Box<[CachePadded<FibCounterSlot>]>,
}

impl FibCounters {
    fn new(workers: usize) -> Self {
        Self {
            slots: (0..workers.max(1)).map(|_| CachePadded::new(FibCounterSlot::default())).collect(),
        }
    }

    /// Slot owned by `worker`.
    pub fn slot(&self, worker: usize) -> &FibCounterSlot {
        &self.slots[worker % self.slots.len()]
    }

    pub fn read(&self) -> FibEntryCounters {
        self.slots.iter().fold(FibEntryCounters::default(), |mut sum, slot| {
            sum.n_rx_interests += slot.n_rx_interests.load(Ordering::Relaxed);
            sum.n_rx_data += slot.n_rx_data.load(Ordering::Relaxed);
            sum.n_rx_nacks += slot.n_rx_nacks.load(Ordering::Relaxed);
            sum.n_tx_interests += slot.n_tx_interests.load(Ordering::Relaxed);
            sum
        })
    }
}

/// One FIB record, real or virtual.
pub struct FibEntry {
    name: Name,
    nexthops: Vec<FaceId>,
    strategy: Option<StrategyHandle>,
    height: usize,
    seq_num: u64,
    counters: Arc<FibCounters>,
}

impl FibEntry {
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn nexthops(&self) -> &[FaceId] {
        &self.nexthops
    }

    pub fn strategy(&self) -> Option<&StrategyHandle> {
        self.strategy.as_ref()
    }

    /// Levels below this record that hold real entries; zero below start depth.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Version number assigned when this record was published.
    pub fn seq_num(&self) -> u64 {
        self.seq_num
    }

    pub fn is_real(&self) -> bool {
        self.strategy.is_some()
    }

    pub fn is_virtual(&self) -> bool {
        self.strategy.is_none()
    }

    pub fn counters(&self) -> &FibCounters {
        &self.counters
    }

    fn with_height(&self, height: usize, seq_num: u64) -> Self {
        Self {
            name: self.name.clone(),
            nexthops: self.nexthops.clone(),
            strategy: self.strategy.clone(),
            height,
            seq_num,
            counters: self.counters.clone(),
        }
    }
}

impl fmt::Debug for FibEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FibEntry")
            .field("name", &self.name)
            .field("nexthops", &self.nexthops)
            .field("strategy", &self.strategy)
            .field("height", &self.height)
            .finish()
    }
}

struct Bucket {
    records: Vec<Arc<FibEntry>>,
}

/// Writer-side bookkeeping, never read by the data path.
#[derive(Default)]
struct WriterState {
    /// Real entries and their counters.
    real: HashMap<Name, Arc<FibCounters>>,
    /// Per start-depth prefix: depth of each deeper real entry -> count.
    below: HashMap<Name, BTreeMap<usize, usize>>,
    n_virtual: usize,
    last_seq: u64,
}

impl WriterState {
    fn n_records(&self) -> usize {
        self.real.len() + self.n_virtual
    }

    fn next_seq(&mut self) -> u64 {
        self.last_seq += 1;
        self.last_seq
    }

    fn height_of(&self, prefix: &Name, start_depth: usize) -> usize {
        self.below
            .get(prefix)
            .and_then(|depths| depths.keys().next_back())
            .map_or(0, |deepest| deepest - start_depth)
    }
}

/// One FIB replica.
pub struct Fib {
    buckets: Box<[Atomic<Bucket>]>,
    mask: u64,
    config: FibConfig,
    workers: usize,
    writer: Mutex<WriterState>,
    n_real: AtomicUsize,
    n_virtual: AtomicUsize,
}

impl Fib {
    pub fn new(config: FibConfig, workers: usize) -> Result<Self, TableError> {
        config.validate()?;
        let n_buckets = config.capacity.next_power_of_two();
        Ok(Self {
            buckets: (0..n_buckets).map(|_| Atomic::null()).collect(),
            mask: n_buckets as u64 - 1,
            config,
            workers,
            writer: Mutex::new(WriterState::default()),
            n_real: AtomicUsize::new(0),
            n_virtual: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &FibConfig {
        &self.config
    }

    /// Number of real entries.
    pub fn len(&self) -> usize {
        self.n_real.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of purely virtual records.
    pub fn count_virtual(&self) -> usize {
        self.n_virtual.load(Ordering::Relaxed)
    }

    /// Names of every real entry, sorted.
    pub fn names(&self) -> Vec<Name> {
        let mut names: Vec<_> = self.writer.lock().real.keys().cloned().collect();
        names.sort();
        names
    }

    /// Counters of a real entry.
    pub fn entry_counters(&self, name: &Name) -> Option<FibEntryCounters> {
        self.writer.lock().real.get(name).map(|c| c.read())
    }

    fn bucket_of(&self, hash: u64) -> &Atomic<Bucket> {
        &self.buckets[(hash & self.mask) as usize]
    }

    /// Record for the first `depth` components of `name`.
    fn get<'g>(&self, name: &Name, depth: usize, guard: &'g Guard) -> Option<&'g FibEntry> {
        let bucket = self.bucket_of(name.prefix_hash(depth)).load(Ordering::Acquire, guard);
        // SAFETY: buckets are unlinked before defer_destroy, so a bucket
        // loaded under `guard` outlives the guard.
        let bucket = unsafe { bucket.as_ref() }?;
        bucket
            .records
            .iter()
            .map(|r| &**r)
            .find(|r| r.name.len() == depth && r.name.is_prefix_of(name))
    }

    /// Exact match on a real entry.
    pub fn find<'g>(&self, name: &Name, guard: &'g Guard) -> Option<&'g FibEntry> {
        self.get(name, name.len(), guard).filter(|e| e.is_real())
    }

    /// Longest prefix match over real entries.
    pub fn lpm<'g>(&self, name: &Name, guard: &'g Guard) -> Option<&'g FibEntry> {
        let start_depth = self.config.start_depth;
        if name.len() <= start_depth {
            return self.probe_down(name, name.len(), guard);
        }

        if let Some(record) = self.get(name, start_depth, guard) {
            let top = name.len().min(start_depth + record.height);
            for depth in (start_depth + 1..=top).rev() {
                if let Some(entry) = self.get(name, depth, guard).filter(|e| e.is_real()) {
                    return Some(entry);
                }
            }
            if record.is_real() {
                return Some(record);
            }
        }
        self.probe_down(name, start_depth - 1, guard)
    }

    fn probe_down<'g>(&self, name: &Name, from: usize, guard: &'g Guard) -> Option<&'g FibEntry> {
        (0..=from)
            .rev()
            .find_map(|depth| self.get(name, depth, guard).filter(|e| e.is_real()))
    }

    /// Validation shared with [`FibReplicas`]; mutates nothing.
    fn check_insert(&self, state: &WriterState, name: &Name, nexthops: &[FaceId], has_strategy: bool) -> Result<(), TableError> {
        if nexthops.is_empty() {
            return Err(TableError::NoNexthop);
        }
        if nexthops.len() > self.config.max_nexthops {
            return Err(TableError::TooManyNexthops {
                count: nexthops.len(),
                max: self.config.max_nexthops,
            });
        }
        if name.len() > MAX_FIB_NAME_LEN {
            return Err(TableError::NameTooLong {
                len: name.len(),
                max: MAX_FIB_NAME_LEN,
            });
        }
        if !has_strategy {
            return Err(TableError::NoStrategy);
        }
        if state.real.contains_key(name) {
            return Ok(());
        }

        let start_depth = self.config.start_depth;
        let guard = epoch::pin();
        let exists = |n: &Name| self.get(n, n.len(), &guard).is_some();
        let mut needed = usize::from(!exists(name));
        if name.len() > start_depth && !exists(&name.prefix(start_depth)) {
            needed += 1;
        }
        if state.n_records() + needed > self.config.capacity {
            return Err(TableError::Full);
        }
        Ok(())
    }

    /// Insert or replace a real entry. Returns whether the name is new.
    pub fn insert(&self, name: Name, nexthops: Vec<FaceId>, strategy: Option<StrategyHandle>) -> Result<bool, TableError> {
        let mut state = self.writer.lock();
        self.check_insert(&state, &name, &nexthops, strategy.is_some())?;
        Ok(self.insert_locked(&mut state, name, nexthops, strategy))
    }

    fn insert_locked(
        &self,
        state: &mut WriterState,
        name: Name,
        nexthops: Vec<FaceId>,
        strategy: Option<StrategyHandle>,
    ) -> bool {
        let start_depth = self.config.start_depth;
        let guard = epoch::pin();
        let is_new = !state.real.contains_key(&name);
        let workers = self.workers;
        let counters = state
            .real
            .entry(name.clone())
            .or_insert_with(|| Arc::new(FibCounters::new(workers)))
            .clone();

        let height = if name.len() == start_depth {
            if is_new && self.get(&name, start_depth, &guard).is_some() {
                // virtual record at this prefix becomes real
                state.n_virtual -= 1;
            }
            state.height_of(&name, start_depth)
        } else {
            0
        };
        let seq_num = state.next_seq();
        let entry = FibEntry {
            name: name.clone(),
            nexthops,
            strategy,
            height,
            seq_num,
            counters,
        };
        self.publish(&name, Some(entry), &guard);

        if is_new && name.len() > start_depth {
            let prefix = name.prefix(start_depth);
            *state.below.entry(prefix.clone()).or_default().entry(name.len()).or_insert(0) += 1;
            self.refresh_height(state, &prefix, &guard);
        }

        self.n_real.store(state.real.len(), Ordering::Relaxed);
        self.n_virtual.store(state.n_virtual, Ordering::Relaxed);
        info!(
            "FIB {} {} height={} records={}",
            if is_new { "inserted" } else { "replaced" },
            name,
            height,
            state.n_records()
        );
        is_new
    }

    /// Remove a real entry.
    pub fn erase(&self, name: &Name) -> Result<(), TableError> {
        let mut state = self.writer.lock();
        if !state.real.contains_key(name) {
            return Err(TableError::NotFound);
        }
        self.erase_locked(&mut state, name);
        Ok(())
    }

    fn erase_locked(&self, state: &mut WriterState, name: &Name) {
        let start_depth = self.config.start_depth;
        let guard = epoch::pin();
        state.real.remove(name);

        if name.len() > start_depth {
            let prefix = name.prefix(start_depth);
            self.publish(name, None, &guard);
            if let Some(depths) = state.below.get_mut(&prefix) {
                if let Some(count) = depths.get_mut(&name.len()) {
                    *count -= 1;
                    if *count == 0 {
                        depths.remove(&name.len());
                    }
                }
                if depths.is_empty() {
                    state.below.remove(&prefix);
                }
            }
            self.refresh_height(state, &prefix, &guard);
        } else if name.len() == start_depth && state.height_of(name, start_depth) > 0 {
            // keep a virtual record so deeper entries stay reachable
            let seq_num = state.next_seq();
            let entry = FibEntry {
                name: name.clone(),
                nexthops: Vec::new(),
                strategy: None,
                height: state.height_of(name, start_depth),
                seq_num,
                counters: Arc::new(FibCounters::new(self.workers)),
            };
            self.publish(name, Some(entry), &guard);
            state.n_virtual += 1;
        } else {
            self.publish(name, None, &guard);
        }

        self.n_real.store(state.real.len(), Ordering::Relaxed);
        self.n_virtual.store(state.n_virtual, Ordering::Relaxed);
        info!("FIB erased {} records={}", name, state.n_records());
    }

    /// Bring the record at a start-depth prefix in line with the real
    /// entries below it, creating or removing a virtual record as needed.
    fn refresh_height(&self, state: &mut WriterState, prefix: &Name, guard: &Guard) {
        let height = state.height_of(prefix, self.config.start_depth);
        match self.get(prefix, prefix.len(), guard) {
            Some(record) if record.height == height => {}
            Some(record) if record.is_real() || height > 0 => {
                let seq_num = state.next_seq();
                let updated = record.with_height(height, seq_num);
                self.publish(prefix, Some(updated), guard);
            }
            Some(_) => {
                self.publish(prefix, None, guard);
                state.n_virtual -= 1;
                debug!("FIB removed virtual record {}", prefix);
            }
            None if height > 0 => {
                let seq_num = state.next_seq();
                let entry = FibEntry {
                    name: prefix.clone(),
                    nexthops: Vec::new(),
                    strategy: None,
                    height,
                    seq_num,
                    counters: Arc::new(FibCounters::new(self.workers)),
                };
                self.publish(prefix, Some(entry), guard);
                state.n_virtual += 1;
                debug!("FIB created virtual record {} height={}", prefix, height);
            }
            None => {}
        }
    }

    /// Replace (or remove) the record named `name` with a single pointer swap.
    fn publish(&self, name: &Name, record: Option<FibEntry>, guard: &Guard) {
        let slot = self.bucket_of(name.full_hash());
        let current = slot.load(Ordering::Acquire, guard);
        // SAFETY: see `get`; only the writer, holding the mutex, swaps buckets.
        let mut records: Vec<Arc<FibEntry>> = unsafe { current.as_ref() }
            .map(|b| b.records.iter().filter(|r| r.name != *name).cloned().collect())
            .unwrap_or_default();
        if let Some(record) = record {
            records.push(Arc::new(record));
        }

        let old = if records.is_empty() {
            slot.swap(Shared::null(), Ordering::AcqRel, guard)
        } else {
            slot.swap(Owned::new(Bucket { records }), Ordering::AcqRel, guard)
        };
        if !old.is_null() {
            // SAFETY: `old` is unreachable for readers pinned after the swap.
            unsafe { guard.defer_destroy(old) };
        }
    }
}

impl Drop for Fib {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no reader holds a reference.
        unsafe {
            let guard = epoch::unprotected();
            for slot in self.buckets.iter() {
                let bucket = slot.load(Ordering::Relaxed, guard);
                if !bucket.is_null() {
                    drop(bucket.into_owned());
                }
            }
        }
    }
}

/// One FIB per NUMA socket, kept identical by the control path.
pub struct FibReplicas {
    replicas: Vec<Arc<Fib>>,
}

impl FibReplicas {
    pub fn new(config: FibConfig, sockets: usize, workers: usize) -> Result<Self, TableError> {
        if sockets == 0 {
            return Err(TableError::InvalidConfig("need at least one FIB replica".into()));
        }
        let replicas = (0..sockets)
            .map(|_| Fib::new(config.clone(), workers).map(Arc::new))
            .collect::<Result<_, _>>()?;
        Ok(Self { replicas })
    }

    /// Replica serving `socket`.
    pub fn replica(&self, socket: usize) -> Arc<Fib> {
        self.replicas[socket % self.replicas.len()].clone()
    }

    pub fn replicas(&self) -> &[Arc<Fib>] {
        &self.replicas
    }

    /// Insert into every replica; nothing is changed when any replica would refuse.
    pub fn insert(&self, name: Name, nexthops: Vec<FaceId>, strategy: Option<StrategyHandle>) -> Result<bool, TableError> {
        let mut states: Vec<_> = self.replicas.iter().map(|fib| fib.writer.lock()).collect();
        for (fib, state) in self.replicas.iter().zip(states.iter()) {
            fib.check_insert(state, &name, &nexthops, strategy.is_some())?;
        }
        let mut is_new = false;
        for (fib, state) in self.replicas.iter().zip(states.iter_mut()) {
            is_new = fib.insert_locked(state, name.clone(), nexthops.clone(), strategy.clone());
        }
        Ok(is_new)
    }

    pub fn erase(&self, name: &Name) -> Result<(), TableError> {
        let mut states: Vec<_> = self.replicas.iter().map(|fib| fib.writer.lock()).collect();
        if states.iter().any(|s| !s.real.contains_key(name)) {
            return Err(TableError::NotFound);
        }
        for (fib, state) in self.replicas.iter().zip(states.iter_mut()) {
            fib.erase_locked(state, name);
        }
        Ok(())
    }

    /// Entry counters summed over replicas.
    pub fn entry_counters(&self, name: &Name) -> Option<FibEntryCounters> {
        let mut found = false;
        let mut sum = FibEntryCounters::default();
        for fib in &self.replicas {
            if let Some(c) = fib.entry_counters(name) {
                found = true;
                sum.n_rx_interests += c.n_rx_interests;
                sum.n_rx_data += c.n_rx_data;
                sum.n_rx_nacks += c.n_rx_nacks;
                sum.n_tx_interests += c.n_tx_interests;
            }
        }
        found.then_some(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::test_table;
    use crate::strategy::StrategyTable;

    fn name(uri: &str) -> Name {
        Name::parse(uri).unwrap()
    }

    fn setup(start_depth: usize) -> (Fib, StrategyTable) {
        let fib = Fib::new(
            FibConfig {
                capacity: 64,
                start_depth,
                max_nexthops: 4,
            },
            2,
        )
        .unwrap();
        let table = test_table();
        table.load("s", b"x").unwrap();
        (fib, table)
    }

    fn insert(fib: &Fib, table: &StrategyTable, uri: &str, face: FaceId) -> bool {
        fib.insert(name(uri), vec![face], table.find("s")).unwrap()
    }

    fn lpm_name(fib: &Fib, uri: &str) -> Option<String> {
        let guard = epoch::pin();
        fib.lpm(&name(uri), &guard).map(|e| e.name().to_uri())
    }

    #[test]
    fn test_lpm_examples() {
        for start_depth in [1, 2, 3, 8] {
            let (fib, table) = setup(start_depth);
            insert(&fib, &table, "/", 1);
            insert(&fib, &table, "/A", 2);
            insert(&fib, &table, "/A/B/C", 3);
            assert_eq!(lpm_name(&fib, "/A/B").as_deref(), Some("/A"), "start_depth={start_depth}");
            assert_eq!(lpm_name(&fib, "/A/B/C/D").as_deref(), Some("/A/B/C"), "start_depth={start_depth}");
            assert_eq!(lpm_name(&fib, "/Z").as_deref(), Some("/"));
            assert_eq!(lpm_name(&fib, "/A/B/C").as_deref(), Some("/A/B/C"));
        }
    }

    #[test]
    fn test_lpm_without_default_route() {
        let (fib, table) = setup(2);
        insert(&fib, &table, "/A/B/C/D", 1);
        assert_eq!(lpm_name(&fib, "/A/B/C"), None);
        assert_eq!(lpm_name(&fib, "/A/B/X/Y"), None);
        assert_eq!(lpm_name(&fib, "/A/B/C/D/E").as_deref(), Some("/A/B/C/D"));
    }

    #[test]
    fn test_virtual_records_follow_erase() {
        let (fib, table) = setup(2);
        insert(&fib, &table, "/A/B/C", 1);
        insert(&fib, &table, "/A/B/C/D/E", 2);
        assert_eq!(fib.count_virtual(), 1);
        {
            let guard = epoch::pin();
            let record = fib.get(&name("/A/B"), 2, &guard).unwrap();
            assert!(record.is_virtual());
            assert_eq!(record.height(), 3);
        }

        fib.erase(&name("/A/B/C/D/E")).unwrap();
        {
            let guard = epoch::pin();
            assert_eq!(fib.get(&name("/A/B"), 2, &guard).unwrap().height(), 1);
        }

        fib.erase(&name("/A/B/C")).unwrap();
        assert_eq!(fib.count_virtual(), 0);
        let guard = epoch::pin();
        assert!(fib.get(&name("/A/B"), 2, &guard).is_none());
    }

    #[test]
    fn test_real_record_at_start_depth_carries_height() {
        let (fib, table) = setup(2);
        insert(&fib, &table, "/A/B/C/D", 1);
        insert(&fib, &table, "/A/B", 2);
        assert_eq!(fib.count_virtual(), 0);
        assert_eq!(fib.len(), 2);
        {
            let guard = epoch::pin();
            let record = fib.find(&name("/A/B"), &guard).unwrap();
            assert_eq!(record.height(), 2);
        }
        assert_eq!(lpm_name(&fib, "/A/B/C").as_deref(), Some("/A/B"));

        // erasing the real record leaves a virtual one behind
        fib.erase(&name("/A/B")).unwrap();
        assert_eq!(fib.count_virtual(), 1);
        assert_eq!(lpm_name(&fib, "/A/B/C/D/E").as_deref(), Some("/A/B/C/D"));
        let guard = epoch::pin();
        assert!(fib.find(&name("/A/B"), &guard).is_none());
    }

    #[test]
    fn test_insert_validation_before_mutation() {
        let (fib, table) = setup(2);
        let long: String = (0..=MAX_FIB_NAME_LEN).map(|i| format!("/{i}")).collect();
        assert_eq!(fib.insert(name("/a"), vec![], table.find("s")), Err(TableError::NoNexthop));
        assert!(matches!(
            fib.insert(name("/a"), vec![1, 2, 3, 4, 5], table.find("s")),
            Err(TableError::TooManyNexthops { count: 5, max: 4 })
        ));
        assert!(matches!(
            fib.insert(name(&long), vec![1], table.find("s")),
            Err(TableError::NameTooLong { .. })
        ));
        assert_eq!(fib.insert(name("/a"), vec![1], None), Err(TableError::NoStrategy));
        assert_eq!(fib.len(), 0);
        assert_eq!(fib.count_virtual(), 0);
    }

    #[test]
    fn test_capacity_counts_virtual_records() {
        let fib = Fib::new(
            FibConfig {
                capacity: 2,
                start_depth: 1,
                max_nexthops: 2,
            },
            1,
        )
        .unwrap();
        let table = test_table();
        table.load("s", b"x").unwrap();
        insert(&fib, &table, "/A", 1);
        // needs a record at /B as well
        assert_eq!(fib.insert(name("/B/C"), vec![1], table.find("s")), Err(TableError::Full));
        insert(&fib, &table, "/A/C", 1);
        assert_eq!(fib.len(), 2);
        // replacing an existing entry needs no room
        assert!(!insert(&fib, &table, "/A/C", 2));
    }

    #[test]
    fn test_erase_missing_is_error() {
        let (fib, table) = setup(2);
        insert(&fib, &table, "/A", 1);
        assert_eq!(fib.erase(&name("/B")), Err(TableError::NotFound));
        assert_eq!(fib.len(), 1);
    }

    #[test]
    fn test_replace_keeps_counters_and_releases_strategy() {
        let (fib, table) = setup(2);
        let id2 = table.load("t", b"y").unwrap();
        assert!(insert(&fib, &table, "/A", 1));
        {
            let guard = epoch::pin();
            let entry = fib.find(&name("/A"), &guard).unwrap();
            entry.counters().slot(1).n_rx_interests.fetch_add(3, Ordering::Relaxed);
        }
        assert!(!fib.insert(name("/A"), vec![2], table.get(id2)).unwrap());
        assert_eq!(fib.entry_counters(&name("/A")).unwrap().n_rx_interests, 3);

        fib.erase(&name("/A")).unwrap();
        // the old records go away once the epoch advances
        for _ in 0..128 {
            epoch::pin().flush();
        }
        assert!(table.list().iter().all(|info| info.refcnt <= 1));
    }

    #[test]
    fn test_replicas_apply_everywhere() {
        let replicas = FibReplicas::new(FibConfig::default(), 2, 1).unwrap();
        let table = test_table();
        table.load("s", b"x").unwrap();
        assert!(replicas.insert(name("/x"), vec![1], table.find("s")).unwrap());
        for fib in replicas.replicas() {
            let guard = epoch::pin();
            assert!(fib.find(&name("/x"), &guard).is_some());
        }
        assert_eq!(replicas.insert(name("/y"), vec![], table.find("s")), Err(TableError::NoNexthop));
        assert!(replicas.replicas().iter().all(|f| f.len() == 1));
        replicas.erase(&name("/x")).unwrap();
        assert_eq!(replicas.erase(&name("/x")), Err(TableError::NotFound));
    }

    #[test]
    fn test_concurrent_readers() {
        let (fib, table) = setup(2);
        let fib = Arc::new(fib);
        insert(&fib, &table, "/", 1);
        let reader = {
            let fib = fib.clone();
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    let guard = epoch::pin();
                    let hit = fib.lpm(&Name::parse("/A/B/C/D").unwrap(), &guard);
                    assert!(hit.is_some());
                }
            })
        };
        for i in 0..200 {
            let uri = format!("/A/B/C/{}", i % 3);
            insert(&fib, &table, &uri, 2);
            fib.erase(&name(&uri)).unwrap();
        }
        reader.join().unwrap();
    }
}
