//! Content Store operations on the PCCT.
//!
//! A direct entry owns a Data packet, in memory or on disk. An indirect
//! entry lives under an Interest name that is a proper prefix of the Data
//! name (or carries a forwarding hint) and points at the direct entry, so
//! later CanBePrefix Interests with that name find the Data in one probe.
//!
//! Each kind of entry sits on its own capacity-bounded list ordered by
//! recency. Touching an entry moves it to the tail only when it was not
//! already moved during the current bucket of `cs_bucket_span` touches,
//! which keeps popular entries from being relinked on every hit.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use log::{debug, warn};
use ndnfw_core::{Data, Interest, LpPacket, Name, Packet};
use serde::Serialize;

use crate::disk::DiskStore;
use crate::error::TableError;
use crate::pcct::{bump, PccKey, Pcct, PcctConfig};

/// The CS lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CsList {
    /// Direct entries held in memory.
    Direct,
    Indirect,
    /// Direct entries moved to disk.
    Disk,
}

impl CsList {
    fn index(self) -> usize {
        match self {
            CsList::Direct => 0,
            CsList::Indirect => 1,
            CsList::Disk => 2,
        }
    }
}

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: u32,
    next: u32,
    list: Option<CsList>,
    bucket: u64,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            prev: NIL,
            next: NIL,
            list: None,
            bucket: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ListHead {
    head: u32,
    tail: u32,
    count: usize,
    touches: u64,
}

impl Default for ListHead {
    fn default() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            count: 0,
            touches: 0,
        }
    }
}

/// Intrusive doubly linked lists over PCCT slots; a slot is on at most one list.
pub(crate) struct RecencyLists {
    links: Vec<Link>,
    heads: [ListHead; 3],
    span: u64,
}

impl RecencyLists {
    fn new(span: u64) -> Self {
        Self {
            links: Vec::new(),
            heads: [ListHead::default(); 3],
            span,
        }
    }

    fn link(&mut self, slot: u32) -> &mut Link {
        let i = slot as usize;
        if i >= self.links.len() {
            self.links.resize(i + 1, Link::default());
        }
        &mut self.links[i]
    }

    fn push_back(&mut self, list: CsList, slot: u32) {
        let head = self.heads[list.index()];
        let bucket = head.touches / self.span;
        *self.link(slot) = Link {
            prev: head.tail,
            next: NIL,
            list: Some(list),
            bucket,
        };
        if head.tail == NIL {
            self.heads[list.index()].head = slot;
        } else {
            self.link(head.tail).next = slot;
        }
        let head = &mut self.heads[list.index()];
        head.tail = slot;
        head.count += 1;
    }

    fn remove(&mut self, slot: u32) -> Option<CsList> {
        let link = *self.link(slot);
        let list = link.list?;
        if link.prev == NIL {
            self.heads[list.index()].head = link.next;
        } else {
            self.link(link.prev).next = link.next;
        }
        if link.next == NIL {
            self.heads[list.index()].tail = link.prev;
        } else {
            self.link(link.next).prev = link.prev;
        }
        self.heads[list.index()].count -= 1;
        *self.link(slot) = Link::default();
        Some(list)
    }

    fn touch(&mut self, slot: u32) {
        let Some(list) = self.link(slot).list else { return };
        let head = &mut self.heads[list.index()];
        head.touches += 1;
        let bucket = head.touches / self.span;
        if self.link(slot).bucket != bucket {
            self.remove(slot);
            self.push_back(list, slot);
        }
    }

    fn front(&self, list: CsList) -> Option<u32> {
        let head = self.heads[list.index()].head;
        (head != NIL).then_some(head)
    }

    fn len(&self, list: CsList) -> usize {
        self.heads[list.index()].count
    }

    #[cfg(test)]
    fn order(&self, list: CsList) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cur = self.heads[list.index()].head;
        while cur != NIL {
            out.push(cur);
            cur = self.links[cur as usize].next;
        }
        out
    }
}

pub(crate) enum Residency {
    Memory(Data),
    Disk {
        disk_slot: u64,
        name: Name,
        freshness: Duration,
        fetching: bool,
    },
}

pub(crate) struct DirectEntry {
    residency: Residency,
    arrival: Instant,
    /// Slots of the indirect entries pointing here.
    indirects: Vec<u32>,
}

pub(crate) enum CsEntry {
    Direct(DirectEntry),
    Indirect { direct: u32 },
}

/// Result of a disk operation, queued by the disk helper for the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskCompletion {
    Fetched { token: u64, disk_slot: u64, wire: Option<Bytes> },
    Stored { token: u64, disk_slot: u64, ok: bool },
}

struct DiskTier {
    store: Arc<dyn DiskStore>,
    completions: Arc<ArrayQueue<DiskCompletion>>,
    /// Operations started and not yet polled; never above the queue capacity.
    in_flight: usize,
    free: Vec<u64>,
}

impl DiskTier {
    /// Claim room for one completion.
    fn reserve(&mut self) -> bool {
        if self.in_flight >= self.completions.capacity() {
            return false;
        }
        self.in_flight += 1;
        true
    }
}

fn complete(completions: &ArrayQueue<DiskCompletion>, completion: DiskCompletion) {
    if let Err(lost) = completions.push(completion) {
        warn!("Disk completion queue overrun, lost {:?}", lost);
    }
}

pub(crate) struct CsState {
    lists: RecencyLists,
    disk: Option<DiskTier>,
}

impl CsState {
    pub(crate) fn new(config: &PcctConfig) -> Self {
        Self {
            lists: RecencyLists::new(config.cs_bucket_span),
            disk: None,
        }
    }
}

fn fresh_at(freshness: Duration, arrival: Instant, now: Instant) -> bool {
    !freshness.is_zero() && now < arrival + freshness
}

impl Pcct {
    /// Enable the disk tier. Needs a non-zero `cs_disk_capacity`; slots
    /// `1..=cs_disk_capacity` of `store` are used.
    pub fn attach_disk(&mut self, store: Arc<dyn DiskStore>) -> Result<(), TableError> {
        let capacity = self.config.cs_disk_capacity;
        if capacity == 0 {
            return Err(TableError::InvalidConfig("cs_disk_capacity is zero".into()));
        }
        let completions = Arc::new(ArrayQueue::new(capacity * 2));
        self.cs.disk = Some(DiskTier {
            store,
            completions,
            in_flight: 0,
            free: (1..=capacity as u64).rev().collect(),
        });
        Ok(())
    }

    pub fn cs_count(&self, list: CsList) -> usize {
        self.cs.lists.len(list)
    }

    pub fn cs_capacity(&self, list: CsList) -> usize {
        match list {
            CsList::Direct => self.config.cs_direct_capacity,
            CsList::Indirect => self.config.cs_indirect_capacity,
            CsList::Disk => self.cs.disk.as_ref().map_or(0, |_| self.config.cs_disk_capacity),
        }
    }

    fn publish_cs_counts(&self) {
        let cs = &self.counters.cs;
        cs.n_direct.store(self.cs_count(CsList::Direct) as u64, Ordering::Relaxed);
        cs.n_indirect.store(self.cs_count(CsList::Indirect) as u64, Ordering::Relaxed);
        cs.n_disk.store(self.cs_count(CsList::Disk) as u64, Ordering::Relaxed);
    }

    /// Find cached Data answering `interest`.
    ///
    /// An entry on disk answers with a miss and starts a fetch; once
    /// [`Pcct::poll_disk`] sees the result the entry is back in memory.
    pub fn cs_lookup(&mut self, interest: &Interest, now: Instant) -> Option<Data> {
        let hit = self.cs_probe(interest, now);
        match hit {
            Some(Ok(data)) => Some(data),
            Some(Err(())) => None,
            None => {
                bump(&self.counters.cs.n_miss);
                None
            }
        }
    }

    /// `Some(Ok)` on a memory hit, `Some(Err)` on a disk hit, `None` on a miss.
    fn cs_probe(&mut self, interest: &Interest, now: Instant) -> Option<Result<Data, ()>> {
        let slot = self.slot_of(&PccKey::of(interest))?;
        let (target, indirect) = match self.entry(slot)?.cs.as_ref()? {
            CsEntry::Direct(_) => (slot, false),
            CsEntry::Indirect { direct } => (*direct, true),
        };
        let token = self.entry(target)?.token;
        let CsEntry::Direct(direct) = self.entry(target)?.cs.as_ref()? else {
            return None;
        };

        match &direct.residency {
            Residency::Memory(data) => {
                if !data.can_satisfy(interest) || (interest.must_be_fresh && !data.is_fresh(direct.arrival, now)) {
                    return None;
                }
                let data = data.clone();
                self.cs.lists.touch(target);
                if indirect {
                    self.cs.lists.touch(slot);
                    bump(&self.counters.cs.n_hit_indirect);
                } else {
                    bump(&self.counters.cs.n_hit_memory);
                }
                Some(Ok(data))
            }
            Residency::Disk {
                disk_slot,
                name,
                freshness,
                fetching,
            } => {
                let name_ok = if interest.can_be_prefix {
                    interest.name.is_prefix_of(name)
                } else {
                    interest.name == *name
                };
                if !name_ok || (interest.must_be_fresh && !fresh_at(*freshness, direct.arrival, now)) {
                    return None;
                }
                let (disk_slot, fetching) = (*disk_slot, *fetching);
                bump(&self.counters.cs.n_hit_disk);
                self.cs.lists.touch(target);
                if !fetching {
                    self.start_fetch(target, token, disk_slot);
                }
                Some(Err(()))
            }
        }
    }

    fn start_fetch(&mut self, slot: u32, token: u64, disk_slot: u64) {
        let Some(disk) = self.cs.disk.as_mut() else { return };
        if !disk.reserve() {
            // stays on disk unfetched; a later lookup tries again
            bump(&self.counters.cs.n_disk_busy);
            return;
        }
        if let Some(CsEntry::Direct(DirectEntry {
            residency: Residency::Disk { fetching, .. },
            ..
        })) = self.slots.get_mut(slot as usize).and_then(Option::as_mut).and_then(|e| e.cs.as_mut())
        {
            *fetching = true;
        }
        let completions = disk.completions.clone();
        disk.store.get(
            disk_slot,
            Box::new(move |wire| {
                complete(&completions, DiskCompletion::Fetched { token, disk_slot, wire });
            }),
        );
    }

    /// Cache `data` as the answer to `interest`.
    pub fn cs_insert(&mut self, interest: &Interest, data: Data, now: Instant) {
        let Some(slot) = self.alloc(&PccKey::of(interest)) else {
            debug!("CS insert of {} skipped: table full", data.name);
            return;
        };
        self.cs_insert_at(slot, interest, data, now);
        self.release_if_empty(slot);
    }

    /// Cache `data` for the entry in `slot`, whose key is `interest`'s.
    pub(crate) fn cs_insert_at(&mut self, slot: u32, interest: &Interest, data: Data, now: Instant) {
        let direct_key = PccKey::new(data.name.clone(), None);
        if self.entry(slot).is_some_and(|e| e.key == direct_key) {
            self.cs_set_direct(slot, data, now);
        } else {
            let Some(direct) = self.alloc(&direct_key) else {
                debug!("CS insert of {} for {} skipped: table full", data.name, interest.name);
                return;
            };
            self.cs_set_direct(direct, data, now);
            self.cs_set_indirect(slot, direct);
        }
        self.cs_evict();
        self.publish_cs_counts();
    }

    fn cs_set_direct(&mut self, slot: u32, data: Data, now: Instant) {
        let old = self.entry_mut(slot).and_then(|e| e.cs.take());
        let mut indirects = Vec::new();
        match old {
            Some(CsEntry::Direct(old)) => {
                self.cs.lists.remove(slot);
                if let Residency::Disk { disk_slot, .. } = old.residency {
                    self.release_disk_slot(disk_slot);
                }
                indirects = old.indirects;
            }
            Some(CsEntry::Indirect { direct }) => {
                self.cs.lists.remove(slot);
                self.unlink_indirect(direct, slot);
            }
            None => {}
        }
        if let Some(entry) = self.entry_mut(slot) {
            entry.cs = Some(CsEntry::Direct(DirectEntry {
                residency: Residency::Memory(data),
                arrival: now,
                indirects,
            }));
            self.cs.lists.push_back(CsList::Direct, slot);
        }
    }

    fn cs_set_indirect(&mut self, slot: u32, direct: u32) {
        if slot == direct {
            return;
        }
        let limit = self.config.cs_assoc_limit;
        let room = match self.entry(direct).and_then(|e| e.cs.as_ref()) {
            Some(CsEntry::Direct(d)) => d.indirects.len() < limit && !d.indirects.contains(&slot),
            _ => false,
        };
        if !room {
            return;
        }
        self.cs_detach(slot);

        if let Some(CsEntry::Direct(d)) = self.entry_mut(direct).and_then(|e| e.cs.as_mut()) {
            d.indirects.push(slot);
        }
        if let Some(entry) = self.entry_mut(slot) {
            entry.cs = Some(CsEntry::Indirect { direct });
            self.cs.lists.push_back(CsList::Indirect, slot);
        }
    }

    fn unlink_indirect(&mut self, direct: u32, slot: u32) {
        if let Some(CsEntry::Direct(d)) = self.entry_mut(direct).and_then(|e| e.cs.as_mut()) {
            d.indirects.retain(|&s| s != slot);
        }
    }

    fn release_disk_slot(&mut self, disk_slot: u64) {
        if let Some(disk) = self.cs.disk.as_mut() {
            disk.store.delete(disk_slot);
            disk.free.push(disk_slot);
            bump(&self.counters.cs.n_disk_delete);
        }
    }

    /// Remove the CS entry in `slot`, and the indirect entries that depend
    /// on it, without freeing `slot` itself.
    fn cs_detach(&mut self, slot: u32) {
        let Some(cs) = self.entry_mut(slot).and_then(|e| e.cs.take()) else {
            return;
        };
        self.cs.lists.remove(slot);
        match cs {
            CsEntry::Indirect { direct } => self.unlink_indirect(direct, slot),
            CsEntry::Direct(direct) => {
                if let Residency::Disk { disk_slot, .. } = direct.residency {
                    self.release_disk_slot(disk_slot);
                }
                for dependent in direct.indirects {
                    if let Some(entry) = self.entry_mut(dependent) {
                        entry.cs = None;
                    }
                    self.cs.lists.remove(dependent);
                    self.release_if_empty(dependent);
                }
            }
        }
    }

    fn cs_erase_slot(&mut self, slot: u32) {
        self.cs_detach(slot);
        self.release_if_empty(slot);
    }

    /// Erase the cached Data named `name` and its indirect entries.
    pub fn cs_erase(&mut self, name: &Name) -> Result<(), TableError> {
        let slot = self
            .slot_of(&PccKey::new(name.clone(), None))
            .filter(|&slot| matches!(self.entry(slot).and_then(|e| e.cs.as_ref()), Some(CsEntry::Direct(_))))
            .ok_or(TableError::NotFound)?;
        self.cs_erase_slot(slot);
        self.publish_cs_counts();
        Ok(())
    }

    /// Bring every list back within its capacity.
    fn cs_evict(&mut self) {
        while self.cs_count(CsList::Indirect) > self.config.cs_indirect_capacity {
            let Some(victim) = self.cs.lists.front(CsList::Indirect) else { break };
            self.cs_erase_slot(victim);
        }
        while self.cs_count(CsList::Direct) > self.config.cs_direct_capacity {
            let Some(victim) = self.cs.lists.front(CsList::Direct) else { break };
            if self.cs.disk.is_some() {
                self.cs_demote(victim);
            } else {
                self.cs_erase_slot(victim);
            }
        }
    }

    /// Move an in-memory direct entry to disk.
    fn cs_demote(&mut self, slot: u32) {
        let demoted = self.entry(slot).and_then(|entry| match entry.cs.as_ref()? {
            CsEntry::Direct(DirectEntry {
                residency: Residency::Memory(data),
                ..
            }) => Some((entry.token, Bytes::from(data.encode()), data.name.clone(), data.freshness_period)),
            _ => None,
        });
        let Some((token, wire, name, freshness)) = demoted else {
            self.cs_erase_slot(slot);
            return;
        };
        if self.cs.disk.as_ref().is_some_and(|d| d.free.is_empty()) {
            if let Some(coldest) = self.cs.lists.front(CsList::Disk) {
                self.cs_erase_slot(coldest);
            }
        }
        let Some(disk) = self.cs.disk.as_mut() else {
            self.cs_erase_slot(slot);
            return;
        };
        let Some(disk_slot) = disk.free.pop() else {
            self.cs_erase_slot(slot);
            return;
        };
        if !disk.reserve() {
            disk.free.push(disk_slot);
            bump(&self.counters.cs.n_disk_busy);
            self.cs_erase_slot(slot);
            return;
        }
        let completions = disk.completions.clone();
        disk.store.put(
            disk_slot,
            wire,
            Box::new(move |ok| complete(&completions, DiskCompletion::Stored { token, disk_slot, ok })),
        );

        if let Some(CsEntry::Direct(direct)) = self.entry_mut(slot).and_then(|e| e.cs.as_mut()) {
            direct.residency = Residency::Disk {
                disk_slot,
                name,
                freshness,
                fetching: false,
            };
        }
        self.cs.lists.remove(slot);
        self.cs.lists.push_back(CsList::Disk, slot);
        bump(&self.counters.cs.n_disk_insert);
    }

    /// Apply finished disk operations. Returns how many were processed.
    pub fn poll_disk(&mut self) -> usize {
        let Some(completions) = self.cs.disk.as_ref().map(|d| d.completions.clone()) else {
            return 0;
        };
        let mut n = 0;
        while let Some(completion) = completions.pop() {
            n += 1;
            if let Some(disk) = self.cs.disk.as_mut() {
                disk.in_flight = disk.in_flight.saturating_sub(1);
            }
            match completion {
                DiskCompletion::Fetched { token, disk_slot, wire } => self.on_disk_fetched(token, disk_slot, wire),
                DiskCompletion::Stored { ok: true, .. } => {}
                DiskCompletion::Stored { token, disk_slot, ok: false } => {
                    bump(&self.counters.cs.n_disk_full);
                    if let Some(slot) = self.disk_resident(token, disk_slot) {
                        warn!("CS disk write failed, dropping entry in disk slot {}", disk_slot);
                        self.cs_erase_slot(slot);
                    }
                }
            }
        }
        if n > 0 {
            self.cs_evict();
            self.publish_cs_counts();
        }
        n
    }

    /// Slot of the entry with `token` if it still lives in `disk_slot`.
    fn disk_resident(&self, token: u64, disk_slot: u64) -> Option<u32> {
        let slot = self.slot_by_token(token)?;
        match self.entry(slot)?.cs.as_ref()? {
            CsEntry::Direct(DirectEntry {
                residency: Residency::Disk { disk_slot: ds, .. },
                ..
            }) if *ds == disk_slot => Some(slot),
            _ => None,
        }
    }

    /// Bring a fetched entry back into memory; an unreadable one is dropped.
    pub fn on_disk_fetched(&mut self, token: u64, disk_slot: u64, wire: Option<Bytes>) {
        let Some(slot) = self.disk_resident(token, disk_slot) else {
            return;
        };
        let data = wire.and_then(|wire| match LpPacket::decode(wire) {
            Ok(LpPacket {
                packet: Packet::Data(data),
                ..
            }) => Some(data),
            _ => None,
        });
        let Some(CsEntry::Direct(direct)) = self.entry_mut(slot).and_then(|e| e.cs.as_mut()) else {
            return;
        };
        match data {
            Some(data) if matches!(&direct.residency, Residency::Disk { name, .. } if *name == data.name) => {
                direct.residency = Residency::Memory(data);
                self.cs.lists.remove(slot);
                self.cs.lists.push_back(CsList::Direct, slot);
                self.release_disk_slot(disk_slot);
                debug!("CS entry in disk slot {} back in memory", disk_slot);
            }
            _ => {
                debug!("CS disk slot {} unreadable, treating as miss", disk_slot);
                self.cs_erase_slot(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{DiskCallback, DiskStore};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    fn name(uri: &str) -> Name {
        Name::parse(uri).unwrap()
    }

    fn pcct(direct: usize, indirect: usize, disk: usize) -> Pcct {
        Pcct::new(PcctConfig {
            capacity: 64,
            cs_direct_capacity: direct,
            cs_indirect_capacity: indirect,
            cs_disk_capacity: disk,
            cs_assoc_limit: 2,
            cs_bucket_span: 2,
            ..Default::default()
        })
        .unwrap()
    }

    fn data(uri: &str) -> Data {
        Data::new(name(uri), Bytes::from(uri.to_string())).with_freshness_period(Duration::from_secs(1))
    }

    #[test]
    fn test_recency_buckets() {
        let mut lists = RecencyLists::new(2);
        for slot in [3, 4, 5] {
            lists.push_back(CsList::Direct, slot);
        }
        lists.touch(3);
        assert_eq!(lists.order(CsList::Direct), vec![3, 4, 5]);
        lists.touch(3);
        assert_eq!(lists.order(CsList::Direct), vec![4, 5, 3]);
        // already moved in this bucket
        lists.touch(4);
        assert_eq!(lists.order(CsList::Direct), vec![4, 5, 3]);
        assert_eq!(lists.remove(5), Some(CsList::Direct));
        assert_eq!(lists.remove(5), None);
        assert_eq!(lists.len(CsList::Direct), 2);
        assert_eq!(lists.front(CsList::Direct), Some(4));
    }

    #[test]
    fn test_round_trip() {
        let mut pcct = pcct(4, 4, 0);
        let now = Instant::now();
        let interest = Interest::new(name("/A/1"));
        pcct.cs_insert(&interest, data("/A/1"), now);
        assert_eq!(pcct.cs_lookup(&interest, now), Some(data("/A/1")));
        assert_eq!(pcct.counters().snapshot().cs.n_hit_memory, 1);
    }

    #[test]
    fn test_must_be_fresh() {
        let mut pcct = pcct(4, 4, 0);
        let now = Instant::now();
        pcct.cs_insert(&Interest::new(name("/F")), data("/F"), now);
        let fresh = Interest::new(name("/F")).with_must_be_fresh(true);
        assert!(pcct.cs_lookup(&fresh, now + Duration::from_millis(500)).is_some());
        assert!(pcct.cs_lookup(&fresh, now + Duration::from_secs(2)).is_none());
        assert!(pcct.cs_lookup(&Interest::new(name("/F")), now + Duration::from_secs(2)).is_some());
    }

    #[test]
    fn test_indirect_entry() {
        let mut pcct = pcct(4, 4, 0);
        let now = Instant::now();
        let prefix = Interest::new(name("/P")).with_can_be_prefix(true);
        pcct.cs_insert(&prefix, data("/P/x/1"), now);
        assert_eq!(pcct.cs_count(CsList::Direct), 1);
        assert_eq!(pcct.cs_count(CsList::Indirect), 1);

        assert_eq!(pcct.cs_lookup(&prefix, now), Some(data("/P/x/1")));
        assert_eq!(pcct.counters().snapshot().cs.n_hit_indirect, 1);
        // exact Interest for the prefix does not match
        assert_eq!(pcct.cs_lookup(&Interest::new(name("/P")), now), None);
        assert_eq!(pcct.cs_lookup(&Interest::new(name("/P/x/1")), now), Some(data("/P/x/1")));

        // erasing the direct entry takes the indirect one along
        pcct.cs_erase(&name("/P/x/1")).unwrap();
        assert_eq!(pcct.cs_count(CsList::Indirect), 0);
        assert!(pcct.is_empty());
        assert_eq!(pcct.cs_erase(&name("/P/x/1")), Err(TableError::NotFound));
    }

    #[test]
    fn test_assoc_limit() {
        let mut pcct = pcct(4, 8, 0);
        let now = Instant::now();
        for uri in ["/L", "/L/a", "/L/a/b"] {
            pcct.cs_insert(&Interest::new(name(uri)).with_can_be_prefix(true), data("/L/a/b/c"), now);
        }
        assert_eq!(pcct.cs_count(CsList::Indirect), 2);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut pcct = pcct(3, 2, 0);
        let now = Instant::now();
        for i in 0..20 {
            let interest = Interest::new(name(&format!("/C/{i}"))).with_can_be_prefix(i % 2 == 0);
            pcct.cs_insert(&interest, data(&format!("/C/{i}/v")), now);
            assert!(pcct.cs_count(CsList::Direct) <= 3);
            assert!(pcct.cs_count(CsList::Indirect) <= 2);
        }
        // oldest entries went first
        assert!(pcct.cs_lookup(&Interest::new(name("/C/0/v")), now).is_none());
        assert!(pcct.cs_lookup(&Interest::new(name("/C/19/v")), now).is_some());
    }

    #[test]
    fn test_evicting_direct_drops_dependents() {
        let mut pcct = pcct(1, 4, 0);
        let now = Instant::now();
        pcct.cs_insert(&Interest::new(name("/E")).with_can_be_prefix(true), data("/E/1"), now);
        assert_eq!(pcct.cs_count(CsList::Indirect), 1);
        pcct.cs_insert(&Interest::new(name("/G/1")), data("/G/1"), now);
        assert_eq!(pcct.cs_count(CsList::Direct), 1);
        assert_eq!(pcct.cs_count(CsList::Indirect), 0);
        assert_eq!(pcct.len(), 1);
    }

    /// Disk store that runs callbacks only when told to.
    #[derive(Default)]
    struct ManualDisk {
        slots: Mutex<HashMap<u64, Bytes>>,
        pending: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
        fail_puts: std::sync::atomic::AtomicBool,
    }

    impl ManualDisk {
        fn run(&self) {
            let pending: Vec<_> = self.pending.lock().drain(..).collect();
            for job in pending {
                job();
            }
        }
    }

    impl DiskStore for ManualDisk {
        fn put(&self, slot: u64, wire: Bytes, on_done: DiskCallback<bool>) {
            let ok = !self.fail_puts.load(Ordering::Relaxed);
            if ok {
                self.slots.lock().insert(slot, wire);
            }
            self.pending.lock().push(Box::new(move || on_done(ok)));
        }

        fn get(&self, slot: u64, on_found: DiskCallback<Option<Bytes>>) {
            let found = self.slots.lock().get(&slot).cloned();
            self.pending.lock().push(Box::new(move || on_found(found)));
        }

        fn delete(&self, slot: u64) {
            self.slots.lock().remove(&slot);
        }
    }

    #[test]
    fn test_disk_demote_and_fetch() {
        let disk = Arc::new(ManualDisk::default());
        let mut pcct = pcct(1, 2, 1);
        pcct.attach_disk(disk.clone()).unwrap();
        let now = Instant::now();
        let a = Interest::new(name("/D/a"));
        pcct.cs_insert(&a, data("/D/a"), now);
        pcct.cs_insert(&Interest::new(name("/D/b")), data("/D/b"), now);
        assert_eq!(pcct.cs_count(CsList::Disk), 1);
        assert_eq!(pcct.counters().snapshot().cs.n_disk_insert, 1);
        disk.run();
        assert_eq!(pcct.poll_disk(), 1);

        // disk hit answers as a miss and starts one fetch
        assert_eq!(pcct.cs_lookup(&a, now), None);
        assert_eq!(pcct.cs_lookup(&a, now), None);
        assert_eq!(pcct.counters().snapshot().cs.n_hit_disk, 2);
        disk.run();
        assert_eq!(pcct.poll_disk(), 1);

        // /D/a is back in memory, /D/b went to disk in its place
        assert_eq!(pcct.cs_lookup(&a, now), Some(data("/D/a")));
        assert_eq!(pcct.cs_count(CsList::Direct), 1);
        assert_eq!(pcct.cs_count(CsList::Disk), 1);
    }

    #[test]
    fn test_disk_full_overflow_and_failed_put() {
        let disk = Arc::new(ManualDisk::default());
        let mut pcct = pcct(1, 2, 1);
        pcct.attach_disk(disk.clone()).unwrap();
        let now = Instant::now();
        for uri in ["/x/1", "/x/2", "/x/3"] {
            pcct.cs_insert(&Interest::new(name(uri)), data(uri), now);
            assert!(pcct.cs_count(CsList::Disk) <= 1);
        }
        assert_eq!(pcct.counters().snapshot().cs.n_disk_delete, 1);
        disk.run();
        assert_eq!(pcct.poll_disk(), 2);

        disk.fail_puts.store(true, Ordering::Relaxed);
        pcct.cs_insert(&Interest::new(name("/x/4")), data("/x/4"), now);
        disk.run();
        pcct.poll_disk();
        assert_eq!(pcct.counters().snapshot().cs.n_disk_full, 1);
        assert_eq!(pcct.cs_count(CsList::Disk), 0);
    }

    #[test]
    fn test_disk_ops_bounded_by_completion_queue() {
        let disk = Arc::new(ManualDisk::default());
        let mut pcct = pcct(1, 2, 2);
        pcct.attach_disk(disk.clone()).unwrap();
        let now = Instant::now();
        let (a, b) = (Interest::new(name("/q/a")), Interest::new(name("/q/b")));
        pcct.cs_insert(&a, data("/q/a"), now);
        pcct.cs_insert(&b, data("/q/b"), now);
        pcct.cs_insert(&Interest::new(name("/q/c")), data("/q/c"), now);
        assert_eq!(pcct.cs_lookup(&a, now), None);
        // /q/a is coldest on disk and makes room for /q/c
        pcct.cs_insert(&Interest::new(name("/q/d")), data("/q/d"), now);
        assert_eq!(pcct.cs_count(CsList::Disk), 2);

        // four operations wait on a queue of four: no fetch for /q/b yet
        assert_eq!(pcct.cs_lookup(&b, now), None);
        assert_eq!(pcct.counters().snapshot().cs.n_disk_busy, 1);
        disk.run();
        assert_eq!(pcct.poll_disk(), 4);

        assert_eq!(pcct.cs_lookup(&b, now), None);
        disk.run();
        assert_eq!(pcct.poll_disk(), 1);
        assert_eq!(pcct.cs_lookup(&b, now), Some(data("/q/b")));
        assert_eq!(pcct.counters().snapshot().cs.n_disk_busy, 1);
    }

    #[test]
    fn test_attach_disk_needs_capacity() {
        let mut pcct = pcct(1, 1, 0);
        assert!(matches!(
            pcct.attach_disk(Arc::new(ManualDisk::default())),
            Err(TableError::InvalidConfig(_))
        ));
    }
}
