//! Pending Interest Table operations on the PCCT.

use std::cmp::Reverse;
use std::time::{Duration, Instant};

use log::debug;
use ndnfw_core::{Data, FaceId, Interest, Nack, NackReason};
use thiserror::Error;

use crate::error::TableError;
use crate::pcct::{bump, PccKey, Pcct, SuppressConfig};

/// Downstream records kept per PIT entry.
pub const MAX_DN_RECORDS: usize = 16;

/// Upstream records kept per PIT entry.
pub const MAX_UP_RECORDS: usize = 8;

/// A face that is waiting for Data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitDn {
    pub face: FaceId,
    /// PIT token carried by the Interest, echoed on the reply.
    pub token: Option<u64>,
    pub nonce: u32,
    pub expiry: Instant,
    pub can_be_prefix: bool,
    pub arrival: Instant,
}

/// A face the Interest was forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitUp {
    pub face: FaceId,
    /// Nonce of the last transmission.
    pub nonce: u32,
    pub last_tx: Instant,
    /// No retransmission before `last_tx + suppress`.
    pub suppress: Duration,
    pub n_tx: u32,
    pub nack: Option<NackReason>,
}

/// Why an Interest was not forwarded to an upstream.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardError {
    #[error("retransmission suppressed")]
    Suppressed,
    #[error("no unused nonce")]
    NoNonce,
    #[error("hop limit reached zero")]
    HopZero,
    #[error("too many upstream records")]
    TooManyUpstreams,
    #[error("PIT entry gone")]
    NotFound,
}

#[derive(Debug, Clone)]
pub struct PitEntry {
    interest: Interest,
    dns: Vec<PitDn>,
    ups: Vec<PitUp>,
    expiry: Instant,
    timer: Option<Instant>,
}

impl PitEntry {
    fn new(interest: Interest, now: Instant) -> Self {
        Self {
            interest,
            dns: Vec::new(),
            ups: Vec::new(),
            expiry: now,
            timer: None,
        }
    }

    /// The Interest as it will be forwarded: latest fields, CanBePrefix if
    /// any downstream asked for it.
    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    pub fn downstreams(&self) -> &[PitDn] {
        &self.dns
    }

    pub fn upstreams(&self) -> &[PitUp] {
        &self.ups
    }

    /// Latest downstream expiry.
    pub fn expiry(&self) -> Instant {
        self.expiry
    }

    pub fn timer(&self) -> Option<Instant> {
        self.timer
    }

    pub fn find_up(&self, face: FaceId) -> Option<&PitUp> {
        self.ups.iter().find(|up| up.face == face)
    }

    /// Whether `nonce` is already pending from another face.
    fn has_duplicate_nonce(&self, nonce: u32, face: FaceId, now: Instant) -> bool {
        self.dns
            .iter()
            .any(|dn| dn.face != face && dn.nonce == nonce && dn.expiry > now)
    }

    fn add_dn(&mut self, interest: &Interest, face: FaceId, token: Option<u64>, now: Instant) {
        let record = PitDn {
            face,
            token,
            nonce: interest.nonce,
            expiry: now + interest.lifetime,
            can_be_prefix: interest.can_be_prefix,
            arrival: now,
        };
        if let Some(dn) = self.dns.iter_mut().find(|dn| dn.face == face) {
            *dn = record;
        } else if self.dns.len() < MAX_DN_RECORDS {
            self.dns.push(record);
        } else {
            let victim = self
                .dns
                .iter()
                .position(|dn| dn.expiry <= now)
                .or_else(|| {
                    self.dns
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, dn)| dn.arrival)
                        .map(|(i, _)| i)
                })
                .unwrap_or(0);
            self.dns[victim] = record;
        }

        self.interest = interest.clone();
        self.interest.can_be_prefix = self.dns.iter().any(|dn| dn.can_be_prefix);
        self.expiry = self.dns.iter().map(|dn| dn.expiry).max().unwrap_or(now);
    }

    /// Most recent unexpired downstream nonce that differs from `used`.
    fn choose_nonce(&self, used: Option<u32>, now: Instant) -> Option<u32> {
        self.dns
            .iter()
            .filter(|dn| dn.expiry > now && Some(dn.nonce) != used)
            .max_by_key(|dn| dn.arrival)
            .map(|dn| dn.nonce)
    }

    /// Record a transmission toward `face` and return the Interest to send.
    ///
    /// Retransmissions toward the same face are suppressed until the
    /// face's window has elapsed; every transmission grows the window.
    pub fn forward_to(&mut self, face: FaceId, now: Instant, suppress: &SuppressConfig) -> Result<Interest, ForwardError> {
        let existing = self.ups.iter().position(|up| up.face == face);
        match existing {
            Some(i) if now < self.ups[i].last_tx + self.ups[i].suppress => return Err(ForwardError::Suppressed),
            None if self.ups.len() >= MAX_UP_RECORDS => return Err(ForwardError::TooManyUpstreams),
            _ => {}
        }
        let hop_limit = match self.interest.hop_limit {
            Some(0) => return Err(ForwardError::HopZero),
            Some(h) => Some(h - 1),
            None => None,
        };
        let nonce = self
            .choose_nonce(existing.map(|i| self.ups[i].nonce), now)
            .ok_or(ForwardError::NoNonce)?;

        let window = suppress.next(existing.map(|i| self.ups[i].suppress));
        match existing {
            Some(i) => {
                let up = &mut self.ups[i];
                up.nonce = nonce;
                up.last_tx = now;
                up.suppress = window;
                up.n_tx += 1;
                up.nack = None;
            }
            None => self.ups.push(PitUp {
                face,
                nonce,
                last_tx: now,
                suppress: window,
                n_tx: 1,
                nack: None,
            }),
        }

        let mut out = self.interest.clone();
        out.nonce = nonce;
        out.hop_limit = hop_limit;
        out.lifetime = self
            .expiry
            .saturating_duration_since(now)
            .max(Duration::from_millis(1));
        Ok(out)
    }
}

/// Reference to a PIT entry; stale once the entry is erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PitRef {
    slot: u32,
    index: u8,
    token: u64,
}

impl PitRef {
    /// PCC token to place on Interests forwarded for this entry.
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn must_be_fresh(&self) -> bool {
        self.index == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PitInsertResult {
    /// A new PIT entry was created.
    New(PitRef),
    /// The Interest was aggregated into an existing entry.
    Found(PitRef),
    /// Another face already has this nonce pending; nothing was recorded.
    DuplicateNonce(PitRef),
    /// A cached Data answers the Interest.
    CsHit(Data),
    /// No free entry.
    Full,
}

/// Downstreams answered by an incoming Data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitSatisfied {
    /// Interest of the first satisfied PIT entry.
    pub interest: Interest,
    pub downstreams: Vec<PitDn>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PitNackResult {
    /// Recorded; other upstreams may still answer.
    Pending(PitRef),
    /// Every upstream has returned a Nack; `reason` is the least severe.
    AllNacked { pit: PitRef, reason: NackReason },
    /// No matching PIT entry or upstream record.
    Miss,
}

impl Pcct {
    /// Insert an Interest arriving on `face`.
    pub fn pit_insert(&mut self, interest: &Interest, face: FaceId, dn_token: Option<u64>, now: Instant) -> PitInsertResult {
        if let Some(data) = self.cs_lookup(interest, now) {
            bump(&self.counters.pit.n_cs_match);
            return PitInsertResult::CsHit(data);
        }

        let Some(slot) = self.alloc(&PccKey::of(interest)) else {
            bump(&self.counters.pit.n_alloc_err);
            return PitInsertResult::Full;
        };
        let index = usize::from(interest.must_be_fresh);
        let Some(entry) = self.entry_mut(slot) else {
            return PitInsertResult::Full;
        };
        let token = entry.token;
        let pit_ref = PitRef {
            slot,
            index: index as u8,
            token,
        };

        let is_new = entry.pit[index].is_none();
        let pit = entry.pit[index].get_or_insert_with(|| PitEntry::new(interest.clone(), now));
        if !is_new && pit.has_duplicate_nonce(interest.nonce, face, now) {
            debug!("PIT duplicate nonce {:08x} for {} from face {}", interest.nonce, interest.name, face);
            bump(&self.counters.pit.n_found);
            return PitInsertResult::DuplicateNonce(pit_ref);
        }
        let before = pit.expiry;
        pit.add_dn(interest, face, dn_token, now);
        let expiry = pit.expiry;

        if is_new || expiry != before {
            self.expiry.push(Reverse((expiry, slot, token, index as u8)));
        }
        if is_new {
            self.n_pit += 1;
            self.publish_pit_len();
            bump(&self.counters.pit.n_insert);
            PitInsertResult::New(pit_ref)
        } else {
            bump(&self.counters.pit.n_found);
            PitInsertResult::Found(pit_ref)
        }
    }

    fn publish_pit_len(&self) {
        self.counters
            .pit
            .n_entries
            .store(self.n_pit as u64, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn pit_entry(&self, pit: PitRef) -> Option<&PitEntry> {
        self.entry(pit.slot)
            .filter(|e| e.token == pit.token)
            .and_then(|e| e.pit[pit.index as usize].as_ref())
    }

    pub fn pit_entry_mut(&mut self, pit: PitRef) -> Option<&mut PitEntry> {
        self.entry_mut(pit.slot)
            .filter(|e| e.token == pit.token)
            .and_then(|e| e.pit[pit.index as usize].as_mut())
    }

    /// Forward the entry's Interest to `face`, honoring suppression.
    pub fn pit_forward(&mut self, pit: PitRef, face: FaceId, now: Instant) -> Result<Interest, ForwardError> {
        let entry = self
            .slots
            .get_mut(pit.slot as usize)
            .and_then(Option::as_mut)
            .filter(|e| e.token == pit.token)
            .and_then(|e| e.pit[pit.index as usize].as_mut())
            .ok_or(ForwardError::NotFound)?;
        entry.forward_to(face, now, &self.config.suppress)
    }

    /// Erase a PIT entry.
    pub fn pit_erase(&mut self, pit: PitRef) -> Result<(), TableError> {
        let entry = self
            .entry_mut(pit.slot)
            .filter(|e| e.token == pit.token)
            .ok_or(TableError::NotFound)?;
        entry.pit[pit.index as usize].take().ok_or(TableError::NotFound)?;
        self.n_pit -= 1;
        self.publish_pit_len();
        self.release_if_empty(pit.slot);
        Ok(())
    }

    /// Remove the downstream record of `face`, erasing the PIT entry when
    /// no downstream is left.
    pub fn pit_remove_dn(&mut self, pit: PitRef, face: FaceId) -> Option<PitDn> {
        let entry = self.pit_entry_mut(pit)?;
        let at = entry.dns.iter().position(|dn| dn.face == face)?;
        let dn = entry.dns.remove(at);
        if entry.dns.is_empty() {
            let _ = self.pit_erase(pit);
            return Some(dn);
        }
        entry.interest.can_be_prefix = entry.dns.iter().any(|dn| dn.can_be_prefix);
        let before = entry.expiry;
        let expiry = entry.dns.iter().map(|dn| dn.expiry).max().unwrap_or(before);
        entry.expiry = expiry;
        if expiry != before {
            self.expiry.push(Reverse((expiry, pit.slot, pit.token, pit.index)));
        }
        Some(dn)
    }

    /// Match a Data that carried `token` and cache it.
    ///
    /// Downstreams whose Interest the Data answers are removed; a PIT entry
    /// left without downstreams is erased.
    pub fn pit_data(&mut self, token: u64, data: &Data, now: Instant) -> Option<PitSatisfied> {
        let satisfied = self.slot_by_token(token).and_then(|slot| {
            let entry = self.entry_mut(slot)?;
            let exact = entry.key.name == data.name;
            if !exact && !entry.key.name.is_prefix_of(&data.name) {
                return None;
            }

            let mut interest = None;
            let mut downstreams = Vec::new();
            let mut erased = 0;
            for (index, pit_slot) in entry.pit.iter_mut().enumerate() {
                // Data without FreshnessPeriod is never fresh
                if index == 1 && data.freshness_period.is_zero() {
                    continue;
                }
                let Some(pit) = pit_slot.as_mut() else { continue };
                let (hit, keep): (Vec<_>, Vec<_>) = pit.dns.drain(..).partition(|dn| exact || dn.can_be_prefix);
                pit.dns = keep;
                if hit.is_empty() {
                    continue;
                }
                interest.get_or_insert_with(|| pit.interest.clone());
                downstreams.extend(hit);
                if pit.dns.is_empty() {
                    *pit_slot = None;
                    erased += 1;
                } else {
                    pit.interest.can_be_prefix = pit.dns.iter().any(|dn| dn.can_be_prefix);
                }
            }
            interest.map(|interest| (slot, erased, PitSatisfied { interest, downstreams }))
        });

        let Some((slot, erased, satisfied)) = satisfied else {
            debug!("PIT no match for Data {} token {:#x}", data.name, token);
            bump(&self.counters.pit.n_data_miss);
            return None;
        };
        bump(&self.counters.pit.n_data_hit);
        self.n_pit -= erased;
        self.publish_pit_len();
        self.cs_insert_at(slot, &satisfied.interest, data.clone(), now);
        self.release_if_empty(slot);
        Some(satisfied)
    }

    /// Record a Nack from `face` against the PIT entry identified by `token`.
    pub fn pit_nack(&mut self, token: u64, nack: &Nack, face: FaceId) -> PitNackResult {
        let index = usize::from(nack.interest.must_be_fresh);
        let result = self.slot_by_token(token).and_then(|slot| {
            let entry = self.entry_mut(slot)?;
            if entry.key.name != nack.interest.name {
                return None;
            }
            let pit_ref = PitRef {
                slot,
                index: index as u8,
                token: entry.token,
            };
            let pit = entry.pit[index].as_mut()?;
            let up = pit
                .ups
                .iter_mut()
                .find(|up| up.face == face && up.nonce == nack.interest.nonce)?;
            up.nack = Some(nack.reason);

            let mut merged = Some(nack.reason);
            for up in &pit.ups {
                merged = match (merged, up.nack) {
                    (Some(a), Some(b)) => Some(a.least_severe(b)),
                    _ => None,
                };
            }
            Some(match merged {
                Some(reason) => PitNackResult::AllNacked { pit: pit_ref, reason },
                None => PitNackResult::Pending(pit_ref),
            })
        });
        match result {
            Some(result) => {
                bump(&self.counters.pit.n_nack_hit);
                result
            }
            None => {
                bump(&self.counters.pit.n_nack_miss);
                PitNackResult::Miss
            }
        }
    }

    /// Erase every PIT entry whose downstreams have all expired.
    pub fn pit_expire(&mut self, now: Instant) -> usize {
        let mut total = 0;
        while let Some(&Reverse((when, slot, token, _))) = self.expiry.peek() {
            if when > now {
                break;
            }
            self.expiry.pop();
            let Some(entry) = self.entry_mut(slot).filter(|e| e.token == token) else {
                continue;
            };
            let mut expired = 0;
            for pit in entry.pit.iter_mut() {
                if pit.as_ref().is_some_and(|p| p.expiry <= now) {
                    *pit = None;
                    expired += 1;
                }
            }
            if expired > 0 {
                self.n_pit -= expired;
                total += expired;
                self.release_if_empty(slot);
            }
        }
        if total > 0 {
            self.publish_pit_len();
            self.counters
                .pit
                .n_expired
                .fetch_add(total as u64, std::sync::atomic::Ordering::Relaxed);
        }
        total
    }

    /// Arm the strategy timer of a PIT entry, replacing an earlier one.
    pub fn pit_set_timer(&mut self, pit: PitRef, at: Instant) -> Result<(), TableError> {
        let entry = self.pit_entry_mut(pit).ok_or(TableError::NotFound)?;
        entry.timer = Some(at);
        self.timers.push(Reverse((at, pit.slot, pit.token, pit.index)));
        Ok(())
    }

    /// PIT entries whose strategy timer is due. Timers of erased entries
    /// are dropped silently.
    pub fn pit_due_timers(&mut self, now: Instant) -> Vec<PitRef> {
        let mut due = Vec::new();
        while let Some(&Reverse((at, slot, token, index))) = self.timers.peek() {
            if at > now {
                break;
            }
            self.timers.pop();
            let pit_ref = PitRef { slot, index, token };
            if let Some(entry) = self.pit_entry_mut(pit_ref) {
                if entry.timer == Some(at) {
                    entry.timer = None;
                    due.push(pit_ref);
                }
            }
        }
        due
    }
}
