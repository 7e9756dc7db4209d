//! Forwarding worker.
//!
//! A worker owns one PCCT and reads the FIB replica of its socket. It
//! drains its Data, Nack and Interest rings in bursts, in that order, so
//! that replies free PIT state before new Interests claim it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::epoch;
use log::{debug, info};
use ndnfw_core::{Data, FaceId, Interest, LpPacket, Nack, NackReason, Name, Packet, PktPool};
use ndnfw_tables::pcct::PcctCounters;
use ndnfw_tables::{
    Fib, FibEntry, ForwardError, Pcct, PcctCountersSnapshot, PitInsertResult, PitNackResult, PitRef, StrategyAction,
    StrategyContext, StrategyEvent,
};
use serde::Serialize;

use crate::dispatch::{fw_token, token_pcc, RxPacket, WorkerQueues};
use crate::face::FaceTable;

/// Counters of one worker.
#[derive(Debug, Default)]
pub struct FwdCounters {
    pub n_interests: AtomicU64,
    pub n_data: AtomicU64,
    pub n_nacks: AtomicU64,
    pub n_cs_hit: AtomicU64,
    pub n_no_fib: AtomicU64,
    pub n_dup_nonce: AtomicU64,
    pub n_suppressed: AtomicU64,
    pub n_hop_zero: AtomicU64,
    pub n_unsolicited_data: AtomicU64,
    pub n_unsolicited_nack: AtomicU64,
    pub n_tx: AtomicU64,
    pub n_tx_drop: AtomicU64,
    pub n_alloc_err: AtomicU64,
    pub n_strategy_drop: AtomicU64,
    pub n_timers: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FwdCountersSnapshot {
    pub n_interests: u64,
    pub n_data: u64,
    pub n_nacks: u64,
    pub n_cs_hit: u64,
    pub n_no_fib: u64,
    pub n_dup_nonce: u64,
    pub n_suppressed: u64,
    pub n_hop_zero: u64,
    pub n_unsolicited_data: u64,
    pub n_unsolicited_nack: u64,
    pub n_tx: u64,
    pub n_tx_drop: u64,
    pub n_alloc_err: u64,
    pub n_strategy_drop: u64,
    pub n_timers: u64,
}

impl FwdCounters {
    pub fn snapshot(&self) -> FwdCountersSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FwdCountersSnapshot {
            n_interests: read(&self.n_interests),
            n_data: read(&self.n_data),
            n_nacks: read(&self.n_nacks),
            n_cs_hit: read(&self.n_cs_hit),
            n_no_fib: read(&self.n_no_fib),
            n_dup_nonce: read(&self.n_dup_nonce),
            n_suppressed: read(&self.n_suppressed),
            n_hop_zero: read(&self.n_hop_zero),
            n_unsolicited_data: read(&self.n_unsolicited_data),
            n_unsolicited_nack: read(&self.n_unsolicited_nack),
            n_tx: read(&self.n_tx),
            n_tx_drop: read(&self.n_tx_drop),
            n_alloc_err: read(&self.n_alloc_err),
            n_strategy_drop: read(&self.n_strategy_drop),
            n_timers: read(&self.n_timers),
        }
    }
}

/// Counters of one worker and of its PCCT.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerCountersSnapshot {
    pub fwd: FwdCountersSnapshot,
    pub pcct: PcctCountersSnapshot,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Name used for the FIB lookup of an Interest.
fn fib_name(interest: &Interest) -> &Name {
    interest.fwhint.as_ref().unwrap_or(&interest.name)
}

/// One forwarding worker.
pub struct FwdWorker {
    id: u8,
    queues: Arc<WorkerQueues>,
    pcct: Pcct,
    fib: Arc<Fib>,
    faces: Arc<FaceTable>,
    pool: PktPool,
    counters: Arc<FwdCounters>,
    burst: usize,
    sweep_interval: Duration,
    idle_sleep: Duration,
    next_sweep: Option<Instant>,
}

impl FwdWorker {
    pub fn new(id: u8, queues: Arc<WorkerQueues>, pcct: Pcct, fib: Arc<Fib>, faces: Arc<FaceTable>, pool: PktPool) -> Self {
        Self {
            id,
            queues,
            pcct,
            fib,
            faces,
            pool,
            counters: Arc::new(FwdCounters::default()),
            burst: 64,
            sweep_interval: Duration::from_millis(100),
            idle_sleep: Duration::from_micros(50),
            next_sweep: None,
        }
    }

    pub fn with_timing(mut self, burst: usize, sweep_interval: Duration, idle_sleep: Duration) -> Self {
        self.burst = burst.max(1);
        self.sweep_interval = sweep_interval;
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn counters(&self) -> Arc<FwdCounters> {
        self.counters.clone()
    }

    pub fn pcct_counters(&self) -> Arc<PcctCounters> {
        self.pcct.counters()
    }

    pub fn pcct(&self) -> &Pcct {
        &self.pcct
    }

    pub fn pcct_mut(&mut self) -> &mut Pcct {
        &mut self.pcct
    }

    /// Run until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) {
        info!("Worker {} started", self.id);
        while !stop.load(Ordering::Acquire) {
            if self.run_once(Instant::now()) == 0 {
                std::thread::sleep(self.idle_sleep);
            }
        }
        info!("Worker {} stopped with {} PIT entries", self.id, self.pcct.pit_len());
    }

    /// One iteration: a burst from each ring, disk completions, strategy
    /// timers and, when due, the PIT expiry sweep. Returns the work done.
    pub fn run_once(&mut self, now: Instant) -> usize {
        let mut n = 0;
        for pick in [0, 1, 2] {
            for _ in 0..self.burst {
                let ring = match pick {
                    0 => &self.queues.data,
                    1 => &self.queues.nacks,
                    _ => &self.queues.interests,
                };
                let Some(rx) = ring.pop() else { break };
                self.handle(rx, now);
                n += 1;
            }
        }
        n += self.pcct.poll_disk();
        n += self.run_timers(now);
        if self.next_sweep.map_or(true, |at| now >= at) {
            n += self.pcct.pit_expire(now);
            self.next_sweep = Some(now + self.sweep_interval);
        }
        n
    }

    pub fn handle(&mut self, rx: RxPacket, now: Instant) {
        match rx.packet {
            Packet::Interest(interest) => self.on_interest(rx.face, rx.token, interest, now),
            Packet::Data(data) => self.on_data(rx.face, rx.token, data, now),
            Packet::Nack(nack) => self.on_nack(rx.face, rx.token, nack, now),
        }
    }

    fn on_interest(&mut self, face: FaceId, token: Option<u64>, interest: Interest, now: Instant) {
        bump(&self.counters.n_interests);
        if interest.hop_limit == Some(0) {
            debug!("Interest {} from face {} has no hops left", interest.name, face);
            bump(&self.counters.n_hop_zero);
            return;
        }

        let (pit, is_new) = match self.pcct.pit_insert(&interest, face, token, now) {
            PitInsertResult::CsHit(data) => {
                bump(&self.counters.n_cs_hit);
                self.transmit(face, LpPacket::new(Packet::Data(data), token));
                return;
            }
            PitInsertResult::Full => {
                bump(&self.counters.n_alloc_err);
                return;
            }
            PitInsertResult::DuplicateNonce(_) => {
                bump(&self.counters.n_dup_nonce);
                let nack = Nack::new(interest, NackReason::Duplicate);
                self.transmit(face, LpPacket::new(Packet::Nack(nack), token));
                return;
            }
            PitInsertResult::New(pit) => (pit, true),
            PitInsertResult::Found(pit) => (pit, false),
        };

        let fib = self.fib.clone();
        let guard = epoch::pin();
        let entry = fib.lpm(fib_name(&interest), &guard).filter(|e| e.strategy().is_some());
        let Some(entry) = entry else {
            debug!("No route for {}", interest.name);
            bump(&self.counters.n_no_fib);
            if is_new {
                let _ = self.pcct.pit_erase(pit);
            } else {
                self.pcct.pit_remove_dn(pit, face);
            }
            let nack = Nack::new(interest, NackReason::NoRoute);
            self.transmit(face, LpPacket::new(Packet::Nack(nack), token));
            return;
        };
        bump(&entry.counters().slot(self.id as usize).n_rx_interests);
        self.invoke(pit, StrategyEvent::RxInterest, face, entry, now);
    }

    fn on_data(&mut self, face: FaceId, token: Option<u64>, data: Data, now: Instant) {
        bump(&self.counters.n_data);
        let satisfied = token.and_then(|token| self.pcct.pit_data(token_pcc(token), &data, now));
        let Some(satisfied) = satisfied else {
            debug!("Unsolicited Data {} from face {}", data.name, face);
            bump(&self.counters.n_unsolicited_data);
            return;
        };

        {
            let guard = epoch::pin();
            if let Some(entry) = self.fib.lpm(fib_name(&satisfied.interest), &guard) {
                bump(&entry.counters().slot(self.id as usize).n_rx_data);
            }
        }
        for dn in satisfied.downstreams.into_iter().filter(|dn| dn.expiry > now) {
            self.transmit(dn.face, LpPacket::new(Packet::Data(data.clone()), dn.token));
        }
    }

    fn on_nack(&mut self, face: FaceId, token: Option<u64>, nack: Nack, now: Instant) {
        bump(&self.counters.n_nacks);
        let result = match token {
            Some(token) => self.pcct.pit_nack(token_pcc(token), &nack, face),
            None => PitNackResult::Miss,
        };
        match result {
            PitNackResult::Miss => {
                debug!("Unsolicited Nack {} from face {}", nack.interest.name, face);
                bump(&self.counters.n_unsolicited_nack);
            }
            PitNackResult::Pending(_) => {}
            PitNackResult::AllNacked { pit, reason } => {
                let Some(name) = self.pcct.pit_entry(pit).map(|e| fib_name(e.interest()).clone()) else {
                    return;
                };
                let fib = self.fib.clone();
                let guard = epoch::pin();
                let forwarded = match fib.lpm(&name, &guard) {
                    Some(entry) => {
                        bump(&entry.counters().slot(self.id as usize).n_rx_nacks);
                        self.invoke(pit, StrategyEvent::RxNack, face, entry, now)
                    }
                    None => 0,
                };
                if forwarded == 0 {
                    self.nack_downstreams(pit, reason, now);
                }
            }
        }
    }

    /// Fire due strategy timers. Returns how many fired.
    fn run_timers(&mut self, now: Instant) -> usize {
        let due = self.pcct.pit_due_timers(now);
        let fib = self.fib.clone();
        let guard = epoch::pin();
        for &pit in &due {
            bump(&self.counters.n_timers);
            let Some((name, in_face)) = self.pcct.pit_entry(pit).and_then(|e| {
                let last = e.downstreams().iter().max_by_key(|dn| dn.arrival)?;
                Some((fib_name(e.interest()).clone(), last.face))
            }) else {
                continue;
            };
            if let Some(entry) = fib.lpm(&name, &guard) {
                self.invoke(pit, StrategyEvent::Timer, in_face, entry, now);
            }
        }
        due.len()
    }

    /// Run the strategy of `entry` for a PIT entry and carry out its
    /// decision. Returns how many upstream transmissions it caused.
    fn invoke(&mut self, pit: PitRef, event: StrategyEvent, in_face: FaceId, entry: &FibEntry, now: Instant) -> usize {
        let Some(strategy) = entry.strategy() else {
            return 0;
        };
        let Some(pit_entry) = self.pcct.pit_entry(pit) else {
            return 0;
        };
        let mut ctx = StrategyContext::new(event, pit_entry.interest(), in_face, pit_entry, entry.nexthops(), &*self.faces);
        let action = strategy.invoke(&mut ctx);
        if let Some(after) = ctx.timer() {
            let _ = self.pcct.pit_set_timer(pit, now + after);
        }

        match action {
            StrategyAction::Forward(faces) => {
                let mut n = 0;
                for face in faces {
                    if self.forward(pit, face, entry, now) {
                        n += 1;
                    }
                }
                n
            }
            StrategyAction::Drop => {
                debug!("Strategy {} dropped Interest", strategy.name());
                bump(&self.counters.n_strategy_drop);
                0
            }
            StrategyAction::Nack(reason) => {
                // an aggregated Interest must not cancel upstream requests
                // that other downstreams are still waiting on
                let pending = event == StrategyEvent::RxInterest
                    && self
                        .pcct
                        .pit_entry(pit)
                        .is_some_and(|e| e.upstreams().iter().any(|up| up.nack.is_none()));
                if pending {
                    self.nack_downstream(pit, in_face, reason);
                } else {
                    self.nack_downstreams(pit, reason, now);
                }
                0
            }
        }
    }

    fn forward(&mut self, pit: PitRef, face: FaceId, entry: &FibEntry, now: Instant) -> bool {
        match self.pcct.pit_forward(pit, face, now) {
            Ok(interest) => {
                let token = fw_token(self.id, pit.token());
                let sent = self.transmit(face, LpPacket::new(Packet::Interest(interest), Some(token)));
                if sent {
                    bump(&entry.counters().slot(self.id as usize).n_tx_interests);
                }
                sent
            }
            Err(ForwardError::Suppressed) => {
                bump(&self.counters.n_suppressed);
                false
            }
            Err(ForwardError::HopZero) => {
                bump(&self.counters.n_hop_zero);
                false
            }
            Err(e) => {
                debug!("Not forwarding to face {}: {}", face, e);
                false
            }
        }
    }

    /// Send a Nack to the downstream on `face` and drop its record.
    fn nack_downstream(&mut self, pit: PitRef, face: FaceId, reason: NackReason) {
        let Some(mut rejected) = self.pcct.pit_entry(pit).map(|e| e.interest().clone()) else {
            return;
        };
        let Some(dn) = self.pcct.pit_remove_dn(pit, face) else {
            return;
        };
        debug!("Nack {} to face {}, upstream still pending", rejected.name, face);
        rejected.nonce = dn.nonce;
        rejected.can_be_prefix = dn.can_be_prefix;
        self.transmit(face, LpPacket::new(Packet::Nack(Nack::new(rejected, reason)), dn.token));
    }

    /// Send a Nack to every pending downstream and erase the PIT entry.
    fn nack_downstreams(&mut self, pit: PitRef, reason: NackReason, now: Instant) {
        let Some(entry) = self.pcct.pit_entry(pit) else {
            return;
        };
        let interest = entry.interest().clone();
        let downstreams: Vec<_> = entry.downstreams().iter().filter(|dn| dn.expiry > now).cloned().collect();
        for dn in downstreams {
            let mut rejected = interest.clone();
            rejected.nonce = dn.nonce;
            rejected.can_be_prefix = dn.can_be_prefix;
            self.transmit(dn.face, LpPacket::new(Packet::Nack(Nack::new(rejected, reason)), dn.token));
        }
        let _ = self.pcct.pit_erase(pit);
    }

    /// Encode into a pool buffer and hand it to the face.
    fn transmit(&mut self, face: FaceId, lp: LpPacket) -> bool {
        let Some(mut mbuf) = self.pool.alloc() else {
            bump(&self.counters.n_alloc_err);
            return false;
        };
        if let Err(e) = lp.encode_into(&mut mbuf) {
            debug!("Cannot encode {} for face {}: {}", lp.packet.name(), face, e);
            bump(&self.counters.n_alloc_err);
            return false;
        }
        match self.faces.transmit(face, mbuf) {
            Ok(()) => {
                bump(&self.counters.n_tx);
                true
            }
            Err(_) => {
                bump(&self.counters.n_tx_drop);
                false
            }
        }
    }
}
