//! Disk tier of the Content Store.
//!
//! The CS talks to cold storage through [`DiskStore`], whose operations
//! complete through callbacks and never block the caller.
//! [`ThreadedDiskStore`] runs a synchronous [`DiskBackend`] on a dedicated
//! disk-helper thread behind a bounded request queue.

use std::collections::HashMap;
use std::io;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::{debug, warn};
use serde::Serialize;

use crate::error::TableError;

pub type DiskCallback<T> = Box<dyn FnOnce(T) + Send>;

/// Asynchronous slot-addressed packet storage.
///
/// Every callback must run exactly once, also when the request is refused.
pub trait DiskStore: Send + Sync {
    /// Store `wire` in `slot`; `on_done` receives whether it was written.
    fn put(&self, slot: u64, wire: Bytes, on_done: DiskCallback<bool>);

    /// Read `slot`; `on_found` receives `None` when nothing usable is stored.
    fn get(&self, slot: u64, on_found: DiskCallback<Option<Bytes>>);

    fn delete(&self, slot: u64);
}

/// Blocking storage driven by the disk-helper thread.
pub trait DiskBackend: Send + 'static {
    fn write(&mut self, slot: u64, wire: &[u8]) -> io::Result<()>;
    fn read(&mut self, slot: u64) -> io::Result<Option<Bytes>>;
    fn erase(&mut self, slot: u64) -> io::Result<()>;
}

/// Geometry of a disk store: fixed-size slots made of whole blocks.
/// Slot 0 is reserved, so valid slots are `1..=n_slots`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskSizing {
    pub block_size: usize,
    pub blocks_per_slot: usize,
    pub n_slots: u64,
    pub n_blocks: u64,
}

impl DiskSizing {
    pub const DEFAULT_BLOCK_SIZE: usize = 512;

    /// Sizing for `n_slots` packets of at most `max_packet_len` octets.
    pub fn calc(n_slots: u64, max_packet_len: usize, block_size: usize) -> Result<Self, TableError> {
        if n_slots == 0 || max_packet_len == 0 {
            return Err(TableError::InvalidConfig("disk sizing needs slots and a packet length".into()));
        }
        if !block_size.is_power_of_two() {
            return Err(TableError::InvalidConfig(format!(
                "disk block size {block_size} must be a power of two"
            )));
        }
        let blocks_per_slot = max_packet_len.div_ceil(block_size);
        Ok(Self {
            block_size,
            blocks_per_slot,
            n_slots,
            n_blocks: (n_slots + 1) * blocks_per_slot as u64,
        })
    }

    pub fn slot_bytes(&self) -> usize {
        self.block_size * self.blocks_per_slot
    }

    pub fn contains(&self, slot: u64) -> bool {
        (1..=self.n_slots).contains(&slot)
    }
}

/// Backend keeping slots in memory, honoring the sizing limits.
pub struct MemDiskBackend {
    sizing: DiskSizing,
    slots: HashMap<u64, Bytes>,
}

impl MemDiskBackend {
    pub fn new(sizing: DiskSizing) -> Self {
        Self {
            sizing,
            slots: HashMap::new(),
        }
    }

    fn check(&self, slot: u64) -> io::Result<()> {
        if self.sizing.contains(slot) {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::InvalidInput, format!("disk slot {slot} out of range")))
        }
    }
}

impl DiskBackend for MemDiskBackend {
    fn write(&mut self, slot: u64, wire: &[u8]) -> io::Result<()> {
        self.check(slot)?;
        if wire.len() > self.sizing.slot_bytes() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} octets exceed slot size {}", wire.len(), self.sizing.slot_bytes()),
            ));
        }
        self.slots.insert(slot, Bytes::copy_from_slice(wire));
        Ok(())
    }

    fn read(&mut self, slot: u64) -> io::Result<Option<Bytes>> {
        self.check(slot)?;
        Ok(self.slots.get(&slot).cloned())
    }

    fn erase(&mut self, slot: u64) -> io::Result<()> {
        self.check(slot)?;
        self.slots.remove(&slot);
        Ok(())
    }
}

enum DiskRequest {
    Put { slot: u64, wire: Bytes, on_done: DiskCallback<bool> },
    Get { slot: u64, on_found: DiskCallback<Option<Bytes>> },
    Delete { slot: u64 },
}

/// [`DiskStore`] that serves requests on a disk-helper thread.
///
/// A full request queue fails the request immediately.
pub struct ThreadedDiskStore {
    tx: Option<Sender<DiskRequest>>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadedDiskStore {
    pub fn spawn<B: DiskBackend>(backend: B, queue_capacity: usize) -> io::Result<Self> {
        let (tx, rx) = channel::bounded(queue_capacity);
        let thread = std::thread::Builder::new()
            .name("cs-disk".into())
            .spawn(move || serve(backend, rx))?;
        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    fn send(&self, request: DiskRequest) -> Result<(), DiskRequest> {
        match &self.tx {
            Some(tx) => tx.try_send(request).map_err(|e| match e {
                TrySendError::Full(r) | TrySendError::Disconnected(r) => r,
            }),
            None => Err(request),
        }
    }
}

fn serve<B: DiskBackend>(mut backend: B, rx: Receiver<DiskRequest>) {
    for request in rx.iter() {
        match request {
            DiskRequest::Put { slot, wire, on_done } => {
                let result = backend.write(slot, &wire);
                if let Err(e) = &result {
                    warn!("Disk write to slot {} failed: {}", slot, e);
                }
                on_done(result.is_ok());
            }
            DiskRequest::Get { slot, on_found } => {
                let found = backend.read(slot).unwrap_or_else(|e| {
                    warn!("Disk read of slot {} failed: {}", slot, e);
                    None
                });
                on_found(found);
            }
            DiskRequest::Delete { slot } => {
                if let Err(e) = backend.erase(slot) {
                    warn!("Disk erase of slot {} failed: {}", slot, e);
                }
            }
        }
    }
    debug!("Disk helper thread exiting");
}

impl DiskStore for ThreadedDiskStore {
    fn put(&self, slot: u64, wire: Bytes, on_done: DiskCallback<bool>) {
        if let Err(DiskRequest::Put { on_done, .. }) = self.send(DiskRequest::Put { slot, wire, on_done }) {
            on_done(false);
        }
    }

    fn get(&self, slot: u64, on_found: DiskCallback<Option<Bytes>>) {
        if let Err(DiskRequest::Get { on_found, .. }) = self.send(DiskRequest::Get { slot, on_found }) {
            on_found(None);
        }
    }

    fn delete(&self, slot: u64) {
        if self.send(DiskRequest::Delete { slot }).is_err() {
            warn!("Disk request queue full, slot {} not erased", slot);
        }
    }
}

impl Drop for ThreadedDiskStore {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sizing() {
        let sizing = DiskSizing::calc(100, 1500, 512).unwrap();
        assert_eq!(sizing.blocks_per_slot, 3);
        assert_eq!(sizing.n_blocks, 303);
        assert_eq!(sizing.slot_bytes(), 1536);
        assert!(!sizing.contains(0));
        assert!(sizing.contains(100));
        assert!(!sizing.contains(101));
        assert!(DiskSizing::calc(0, 1500, 512).is_err());
        assert!(DiskSizing::calc(10, 1500, 500).is_err());
    }

    #[test]
    fn test_mem_backend_limits() {
        let mut backend = MemDiskBackend::new(DiskSizing::calc(2, 8, 8).unwrap());
        backend.write(1, b"12345678").unwrap();
        assert!(backend.write(1, b"123456789").is_err());
        assert!(backend.write(3, b"x").is_err());
        assert_eq!(backend.read(1).unwrap().as_deref(), Some(&b"12345678"[..]));
        backend.erase(1).unwrap();
        assert_eq!(backend.read(1).unwrap(), None);
    }

    #[test]
    fn test_threaded_store_completes_in_order() {
        let store = ThreadedDiskStore::spawn(MemDiskBackend::new(DiskSizing::calc(4, 64, 64).unwrap()), 16).unwrap();
        let (tx, rx) = channel::unbounded();
        let put_tx = tx.clone();
        store.put(2, Bytes::from_static(b"hello"), Box::new(move |ok| put_tx.send(format!("put {ok}")).unwrap()));
        let get_tx = tx.clone();
        store.get(
            2,
            Box::new(move |found| get_tx.send(format!("get {:?}", found.as_deref())).unwrap()),
        );
        store.delete(2);
        store.get(2, Box::new(move |found| tx.send(format!("get {:?}", found.as_deref())).unwrap()));

        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "put true");
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "get Some([104, 101, 108, 108, 111])");
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "get None");
    }

    #[test]
    fn test_bad_slot_reports_failure() {
        let store = ThreadedDiskStore::spawn(MemDiskBackend::new(DiskSizing::calc(1, 64, 64).unwrap()), 4).unwrap();
        let (tx, rx) = channel::unbounded();
        store.put(9, Bytes::from_static(b"x"), Box::new(move |ok| tx.send(ok).unwrap()));
        assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
}
