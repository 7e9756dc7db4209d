//! Pooled packet buffers with headroom and tailroom.
//!
//! A [`PktPool`] pre-allocates every buffer up front and hands them out
//! through a lock-free freelist. An [`Mbuf`] returns its storage to the pool
//! when dropped, so the steady state performs no heap allocation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use log::debug;

use crate::error::Error;

struct PoolInner {
    free: ArrayQueue<Vec<u8>>,
    buf_size: usize,
    headroom: usize,
    capacity: usize,
    alloc_failures: AtomicU64,
}

/// Fixed-size pool of packet buffers.
#[derive(Clone)]
pub struct PktPool {
    inner: Arc<PoolInner>,
}

impl PktPool {
    /// Create a pool of `capacity` buffers of `buf_size` octets, each
    /// starting with `headroom` octets reserved for prepended headers.
    pub fn new(capacity: usize, buf_size: usize, headroom: usize) -> Result<Self, Error> {
        if capacity == 0 || headroom >= buf_size {
            return Err(Error::NoRoom {
                need: headroom,
                have: buf_size,
            });
        }
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            free.push(vec![0u8; buf_size]).map_err(|_| Error::PoolExhausted)?;
        }
        debug!("Packet pool of {} buffers, {} octets each, {} headroom", capacity, buf_size, headroom);
        Ok(Self {
            inner: Arc::new(PoolInner {
                free,
                buf_size,
                headroom,
                capacity,
                alloc_failures: AtomicU64::new(0),
            }),
        })
    }

    /// Take a buffer from the pool. Exhaustion is counted, never waited on.
    pub fn alloc(&self) -> Option<Mbuf> {
        match self.inner.free.pop() {
            Some(buf) => Some(Mbuf {
                buf: Some(buf),
                head: self.inner.headroom,
                tail: self.inner.headroom,
                pool: self.inner.clone(),
            }),
            None => {
                self.inner.alloc_failures.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Allocate a buffer and copy `payload` into it.
    pub fn alloc_from(&self, payload: &[u8]) -> Result<Mbuf, Error> {
        let mut mbuf = self.alloc().ok_or(Error::PoolExhausted)?;
        mbuf.append(payload.len())?.copy_from_slice(payload);
        Ok(mbuf)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn available(&self) -> usize {
        self.inner.free.len()
    }

    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }

    pub fn alloc_failures(&self) -> u64 {
        self.inner.alloc_failures.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for PktPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PktPool")
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .field("buf_size", &self.inner.buf_size)
            .finish()
    }
}

/// A packet buffer borrowed from a [`PktPool`].
///
/// Valid octets are `buf[head..tail]`; `head` is the headroom and
/// `buf.len() - tail` the tailroom.
pub struct Mbuf {
    buf: Option<Vec<u8>>,
    head: usize,
    tail: usize,
    pool: Arc<PoolInner>,
}

impl Mbuf {
    fn storage(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }

    fn storage_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.head
    }

    pub fn headroom(&self) -> usize {
        self.head
    }

    pub fn tailroom(&self) -> usize {
        self.storage().len() - self.tail
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage()[self.head..self.tail]
    }

    /// Grow the packet at the front by `n` octets and return them.
    pub fn prepend(&mut self, n: usize) -> Result<&mut [u8], Error> {
        if n > self.head {
            return Err(Error::NoRoom {
                need: n,
                have: self.head,
            });
        }
        self.head -= n;
        let (head, end) = (self.head, self.head + n);
        Ok(&mut self.storage_mut()[head..end])
    }

    /// Grow the packet at the back by `n` octets and return them.
    pub fn append(&mut self, n: usize) -> Result<&mut [u8], Error> {
        let room = self.tailroom();
        if n > room {
            return Err(Error::NoRoom { need: n, have: room });
        }
        let start = self.tail;
        self.tail += n;
        Ok(&mut self.storage_mut()[start..start + n])
    }

    /// Strip `n` octets from the front.
    pub fn adj(&mut self, n: usize) -> Result<(), Error> {
        if n > self.len() {
            return Err(Error::NoRoom {
                need: n,
                have: self.len(),
            });
        }
        self.head += n;
        Ok(())
    }
}

impl Drop for Mbuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            // the freelist has room for every buffer the pool created
            let _ = self.pool.free.push(buf);
        }
    }
}

impl fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mbuf")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}
