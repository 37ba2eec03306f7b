//! Bounded ring of reusable PCM frame slots.
//!
//! The decoder thread takes empty slots from the **free** queue, fills them
//! in place and recycles them to the **data** queue; the renderer thread
//! takes filled slots from the data queue and recycles them back to the free
//! queue once written out. Slot byte buffers are sized once per opened
//! source and reused for every frame, so the hot path neither copies nor
//! allocates.
//!
//! Blocking follows the same `Mutex` + `Condvar` shape as the rest of the
//! pipeline's queues. A blocked take is abandoned with [`UnitBufferRing::interrupt`],
//! which stays in effect until the next [`UnitBufferRing::reset`].

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Number of slots a ring starts with.
pub const DEFAULT_SLOT_COUNT: usize = 5;

/// One reusable frame slot: a byte payload plus the number of audio units it
/// represents.
#[derive(Debug, Default)]
pub struct UnitBuffer {
    pub data: Vec<u8>,
    pub used: usize,
    pub unit_count: u64,
}

impl UnitBuffer {
    /// The valid payload prefix.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.used]
    }
}

struct RingInner {
    free: VecDeque<UnitBuffer>,
    data: VecDeque<UnitBuffer>,
    loaned: usize,
    interrupted: bool,
    count: usize,
}

/// Fixed-size ring with blocking producer and consumer endpoints.
pub struct UnitBufferRing {
    inner: Mutex<RingInner>,
    free_cv: Condvar,
    data_cv: Condvar,
}

impl UnitBufferRing {
    pub fn new(count: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                free: (0..count).map(|_| UnitBuffer::default()).collect(),
                data: VecDeque::new(),
                loaned: 0,
                interrupted: false,
                count,
            }),
            free_cv: Condvar::new(),
            data_cv: Condvar::new(),
        }
    }

    /// Configured slot count.
    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().count
    }

    pub fn free_len(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }

    pub fn data_len(&self) -> usize {
        self.inner.lock().unwrap().data.len()
    }

    /// Replace the slots with `count` fresh ones.
    ///
    /// Only meaningful while no worker holds a loan; the engine calls this
    /// exclusively in the Closed state.
    pub fn set_count(&self, count: usize) {
        if count == 0 {
            tracing::warn!("ignoring request for zero buffer slots");
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        debug_assert_eq!(inner.loaned, 0);
        inner.free = (0..count).map(|_| UnitBuffer::default()).collect();
        inner.data.clear();
        inner.count = count;
    }

    /// Grow every slot's byte buffer to at least `max_bytes` and zero its
    /// used length. Buffers are never shrunk.
    pub fn prepare(&self, max_bytes: usize) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert_eq!(inner.loaned, 0);
        let inner = &mut *inner;
        for buf in inner.free.iter_mut().chain(inner.data.iter_mut()) {
            if buf.data.len() < max_bytes {
                tracing::debug!(
                    old_len = buf.data.len(),
                    new_len = max_bytes,
                    "growing unit buffer"
                );
                buf.data.resize(max_bytes, 0);
            }
            buf.used = 0;
            buf.unit_count = 0;
        }
    }

    /// Block until an empty slot is available and loan it out.
    ///
    /// Returns `None` once the ring has been interrupted.
    pub fn take_free(&self) -> Option<UnitBuffer> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.interrupted {
                return None;
            }
            if let Some(buf) = inner.free.pop_front() {
                inner.loaned += 1;
                return Some(buf);
            }
            inner = self.free_cv.wait(inner).unwrap();
        }
    }

    /// Commit a filled slot to the data queue tail.
    pub fn recycle_free(&self, buf: UnitBuffer) {
        debug_assert!(buf.used > 0);
        let mut inner = self.inner.lock().unwrap();
        inner.data.push_back(buf);
        inner.loaned -= 1;
        drop(inner);
        self.data_cv.notify_one();
    }

    /// Block until a filled slot is available and loan it out.
    ///
    /// Returns `None` once the ring has been interrupted.
    pub fn take_data(&self) -> Option<UnitBuffer> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.interrupted {
                return None;
            }
            if let Some(buf) = inner.data.pop_front() {
                inner.loaned += 1;
                return Some(buf);
            }
            inner = self.data_cv.wait(inner).unwrap();
        }
    }

    /// Return a drained slot to the free queue tail.
    pub fn recycle_data(&self, mut buf: UnitBuffer) {
        buf.used = 0;
        buf.unit_count = 0;
        let mut inner = self.inner.lock().unwrap();
        inner.free.push_back(buf);
        inner.loaned -= 1;
        drop(inner);
        self.free_cv.notify_one();
    }

    /// Put an unconsumed loan back at the head of the free queue.
    pub fn restore_free(&self, buf: UnitBuffer) {
        let mut inner = self.inner.lock().unwrap();
        inner.free.push_front(buf);
        inner.loaned -= 1;
    }

    /// Put an unconsumed loan back at the head of the data queue.
    pub fn restore_data(&self, buf: UnitBuffer) {
        let mut inner = self.inner.lock().unwrap();
        inner.data.push_front(buf);
        inner.loaned -= 1;
    }

    /// Wake every blocked take with `None`. Stays in effect until [`reset`](Self::reset).
    pub fn interrupt(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.interrupted = true;
        drop(inner);
        self.free_cv.notify_all();
        self.data_cv.notify_all();
    }

    /// Reposition every slot into the free queue and clear the interrupt.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert_eq!(inner.loaned, 0);
        while let Some(mut buf) = inner.data.pop_front() {
            buf.used = 0;
            buf.unit_count = 0;
            inner.free.push_back(buf);
        }
        inner.interrupted = false;
        drop(inner);
        self.free_cv.notify_all();
    }
}

impl Default for UnitBufferRing {
    fn default() -> Self {
        Self::new(DEFAULT_SLOT_COUNT)
    }
}
