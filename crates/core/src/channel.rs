//! Bounded hand-off queue between the capture thread and the consumer.
//!
//! ```text
//! capture thread --push--> [ oldest ... newest ] --try_pop--> consumer
//!                          |<--- capacity N --->|
//! ```
//!
//! Neither side ever blocks. When the queue is full, `push` evicts the
//! oldest element before appending, so a slow consumer always sees the most
//! recent `N` frames in capture order rather than stalling the stream.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::codec::Frame;

/// Default number of frames buffered between capture and display.
pub const DEFAULT_CAPACITY: usize = 32;

struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    evicted: AtomicU64,
}

/// Drop-oldest bounded FIFO.
///
/// Cloning yields another handle to the same queue; give one to the
/// producer and one to the consumer. All mutation happens under one
/// `parking_lot::Mutex`, so stray extra producers are serialized too.
pub struct FrameChannel<T = Frame> {
    inner: Arc<Inner<T>>,
}

impl<T> FrameChannel<T> {
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame channel capacity must be non-zero");
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                evicted: AtomicU64::new(0),
            }),
        }
    }

    /// Append `item`, evicting and returning the oldest element if full.
    pub fn push(&self, item: T) -> Option<T> {
        let mut queue = self.inner.queue.lock();
        let evicted = if queue.len() >= self.inner.capacity {
            self.inner.evicted.fetch_add(1, Ordering::Relaxed);
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(item);
        evicted
    }

    /// Take the oldest element, or `None` immediately if empty.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Total elements dropped by overflow since creation.
    pub fn evicted(&self) -> u64 {
        self.inner.evicted.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.inner.queue.lock().clear();
    }
}

impl<T> Clone for FrameChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for FrameChannel<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T> fmt::Debug for FrameChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameChannel")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("evicted", &self.evicted())
            .finish()
    }
}
