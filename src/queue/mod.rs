//! # Bounded Lock-Free SPSC Queue
//!
//! Backpressure buffer between the feed thread and the columnar writer
//! thread. A classic single-producer/single-consumer ring over a
//! power-of-two slot array:
//!
//! - `push` never blocks; it returns `false` when the ring is full so the
//!   producer can count the drop and move on.
//! - `pop` never blocks; it returns `None` when the ring is empty.
//! - Ordering is strictly FIFO, with no coalescing or reordering.
//!
//! ## Memory Layout
//!
//! The head (consumer) and tail (producer) indices live on separate cache
//! lines so the two threads never false-share. Additionally, each handle
//! keeps a cached copy of the *other* side's index: the producer only
//! re-reads the consumer's head when the ring looks full, and the consumer
//! only re-reads the producer's tail when the ring looks empty. On the fast
//! path each side touches one shared cache line, its own.
//!
//! ## Safety Model
//!
//! Single-producer/single-consumer discipline is enforced by construction:
//! [`bounded`] returns one [`Producer`] and one [`Consumer`], neither of
//! which is `Clone`, and both ends require `&mut self`. Slot handoff is
//! synchronized by the release store of the index that publishes it and the
//! acquire load on the opposite side.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Pads an atomic index out to its own cache line.
#[repr(align(64))]
struct CacheLine(AtomicUsize);

struct Ring<T> {
    mask: usize,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Next slot to pop; owned by the consumer, read by the producer.
    head: CacheLine,
    /// Next slot to push; owned by the producer, read by the consumer.
    tail: CacheLine,
}

// SAFETY: slots are plain storage; every slot is accessed by exactly one
// side at a time, ordered by the release/acquire pair on head/tail.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let mut head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        while head != tail {
            let slot = &self.slots[head & self.mask];
            // SAFETY: slots in [head, tail) were pushed and never popped.
            unsafe { (*slot.get()).assume_init_drop() };
            head = head.wrapping_add(1);
        }
    }
}

/// Creates a bounded SPSC ring with at least `slots` slots (rounded up to a
/// power of two, minimum 2).
pub fn bounded<T>(slots: usize) -> (Producer<T>, Consumer<T>) {
    let capacity = slots.max(2).next_power_of_two();
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let ring = Arc::new(Ring {
        mask: capacity - 1,
        slots,
        head: CacheLine(AtomicUsize::new(0)),
        tail: CacheLine(AtomicUsize::new(0)),
    });

    (
        Producer {
            ring: Arc::clone(&ring),
            head_cache: 0,
        },
        Consumer {
            ring,
            tail_cache: 0,
        },
    )
}

/// Producing end of the ring. Not cloneable; exactly one producer exists.
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
    head_cache: usize,
}

impl<T> Producer<T> {
    /// Enqueues `value`. Returns `false` (dropping nothing into the ring)
    /// when the ring is full. Wait-free.
    #[inline]
    pub fn push(&mut self, value: T) -> bool {
        let tail = self.ring.tail.0.load(Ordering::Relaxed);
        if tail.wrapping_sub(self.head_cache) >= self.ring.capacity() {
            self.head_cache = self.ring.head.0.load(Ordering::Acquire);
            if tail.wrapping_sub(self.head_cache) >= self.ring.capacity() {
                return false;
            }
        }

        let slot = &self.ring.slots[tail & self.ring.mask];
        // SAFETY: the slot is vacant (tail - head < capacity) and the
        // consumer will not read it until the release store below.
        unsafe { (*slot.get()).write(value) };
        self.ring.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Number of occupied slots (approximate under concurrent pop).
    pub fn len(&self) -> usize {
        let tail = self.ring.tail.0.load(Ordering::Relaxed);
        let head = self.ring.head.0.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// Consuming end of the ring. Not cloneable; exactly one consumer exists.
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
    tail_cache: usize,
}

impl<T> Consumer<T> {
    /// Dequeues the oldest value, or `None` when the ring is empty.
    /// Wait-free.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let head = self.ring.head.0.load(Ordering::Relaxed);
        if head == self.tail_cache {
            self.tail_cache = self.ring.tail.0.load(Ordering::Acquire);
            if head == self.tail_cache {
                return None;
            }
        }

        let slot = &self.ring.slots[head & self.ring.mask];
        // SAFETY: the slot was published by the producer's release store of
        // tail and will not be reused until the release store below.
        let value = unsafe { (*slot.get()).assume_init_read() };
        self.ring.head.0.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// True when every pushed value has been popped. Used by the writer to
    /// decide that a stop request has been fully drained.
    pub fn is_empty(&self) -> bool {
        let head = self.ring.head.0.load(Ordering::Relaxed);
        head == self.ring.tail.0.load(Ordering::Acquire)
    }
}
