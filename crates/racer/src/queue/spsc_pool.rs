// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fixed-capacity single-producer/single-consumer ring, reused across the
//! engine for send-descriptor pools and the block-command queues.
//!
//! # Synchronization
//!
//! `append` publishes a store-release on `write_head`; `pop` spins on a
//! load-acquire of the same cell. The producer never overruns the
//! consumer: every pool in this crate is sized to the maximum amount of
//! outstanding work the protocol allows, so `append` does not need to
//! check for a full ring.
//!
//! `pop` busy-waits for latency, but falls back to a short sleep after a
//! bounded number of spins so a starved caller cannot peg a core
//! indefinitely when the system is oversubscribed (see the open question
//! in SPEC_FULL.md about `SpscPool::pop`'s lack of back-off).
//!
//! With the `trace` feature enabled, `append`/`try_pop` each log the slot
//! index they touched at `trace` level; off by default since a pool this
//! hot makes even a disabled log call's branch and format-arg setup show
//! up in a profile.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const SPIN_BUDGET: u32 = 4096;
const BACKOFF_SLEEP: Duration = Duration::from_micros(20);

/// A fixed-capacity SPSC ring of `T`.
///
/// # Safety
///
/// Correct use requires exactly one producer thread calling `append` and
/// exactly one consumer thread calling `pop`/`try_pop`. `fill_*` methods
/// are for single-threaded initialization only, before the ring is shared.
pub struct SpscPool<T> {
    slots: Box<[UnsafeCell<T>]>,
    capacity: u64,
    read_head: CachePadded<AtomicU64>,
    write_head: CachePadded<AtomicU64>,
}

// SAFETY: access to `slots` is mediated entirely by `read_head`/`write_head`
// acquire-release handoff: the producer never touches a slot the consumer
// has not yet released, and vice versa.
unsafe impl<T: Send> Send for SpscPool<T> {}
unsafe impl<T: Send> Sync for SpscPool<T> {}

impl<T: Clone> SpscPool<T> {
    /// Create an empty pool of the given capacity, to be populated with
    /// `fill_append` before any producer/consumer thread starts.
    pub fn fill_empty(capacity: usize, init: T) -> Self {
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(init.clone()))
            .collect();
        Self {
            slots,
            capacity: capacity as u64,
            read_head: CachePadded::new(AtomicU64::new(0)),
            write_head: CachePadded::new(AtomicU64::new(0)),
        }
    }
}

impl<T> SpscPool<T> {
    /// Create a pool already populated from an iterator that yields exactly
    /// `capacity` items (single-threaded setup, e.g. `0..capacity` for a
    /// pool of reusable descriptor indices).
    pub fn fill_iota(values: impl ExactSizeIterator<Item = T>) -> Self {
        let capacity = values.len() as u64;
        let slots = values.map(UnsafeCell::new).collect();
        Self {
            slots,
            capacity,
            read_head: CachePadded::new(AtomicU64::new(0)),
            write_head: CachePadded::new(AtomicU64::new(capacity)),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Producer-side: publish `t` into the next slot.
    ///
    /// Relies on the caller never appending more than `capacity` more
    /// items than have been popped.
    pub fn append(&self, t: T) {
        let head = self.write_head.load(Ordering::Relaxed);
        let idx = (head % self.capacity) as usize;
        // SAFETY: single producer; this slot was last read (or never
        // written) by the consumer before `read_head` reached `head`.
        unsafe {
            *self.slots[idx].get() = t;
        }
        #[cfg(feature = "trace")]
        log::trace!("spsc_pool: append into slot {idx}");
        self.write_head.store(head + 1, Ordering::Release);
    }

    /// Consumer-side, non-blocking: pop the next item if the producer has
    /// published it.
    pub fn try_pop(&self) -> Option<T>
    where
        T: Clone,
    {
        let read = self.read_head.load(Ordering::Relaxed);
        if read == self.write_head.load(Ordering::Acquire) {
            return None;
        }
        let idx = (read % self.capacity) as usize;
        // SAFETY: `write_head` advanced past `read`, so the producer has
        // released ownership of this slot back to the consumer.
        let item = unsafe { (*self.slots[idx].get()).clone() };
        #[cfg(feature = "trace")]
        log::trace!("spsc_pool: pop from slot {idx}");
        self.read_head.store(read + 1, Ordering::Relaxed);
        Some(item)
    }

    /// Consumer-side, blocking: busy-wait (with bounded spin + sleep
    /// fallback) until the producer has published the next item.
    pub fn pop(&self) -> T
    where
        T: Clone,
    {
        let mut spins = 0u32;
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            if spins < SPIN_BUDGET {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::sleep(BACKOFF_SLEEP);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn append_then_pop_preserves_order() {
        let pool: SpscPool<u32> = SpscPool::fill_empty(4, 0);
        for i in 0..4 {
            pool.append(i);
        }
        for i in 0..4 {
            assert_eq!(pool.pop(), i);
        }
    }

    #[test]
    fn fill_iota_is_immediately_consumable() {
        let pool: SpscPool<u32> = SpscPool::fill_iota(0..8);
        let got: Vec<u32> = (0..8).map(|_| pool.pop()).collect();
        assert_eq!(got, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn cross_thread_handoff() {
        let pool = Arc::new(SpscPool::<u32>::fill_empty(64, 0));
        let producer_pool = pool.clone();
        let producer = thread::spawn(move || {
            for i in 0..1000 {
                // Occasional jitter so the consumer sometimes catches the
                // ring empty and has to spin, not just race ahead of a
                // producer that never yields.
                if fastrand::usize(..32) == 0 {
                    thread::yield_now();
                }
                producer_pool.append(i);
            }
        });
        let mut got = Vec::with_capacity(1000);
        for _ in 0..1000 {
            got.push(pool.pop());
        }
        producer.join().unwrap();
        assert_eq!(got, (0..1000).collect::<Vec<_>>());
    }
}
