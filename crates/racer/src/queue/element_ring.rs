// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-peer element-request ring: `tx_element_request_queue[p][0..Q)` and
//! its inbound counterpart `rx_element_request_queue`.
//!
//! Unlike [`super::spsc_pool::SpscPool`], this ring does not track a
//! separate head/tail pair. Readiness lives inside the slot's own
//! [`ElementSlot`] encoding, stamped with the trip (wrap-count) the
//! producer believes the slot belongs to — the same parity trick used by
//! the block-command rings, just at 32 bits instead of 64.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::protocol::{slot_and_trip, ElementSlot};

const SPIN_BUDGET: u32 = 4096;
const BACKOFF_SLEEP: Duration = Duration::from_micros(20);

/// A fixed-capacity ring of element-request slots, indexed by a
/// monotonically increasing sequence number rather than a rolling
/// head/tail.
pub struct ElementRing {
    slots: Box<[AtomicU32]>,
    capacity: u32,
}

impl ElementRing {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        let slots = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self { slots, capacity }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Producer side: publish `offset` at sequence number `seq`.
    pub fn publish(&self, seq: u64, offset: u32) {
        let (slot, trip) = slot_and_trip(seq, self.capacity);
        let encoded = ElementSlot::encode(offset, trip);
        self.slots[slot as usize].store(encoded.0, Ordering::Release);
    }

    /// Non-blocking readiness check for sequence number `seq`.
    pub fn try_read(&self, seq: u64) -> Option<u32> {
        let (slot, trip) = slot_and_trip(seq, self.capacity);
        let encoded = ElementSlot(self.slots[slot as usize].load(Ordering::Acquire));
        encoded.is_ready_for(trip).then(|| encoded.offset())
    }

    /// Consumer side: busy-wait until `seq` is ready, then return its
    /// offset.
    pub fn spin_read(&self, seq: u64) -> u32 {
        let mut spins = 0u32;
        loop {
            if let Some(offset) = self.try_read(seq) {
                return offset;
            }
            if spins < SPIN_BUDGET {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::sleep(BACKOFF_SLEEP);
            }
        }
    }

    /// Re-store the slot at `seq` with a `SeqCst` fence, forcing the write
    /// to become visible to a peer that will read it across the transport
    /// rather than merely across threads in this process. The aggregator
    /// calls this immediately before folding the slot into a block
    /// request, per the "write-then-publish-then-send" ordering.
    pub fn republish(&self, seq: u64) {
        let (slot, _) = slot_and_trip(seq, self.capacity);
        let word = self.slots[slot as usize].load(Ordering::SeqCst);
        self.slots[slot as usize].store(word, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpublished_slot_is_not_ready() {
        let ring = ElementRing::new(4);
        assert_eq!(ring.try_read(0), None);
    }

    #[test]
    fn publish_then_read_round_trips() {
        let ring = ElementRing::new(4);
        ring.publish(0, 7);
        ring.publish(5, 99);
        assert_eq!(ring.try_read(0), Some(7));
        assert_eq!(ring.try_read(5), Some(99));
    }

    #[test]
    fn stale_trip_is_rejected_after_wrap() {
        let ring = ElementRing::new(4);
        ring.publish(1, 42); // slot 1, trip 0
        assert_eq!(ring.try_read(5), None); // slot 1, trip 1 — not yet published
        ring.publish(5, 43);
        assert_eq!(ring.try_read(1), None); // trip 0 is now stale
        assert_eq!(ring.try_read(5), Some(43));
    }
}
