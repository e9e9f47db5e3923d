// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Block-command ring: backs `tx_block_request_cmd_queue`,
//! `rx_block_request_cmd_queue` and `tx_block_reply_cmd_queue`.
//!
//! Same readiness-via-trip-parity discipline as
//! [`super::element_ring::ElementRing`], but carrying a full
//! [`BlockCommand`] per slot instead of a single offset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::protocol::{slot_and_trip, BlockCommand};

const SPIN_BUDGET: u32 = 4096;
const BACKOFF_SLEEP: Duration = Duration::from_micros(20);

/// A fixed-capacity ring of block-command words, indexed by a
/// monotonically increasing producer-side counter.
pub struct CommandRing {
    slots: Box<[AtomicU64]>,
    capacity: u32,
}

impl CommandRing {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        let slots = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        Self { slots, capacity }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Producer side: publish a command for `{peer, window, size}` at
    /// counter value `seq`.
    pub fn push(&self, seq: u64, peer: u32, window: u32, size: u32) {
        let (slot, trip) = slot_and_trip(seq, self.capacity);
        let cmd = BlockCommand::new(trip, peer, window, size);
        self.slots[slot as usize].store(cmd.encode(), Ordering::Release);
    }

    /// Non-blocking readiness check for counter value `seq`.
    pub fn try_pop(&self, seq: u64) -> Option<BlockCommand> {
        let (slot, trip) = slot_and_trip(seq, self.capacity);
        let cmd = BlockCommand::decode(self.slots[slot as usize].load(Ordering::Acquire));
        cmd.is_ready_for(trip).then_some(cmd)
    }

    /// Consumer side: busy-wait until `seq` is ready, then return its
    /// decoded command.
    pub fn pop(&self, seq: u64) -> BlockCommand {
        let mut spins = 0u32;
        loop {
            if let Some(cmd) = self.try_pop(seq) {
                return cmd;
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

    #[test]
    fn push_then_pop_round_trips_fields() {
        let ring = CommandRing::new(4);
        ring.push(0, 3, 0, 16_384);
        let cmd = ring.try_pop(0).expect("slot 0 should be ready");
        assert_eq!(cmd.peer, 3);
        assert_eq!(cmd.size, 16_384);
    }

    #[test]
    fn next_trip_supersedes_previous_occupant() {
        let ring = CommandRing::new(2);
        ring.push(0, 1, 0, 10); // slot 0, trip 0
        ring.push(2, 2, 0, 20); // slot 0, trip 1
        assert_eq!(ring.try_pop(0), None);
        let cmd = ring.try_pop(2).unwrap();
        assert_eq!(cmd.peer, 2);
        assert_eq!(cmd.size, 20);
    }
}
