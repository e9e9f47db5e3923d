// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Block-command word: the 64-bit unit carried by `tx_block_request`,
//! `rx_block_request` and `tx_block_reply`.
//!
//! ```text
//! [63:62] ready_flag (trip parity, 2 bits)
//! [61:40] peer            (22 bits)
//! [39:20] window/reserved (20 bits)
//! [19: 0] size            (20 bits)
//! ```

const SIZE_BITS: u32 = 20;
const WINDOW_BITS: u32 = 20;
const PEER_BITS: u32 = 22;
const TRIP_BITS: u32 = 2;

const SIZE_SHIFT: u32 = 0;
const WINDOW_SHIFT: u32 = SIZE_BITS;
const PEER_SHIFT: u32 = SIZE_BITS + WINDOW_BITS;
const TRIP_SHIFT: u32 = SIZE_BITS + WINDOW_BITS + PEER_BITS;

const SIZE_MASK: u64 = (1 << SIZE_BITS) - 1;
const WINDOW_MASK: u64 = (1 << WINDOW_BITS) - 1;
const PEER_MASK: u64 = (1 << PEER_BITS) - 1;
const TRIP_MASK: u64 = (1 << TRIP_BITS) - 1;

/// Maximum batch size representable in a single block command.
pub const MAX_SIZE: u32 = (1 << SIZE_BITS) - 1;
/// Maximum peer index representable in a single block command.
pub const MAX_PEER: u32 = (1 << PEER_BITS) - 1;

/// A decoded block-request / block-reply command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCommand {
    pub trip: u64,
    pub peer: u32,
    pub window: u32,
    pub size: u32,
}

impl BlockCommand {
    #[must_use]
    pub fn new(trip: u64, peer: u32, window: u32, size: u32) -> Self {
        debug_assert!(peer <= MAX_PEER);
        debug_assert!(size <= MAX_SIZE);
        Self {
            trip,
            peer,
            window,
            size,
        }
    }

    /// Encode into the 64-bit wire representation.
    #[must_use]
    pub fn encode(self) -> u64 {
        ((self.trip & TRIP_MASK) << TRIP_SHIFT)
            | ((u64::from(self.peer) & PEER_MASK) << PEER_SHIFT)
            | ((u64::from(self.window) & WINDOW_MASK) << WINDOW_SHIFT)
            | ((u64::from(self.size) & SIZE_MASK) << SIZE_SHIFT)
    }

    /// Decode from the 64-bit wire representation.
    #[must_use]
    pub fn decode(word: u64) -> Self {
        Self {
            trip: (word >> TRIP_SHIFT) & TRIP_MASK,
            peer: ((word >> PEER_SHIFT) & PEER_MASK) as u32,
            window: ((word >> WINDOW_SHIFT) & WINDOW_MASK) as u32,
            size: ((word >> SIZE_SHIFT) & SIZE_MASK) as u32,
        }
    }

    /// True if the command's trip bits match the expected trip.
    #[must_use]
    pub fn is_ready_for(self, trip: u64) -> bool {
        (self.trip & TRIP_MASK) == (trip & TRIP_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_fields() {
        let cmd = BlockCommand::new(3, 1234, 0, 16_384);
        let word = cmd.encode();
        let back = BlockCommand::decode(word);
        assert_eq!(cmd, back);
    }

    #[test]
    fn fields_do_not_overlap() {
        let cmd = BlockCommand::new(1, MAX_PEER, 0, MAX_SIZE);
        let back = BlockCommand::decode(cmd.encode());
        assert_eq!(back.peer, MAX_PEER);
        assert_eq!(back.size, MAX_SIZE);
    }
}
