// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bit layout, sequence-number discipline, and state machines shared
//! between the device worker and the host engine over plain memory.
//!
//! - [`element_slot`] — the 32-bit element-request word and its trip-parity
//!   ready-flag.
//! - [`block_command`] — the 64-bit command word used by the three
//!   block-request/reply rings.
//! - [`state`] — the per-token lifecycle of a pending block request.

pub mod block_command;
pub mod element_slot;
pub mod state;

pub use block_command::BlockCommand;
pub use element_slot::{slot_and_trip, trip_flag, ElementSlot};
pub use state::BlockRequestState;
