// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fixed-capacity ring types shared by the device worker and the host
//! engine's progress threads.

pub mod command_ring;
pub mod element_ring;
pub mod spsc_pool;

pub use command_ring::CommandRing;
pub use element_ring::ElementRing;
pub use spsc_pool::SpscPool;
